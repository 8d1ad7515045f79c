//! PostgreSQL ledger backend

use super::{Ledger, LedgerStats};
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{
    BurnEvent, IntentStatus, IntentUpdate, LockEvent, MintIntent, UnlockIntent,
};
use crate::types::{Asset, Chain, H256};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Ledger persisted in PostgreSQL
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub async fn connect(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        const MIGRATIONS: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS scan_cursors (
                watcher TEXT PRIMARY KEY,
                height BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS lock_events (
                id TEXT PRIMARY KEY,
                chain TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                amount NUMERIC(39, 0) NOT NULL,
                recipient TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                tx_index INTEGER NOT NULL,
                block_height BIGINT NOT NULL,
                block_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mint_intents (
                seq BIGSERIAL UNIQUE,
                id TEXT PRIMARY KEY REFERENCES lock_events (id),
                chain TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                amount NUMERIC(39, 0) NOT NULL,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL,
                mint_hash TEXT,
                message TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_mint_intents_status
            ON mint_intents (status, seq)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS burn_events (
                ckb_tx_hash TEXT PRIMARY KEY,
                sender_lock_hash TEXT NOT NULL,
                chain TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                amount NUMERIC(39, 0) NOT NULL,
                recipient TEXT NOT NULL,
                block_number BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS unlock_intents (
                seq BIGSERIAL UNIQUE,
                ckb_tx_hash TEXT PRIMARY KEY REFERENCES burn_events (ckb_tx_hash),
                chain TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                amount NUMERIC(39, 0) NOT NULL,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL,
                tx_hash TEXT,
                message TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_unlock_intents_chain_status
            ON unlock_intents (chain, status, seq)
            "#,
        ];

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database migrations complete");
        Ok(())
    }

    /// Check `update` against the locked current statuses, then apply it
    async fn update_intents(
        &self,
        table: &'static str,
        key_column: &'static str,
        hash_column: &'static str,
        keys: Vec<String>,
        update: &IntentUpdate,
    ) -> RelayerResult<()> {
        let keys: Vec<String> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {key_column} AS key, status FROM {table} WHERE {key_column} = ANY($1) FOR UPDATE"
        ))
        .bind(&keys)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() != keys.len() {
            return Err(RelayerError::InvalidStateTransition {
                from: format!("{} missing intents", keys.len() - rows.len()),
                to: update.status.to_string(),
            });
        }
        for row in &rows {
            let current: IntentStatus = row.try_get::<String, _>("status")?.parse()?;
            if !current.can_transition_to(update.status) {
                return Err(RelayerError::InvalidStateTransition {
                    from: current.to_string(),
                    to: update.status.to_string(),
                });
            }
        }

        sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET status = $1,
                {hash_column} = COALESCE($2, {hash_column}),
                message = COALESCE($3, message),
                updated_at = NOW()
            WHERE {key_column} = ANY($4)
            "#
        ))
        .bind(update.status.as_str())
        .bind(update.tx_hash.as_deref())
        .bind(update.message.as_deref())
        .bind(&keys)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(table, count = keys.len(), status = %update.status, "Updated intents");
        Ok(())
    }

    async fn insert_or_duplicate(
        tx: &mut Transaction<'_, Postgres>,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
        id: String,
    ) -> RelayerResult<()> {
        let result = query.execute(&mut **tx).await?;
        if result.rows_affected() == 0 {
            return Err(RelayerError::DuplicateEvent { id });
        }
        Ok(())
    }

    async fn status_counts(&self, table: &'static str) -> RelayerResult<super::StatusCounts> {
        let rows = sqlx::query(&format!(
            "SELECT status, COUNT(*) AS count FROM {table} GROUP BY status"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = super::StatusCounts::default();
        for row in rows {
            let status: IntentStatus = row.try_get::<String, _>("status")?.parse()?;
            counts.add(status, row.try_get::<i64, _>("count")? as u64);
        }
        Ok(counts)
    }
}

const MINT_COLUMNS: &str = "id, chain, asset_id, amount::TEXT AS amount, recipient, status, \
                            mint_hash, message, created_at, updated_at";

const UNLOCK_COLUMNS: &str = "ckb_tx_hash, chain, asset_id, amount::TEXT AS amount, recipient, \
                              status, tx_hash, message, created_at, updated_at";

fn parse_amount(raw: &str) -> RelayerResult<u128> {
    raw.parse()
        .map_err(|e| RelayerError::Internal(format!("stored amount {raw} is not a u128: {e}")))
}

fn parse_h256(raw: &str) -> RelayerResult<H256> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| RelayerError::Internal(format!("stored hash {raw}: {e}")))?;
    if bytes.len() != 32 {
        return Err(RelayerError::Internal(format!("stored hash {raw} is not 32 bytes")));
    }
    Ok(H256::from_slice(&bytes))
}

fn row_asset(row: &PgRow) -> RelayerResult<(Chain, Asset)> {
    let chain: Chain = row.try_get::<String, _>("chain")?.parse()?;
    let asset = Asset::new(chain, row.try_get::<String, _>("asset_id")?)?;
    Ok((chain, asset))
}

fn mint_from_row(row: &PgRow) -> RelayerResult<MintIntent> {
    let (chain, asset) = row_asset(row)?;
    Ok(MintIntent {
        id: row.try_get("id")?,
        chain,
        asset,
        amount: parse_amount(&row.try_get::<String, _>("amount")?)?,
        recipient: row.try_get("recipient")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        mint_hash: row.try_get("mint_hash")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn unlock_from_row(row: &PgRow) -> RelayerResult<UnlockIntent> {
    let (chain, asset) = row_asset(row)?;
    Ok(UnlockIntent {
        ckb_tx_hash: parse_h256(&row.try_get::<String, _>("ckb_tx_hash")?)?,
        chain,
        asset,
        amount: parse_amount(&row.try_get::<String, _>("amount")?)?,
        recipient: row.try_get("recipient")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        tx_hash: row.try_get("tx_hash")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create_lock_and_mint(
        &self,
        event: &LockEvent,
        intent: &MintIntent,
    ) -> RelayerResult<()> {
        let mut tx = self.pool.begin().await?;

        let insert_event = sqlx::query(
            r#"
            INSERT INTO lock_events
                (id, chain, asset_id, amount, recipient, tx_hash, tx_index, block_height, block_hash)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(event.chain.as_str())
        .bind(event.asset.id())
        .bind(event.amount.to_string())
        .bind(&event.recipient)
        .bind(&event.tx_hash)
        .bind(event.tx_index as i32)
        .bind(event.block_height as i64)
        .bind(&event.block_hash);
        Self::insert_or_duplicate(&mut tx, insert_event, event.id.clone()).await?;

        sqlx::query(
            r#"
            INSERT INTO mint_intents
                (id, chain, asset_id, amount, recipient, status, mint_hash, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&intent.id)
        .bind(intent.chain.as_str())
        .bind(intent.asset.id())
        .bind(intent.amount.to_string())
        .bind(&intent.recipient)
        .bind(intent.status.as_str())
        .bind(intent.mint_hash.as_deref())
        .bind(intent.message.as_deref())
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_burn_and_unlock(
        &self,
        event: &BurnEvent,
        intent: &UnlockIntent,
    ) -> RelayerResult<()> {
        let hash = format!("{:#x}", event.ckb_tx_hash);
        let mut tx = self.pool.begin().await?;

        let insert_event = sqlx::query(
            r#"
            INSERT INTO burn_events
                (ckb_tx_hash, sender_lock_hash, chain, asset_id, amount, recipient, block_number)
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6, $7)
            ON CONFLICT (ckb_tx_hash) DO NOTHING
            "#,
        )
        .bind(hash.clone())
        .bind(format!("{:#x}", event.sender_lock_hash))
        .bind(event.chain.as_str())
        .bind(event.asset.id())
        .bind(event.amount.to_string())
        .bind(&event.recipient)
        .bind(event.block_number as i64);
        Self::insert_or_duplicate(&mut tx, insert_event, hash.clone()).await?;

        sqlx::query(
            r#"
            INSERT INTO unlock_intents
                (ckb_tx_hash, chain, asset_id, amount, recipient, status, tx_hash, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&hash)
        .bind(intent.chain.as_str())
        .bind(intent.asset.id())
        .bind(intent.amount.to_string())
        .bind(&intent.recipient)
        .bind(intent.status.as_str())
        .bind(intent.tx_hash.as_deref())
        .bind(intent.message.as_deref())
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn todo_mints(&self, limit: usize) -> RelayerResult<Vec<MintIntent>> {
        let rows = sqlx::query(&format!(
            "SELECT {MINT_COLUMNS} FROM mint_intents WHERE status = 'todo' ORDER BY seq LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mint_from_row).collect()
    }

    async fn todo_unlocks(&self, chain: Chain, limit: usize) -> RelayerResult<Vec<UnlockIntent>> {
        let rows = sqlx::query(&format!(
            "SELECT {UNLOCK_COLUMNS} FROM unlock_intents \
             WHERE status = 'todo' AND chain = $1 ORDER BY seq LIMIT $2"
        ))
        .bind(chain.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(unlock_from_row).collect()
    }

    async fn update_mints(&self, ids: &[String], update: &IntentUpdate) -> RelayerResult<()> {
        self.update_intents("mint_intents", "id", "mint_hash", ids.to_vec(), update)
            .await
    }

    async fn update_unlocks(
        &self,
        burn_hashes: &[H256],
        update: &IntentUpdate,
    ) -> RelayerResult<()> {
        let keys = burn_hashes.iter().map(|h| format!("{h:#x}")).collect();
        self.update_intents("unlock_intents", "ckb_tx_hash", "tx_hash", keys, update)
            .await
    }

    async fn pending_unlocks_for(&self, burn_hashes: &[H256]) -> RelayerResult<Vec<UnlockIntent>> {
        let keys: Vec<String> = burn_hashes.iter().map(|h| format!("{h:#x}")).collect();
        let rows = sqlx::query(&format!(
            "SELECT {UNLOCK_COLUMNS} FROM unlock_intents \
             WHERE ckb_tx_hash = ANY($1) AND status = 'pending' ORDER BY seq"
        ))
        .bind(&keys)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(unlock_from_row).collect()
    }

    async fn get_mint(&self, id: &str) -> RelayerResult<Option<MintIntent>> {
        let row = sqlx::query(&format!("SELECT {MINT_COLUMNS} FROM mint_intents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(mint_from_row).transpose()
    }

    async fn get_unlock(&self, burn_hash: &H256) -> RelayerResult<Option<UnlockIntent>> {
        let row = sqlx::query(&format!(
            "SELECT {UNLOCK_COLUMNS} FROM unlock_intents WHERE ckb_tx_hash = $1"
        ))
        .bind(format!("{burn_hash:#x}"))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(unlock_from_row).transpose()
    }

    async fn get_cursor(&self, watcher: &str) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT height FROM scan_cursors WHERE watcher = $1")
            .bind(watcher)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.try_get::<i64, _>("height"))
            .transpose()?
            .map(|h| h as u64))
    }

    async fn advance_cursor(&self, watcher: &str, height: u64) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO scan_cursors (watcher, height, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (watcher)
            DO UPDATE SET height = EXCLUDED.height, updated_at = NOW()
            WHERE scan_cursors.height + 1 = EXCLUDED.height
            "#,
        )
        .bind(watcher)
        .bind(height as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayerError::InvalidCursor {
                watcher: watcher.to_string(),
                current: self.get_cursor(watcher).await?,
                requested: height,
            });
        }

        debug!(watcher, height, "Advanced scan cursor");
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<LedgerStats> {
        Ok(LedgerStats {
            mints: self.status_counts("mint_intents").await?,
            unlocks: self.status_counts("unlock_intents").await?,
        })
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_parse_with_or_without_prefix() {
        let hash = H256::repeat_byte(0x5a);
        assert_eq!(parse_h256(&format!("{hash:#x}")).unwrap(), hash);
        assert_eq!(parse_h256(&format!("{hash:x}")).unwrap(), hash);
        assert!(parse_h256("0x1234").is_err());
    }

    #[test]
    fn amounts_beyond_u64_survive_text_roundtrip() {
        let amount = u128::from(u64::MAX) * 1_000;
        assert_eq!(parse_amount(&amount.to_string()).unwrap(), amount);
        assert!(parse_amount("-1").is_err());
    }
}
