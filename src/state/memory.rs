//! In-process ledger backend

use super::{Ledger, LedgerStats};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{
    BurnEvent, IntentStatus, IntentUpdate, LockEvent, MintIntent, UnlockIntent,
};
use crate::types::{Chain, H256};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Records {
    locks: HashMap<String, LockEvent>,
    mints: Vec<MintIntent>,
    mint_index: HashMap<String, usize>,
    burns: HashMap<H256, BurnEvent>,
    unlocks: Vec<UnlockIntent>,
    unlock_index: HashMap<H256, usize>,
}

/// Ledger kept in memory; lost on restart
#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<Records>,
    cursors: DashMap<String, u64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve every key to an index and check the transition before touching
/// anything, so a bad entry leaves the whole batch unchanged.
fn plan_update<K, F>(
    keys: &[K],
    index: &HashMap<K, usize>,
    status_of: F,
    update: &IntentUpdate,
) -> RelayerResult<Vec<usize>>
where
    K: std::hash::Hash + Eq + Ord + std::fmt::Debug,
    F: Fn(usize) -> IntentStatus,
{
    let unique: BTreeSet<&K> = keys.iter().collect();
    let mut positions = Vec::with_capacity(unique.len());
    for key in unique {
        let pos = *index
            .get(key)
            .ok_or_else(|| RelayerError::InvalidStateTransition {
                from: format!("missing {key:?}"),
                to: update.status.to_string(),
            })?;
        let current = status_of(pos);
        if !current.can_transition_to(update.status) {
            return Err(RelayerError::InvalidStateTransition {
                from: current.to_string(),
                to: update.status.to_string(),
            });
        }
        positions.push(pos);
    }
    Ok(positions)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_lock_and_mint(
        &self,
        event: &LockEvent,
        intent: &MintIntent,
    ) -> RelayerResult<()> {
        let mut records = self.records.write().await;
        if records.locks.contains_key(&event.id) {
            return Err(RelayerError::DuplicateEvent {
                id: event.id.clone(),
            });
        }
        records.locks.insert(event.id.clone(), event.clone());
        let pos = records.mints.len();
        records.mints.push(intent.clone());
        records.mint_index.insert(intent.id.clone(), pos);
        Ok(())
    }

    async fn create_burn_and_unlock(
        &self,
        event: &BurnEvent,
        intent: &UnlockIntent,
    ) -> RelayerResult<()> {
        let mut records = self.records.write().await;
        if records.burns.contains_key(&event.ckb_tx_hash) {
            return Err(RelayerError::DuplicateEvent {
                id: format!("{:#x}", event.ckb_tx_hash),
            });
        }
        records.burns.insert(event.ckb_tx_hash, event.clone());
        let pos = records.unlocks.len();
        records.unlocks.push(intent.clone());
        records.unlock_index.insert(intent.ckb_tx_hash, pos);
        Ok(())
    }

    async fn todo_mints(&self, limit: usize) -> RelayerResult<Vec<MintIntent>> {
        let records = self.records.read().await;
        Ok(records
            .mints
            .iter()
            .filter(|m| m.status == IntentStatus::Todo)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn todo_unlocks(&self, chain: Chain, limit: usize) -> RelayerResult<Vec<UnlockIntent>> {
        let records = self.records.read().await;
        Ok(records
            .unlocks
            .iter()
            .filter(|u| u.status == IntentStatus::Todo && u.chain == chain)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_mints(&self, ids: &[String], update: &IntentUpdate) -> RelayerResult<()> {
        let mut records = self.records.write().await;
        let positions = plan_update(
            ids,
            &records.mint_index,
            |pos| records.mints[pos].status,
            update,
        )?;
        for pos in positions {
            records.mints[pos].apply(update);
        }
        debug!(count = ids.len(), status = %update.status, "Updated mint intents");
        Ok(())
    }

    async fn update_unlocks(
        &self,
        burn_hashes: &[H256],
        update: &IntentUpdate,
    ) -> RelayerResult<()> {
        let mut records = self.records.write().await;
        let positions = plan_update(
            burn_hashes,
            &records.unlock_index,
            |pos| records.unlocks[pos].status,
            update,
        )?;
        for pos in positions {
            records.unlocks[pos].apply(update);
        }
        debug!(count = burn_hashes.len(), status = %update.status, "Updated unlock intents");
        Ok(())
    }

    async fn pending_unlocks_for(&self, burn_hashes: &[H256]) -> RelayerResult<Vec<UnlockIntent>> {
        let records = self.records.read().await;
        Ok(burn_hashes
            .iter()
            .filter_map(|hash| records.unlock_index.get(hash))
            .map(|pos| &records.unlocks[*pos])
            .filter(|u| u.status == IntentStatus::Pending)
            .cloned()
            .collect())
    }

    async fn get_mint(&self, id: &str) -> RelayerResult<Option<MintIntent>> {
        let records = self.records.read().await;
        Ok(records.mint_index.get(id).map(|pos| records.mints[*pos].clone()))
    }

    async fn get_unlock(&self, burn_hash: &H256) -> RelayerResult<Option<UnlockIntent>> {
        let records = self.records.read().await;
        Ok(records
            .unlock_index
            .get(burn_hash)
            .map(|pos| records.unlocks[*pos].clone()))
    }

    async fn get_cursor(&self, watcher: &str) -> RelayerResult<Option<u64>> {
        Ok(self.cursors.get(watcher).map(|h| *h))
    }

    async fn advance_cursor(&self, watcher: &str, height: u64) -> RelayerResult<()> {
        match self.cursors.entry(watcher.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current.checked_add(1) != Some(height) {
                    return Err(RelayerError::InvalidCursor {
                        watcher: watcher.to_string(),
                        current: Some(current),
                        requested: height,
                    });
                }
                entry.insert(height);
            }
            Entry::Vacant(entry) => {
                entry.insert(height);
            }
        }
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<LedgerStats> {
        let records = self.records.read().await;
        let mut stats = LedgerStats::default();
        for mint in &records.mints {
            stats.mints.add(mint.status, 1);
        }
        for unlock in &records.unlocks {
            stats.unlocks.add(unlock.status, 1);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn duplicate_lock_is_rejected_without_side_effects() {
        let ledger = MemoryLedger::new();
        let (event, intent) = testing::lock_event("tx-1", 50_000);
        ledger.create_lock_and_mint(&event, &intent).await.unwrap();

        let mut replay = intent.clone();
        replay.amount = 1;
        let err = ledger.create_lock_and_mint(&event, &replay).await.unwrap_err();
        assert!(matches!(err, RelayerError::DuplicateEvent { .. }));

        let todo = ledger.todo_mints(10).await.unwrap();
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].amount, 50_000);
    }

    #[tokio::test]
    async fn todo_mints_are_fifo_and_limited() {
        let ledger = MemoryLedger::new();
        for id in ["c", "a", "b"] {
            let (event, intent) = testing::lock_event(id, 1);
            ledger.create_lock_and_mint(&event, &intent).await.unwrap();
        }
        let ids: Vec<_> = ledger
            .todo_mints(2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["c".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn illegal_transition_rejects_whole_batch() {
        let ledger = MemoryLedger::new();
        for id in ["a", "b"] {
            let (event, intent) = testing::lock_event(id, 1);
            ledger.create_lock_and_mint(&event, &intent).await.unwrap();
        }
        ledger
            .update_mints(&["a".to_string()], &IntentUpdate::pending())
            .await
            .unwrap();

        // "b" is still todo, so todo -> success must fail and leave "a" pending
        let err = ledger
            .update_mints(
                &["a".to_string(), "b".to_string()],
                &IntentUpdate::success("0x01"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::InvalidStateTransition { .. }));

        let a = ledger.get_mint("a").await.unwrap().unwrap();
        assert_eq!(a.status, IntentStatus::Pending);
        assert!(a.mint_hash.is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_reached_once() {
        let ledger = MemoryLedger::new();
        let (event, intent) = testing::lock_event("a", 1);
        ledger.create_lock_and_mint(&event, &intent).await.unwrap();
        let ids = vec!["a".to_string()];
        ledger.update_mints(&ids, &IntentUpdate::pending()).await.unwrap();
        ledger
            .update_mints(&ids, &IntentUpdate::success("0xbeef"))
            .await
            .unwrap();
        assert!(ledger
            .update_mints(&ids, &IntentUpdate::error("again"))
            .await
            .is_err());
        assert!(ledger.update_mints(&ids, &IntentUpdate::pending()).await.is_err());
    }

    #[tokio::test]
    async fn cursor_moves_one_block_at_a_time() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.get_cursor("btc").await.unwrap(), None);
        ledger.advance_cursor("btc", 100).await.unwrap();
        ledger.advance_cursor("btc", 101).await.unwrap();

        let skip = ledger.advance_cursor("btc", 103).await.unwrap_err();
        assert!(matches!(skip, RelayerError::InvalidCursor { .. }));
        assert!(ledger.advance_cursor("btc", 101).await.is_err());
        assert!(ledger.advance_cursor("btc", 100).await.is_err());

        assert_eq!(ledger.get_cursor("btc").await.unwrap(), Some(101));
        assert_eq!(ledger.get_cursor("ckb").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unlocks_are_filtered_by_chain_and_status() {
        let ledger = MemoryLedger::new();
        let (btc_burn, btc_unlock) = testing::burn_event(1, Chain::Btc);
        let (eth_burn, eth_unlock) = testing::burn_event(2, Chain::Eth);
        ledger.create_burn_and_unlock(&btc_burn, &btc_unlock).await.unwrap();
        ledger.create_burn_and_unlock(&eth_burn, &eth_unlock).await.unwrap();
        assert!(ledger
            .create_burn_and_unlock(&btc_burn, &btc_unlock)
            .await
            .is_err());

        let todo = ledger.todo_unlocks(Chain::Btc, 10).await.unwrap();
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].ckb_tx_hash, btc_burn.ckb_tx_hash);

        let hashes = [btc_burn.ckb_tx_hash, eth_burn.ckb_tx_hash];
        assert!(ledger.pending_unlocks_for(&hashes).await.unwrap().is_empty());
        ledger
            .update_unlocks(&hashes[..1], &IntentUpdate::pending())
            .await
            .unwrap();
        let pending = ledger.pending_unlocks_for(&hashes).await.unwrap();
        assert_eq!(pending.len(), 1);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.unlocks.pending, 1);
        assert_eq!(stats.unlocks.todo, 1);
    }
}
