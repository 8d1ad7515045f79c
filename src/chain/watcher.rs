//! Block-by-block chain watcher
//!
//! One height per scan: fetch the block after the cursor, let the matcher
//! pick out bridge events, persist them, then advance the cursor. A crash
//! between persisting and advancing replays the block on restart, which the
//! ledger turns into duplicate no-ops.

use super::ChainClient;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BurnEvent, IntentUpdate, LockEvent, MintIntent, UnlockIntent};
use crate::metrics;
use crate::state::Ledger;
use crate::tasks::{PeriodicTask, Tick};
use crate::types::{Block, H256};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A bridge-relevant fact found in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvent {
    Lock(LockEvent),
    Burn(BurnEvent),
    /// An unlock transaction of ours settling the listed burns
    UnlockReceipt {
        burn_hashes: Vec<H256>,
        tx_hash: String,
    },
}

/// Direction-specific event detection
#[async_trait]
pub trait BlockMatcher: Send + Sync {
    async fn match_block(&self, block: &Block) -> RelayerResult<Vec<WatchedEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Processed { height: u64, events: usize },
    /// The next block does not exist yet
    Waiting { height: u64 },
}

pub struct ChainWatcher {
    name: String,
    client: Arc<dyn ChainClient>,
    ledger: Arc<dyn Ledger>,
    matcher: Arc<dyn BlockMatcher>,
    start_height: u64,
}

impl ChainWatcher {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ChainClient>,
        ledger: Arc<dyn Ledger>,
        matcher: Arc<dyn BlockMatcher>,
        start_height: u64,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            ledger,
            matcher,
            start_height,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Height the next scan will fetch
    pub async fn next_height(&self) -> RelayerResult<u64> {
        Ok(match self.ledger.get_cursor(&self.name).await? {
            Some(cursor) => cursor + 1,
            None => self.start_height,
        })
    }

    /// Process at most one block
    #[instrument(skip(self), fields(watcher = %self.name))]
    pub async fn scan_once(&self) -> RelayerResult<ScanOutcome> {
        let height = self.next_height().await?;
        let Some(block) = self.client.block_by_height(height).await? else {
            return Ok(ScanOutcome::Waiting { height });
        };
        if block.number != height {
            return Err(RelayerError::Internal(format!(
                "asked for block {height}, adapter returned {}",
                block.number
            )));
        }

        let events = self.matcher.match_block(&block).await?;
        let count = events.len();
        for event in events {
            self.persist(event).await?;
        }

        self.ledger.advance_cursor(&self.name, height).await?;
        metrics::record_block_scanned(&self.name, height);
        if count > 0 {
            debug!(height, events = count, "Scanned block");
        }
        Ok(ScanOutcome::Processed {
            height,
            events: count,
        })
    }

    async fn persist(&self, event: WatchedEvent) -> RelayerResult<()> {
        match event {
            WatchedEvent::Lock(lock) => {
                let intent = MintIntent::from_lock(&lock);
                match self.ledger.create_lock_and_mint(&lock, &intent).await {
                    Ok(()) => {
                        info!(
                            id = %lock.id,
                            asset = %lock.asset,
                            amount = %lock.amount,
                            recipient = %lock.recipient,
                            "Recorded lock event"
                        );
                        metrics::record_event(&self.name, "lock");
                    }
                    Err(RelayerError::DuplicateEvent { id }) => {
                        debug!(%id, "Lock event already recorded");
                        metrics::record_event(&self.name, "duplicate");
                    }
                    Err(e) => return Err(e),
                }
            }
            WatchedEvent::Burn(burn) => {
                let intent = UnlockIntent::from_burn(&burn);
                match self.ledger.create_burn_and_unlock(&burn, &intent).await {
                    Ok(()) => {
                        info!(
                            hash = %format!("{:#x}", burn.ckb_tx_hash),
                            asset = %burn.asset,
                            amount = %burn.amount,
                            recipient = %burn.recipient,
                            "Recorded burn event"
                        );
                        metrics::record_event(&self.name, "burn");
                    }
                    Err(RelayerError::DuplicateEvent { id }) => {
                        debug!(%id, "Burn event already recorded");
                        metrics::record_event(&self.name, "duplicate");
                    }
                    Err(e) => return Err(e),
                }
            }
            WatchedEvent::UnlockReceipt {
                burn_hashes,
                tx_hash,
            } => {
                // only our own broadcast may settle an intent, a memo alone proves nothing
                let hashes: Vec<H256> = self
                    .ledger
                    .pending_unlocks_for(&burn_hashes)
                    .await?
                    .into_iter()
                    .filter(|u| u.tx_hash.as_deref() == Some(tx_hash.as_str()))
                    .map(|u| u.ckb_tx_hash)
                    .collect();
                if hashes.is_empty() {
                    return Ok(());
                }
                self.ledger
                    .update_unlocks(&hashes, &IntentUpdate::success(tx_hash.clone()))
                    .await?;
                info!(%tx_hash, settled = hashes.len(), "Reconciled pending unlocks from receipt");
                metrics::record_event(&self.name, "unlock_receipt");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for ChainWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tick(&self) -> RelayerResult<Tick> {
        match self.scan_once().await? {
            ScanOutcome::Processed { .. } => Ok(Tick::Busy),
            ScanOutcome::Waiting { .. } => Ok(Tick::Idle),
        }
    }
}
