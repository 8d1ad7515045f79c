//! Durable transfer ledger
//!
//! Handles:
//! - Lock/burn events and their paired intents, written atomically
//! - Monotonic intent status updates, all-or-nothing per batch
//! - Per-watcher scan cursors for restart recovery
//!
//! [`PgLedger`] is the production backend; [`MemoryLedger`] keeps the same
//! guarantees in process for development and tests.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use crate::error::RelayerResult;
use crate::events::{
    BurnEvent, IntentStatus, IntentUpdate, LockEvent, MintIntent, UnlockIntent,
};
use crate::types::{Chain, H256};
use async_trait::async_trait;
use serde::Serialize;

/// Intent counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub todo: u64,
    pub pending: u64,
    pub success: u64,
    pub error: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: IntentStatus, count: u64) {
        match status {
            IntentStatus::Todo => self.todo += count,
            IntentStatus::Pending => self.pending += count,
            IntentStatus::Success => self.success += count,
            IntentStatus::Error => self.error += count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub mints: StatusCounts,
    pub unlocks: StatusCounts,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Store a lock event with its mint intent. A second call for the same
    /// source transaction fails with `DuplicateEvent` and changes nothing.
    async fn create_lock_and_mint(&self, event: &LockEvent, intent: &MintIntent)
        -> RelayerResult<()>;

    /// Store a burn event with its unlock intent, same contract as above.
    async fn create_burn_and_unlock(
        &self,
        event: &BurnEvent,
        intent: &UnlockIntent,
    ) -> RelayerResult<()>;

    /// Oldest `todo` mints first
    async fn todo_mints(&self, limit: usize) -> RelayerResult<Vec<MintIntent>>;

    /// Oldest `todo` unlocks for one destination chain first
    async fn todo_unlocks(&self, chain: Chain, limit: usize) -> RelayerResult<Vec<UnlockIntent>>;

    /// Apply `update` to every listed mint or to none of them
    async fn update_mints(&self, ids: &[String], update: &IntentUpdate) -> RelayerResult<()>;

    async fn update_unlocks(&self, burn_hashes: &[H256], update: &IntentUpdate)
        -> RelayerResult<()>;

    /// Unlock intents among `burn_hashes` currently `pending`
    async fn pending_unlocks_for(&self, burn_hashes: &[H256]) -> RelayerResult<Vec<UnlockIntent>>;

    async fn get_mint(&self, id: &str) -> RelayerResult<Option<MintIntent>>;

    async fn get_unlock(&self, burn_hash: &H256) -> RelayerResult<Option<UnlockIntent>>;

    /// Last fully persisted height for a watcher
    async fn get_cursor(&self, watcher: &str) -> RelayerResult<Option<u64>>;

    /// Move a cursor to `height`, which must be exactly one past the current
    /// value (any height for a watcher without a cursor yet).
    async fn advance_cursor(&self, watcher: &str, height: u64) -> RelayerResult<()>;

    async fn stats(&self) -> RelayerResult<LedgerStats>;

    async fn health_check(&self) -> RelayerResult<()>;
}
