//! Chain module - chain clients, cell collection and block watching
//!
//! This module provides:
//! - The [`ChainClient`] and [`Collector`] seams every chain adapter implements
//! - JSON-RPC adapters speaking to per-chain bridge adapter services
//! - Block-by-block watchers with lock and burn detection
//! - Confirmation tracking for broadcast transactions

pub mod burn;
pub mod finality;
pub mod lock;
pub mod rpc;
pub mod watcher;

pub use burn::BurnMatcher;
pub use finality::{CommitmentOutcome, ConfirmationTracker};
pub use lock::LockMatcher;
pub use rpc::{RpcChainClient, RpcCollector};
pub use watcher::{BlockMatcher, ChainWatcher, ScanOutcome, WatchedEvent};

use crate::error::RelayerResult;
use crate::types::{Block, Cell, Chain, Script, SignedTx, Transaction, TxStatus, H256};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Read and broadcast access to one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    async fn tip_height(&self) -> RelayerResult<u64>;

    /// `None` when the chain has not produced `height` yet
    async fn block_by_height(&self, height: u64) -> RelayerResult<Option<Block>>;

    async fn transaction(&self, hash: &H256) -> RelayerResult<Option<Transaction>>;

    async fn transaction_status(&self, hash: &H256) -> RelayerResult<TxStatus>;

    async fn broadcast(&self, tx: &SignedTx) -> RelayerResult<H256>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Lock,
    Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchKey {
    pub script: Script,
    pub kind: ScriptKind,
}

impl SearchKey {
    pub fn lock(script: Script) -> Self {
        Self {
            script,
            kind: ScriptKind::Lock,
        }
    }

    pub fn type_script(script: Script) -> Self {
        Self {
            script,
            kind: ScriptKind::Type,
        }
    }
}

/// Indexer view of live cells
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    /// Live plain cells owned by `owner`, enough to cover `min_value` when
    /// the owner holds that much.
    async fn cells_by_owner_and_min_value(
        &self,
        owner: &Script,
        min_value: u64,
    ) -> RelayerResult<Vec<Cell>>;

    async fn cells_by_script(&self, key: &SearchKey) -> RelayerResult<Vec<Cell>>;

    /// Highest block the indexer has processed
    async fn indexed_height(&self) -> RelayerResult<u64>;
}
