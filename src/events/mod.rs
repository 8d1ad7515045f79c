//! Bridge events and the transfer intents derived from them
//!
//! A lock on an external chain produces a [`LockEvent`] plus a [`MintIntent`];
//! a burn on CKB produces a [`BurnEvent`] plus an [`UnlockIntent`]. Events are
//! immutable facts keyed by their source transaction, intents carry the
//! processing status.

mod memo;
mod payload;

pub use memo::Memo;
pub use payload::BurnPayload;

use crate::error::RelayerError;
use crate::types::{Asset, Chain, H256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing status of a mint or unlock intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Todo,
    Pending,
    Success,
    Error,
}

impl IntentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Todo => "todo",
            IntentStatus::Pending => "pending",
            IntentStatus::Success => "success",
            IntentStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IntentStatus::Success | IntentStatus::Error)
    }

    /// Statuses an intent may be in right before moving to `self`.
    ///
    /// `pending -> pending` is allowed so a broadcast hash can be attached
    /// to an intent whose confirmation is still unknown.
    pub fn allowed_predecessors(self) -> &'static [IntentStatus] {
        match self {
            IntentStatus::Todo => &[],
            IntentStatus::Pending => &[IntentStatus::Todo, IntentStatus::Pending],
            IntentStatus::Success | IntentStatus::Error => &[IntentStatus::Pending],
        }
    }

    pub fn can_transition_to(self, next: IntentStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(IntentStatus::Todo),
            "pending" => Ok(IntentStatus::Pending),
            "success" => Ok(IntentStatus::Success),
            "error" => Ok(IntentStatus::Error),
            other => Err(RelayerError::Internal(format!("unknown intent status {other}"))),
        }
    }
}

/// Status change applied to a batch of intents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentUpdate {
    pub status: IntentStatus,
    pub tx_hash: Option<String>,
    pub message: Option<String>,
}

impl IntentUpdate {
    pub fn pending() -> Self {
        Self {
            status: IntentStatus::Pending,
            tx_hash: None,
            message: None,
        }
    }

    pub fn broadcast(tx_hash: impl Into<String>) -> Self {
        Self {
            status: IntentStatus::Pending,
            tx_hash: Some(tx_hash.into()),
            message: None,
        }
    }

    pub fn success(tx_hash: impl Into<String>) -> Self {
        Self {
            status: IntentStatus::Success,
            tx_hash: Some(tx_hash.into()),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: IntentStatus::Error,
            tx_hash: None,
            message: Some(message.into()),
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

/// Deposit observed on an external chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    /// Source transaction id
    pub id: String,
    pub chain: Chain,
    pub asset: Asset,
    pub amount: u128,
    /// CKB address of the recipient
    pub recipient: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub block_height: u64,
    pub block_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintIntent {
    pub id: String,
    pub chain: Chain,
    pub asset: Asset,
    pub amount: u128,
    pub recipient: String,
    pub status: IntentStatus,
    pub mint_hash: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MintIntent {
    pub fn from_lock(event: &LockEvent) -> Self {
        let now = Utc::now();
        Self {
            id: event.id.clone(),
            chain: event.chain,
            asset: event.asset.clone(),
            amount: event.amount,
            recipient: event.recipient.clone(),
            status: IntentStatus::Todo,
            mint_hash: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: &IntentUpdate) {
        self.status = update.status;
        if update.tx_hash.is_some() {
            self.mint_hash = update.tx_hash.clone();
        }
        if update.message.is_some() {
            self.message = update.message.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Wrapped tokens burned on CKB
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    pub ckb_tx_hash: H256,
    pub sender_lock_hash: H256,
    pub asset: Asset,
    pub chain: Chain,
    pub amount: u128,
    pub recipient: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockIntent {
    pub ckb_tx_hash: H256,
    pub chain: Chain,
    pub asset: Asset,
    pub amount: u128,
    pub recipient: String,
    pub status: IntentStatus,
    pub tx_hash: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnlockIntent {
    pub fn from_burn(event: &BurnEvent) -> Self {
        let now = Utc::now();
        Self {
            ckb_tx_hash: event.ckb_tx_hash,
            chain: event.chain,
            asset: event.asset.clone(),
            amount: event.amount,
            recipient: event.recipient.clone(),
            status: IntentStatus::Todo,
            tx_hash: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: &IntentUpdate) {
        self.status = update.status;
        if update.tx_hash.is_some() {
            self.tx_hash = update.tx_hash.clone();
        }
        if update.message.is_some() {
            self.message = update.message.clone();
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_monotonic() {
        use IntentStatus::*;
        assert!(Todo.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Success));
        assert!(Pending.can_transition_to(Error));
        assert!(Pending.can_transition_to(Pending));

        assert!(!Todo.can_transition_to(Success));
        assert!(!Todo.can_transition_to(Error));
        assert!(!Success.can_transition_to(Pending));
        assert!(!Error.can_transition_to(Todo));
        assert!(!Success.can_transition_to(Error));
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            IntentStatus::Todo,
            IntentStatus::Pending,
            IntentStatus::Success,
            IntentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
        assert!("done".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn update_keeps_existing_hash_when_absent() {
        let event = LockEvent {
            id: "tx".into(),
            chain: Chain::Btc,
            asset: Asset::native(Chain::Btc).unwrap(),
            amount: 1,
            recipient: "ckt1".into(),
            tx_hash: "tx".into(),
            tx_index: 0,
            block_height: 1,
            block_hash: "b".into(),
        };
        let mut intent = MintIntent::from_lock(&event);
        intent.apply(&IntentUpdate::broadcast("0xaa"));
        intent.apply(&IntentUpdate::error("late"));
        assert_eq!(intent.mint_hash.as_deref(), Some("0xaa"));
        assert_eq!(intent.message.as_deref(), Some("late"));
        assert_eq!(intent.status, IntentStatus::Error);
    }
}
