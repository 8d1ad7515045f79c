//! Error types for the bridge relayer

use crate::types::{Chain, H256};
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Duplicate event {id}")]
    DuplicateEvent { id: String },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u128, available: u128 },

    #[error("Accounting mismatch for {asset}: required {required}, available {available}")]
    AccountingMismatch {
        asset: String,
        required: u128,
        available: u128,
    },

    #[error("Asset {asset} has no bridge cell")]
    AssetNotRegistered { asset: String },

    #[error("Invalid recipient {recipient}: {message}")]
    InvalidRecipient { recipient: String, message: String },

    #[error("Signature quorum not reached: collected {collected} of {required}")]
    SignatureQuorumTimeout { collected: usize, required: usize },

    #[error("Transaction {tx_hash:#x} not committed after {waited_secs}s, it may still confirm")]
    ConfirmationTimeout { tx_hash: H256, waited_secs: u64 },

    #[error("Transaction {tx_hash:#x} rejected by chain {chain}")]
    TransactionRejected { chain: Chain, tx_hash: H256 },

    #[error("RPC unavailable for chain {chain}: {message}")]
    RpcUnavailable { chain: Chain, message: String },

    #[error("RPC error from chain {chain}: {message}")]
    Rpc { chain: Chain, message: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid cursor move for {watcher}: at {current:?}, requested {requested}")]
    InvalidCursor {
        watcher: String,
        current: Option<u64>,
        requested: u64,
    },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::RpcUnavailable { .. } | RelayerError::Timeout { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::InsufficientFunds { .. }
                | RelayerError::AccountingMismatch { .. }
                | RelayerError::InvalidStateTransition { .. }
                | RelayerError::Signing(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "config",
            RelayerError::Database(_) => "database",
            RelayerError::InvalidPayload(_) => "invalid_payload",
            RelayerError::DuplicateEvent { .. } => "duplicate_event",
            RelayerError::InsufficientFunds { .. } => "insufficient_funds",
            RelayerError::AccountingMismatch { .. } => "accounting_mismatch",
            RelayerError::AssetNotRegistered { .. } => "asset_not_registered",
            RelayerError::InvalidRecipient { .. } => "invalid_recipient",
            RelayerError::SignatureQuorumTimeout { .. } => "signature_quorum_timeout",
            RelayerError::ConfirmationTimeout { .. } => "confirmation_timeout",
            RelayerError::TransactionRejected { .. } => "transaction_rejected",
            RelayerError::RpcUnavailable { .. } => "rpc_unavailable",
            RelayerError::Rpc { .. } => "rpc",
            RelayerError::InvalidStateTransition { .. } => "invalid_state_transition",
            RelayerError::InvalidCursor { .. } => "invalid_cursor",
            RelayerError::Signing(_) => "signing",
            RelayerError::Timeout { .. } => "timeout",
            RelayerError::Internal(_) => "internal",
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        let rpc = RelayerError::RpcUnavailable {
            chain: Chain::Btc,
            message: "connection refused".into(),
        };
        assert!(rpc.is_retryable());
        assert!(!RelayerError::InvalidPayload("short".into()).is_retryable());
        assert!(!RelayerError::SignatureQuorumTimeout {
            collected: 1,
            required: 2
        }
        .is_retryable());
    }

    #[test]
    fn confirmation_timeout_message_mentions_late_confirmation() {
        let err = RelayerError::ConfirmationTimeout {
            tx_hash: H256::repeat_byte(0xab),
            waited_secs: 60,
        };
        let message = err.to_string();
        assert!(message.contains("may still confirm"));
        assert!(message.contains("0xabab"));
    }
}
