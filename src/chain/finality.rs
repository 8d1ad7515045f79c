//! Confirmation tracking for broadcast transactions
//!
//! The relayer trusts the adapter's notion of "committed". What it must not
//! do is confuse "the chain has not committed it yet" with "we could not ask":
//! the first may still confirm after the deadline, the second says nothing
//! either way.

use super::ChainClient;
use crate::types::{TxStatus, H256};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentOutcome {
    Committed,
    /// Seen by the chain but not committed before the deadline
    Pending,
    /// The chain dropped or refused the transaction
    Rejected,
    /// No status could be fetched before the deadline
    Unreachable,
}

impl CommitmentOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentOutcome::Committed => "committed",
            CommitmentOutcome::Pending => "pending",
            CommitmentOutcome::Rejected => "rejected",
            CommitmentOutcome::Unreachable => "unreachable",
        }
    }
}

pub struct ConfirmationTracker {
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl ConfirmationTracker {
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Poll the transaction status until it is committed or `timeout` expires
    pub async fn await_commitment(&self, tx_hash: &H256, timeout: Duration) -> CommitmentOutcome {
        let deadline = Instant::now() + timeout;
        let mut reachable = false;

        loop {
            let query = self.client.transaction_status(tx_hash);
            match tokio::time::timeout_at(deadline, query).await {
                Ok(Ok(TxStatus::Committed)) => return CommitmentOutcome::Committed,
                Ok(Ok(TxStatus::Rejected)) => return CommitmentOutcome::Rejected,
                Ok(Ok(status)) => {
                    reachable = true;
                    debug!(tx = %format!("{tx_hash:#x}"), ?status, "Waiting for commitment");
                }
                Ok(Err(e)) => {
                    warn!(tx = %format!("{tx_hash:#x}"), error = %e, "Status query failed");
                }
                Err(_) => {
                    warn!(tx = %format!("{tx_hash:#x}"), "Status query outlived the deadline");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return if reachable {
                    CommitmentOutcome::Pending
                } else {
                    CommitmentOutcome::Unreachable
                };
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
