//! Transaction submission with retry on transient RPC failures

use crate::chain::{ChainClient, CommitmentOutcome, ConfirmationTracker};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::types::{SignedTx, H256};

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Broadcasts signed transactions and follows them to commitment
pub struct Submitter {
    client: Arc<dyn ChainClient>,
    tracker: ConfirmationTracker,
    max_retries: u32,
    retry_delay: Duration,
}

impl Submitter {
    pub fn new(
        client: Arc<dyn ChainClient>,
        poll_interval: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            tracker: ConfirmationTracker::new(client.clone(), poll_interval),
            client,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// Broadcast `tx`, retrying only errors that may succeed on a second try
    pub async fn submit(&self, tx: &SignedTx) -> RelayerResult<H256> {
        let chain = self.client.chain();
        let expected = tx.hash();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.client.broadcast(tx).await {
                Ok(hash) => {
                    if hash != expected {
                        warn!(
                            chain = %chain,
                            expected = %format!("{expected:#x}"),
                            returned = %format!("{hash:#x}"),
                            "Node returned a different transaction hash"
                        );
                    }
                    info!(
                        chain = %chain,
                        tx = %format!("{hash:#x}"),
                        attempt = attempts,
                        "Transaction broadcast"
                    );
                    metrics::record_tx_submitted(chain.as_str());
                    return Ok(hash);
                }
                Err(e) if e.is_retryable() && attempts < self.max_retries => {
                    warn!(
                        chain = %chain,
                        error = %e,
                        "Broadcast failed (attempt {}/{}), retrying",
                        attempts,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(chain = %chain, error = %e, attempts, "Broadcast failed");
                    metrics::record_tx_failed(chain.as_str(), e.kind());
                    return Err(e);
                }
            }
        }
    }

    pub async fn await_commitment(&self, tx_hash: &H256, timeout: Duration) -> CommitmentOutcome {
        let outcome = self.tracker.await_commitment(tx_hash, timeout).await;
        metrics::record_tx_outcome(self.client.chain().as_str(), outcome.as_str());
        outcome
    }

    /// Submit and wait, turning every outcome but commitment into an error
    pub async fn submit_and_confirm(&self, tx: &SignedTx, timeout: Duration) -> RelayerResult<H256> {
        let hash = self.submit(tx).await?;
        match self.await_commitment(&hash, timeout).await {
            CommitmentOutcome::Committed => Ok(hash),
            CommitmentOutcome::Rejected => Err(RelayerError::TransactionRejected {
                chain: self.client.chain(),
                tx_hash: hash,
            }),
            CommitmentOutcome::Pending | CommitmentOutcome::Unreachable => {
                Err(RelayerError::ConfirmationTimeout {
                    tx_hash: hash,
                    waited_secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::types::{Chain, TxStatus, UnsignedTx};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn signed() -> SignedTx {
        SignedTx {
            tx: UnsignedTx {
                cell_deps: vec![],
                inputs: vec![],
                outputs: vec![],
                outputs_data: vec![],
                fee: 0,
            },
            witness: Default::default(),
        }
    }

    fn unavailable() -> RelayerError {
        RelayerError::RpcUnavailable {
            chain: Chain::Ckb,
            message: "503".into(),
        }
    }

    fn submitter(client: MockChainClient, max_retries: u32) -> Submitter {
        Submitter::new(
            Arc::new(client),
            Duration::from_millis(1),
            max_retries,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Ckb);
        client.expect_broadcast().returning(move |tx| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(tx.hash())
            }
        });

        let hash = submitter(client, 3).submit(&signed()).await.unwrap();
        assert_eq!(hash, signed().hash());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Ckb);
        client
            .expect_broadcast()
            .times(2)
            .returning(|_| Err(unavailable()));

        let err = submitter(client, 2).submit(&signed()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Ckb);
        client.expect_broadcast().times(1).returning(|_| {
            Err(RelayerError::Rpc {
                chain: Chain::Ckb,
                message: "double spend".into(),
            })
        });
        assert!(submitter(client, 5).submit(&signed()).await.is_err());
    }

    #[tokio::test]
    async fn rejected_commitment_is_an_error() {
        let mut client = MockChainClient::new();
        client.expect_chain().return_const(Chain::Ckb);
        client.expect_broadcast().returning(|tx| Ok(tx.hash()));
        client
            .expect_transaction_status()
            .returning(|_| Ok(TxStatus::Rejected));

        let err = submitter(client, 1)
            .submit_and_confirm(&signed(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::TransactionRejected { .. }));
    }
}
