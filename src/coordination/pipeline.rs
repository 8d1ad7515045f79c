//! Sign, broadcast and confirm, the tail every processor shares

use crate::chain::{Collector, CommitmentOutcome};
use crate::error::{RelayerError, RelayerResult};
use crate::multisig::MultisigCoordinator;
use crate::tx::Submitter;
use crate::types::{SignedTx, UnsignedTx, H256};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub signing: Duration,
    pub confirmation: Duration,
    /// How long to wait for the indexer to catch up with the tip
    pub sync: Duration,
    pub sync_poll: Duration,
}

pub struct SigningPipeline {
    coordinator: Arc<MultisigCoordinator>,
    submitter: Submitter,
    collector: Arc<dyn Collector>,
    deadlines: Deadlines,
}

impl SigningPipeline {
    pub fn new(
        coordinator: Arc<MultisigCoordinator>,
        submitter: Submitter,
        collector: Arc<dyn Collector>,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            coordinator,
            submitter,
            collector,
            deadlines,
        }
    }

    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    /// Block until the indexer has processed the chain tip
    ///
    /// Building against a lagging indexer would select cells that are
    /// already spent.
    pub async fn wait_until_synced(&self) -> RelayerResult<()> {
        let deadline = Instant::now() + self.deadlines.sync;
        let client = self.submitter.client();
        loop {
            let tip = client.tip_height().await?;
            let indexed = self.collector.indexed_height().await?;
            if indexed >= tip {
                return Ok(());
            }
            debug!(chain = %client.chain(), tip, indexed, "Waiting for indexer");
            if Instant::now() >= deadline {
                return Err(RelayerError::Timeout {
                    operation: format!("{} indexer to reach tip {tip} (at {indexed})", client.chain()),
                });
            }
            tokio::time::sleep(self.deadlines.sync_poll).await;
        }
    }

    pub async fn sign(&self, tx: UnsignedTx) -> RelayerResult<SignedTx> {
        self.coordinator.collect(tx, self.deadlines.signing).await
    }

    pub async fn submit(&self, tx: &SignedTx) -> RelayerResult<H256> {
        self.submitter.submit(tx).await
    }

    pub async fn await_commitment(&self, tx_hash: &H256) -> CommitmentOutcome {
        self.submitter
            .await_commitment(tx_hash, self.deadlines.confirmation)
            .await
    }

    /// Sign, submit and require commitment before returning
    pub async fn execute(&self, tx: UnsignedTx) -> RelayerResult<H256> {
        let signed = self.sign(tx).await?;
        self.submitter
            .submit_and_confirm(&signed, self.deadlines.confirmation)
            .await
    }
}
