//! Unlock loop: todo unlock intents are paid out of custody on their chain

use super::pipeline::SigningPipeline;
use super::{settlement, BridgeContext};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{IntentUpdate, UnlockIntent};
use crate::metrics;
use crate::state::Ledger;
use crate::tasks::{PeriodicTask, Tick};
use crate::tx::UnlockTxBuilder;
use crate::types::{external_lock, Chain, UnsignedTx, H256};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub struct UnlockProcessor {
    name: String,
    chain: Chain,
    ledger: Arc<dyn Ledger>,
    builder: UnlockTxBuilder,
    pipeline: SigningPipeline,
    batch_size: usize,
}

impl UnlockProcessor {
    pub fn new(ctx: &BridgeContext, builder: UnlockTxBuilder, pipeline: SigningPipeline) -> Self {
        let chain = builder.chain();
        Self {
            name: format!("unlock-{chain}"),
            chain,
            ledger: ctx.ledger.clone(),
            builder,
            pipeline,
            batch_size: ctx.processing.batch_size,
        }
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    pub async fn process_batch(&self) -> RelayerResult<usize> {
        let intents = self.ledger.todo_unlocks(self.chain, self.batch_size).await?;
        if intents.is_empty() {
            return Ok(0);
        }
        let picked = intents.len();
        let started = Instant::now();

        let mut valid = Vec::with_capacity(picked);
        for intent in intents {
            match external_lock(self.chain, &intent.recipient) {
                Ok(_) => valid.push(intent),
                Err(e) => self.reject(&intent, e).await?,
            }
        }
        if valid.is_empty() {
            return Ok(picked);
        }

        let hashes: Vec<H256> = valid.iter().map(|i| i.ckb_tx_hash).collect();

        // nothing below touches the intents until they are marked pending
        let tx = match self.build(&valid).await {
            Ok(tx) => tx,
            Err(e) if e.is_retryable() => {
                warn!(intents = hashes.len(), error = %e, "Unlock batch deferred, intents stay todo");
                metrics::record_batch(&self.name, "deferred", hashes.len());
                return Err(e);
            }
            Err(e) => {
                error!(intents = hashes.len(), error = %e, "Unlock batch failed");
                self.fail(&hashes, &e).await?;
                return Ok(picked);
            }
        };

        self.ledger
            .update_unlocks(&hashes, &IntentUpdate::pending())
            .await?;

        let signed = match self.pipeline.sign(tx).await {
            Ok(signed) => signed,
            Err(e) => {
                error!(intents = hashes.len(), error = %e, "Unlock batch signing failed");
                self.ledger
                    .update_unlocks(&hashes, &IntentUpdate::error(e.to_string()))
                    .await?;
                metrics::record_batch(&self.name, "error", hashes.len());
                return Ok(picked);
            }
        };

        let hash = match self.pipeline.submit(&signed).await {
            Ok(hash) => hash,
            Err(e) if e.is_retryable() => {
                warn!(intents = hashes.len(), error = %e, "Unlock broadcast outcome unknown, intents stay pending");
                metrics::record_batch(&self.name, "unknown", hashes.len());
                return Ok(picked);
            }
            Err(e) => {
                self.ledger
                    .update_unlocks(&hashes, &IntentUpdate::error(e.to_string()))
                    .await?;
                metrics::record_batch(&self.name, "error", hashes.len());
                return Ok(picked);
            }
        };
        let hash_str = format!("{hash:#x}");
        // the watcher only settles receipts whose hash was recorded here
        self.ledger
            .update_unlocks(&hashes, &IntentUpdate::broadcast(hash_str.clone()))
            .await?;

        let outcome = self.pipeline.await_commitment(&hash).await;
        match settlement(outcome, hash, self.pipeline.deadlines().confirmation, self.chain) {
            Some(update) => {
                self.settle(&hashes, &update).await?;
                info!(
                    tx = %hash_str,
                    intents = hashes.len(),
                    status = %update.status,
                    "Unlock batch settled"
                );
                metrics::record_batch(&self.name, update.status.as_str(), hashes.len());
            }
            None => {
                warn!(tx = %hash_str, intents = hashes.len(), "Unlock status unreachable, intents stay pending");
                metrics::record_batch(&self.name, "unknown", hashes.len());
            }
        }
        metrics::record_batch_latency(&self.name, started.elapsed().as_secs_f64());
        Ok(picked)
    }

    /// Apply the final status to the intents still pending
    ///
    /// The watcher may already have settled some of them from the unlock
    /// receipt while confirmation was being polled.
    async fn settle(&self, hashes: &[H256], update: &IntentUpdate) -> RelayerResult<()> {
        let pending: Vec<H256> = self
            .ledger
            .pending_unlocks_for(hashes)
            .await?
            .into_iter()
            .map(|u| u.ckb_tx_hash)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        self.ledger.update_unlocks(&pending, update).await
    }

    async fn reject(&self, intent: &UnlockIntent, reason: RelayerError) -> RelayerResult<()> {
        warn!(
            burn = %format!("{:#x}", intent.ckb_tx_hash),
            recipient = %intent.recipient,
            error = %reason,
            "Rejecting unlock intent"
        );
        self.fail(&[intent.ckb_tx_hash], &reason).await
    }

    /// Move todo intents straight to error
    async fn fail(&self, hashes: &[H256], reason: &RelayerError) -> RelayerResult<()> {
        self.ledger
            .update_unlocks(hashes, &IntentUpdate::pending())
            .await?;
        self.ledger
            .update_unlocks(hashes, &IntentUpdate::error(reason.to_string()))
            .await?;
        metrics::record_batch(&self.name, "error", hashes.len());
        Ok(())
    }

    async fn build(&self, intents: &[UnlockIntent]) -> RelayerResult<UnsignedTx> {
        self.pipeline.wait_until_synced().await?;
        self.builder.unlock(intents).await
    }
}

#[async_trait]
impl PeriodicTask for UnlockProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tick(&self) -> RelayerResult<Tick> {
        Ok(match self.process_batch().await? {
            0 => Tick::Idle,
            _ => Tick::Busy,
        })
    }
}
