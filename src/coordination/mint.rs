//! Mint loop: todo mint intents become sUDT on CKB

use super::pipeline::SigningPipeline;
use super::{settlement, BridgeContext};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{IntentUpdate, MintIntent};
use crate::metrics;
use crate::state::Ledger;
use crate::tasks::{PeriodicTask, Tick};
use crate::tx::CkbTxBuilder;
use crate::types::{parse_ckb_address, Chain, UnsignedTx};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub struct MintProcessor {
    ledger: Arc<dyn Ledger>,
    builder: CkbTxBuilder,
    pipeline: SigningPipeline,
    batch_size: usize,
}

impl MintProcessor {
    pub fn new(ctx: &BridgeContext, builder: CkbTxBuilder, pipeline: SigningPipeline) -> Self {
        Self {
            ledger: ctx.ledger.clone(),
            builder,
            pipeline,
            batch_size: ctx.processing.batch_size,
        }
    }

    /// Handle one batch of todo intents, returns how many were picked up
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> RelayerResult<usize> {
        let intents = self.ledger.todo_mints(self.batch_size).await?;
        if intents.is_empty() {
            return Ok(0);
        }
        let picked = intents.len();
        let started = Instant::now();

        let mut valid = Vec::with_capacity(picked);
        for intent in intents {
            match parse_ckb_address(&intent.recipient) {
                Ok(_) => valid.push(intent),
                Err(e) => self.reject(&intent, e).await?,
            }
        }
        if valid.is_empty() {
            return Ok(picked);
        }

        let ids: Vec<String> = valid.iter().map(|i| i.id.clone()).collect();

        // nothing below touches the intents until they are marked pending
        let tx = match self.build(&valid).await {
            Ok(tx) => tx,
            Err(e) if e.is_retryable() => {
                warn!(intents = ids.len(), error = %e, "Mint batch deferred, intents stay todo");
                metrics::record_batch("mint", "deferred", ids.len());
                return Err(e);
            }
            Err(e) => {
                error!(intents = ids.len(), error = %e, "Mint batch failed");
                self.fail(&ids, &e).await?;
                return Ok(picked);
            }
        };

        self.ledger
            .update_mints(&ids, &IntentUpdate::pending())
            .await?;

        let signed = match self.pipeline.sign(tx).await {
            Ok(signed) => signed,
            Err(e) => {
                error!(intents = ids.len(), error = %e, "Mint batch signing failed");
                self.ledger
                    .update_mints(&ids, &IntentUpdate::error(e.to_string()))
                    .await?;
                metrics::record_batch("mint", "error", ids.len());
                return Ok(picked);
            }
        };

        let hash = match self.pipeline.submit(&signed).await {
            Ok(hash) => hash,
            Err(e) if e.is_retryable() => {
                // the node may still have accepted it, leave the batch for reconciliation
                warn!(intents = ids.len(), error = %e, "Mint broadcast outcome unknown, intents stay pending");
                metrics::record_batch("mint", "unknown", ids.len());
                return Ok(picked);
            }
            Err(e) => {
                self.ledger
                    .update_mints(&ids, &IntentUpdate::error(e.to_string()))
                    .await?;
                metrics::record_batch("mint", "error", ids.len());
                return Ok(picked);
            }
        };
        let hash_str = format!("{hash:#x}");
        self.ledger
            .update_mints(&ids, &IntentUpdate::broadcast(hash_str.clone()))
            .await?;

        let outcome = self.pipeline.await_commitment(&hash).await;
        match settlement(outcome, hash, self.pipeline.deadlines().confirmation, Chain::Ckb) {
            Some(update) => {
                self.ledger.update_mints(&ids, &update).await?;
                info!(
                    tx = %hash_str,
                    intents = ids.len(),
                    status = %update.status,
                    "Mint batch settled"
                );
                metrics::record_batch("mint", update.status.as_str(), ids.len());
            }
            None => {
                warn!(tx = %hash_str, intents = ids.len(), "Mint status unreachable, intents stay pending");
                metrics::record_batch("mint", "unknown", ids.len());
            }
        }
        metrics::record_batch_latency("mint", started.elapsed().as_secs_f64());
        Ok(picked)
    }

    /// Intents with an unusable recipient fail on their own
    async fn reject(&self, intent: &MintIntent, reason: RelayerError) -> RelayerResult<()> {
        warn!(id = %intent.id, recipient = %intent.recipient, error = %reason, "Rejecting mint intent");
        self.fail(&[intent.id.clone()], &reason).await
    }

    /// Move todo intents straight to error
    async fn fail(&self, ids: &[String], reason: &RelayerError) -> RelayerResult<()> {
        self.ledger
            .update_mints(ids, &IntentUpdate::pending())
            .await?;
        self.ledger
            .update_mints(ids, &IntentUpdate::error(reason.to_string()))
            .await?;
        metrics::record_batch("mint", "error", ids.len());
        Ok(())
    }

    /// Everything that only reads chain state or registers assets: sync,
    /// registration, build
    async fn build(&self, intents: &[MintIntent]) -> RelayerResult<UnsignedTx> {
        self.pipeline.wait_until_synced().await?;

        let missing = self.builder.unregistered_assets(intents).await?;
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|a| a.to_string()).collect();
            info!(assets = ?names, "Registering bridge assets");
            let tx = self.builder.registration(&missing).await?;
            let hash = self.pipeline.execute(tx).await?;
            info!(tx = %format!("{hash:#x}"), "Assets registered");
            metrics::record_assets_registered(missing.len());
            self.pipeline.wait_until_synced().await?;
        }

        self.builder.mint(intents).await
    }
}

#[async_trait]
impl PeriodicTask for MintProcessor {
    fn name(&self) -> &str {
        "mint"
    }

    async fn tick(&self) -> RelayerResult<Tick> {
        Ok(match self.process_batch().await? {
            0 => Tick::Idle,
            _ => Tick::Busy,
        })
    }
}
