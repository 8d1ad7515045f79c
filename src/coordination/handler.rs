//! Per-chain wiring: one watcher loop and one processing loop

use super::mint::MintProcessor;
use super::pipeline::Deadlines;
use super::unlock::UnlockProcessor;
use super::BridgeContext;
use crate::chain::{BurnMatcher, ChainClient, ChainWatcher, Collector, LockMatcher};
use crate::config::{ChainConfig, CkbConfig};
use crate::error::RelayerResult;
use crate::tasks::{PeriodicTask, Schedule, TaskManager};
use crate::tx::{CkbTxBuilder, CkbTxConfig, FeePolicy, UnlockTxBuilder, UnlockTxConfig};
use crate::types::{external_lock, Chain};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct CkbHandlerConfig {
    pub start_height: u64,
    pub tx: CkbTxConfig,
    pub confirm_timeout: Duration,
    pub sync_timeout: Duration,
}

impl CkbHandlerConfig {
    pub fn from_settings(ckb: &CkbConfig) -> Self {
        Self {
            start_height: ckb.start_height,
            tx: CkbTxConfig {
                fees: FeePolicy {
                    fee: ckb.fee,
                    min_change_capacity: ckb.min_change_capacity,
                },
                sudt_cell_capacity: ckb.sudt_cell_capacity,
                bridge_cell_capacity: ckb.bridge_cell_capacity,
            },
            confirm_timeout: Duration::from_secs(ckb.confirm_timeout_secs),
            sync_timeout: Duration::from_secs(ckb.sync_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExternalHandlerConfig {
    pub chain: Chain,
    pub custody_address: String,
    pub start_height: u64,
    pub tx: UnlockTxConfig,
    pub confirm_timeout: Duration,
    pub sync_timeout: Duration,
}

impl ExternalHandlerConfig {
    pub fn from_settings(chain: Chain, config: &ChainConfig) -> Self {
        Self {
            chain,
            custody_address: config.custody_address.clone(),
            start_height: config.start_height,
            tx: UnlockTxConfig {
                fees: FeePolicy {
                    fee: config.fee,
                    min_change_capacity: config.min_change_capacity,
                },
                token_cell_capacity: config.token_cell_capacity,
            },
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
            sync_timeout: Duration::from_secs(config.sync_timeout_secs),
        }
    }
}

/// Watcher and processor of one chain
///
/// On CKB the watcher records burns and the processor mints; on an external
/// chain the watcher records locks and the processor unlocks.
pub struct ChainHandler {
    chain: Chain,
    watcher: Arc<ChainWatcher>,
    processor: Arc<dyn PeriodicTask>,
}

impl ChainHandler {
    pub fn for_ckb(
        ctx: &BridgeContext,
        client: Arc<dyn ChainClient>,
        collector: Arc<dyn Collector>,
        config: &CkbHandlerConfig,
    ) -> Self {
        let matcher = Arc::new(BurnMatcher::new(client.clone(), ctx.registry.clone()));
        let watcher = Arc::new(ChainWatcher::new(
            Chain::Ckb.as_str(),
            client.clone(),
            ctx.ledger.clone(),
            matcher,
            config.start_height,
        ));

        let builder = CkbTxBuilder::new(collector.clone(), ctx.registry.clone(), config.tx);
        let pipeline = ctx.pipeline(
            client,
            collector,
            config.confirm_timeout,
            config.sync_timeout,
        );
        let processor = Arc::new(MintProcessor::new(ctx, builder, pipeline));

        Self {
            chain: Chain::Ckb,
            watcher,
            processor,
        }
    }

    pub fn for_external(
        ctx: &BridgeContext,
        client: Arc<dyn ChainClient>,
        collector: Arc<dyn Collector>,
        config: &ExternalHandlerConfig,
    ) -> RelayerResult<Self> {
        let chain = config.chain;
        let custody = external_lock(chain, &config.custody_address)?;

        let matcher = Arc::new(LockMatcher::new(chain, custody.clone()));
        let watcher = Arc::new(ChainWatcher::new(
            chain.as_str(),
            client.clone(),
            ctx.ledger.clone(),
            matcher,
            config.start_height,
        ));

        let builder = UnlockTxBuilder::new(chain, custody, collector.clone(), config.tx);
        let pipeline = ctx.pipeline(
            client,
            collector,
            config.confirm_timeout,
            config.sync_timeout,
        );
        let processor = Arc::new(UnlockProcessor::new(ctx, builder, pipeline));

        Ok(Self {
            chain,
            watcher,
            processor,
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn watcher(&self) -> &Arc<ChainWatcher> {
        &self.watcher
    }

    pub fn processor(&self) -> &Arc<dyn PeriodicTask> {
        &self.processor
    }

    pub fn spawn(&self, tasks: &mut TaskManager, schedule: Schedule) {
        info!(chain = %self.chain, "Starting chain handler");
        tasks.spawn_periodic(self.watcher.clone(), schedule);
        tasks.spawn_periodic(self.processor.clone(), schedule);
    }
}

impl BridgeContext {
    fn pipeline(
        &self,
        client: Arc<dyn ChainClient>,
        collector: Arc<dyn Collector>,
        confirm_timeout: Duration,
        sync_timeout: Duration,
    ) -> super::SigningPipeline {
        let processing = &self.processing;
        let submitter = crate::tx::Submitter::new(
            client,
            processing.confirm_poll,
            processing.max_retries,
            processing.retry_delay,
        );
        super::SigningPipeline::new(
            self.coordinator.clone(),
            submitter,
            collector,
            Deadlines {
                signing: processing.signing_timeout,
                confirmation: confirm_timeout,
                sync: sync_timeout,
                sync_poll: processing.sync_poll,
            },
        )
    }
}
