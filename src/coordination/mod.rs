//! Bridge coordination
//!
//! Each chain runs two loops. Watchers turn blocks into events and intents
//! in the ledger; processors pick up todo intents, build one transaction per
//! batch, gather committee signatures and settle the intents from the
//! commitment outcome.

pub mod handler;
pub mod mint;
pub mod pipeline;
pub mod unlock;

pub use handler::{ChainHandler, CkbHandlerConfig, ExternalHandlerConfig};
pub use mint::MintProcessor;
pub use pipeline::{Deadlines, SigningPipeline};
pub use unlock::UnlockProcessor;

use crate::chain::CommitmentOutcome;
use crate::config::Settings;
use crate::error::RelayerError;
use crate::events::IntentUpdate;
use crate::multisig::MultisigCoordinator;
use crate::state::Ledger;
use crate::types::{Chain, ScriptRegistry, H256};

use std::sync::Arc;
use std::time::Duration;

/// Knobs shared by every processor
#[derive(Debug, Clone, Copy)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub confirm_poll: Duration,
    pub sync_poll: Duration,
    pub signing_timeout: Duration,
}

impl ProcessingConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let relayer = &settings.relayer;
        Self {
            batch_size: relayer.batch_size,
            max_retries: relayer.max_retries,
            retry_delay: relayer.retry_delay(),
            confirm_poll: relayer.confirm_poll(),
            sync_poll: relayer.poll_interval(),
            signing_timeout: Duration::from_secs(settings.multisig.timeout_secs),
        }
    }
}

/// State shared by the handlers of every chain
#[derive(Clone)]
pub struct BridgeContext {
    pub ledger: Arc<dyn Ledger>,
    pub registry: Arc<ScriptRegistry>,
    pub coordinator: Arc<MultisigCoordinator>,
    pub processing: ProcessingConfig,
}

/// Final intent update for a broadcast transaction
///
/// `None` means the status could not be read and the intents must stay
/// pending until an operator reconciles them.
pub(crate) fn settlement(
    outcome: CommitmentOutcome,
    tx_hash: H256,
    waited: Duration,
    chain: Chain,
) -> Option<IntentUpdate> {
    let hash = format!("{tx_hash:#x}");
    match outcome {
        CommitmentOutcome::Committed => Some(IntentUpdate::success(hash)),
        CommitmentOutcome::Pending => Some(
            IntentUpdate::error(
                RelayerError::ConfirmationTimeout {
                    tx_hash,
                    waited_secs: waited.as_secs(),
                }
                .to_string(),
            )
            .with_tx_hash(hash),
        ),
        CommitmentOutcome::Rejected => Some(
            IntentUpdate::error(RelayerError::TransactionRejected { chain, tx_hash }.to_string())
                .with_tx_hash(hash),
        ),
        CommitmentOutcome::Unreachable => None,
    }
}
