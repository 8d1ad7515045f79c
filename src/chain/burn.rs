//! Burn detection on CKB
//!
//! A burn qualifies when output 0 carries the recipient type and a valid
//! burn payload, and the cell spent by input 0 holds the wrapped asset the
//! payload names, i.e. its sUDT type matches what the registry derives for
//! that asset.

use super::watcher::{BlockMatcher, WatchedEvent};
use super::ChainClient;
use crate::error::RelayerResult;
use crate::events::{BurnEvent, BurnPayload};
use crate::metrics;
use crate::types::{Block, CellOutput, ScriptRegistry, Transaction};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct BurnMatcher {
    client: Arc<dyn ChainClient>,
    registry: Arc<ScriptRegistry>,
}

impl BurnMatcher {
    pub fn new(client: Arc<dyn ChainClient>, registry: Arc<ScriptRegistry>) -> Self {
        Self { client, registry }
    }

    /// Cell consumed by the transaction's first input
    async fn burned_cell(&self, tx: &Transaction) -> RelayerResult<Option<CellOutput>> {
        let Some(input) = tx.inputs.first() else {
            return Ok(None);
        };
        let Some(previous) = self.client.transaction(&input.tx_hash).await? else {
            return Ok(None);
        };
        Ok(previous.outputs.get(input.index as usize).cloned())
    }

    async fn match_transaction(
        &self,
        block: &Block,
        tx: &Transaction,
    ) -> RelayerResult<Option<BurnEvent>> {
        let hash = format!("{:#x}", tx.hash);

        let carries_recipient_type = tx
            .outputs
            .first()
            .and_then(|o| o.type_script.as_ref())
            .is_some_and(|t| self.registry.is_recipient_type(t));
        if !carries_recipient_type {
            return Ok(None);
        }

        let data: &[u8] = tx.outputs_data.first().map(|d| &d[..]).unwrap_or(&[]);
        let payload = match BurnPayload::decode(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(tx = %hash, error = %e, "Recipient cell with invalid payload");
                metrics::record_event("ckb", "invalid_payload");
                return Ok(None);
            }
        };
        let asset = match payload.asset() {
            Ok(asset) => asset,
            Err(e) => {
                debug!(tx = %hash, error = %e, "Burn payload names no asset");
                return Ok(None);
            }
        };

        let Some(burned) = self.burned_cell(tx).await? else {
            debug!(tx = %hash, "Burned cell not found");
            return Ok(None);
        };
        let expected = self.registry.sudt_type(&asset);
        match &burned.type_script {
            Some(script) if script.code_hash == expected.code_hash && script.args == expected.args => {}
            _ => {
                debug!(tx = %hash, asset = %asset, "First input is not a bridge token of this asset");
                return Ok(None);
            }
        }

        Ok(Some(BurnEvent {
            ckb_tx_hash: tx.hash,
            sender_lock_hash: burned.lock.hash(),
            chain: asset.chain(),
            asset,
            amount: payload.amount,
            recipient: payload.recipient,
            block_number: block.number,
        }))
    }
}

#[async_trait]
impl BlockMatcher for BurnMatcher {
    async fn match_block(&self, block: &Block) -> RelayerResult<Vec<WatchedEvent>> {
        let mut events = Vec::new();
        for tx in &block.transactions {
            if let Some(burn) = self.match_transaction(block, tx).await? {
                events.push(WatchedEvent::Burn(burn));
            }
        }
        Ok(events)
    }
}
