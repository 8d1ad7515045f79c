//! Unlock transactions paying origin-chain recipients out of custody

use super::builder::{Draft, FeePolicy, Funder};
use crate::chain::{Collector, SearchKey};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{Memo, UnlockIntent};
use crate::types::{
    encode_amount, external_lock, token_type, Asset, Bytes, CellOutput, Chain, Script,
    UnsignedTx,
};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct UnlockTxConfig {
    pub fees: FeePolicy,
    /// Capacity attached to token outputs
    pub token_cell_capacity: u64,
}

pub struct UnlockTxBuilder {
    chain: Chain,
    custody_lock: Script,
    funder: Funder,
    config: UnlockTxConfig,
}

impl UnlockTxBuilder {
    pub fn new(
        chain: Chain,
        custody_lock: Script,
        collector: Arc<dyn Collector>,
        config: UnlockTxConfig,
    ) -> Self {
        Self {
            chain,
            custody_lock,
            funder: Funder::new(collector, config.fees),
            config,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Pay every intent from custody and tag the transaction with an unlock
    /// memo listing the burns it settles
    pub async fn unlock(&self, intents: &[UnlockIntent]) -> RelayerResult<UnsignedTx> {
        if intents.is_empty() {
            return Err(RelayerError::Internal("unlock without intents".into()));
        }
        if let Some(foreign) = intents.iter().find(|i| i.chain != self.chain) {
            return Err(RelayerError::Internal(format!(
                "{} intent {:#x} routed to the {} builder",
                foreign.chain, foreign.ckb_tx_hash, self.chain
            )));
        }

        let mut groups: BTreeMap<String, (Asset, Vec<&UnlockIntent>)> = BTreeMap::new();
        for intent in intents {
            groups
                .entry(intent.asset.to_string())
                .or_insert_with(|| (intent.asset.clone(), Vec::new()))
                .1
                .push(intent);
        }

        let mut draft = Draft::default();
        for (asset, group) in groups.values() {
            if asset.is_native() {
                self.pay_native(&mut draft, asset, group)?;
            } else {
                self.pay_token(&mut draft, asset, group).await?;
            }
        }

        let memo = Memo::Unlock {
            burn_hashes: intents.iter().map(|i| i.ckb_tx_hash).collect(),
        };
        draft.add_output(CellOutput::new(0, Script::memo(), None), memo.encode());

        debug!(chain = %self.chain, intents = intents.len(), "Building unlock");
        self.funder.complete(draft, &self.custody_lock).await
    }

    fn pay_native(
        &self,
        draft: &mut Draft,
        asset: &Asset,
        group: &[&UnlockIntent],
    ) -> RelayerResult<()> {
        for intent in group {
            let capacity =
                u64::try_from(intent.amount).map_err(|_| RelayerError::AccountingMismatch {
                    asset: asset.to_string(),
                    required: intent.amount,
                    available: u64::MAX as u128,
                })?;
            draft.add_output(
                CellOutput::new(capacity, external_lock(self.chain, &intent.recipient)?, None),
                Bytes::default(),
            );
        }
        Ok(())
    }

    /// Spend one custody coin of the token that covers the whole group
    async fn pay_token(
        &self,
        draft: &mut Draft,
        asset: &Asset,
        group: &[&UnlockIntent],
    ) -> RelayerResult<()> {
        let required = group
            .iter()
            .try_fold(0u128, |sum, i| sum.checked_add(i.amount))
            .ok_or_else(|| RelayerError::Internal(format!("{asset} unlock total overflows")))?;

        let token = token_type(asset)?;
        let coins = self
            .funder
            .collector()
            .cells_by_script(&SearchKey::type_script(token.clone()))
            .await?;
        let mut best = 0u128;
        let mut chosen = None;
        for coin in coins {
            if coin.output.lock != self.custody_lock {
                continue;
            }
            let balance = coin.token_amount().unwrap_or_default();
            if balance >= required {
                chosen = Some((coin, balance));
                break;
            }
            best = best.max(balance);
        }
        let Some((coin, balance)) = chosen else {
            return Err(RelayerError::AccountingMismatch {
                asset: asset.to_string(),
                required,
                available: best,
            });
        };

        for intent in group {
            draft.add_output(
                CellOutput::new(
                    self.config.token_cell_capacity,
                    external_lock(self.chain, &intent.recipient)?,
                    Some(token.clone()),
                ),
                encode_amount(intent.amount),
            );
        }
        if balance > required {
            draft.add_output(
                CellOutput::new(coin.output.capacity, self.custody_lock.clone(), Some(token)),
                encode_amount(balance - required),
            );
        }
        draft.add_input(coin);
        Ok(())
    }
}
