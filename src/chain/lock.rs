//! Lock detection on external chains
//!
//! A deposit is a transaction paying the custody lock together with a memo
//! output naming the CKB recipient. The same watcher recognises the unlock
//! memo the relayer attaches to its own unlock transactions.

use super::watcher::{BlockMatcher, WatchedEvent};
use crate::error::RelayerResult;
use crate::events::{LockEvent, Memo};
use crate::types::{decode_amount, token_type, Asset, Block, Chain, Script, Transaction};

use async_trait::async_trait;
use tracing::{debug, warn};

pub struct LockMatcher {
    chain: Chain,
    custody_lock: Script,
}

impl LockMatcher {
    pub fn new(chain: Chain, custody_lock: Script) -> Self {
        Self {
            chain,
            custody_lock,
        }
    }

    fn first_memo(tx: &Transaction) -> Option<Memo> {
        tx.outputs
            .iter()
            .zip(tx.outputs_data.iter())
            .filter(|(output, _)| output.lock.is_memo())
            .find_map(|(_, data)| match Memo::decode(data) {
                Ok(memo) => Some(memo),
                Err(e) => {
                    debug!(tx = %format!("{:#x}", tx.hash), error = %e, "Skipping malformed memo");
                    None
                }
            })
    }

    /// Asset carried by one custody output, `None` for foreign tokens
    fn output_asset(&self, type_script: Option<&Script>) -> Option<Asset> {
        match type_script {
            None => Asset::native(self.chain).ok(),
            Some(script) => {
                let id = self.chain.decode_field(&script.args).ok()?;
                let asset = Asset::new(self.chain, id).ok()?;
                (token_type(&asset).ok()? == *script).then_some(asset)
            }
        }
    }

    /// The single asset paid to custody and its total amount
    fn custody_deposit(&self, tx: &Transaction) -> Option<(Asset, u128)> {
        let mut deposit: Option<(Asset, u128)> = None;

        for (output, data) in tx.outputs.iter().zip(tx.outputs_data.iter()) {
            if output.lock != self.custody_lock {
                continue;
            }
            let Some(asset) = self.output_asset(output.type_script.as_ref()) else {
                continue;
            };
            let amount = match output.type_script {
                None => output.capacity as u128,
                Some(_) => decode_amount(data)?,
            };

            deposit = match deposit {
                None => Some((asset, amount)),
                Some((seen, total)) if seen == asset => Some((seen, total.checked_add(amount)?)),
                Some((seen, _)) => {
                    warn!(
                        tx = %format!("{:#x}", tx.hash),
                        first = %seen,
                        second = %asset,
                        "Deposit pays several assets to custody, skipping"
                    );
                    return None;
                }
            };
        }
        deposit.filter(|(_, amount)| *amount > 0)
    }
}

#[async_trait]
impl BlockMatcher for LockMatcher {
    async fn match_block(&self, block: &Block) -> RelayerResult<Vec<WatchedEvent>> {
        let mut events = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            let tx_hash = format!("{:#x}", tx.hash);
            match Self::first_memo(tx) {
                Some(Memo::Lock { recipient }) => {
                    let Some((asset, amount)) = self.custody_deposit(tx) else {
                        continue;
                    };
                    events.push(WatchedEvent::Lock(LockEvent {
                        id: tx_hash.clone(),
                        chain: self.chain,
                        asset,
                        amount,
                        recipient,
                        tx_hash,
                        tx_index: index as u32,
                        block_height: block.number,
                        block_hash: format!("{:#x}", block.hash),
                    }));
                }
                Some(Memo::Unlock { burn_hashes }) => {
                    events.push(WatchedEvent::UnlockReceipt {
                        burn_hashes,
                        tx_hash,
                    });
                }
                None => {}
            }
        }
        Ok(events)
    }
}
