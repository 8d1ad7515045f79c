//! CKB-side transactions: asset registration, mint batches and user burns

use super::builder::{Draft, FeePolicy, Funder};
use crate::chain::{Collector, SearchKey};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BurnPayload, MintIntent};
use crate::types::{
    encode_amount, parse_ckb_address, Asset, Bytes, Cell, CellOutput, Script, ScriptRegistry,
    UnsignedTx, ONE_CKB,
};

use std::sync::Arc;
use tracing::debug;

/// Bytes a recipient cell needs beyond its payload
const RECIPIENT_CELL_OVERHEAD: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct CkbTxConfig {
    pub fees: FeePolicy,
    /// Capacity of every minted sUDT cell
    pub sudt_cell_capacity: u64,
    /// Capacity of a freshly registered bridge cell
    pub bridge_cell_capacity: u64,
}

/// A user's request to burn wrapped tokens back to their origin chain
#[derive(Debug, Clone)]
pub struct BurnRequest {
    pub owner_lock: Script,
    pub asset: Asset,
    pub amount: u128,
    /// Address on the origin chain
    pub recipient: String,
}

pub struct CkbTxBuilder {
    registry: Arc<ScriptRegistry>,
    funder: Funder,
    config: CkbTxConfig,
}

impl CkbTxBuilder {
    pub fn new(
        collector: Arc<dyn Collector>,
        registry: Arc<ScriptRegistry>,
        config: CkbTxConfig,
    ) -> Self {
        Self {
            registry,
            funder: Funder::new(collector, config.fees),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    fn collector(&self) -> &Arc<dyn Collector> {
        self.funder.collector()
    }

    /// Live bridge cell of `asset`, `None` until the asset is registered
    pub async fn bridge_cell(&self, asset: &Asset) -> RelayerResult<Option<Cell>> {
        let key = SearchKey::lock(self.registry.bridge_lock(asset));
        let cells = self.collector().cells_by_script(&key).await?;
        Ok(cells.into_iter().next())
    }

    /// Distinct assets of `intents` that have no bridge cell yet, in first-seen order
    pub async fn unregistered_assets(&self, intents: &[MintIntent]) -> RelayerResult<Vec<Asset>> {
        let mut seen: Vec<&Asset> = Vec::new();
        let mut missing = Vec::new();
        for intent in intents {
            if seen.contains(&&intent.asset) {
                continue;
            }
            seen.push(&intent.asset);
            if self.bridge_cell(&intent.asset).await?.is_none() {
                missing.push(intent.asset.clone());
            }
        }
        Ok(missing)
    }

    /// One bridge cell per asset, paid by the committee
    pub async fn registration(&self, assets: &[Asset]) -> RelayerResult<UnsignedTx> {
        if assets.is_empty() {
            return Err(RelayerError::Internal("registration without assets".into()));
        }
        let mut draft = Draft::new(self.registry.cell_deps().to_vec());
        for asset in assets {
            draft.add_output(
                CellOutput::new(
                    self.config.bridge_cell_capacity,
                    self.registry.bridge_lock(asset),
                    None,
                ),
                Bytes::default(),
            );
        }
        debug!(assets = assets.len(), "Building registration");
        self.funder.complete(draft, self.registry.owner_lock()).await
    }

    /// Mint one sUDT cell per intent
    ///
    /// Each asset's bridge cell is spent and recreated unchanged so the sUDT
    /// type script sees its owner lock among the inputs.
    pub async fn mint(&self, intents: &[MintIntent]) -> RelayerResult<UnsignedTx> {
        if intents.is_empty() {
            return Err(RelayerError::Internal("mint without intents".into()));
        }
        let mut draft = Draft::new(self.registry.cell_deps().to_vec());

        let mut assets: Vec<&Asset> = Vec::new();
        for intent in intents {
            if !assets.contains(&&intent.asset) {
                assets.push(&intent.asset);
            }
        }
        for asset in assets {
            let cell = self.bridge_cell(asset).await?.ok_or_else(|| {
                RelayerError::AssetNotRegistered {
                    asset: asset.to_string(),
                }
            })?;
            draft.add_output(cell.output.clone(), cell.data.clone());
            draft.add_input(cell);
        }

        for intent in intents {
            let lock = parse_ckb_address(&intent.recipient)?;
            draft.add_output(
                CellOutput::new(
                    self.config.sudt_cell_capacity,
                    lock,
                    Some(self.registry.sudt_type(&intent.asset)),
                ),
                encode_amount(intent.amount),
            );
        }

        debug!(intents = intents.len(), "Building mint");
        self.funder.complete(draft, self.registry.owner_lock()).await
    }

    /// Burn `amount` wrapped tokens of the requester
    ///
    /// Output 0 is the recipient cell carrying the burn payload; remaining
    /// tokens return to the owner.
    pub async fn burn(&self, request: &BurnRequest) -> RelayerResult<UnsignedTx> {
        let sudt = self.registry.sudt_type(&request.asset);
        let cells = self
            .collector()
            .cells_by_script(&SearchKey::type_script(sudt.clone()))
            .await?;
        let token_cell = cells
            .into_iter()
            .find(|c| c.output.lock == request.owner_lock && c.token_amount().is_some())
            .ok_or_else(|| RelayerError::AccountingMismatch {
                asset: request.asset.to_string(),
                required: request.amount,
                available: 0,
            })?;
        let balance = token_cell.token_amount().unwrap_or_default();
        if balance < request.amount {
            return Err(RelayerError::AccountingMismatch {
                asset: request.asset.to_string(),
                required: request.amount,
                available: balance,
            });
        }

        let payload = BurnPayload {
            chain: request.asset.chain(),
            recipient: request.recipient.clone(),
            asset: request.asset.id().to_string(),
            amount: request.amount,
            bridge_lock_code_hash: self.registry.bridge_lock_code_hash(),
            owner_lock_hash: self.registry.owner_lock_hash(),
        }
        .encode()?;

        let mut draft = Draft::new(self.registry.cell_deps().to_vec());
        let recipient_capacity = (payload.len() as u64 + RECIPIENT_CELL_OVERHEAD) * ONE_CKB;
        draft.add_output(
            CellOutput::new(
                recipient_capacity,
                request.owner_lock.clone(),
                Some(self.registry.recipient_type()),
            ),
            payload,
        );
        if balance > request.amount {
            draft.add_output(
                CellOutput::new(
                    token_cell.output.capacity,
                    request.owner_lock.clone(),
                    Some(sudt),
                ),
                encode_amount(balance - request.amount),
            );
        }
        draft.add_input(token_cell);

        self.funder.complete(draft, &request.owner_lock).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockCollector, ScriptKind};
    use crate::testing;
    use crate::types::{decode_amount, Chain, HashType, H256};

    const RECIPIENT: &str = "ckb1qyqz0a2fz6ay22990fwt3mwt3pgdzlnrnmyswcl503";

    const CONFIG: CkbTxConfig = CkbTxConfig {
        fees: FeePolicy {
            fee: 100_000,
            min_change_capacity: 64 * ONE_CKB,
        },
        sudt_cell_capacity: 300 * ONE_CKB,
        bridge_cell_capacity: 100 * ONE_CKB,
    };

    fn btc() -> Asset {
        Asset::native(Chain::Btc).unwrap()
    }

    fn mint_intent(id: &str, amount: u128) -> MintIntent {
        testing::lock_event(id, amount).1
    }

    /// Collector holding a funding pool for the committee plus `by_script` cells
    fn collector(registry: &ScriptRegistry, by_script: Vec<Cell>) -> MockCollector {
        let owner = registry.owner_lock().clone();
        let pool = vec![testing::plain_cell(0x70, 10_000 * ONE_CKB, owner)];
        let mut collector = MockCollector::new();
        collector
            .expect_cells_by_owner_and_min_value()
            .returning(move |_, _| Ok(pool.clone()));
        collector.expect_cells_by_script().returning(move |key| {
            Ok(by_script
                .iter()
                .filter(|c| match key.kind {
                    ScriptKind::Lock => c.output.lock == key.script,
                    ScriptKind::Type => c.output.type_script.as_ref() == Some(&key.script),
                })
                .cloned()
                .collect())
        });
        collector
    }

    fn builder(by_script: Vec<Cell>) -> CkbTxBuilder {
        let registry = Arc::new(testing::registry());
        let collector = collector(&registry, by_script);
        CkbTxBuilder::new(Arc::new(collector), registry, CONFIG)
    }

    fn bridge_cell(registry: &ScriptRegistry, asset: &Asset) -> Cell {
        testing::plain_cell(0x60, 100 * ONE_CKB, registry.bridge_lock(asset))
    }

    #[tokio::test]
    async fn registration_creates_one_bridge_cell_per_asset() {
        let builder = builder(vec![]);
        let eth = Asset::native(Chain::Eth).unwrap();
        let tx = builder.registration(&[btc(), eth.clone()]).await.unwrap();

        assert_eq!(tx.outputs[0].lock, builder.registry().bridge_lock(&btc()));
        assert_eq!(tx.outputs[1].lock, builder.registry().bridge_lock(&eth));
        assert_eq!(tx.outputs[0].capacity, 100 * ONE_CKB);
        assert_eq!(tx.outputs[2].lock, *builder.registry().owner_lock());
        assert!(tx.is_balanced());
    }

    #[tokio::test]
    async fn unregistered_assets_are_deduplicated() {
        let registry = testing::registry();
        let builder = builder(vec![bridge_cell(&registry, &btc())]);
        let mut eth_intent = mint_intent("b", 5);
        eth_intent.asset = Asset::native(Chain::Eth).unwrap();
        let mut eth_again = mint_intent("c", 6);
        eth_again.asset = eth_intent.asset.clone();

        let missing = builder
            .unregistered_assets(&[mint_intent("a", 1), eth_intent.clone(), eth_again])
            .await
            .unwrap();
        assert_eq!(missing, vec![eth_intent.asset]);
    }

    #[tokio::test]
    async fn mint_recreates_bridge_cell_and_pays_recipients() {
        let registry = testing::registry();
        let bridge = bridge_cell(&registry, &btc());
        let builder = builder(vec![bridge.clone()]);

        let tx = builder
            .mint(&[mint_intent("a", 50_000), mint_intent("b", 7)])
            .await
            .unwrap();

        assert_eq!(tx.inputs[0], bridge);
        assert_eq!(tx.outputs[0], bridge.output);

        let recipient = parse_ckb_address(RECIPIENT).unwrap();
        let sudt = registry.sudt_type(&btc());
        for (index, amount) in [(1, 50_000u128), (2, 7)] {
            assert_eq!(tx.outputs[index].lock, recipient);
            assert_eq!(tx.outputs[index].type_script.as_ref(), Some(&sudt));
            assert_eq!(tx.outputs[index].capacity, 300 * ONE_CKB);
            assert_eq!(decode_amount(&tx.outputs_data[index]), Some(amount));
        }
        assert!(tx.is_balanced());
    }

    #[tokio::test]
    async fn mint_of_unregistered_asset_fails() {
        let builder = builder(vec![]);
        let err = builder.mint(&[mint_intent("a", 1)]).await.unwrap_err();
        assert!(matches!(err, RelayerError::AssetNotRegistered { .. }));
    }

    fn user() -> Script {
        Script::new(H256::repeat_byte(0x21), HashType::Type, vec![3u8; 20])
    }

    fn user_tokens(registry: &ScriptRegistry, amount: u128) -> Cell {
        let mut cell = testing::plain_cell(0x50, 300 * ONE_CKB, user());
        cell.output.type_script = Some(registry.sudt_type(&btc()));
        cell.data = encode_amount(amount);
        cell
    }

    /// Burns are funded by the user, so give the user a pool too
    fn burn_builder(tokens: Cell) -> CkbTxBuilder {
        let registry = Arc::new(testing::registry());
        let pool = vec![testing::plain_cell(0x71, 1_000 * ONE_CKB, user())];
        let mut collector = MockCollector::new();
        collector
            .expect_cells_by_owner_and_min_value()
            .returning(move |_, _| Ok(pool.clone()));
        collector
            .expect_cells_by_script()
            .returning(move |_| Ok(vec![tokens.clone()]));
        CkbTxBuilder::new(Arc::new(collector), registry, CONFIG)
    }

    fn burn_request(amount: u128) -> BurnRequest {
        BurnRequest {
            owner_lock: user(),
            asset: btc(),
            amount,
            recipient: "bc1qrecipient".into(),
        }
    }

    #[tokio::test]
    async fn partial_burn_returns_token_change() {
        let registry = testing::registry();
        let builder = burn_builder(user_tokens(&registry, 1_000));
        let tx = builder.burn(&burn_request(400)).await.unwrap();

        let recipient_cell = &tx.outputs[0];
        assert_eq!(recipient_cell.type_script, Some(registry.recipient_type()));
        let payload = BurnPayload::decode(&tx.outputs_data[0]).unwrap();
        assert_eq!(payload.amount, 400);
        assert_eq!(payload.recipient, "bc1qrecipient");
        assert_eq!(payload.asset().unwrap(), btc());
        assert_eq!(
            recipient_cell.capacity,
            (tx.outputs_data[0].len() as u64 + RECIPIENT_CELL_OVERHEAD) * ONE_CKB
        );

        assert_eq!(decode_amount(&tx.outputs_data[1]), Some(600));
        assert!(tx.is_balanced());
    }

    #[tokio::test]
    async fn burning_more_than_held_is_an_accounting_mismatch() {
        let registry = testing::registry();
        let builder = burn_builder(user_tokens(&registry, 100));
        match builder.burn(&burn_request(400)).await.unwrap_err() {
            RelayerError::AccountingMismatch {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 400);
                assert_eq!(available, 100);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
