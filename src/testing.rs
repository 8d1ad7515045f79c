//! Fixtures and in-memory fakes shared by unit tests

use crate::chain::{ChainClient, Collector, ScriptKind, SearchKey};
use crate::config::{ScriptTemplate, ScriptsConfig};
use crate::error::RelayerResult;
use crate::events::{BurnEvent, LockEvent, MintIntent, UnlockIntent};
use crate::multisig::{LocalSigner, MultisigScript, PeerSigner, SignRequest, SignResponse, SignerService};
use crate::types::{
    Asset, Block, Bytes, Cell, CellOutput, Chain, HashType, OutPoint, Script, ScriptRegistry,
    SignedTx, Transaction, TxStatus, UnsignedTx, H256,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const CKB_RECIPIENT: &str = "ckb1qyqz0a2fz6ay22990fwt3mwt3pgdzlnrnmyswcl503";

/// Deterministic committee key number `index`
pub fn signer(index: usize) -> LocalSigner {
    LocalSigner::from_key(&format!("{:064x}", index + 1)).unwrap()
}

/// `m`-of-`n` committee over keys `0..n`
pub fn committee(n: usize, m: u8) -> MultisigScript {
    MultisigScript::new(0, m, (0..n).map(|i| signer(i).id()).collect()).unwrap()
}

pub fn scripts_config() -> ScriptsConfig {
    let template = |byte| ScriptTemplate {
        code_hash: H256::repeat_byte(byte),
        hash_type: HashType::Type,
    };
    ScriptsConfig {
        sudt_type: template(0x11),
        bridge_lock: template(0x22),
        recipient_type: template(0x33),
        multisig_lock: template(0x44),
        cell_deps: vec![],
    }
}

/// Registry for the default 2-of-3 test committee
pub fn registry() -> ScriptRegistry {
    ScriptRegistry::new(&scripts_config(), &committee(3, 2))
}

pub fn plain_cell(seed: u8, capacity: u64, lock: Script) -> Cell {
    Cell {
        out_point: OutPoint::new(H256::repeat_byte(seed), 0),
        output: CellOutput::new(capacity, lock, None),
        data: Bytes::default(),
    }
}

/// One-input one-output transaction paying a fee of 100
pub fn balanced_tx() -> UnsignedTx {
    let lock = Script::new(H256::repeat_byte(9), HashType::Type, vec![1u8; 20]);
    UnsignedTx {
        cell_deps: vec![],
        inputs: vec![plain_cell(1, 1_000, lock.clone())],
        outputs: vec![CellOutput::new(900, lock, None)],
        outputs_data: vec![Bytes::default()],
        fee: 100,
    }
}

pub fn block(number: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: H256::from_low_u64_be(number + 1),
        transactions,
    }
}

pub fn empty_block(number: u64) -> Block {
    block(number, vec![])
}

/// BTC deposit of `amount` to the sample CKB address
pub fn lock_event(id: &str, amount: u128) -> (LockEvent, MintIntent) {
    let event = LockEvent {
        id: id.to_string(),
        chain: Chain::Btc,
        asset: Asset::native(Chain::Btc).unwrap(),
        amount,
        recipient: CKB_RECIPIENT.to_string(),
        tx_hash: id.to_string(),
        tx_index: 0,
        block_height: 1,
        block_hash: format!("{:#x}", H256::from_low_u64_be(2)),
    };
    let intent = MintIntent::from_lock(&event);
    (event, intent)
}

pub fn external_recipient(chain: Chain) -> &'static str {
    match chain {
        Chain::Btc => "bc1qrecipient",
        Chain::Eth => "0x00a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3",
        Chain::Eos => "alice",
        Chain::Tron => "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8",
        Chain::Ckb => CKB_RECIPIENT,
    }
}

/// Burn of 1000 native units of `chain`, hash `0xseedseed…`
pub fn burn_event(seed: u8, chain: Chain) -> (BurnEvent, UnlockIntent) {
    let event = BurnEvent {
        ckb_tx_hash: H256::repeat_byte(seed),
        sender_lock_hash: H256::repeat_byte(0xee),
        asset: Asset::native(chain).unwrap(),
        chain,
        amount: 1_000,
        recipient: external_recipient(chain).to_string(),
        block_number: 1,
    };
    let intent = UnlockIntent::from_burn(&event);
    (event, intent)
}

/// Peer answering through an in-process signing service
pub struct StaticPeer {
    name: String,
    service: Arc<SignerService>,
}

impl StaticPeer {
    pub fn new(name: &str, service: Arc<SignerService>) -> Self {
        Self {
            name: name.to_string(),
            service,
        }
    }
}

#[async_trait]
impl PeerSigner for StaticPeer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_signature(&self, request: &SignRequest) -> RelayerResult<SignResponse> {
        self.service.handle(request)
    }
}

/// Peer that never answers
pub struct SilentPeer;

#[async_trait]
impl PeerSigner for SilentPeer {
    fn name(&self) -> &str {
        "silent"
    }

    async fn request_signature(&self, _request: &SignRequest) -> RelayerResult<SignResponse> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct FakeState {
    blocks: Vec<Block>,
    live: Vec<Cell>,
    transactions: HashMap<H256, Transaction>,
    statuses: HashMap<H256, TxStatus>,
    broadcasts: Vec<SignedTx>,
    next_seed: u64,
}

/// A toy chain: live cell set, blocks and instant commitment
///
/// Broadcasting spends the inputs, creates the outputs and appends a block
/// holding the transaction, which is committed unless `hold_commits` is set.
pub struct FakeChain {
    chain: Chain,
    state: Mutex<FakeState>,
    hold_commits: AtomicBool,
}

impl FakeChain {
    pub fn new(chain: Chain) -> Arc<Self> {
        let fake = Self {
            chain,
            state: Mutex::new(FakeState::default()),
            hold_commits: AtomicBool::new(false),
        };
        fake.state.lock().unwrap().blocks.push(empty_block(0));
        Arc::new(fake)
    }

    /// Give `lock` a plain cell worth `capacity`
    pub fn fund(&self, lock: &Script, capacity: u64) {
        let mut state = self.state.lock().unwrap();
        state.next_seed += 1;
        let out_point = OutPoint::new(H256::from_low_u64_be(0xf000_0000 + state.next_seed), 0);
        state.live.push(Cell {
            out_point,
            output: CellOutput::new(capacity, lock.clone(), None),
            data: Bytes::default(),
        });
    }

    pub fn add_cell(&self, cell: Cell) {
        self.state.lock().unwrap().live.push(cell);
    }

    /// Append a block of foreign transactions
    pub fn push_block(&self, transactions: Vec<Transaction>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let number = state.blocks.len() as u64;
        for tx in &transactions {
            state.transactions.insert(tx.hash, tx.clone());
        }
        state.blocks.push(block(number, transactions));
        number
    }

    pub fn hold_commits(&self, hold: bool) {
        self.hold_commits.store(hold, Ordering::SeqCst);
    }

    pub fn broadcasts(&self) -> Vec<SignedTx> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn live_cells(&self) -> Vec<Cell> {
        self.state.lock().unwrap().live.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn tip_height(&self) -> RelayerResult<u64> {
        Ok(self.state.lock().unwrap().blocks.len() as u64 - 1)
    }

    async fn block_by_height(&self, height: u64) -> RelayerResult<Option<Block>> {
        Ok(self.state.lock().unwrap().blocks.get(height as usize).cloned())
    }

    async fn transaction(&self, hash: &H256) -> RelayerResult<Option<Transaction>> {
        Ok(self.state.lock().unwrap().transactions.get(hash).cloned())
    }

    async fn transaction_status(&self, hash: &H256) -> RelayerResult<TxStatus> {
        let state = self.state.lock().unwrap();
        Ok(state.statuses.get(hash).copied().unwrap_or(TxStatus::Unknown))
    }

    async fn broadcast(&self, tx: &SignedTx) -> RelayerResult<H256> {
        let onchain = tx.tx.to_transaction();
        let hash = onchain.hash;
        let mut state = self.state.lock().unwrap();

        state
            .live
            .retain(|cell| !onchain.inputs.contains(&cell.out_point));
        for (index, (output, data)) in onchain
            .outputs
            .iter()
            .zip(onchain.outputs_data.iter())
            .enumerate()
        {
            state.live.push(Cell {
                out_point: OutPoint::new(hash, index as u32),
                output: output.clone(),
                data: data.clone(),
            });
        }

        let status = if self.hold_commits.load(Ordering::SeqCst) {
            TxStatus::Pending
        } else {
            TxStatus::Committed
        };
        state.statuses.insert(hash, status);
        state.transactions.insert(hash, onchain.clone());
        state.broadcasts.push(tx.clone());
        let number = state.blocks.len() as u64;
        state.blocks.push(block(number, vec![onchain]));
        Ok(hash)
    }
}

#[async_trait]
impl Collector for FakeChain {
    async fn cells_by_owner_and_min_value(
        &self,
        owner: &Script,
        _min_value: u64,
    ) -> RelayerResult<Vec<Cell>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .live
            .iter()
            .filter(|c| c.output.lock == *owner && c.is_plain())
            .cloned()
            .collect())
    }

    async fn cells_by_script(&self, key: &SearchKey) -> RelayerResult<Vec<Cell>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .live
            .iter()
            .filter(|c| match key.kind {
                ScriptKind::Lock => c.output.lock == key.script,
                ScriptKind::Type => c.output.type_script.as_ref() == Some(&key.script),
            })
            .cloned()
            .collect())
    }

    async fn indexed_height(&self) -> RelayerResult<u64> {
        self.tip_height().await
    }
}
