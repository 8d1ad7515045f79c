//! Chain-neutral transaction model
//!
//! Every chain adapter translates its native blocks and transactions into
//! these cell-style types, so watchers, the builder and the multisig
//! coordinator work the same way for CKB and for the external chains.

mod address;
mod asset;
mod registry;

pub use address::{parse_ckb_address, SECP256K1_BLAKE160_CODE_HASH};
pub use asset::{external_lock, token_type, Asset, Chain};
pub use registry::ScriptRegistry;

pub use ethers::types::{Bytes, H160, H256};

use crate::crypto::blake2b_256;
use serde::{Deserialize, Serialize};

/// Shannons in one CKB
pub const ONE_CKB: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Data,
    Type,
    Data1,
}

impl HashType {
    pub fn as_byte(self) -> u8 {
        match self {
            HashType::Data => 0,
            HashType::Type => 1,
            HashType::Data1 => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(HashType::Data),
            1 => Some(HashType::Type),
            2 => Some(HashType::Data1),
            _ => None,
        }
    }
}

/// A lock or type script
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: H256,
    pub hash_type: HashType,
    pub args: Bytes,
}

impl Script {
    pub fn new(code_hash: H256, hash_type: HashType, args: impl Into<Bytes>) -> Self {
        Self {
            code_hash,
            hash_type,
            args: args.into(),
        }
    }

    /// The script carried by memo outputs
    pub fn memo() -> Self {
        Self::new(H256::zero(), HashType::Data, Bytes::default())
    }

    pub fn is_memo(&self) -> bool {
        *self == Self::memo()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(37 + self.args.len());
        buf.extend_from_slice(self.code_hash.as_bytes());
        buf.push(self.hash_type.as_byte());
        write_bytes(&mut buf, &self.args);
        buf
    }

    pub fn hash(&self) -> H256 {
        blake2b_256(&[&self.serialize()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: H256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: H256, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type", default)]
    pub type_script: Option<Script>,
}

impl CellOutput {
    pub fn new(capacity: u64, lock: Script, type_script: Option<Script>) -> Self {
        Self {
            capacity,
            lock,
            type_script,
        }
    }

    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        write_bytes(buf, &self.lock.serialize());
        match &self.type_script {
            Some(script) => write_bytes(buf, &script.serialize()),
            None => write_bytes(buf, &[]),
        }
    }
}

/// A live cell (or UTXO) with its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub out_point: OutPoint,
    pub output: CellOutput,
    #[serde(default)]
    pub data: Bytes,
}

impl Cell {
    /// Plain capacity cell: no type script and no data
    pub fn is_plain(&self) -> bool {
        self.output.type_script.is_none() && self.data.is_empty()
    }

    /// Token balance stored in the first 16 bytes of cell data
    pub fn token_amount(&self) -> Option<u128> {
        decode_amount(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

/// Transaction as observed on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: H256,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: H256,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Unknown,
    Pending,
    Proposed,
    Committed,
    Rejected,
}

/// A fully funded transaction awaiting signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub cell_deps: Vec<CellDep>,
    pub inputs: Vec<Cell>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Bytes>,
    pub fee: u64,
}

impl UnsignedTx {
    pub fn input_capacity(&self) -> u128 {
        self.inputs
            .iter()
            .map(|c| c.output.capacity as u128)
            .sum()
    }

    pub fn output_capacity(&self) -> u128 {
        self.outputs.iter().map(|o| o.capacity as u128).sum()
    }

    /// `Σ outputs + fee == Σ inputs` and one data entry per output
    pub fn is_balanced(&self) -> bool {
        self.outputs.len() == self.outputs_data.len()
            && self.output_capacity() + self.fee as u128 == self.input_capacity()
    }

    pub fn hash(&self) -> H256 {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.cell_deps.len() as u32).to_le_bytes());
        for dep in &self.cell_deps {
            write_out_point(&mut buf, &dep.out_point);
            buf.push(match dep.dep_type {
                DepType::Code => 0,
                DepType::DepGroup => 1,
            });
        }
        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            write_out_point(&mut buf, &input.out_point);
        }
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            output.serialize_into(&mut buf);
        }
        for data in &self.outputs_data {
            write_bytes(&mut buf, data);
        }
        blake2b_256(&[&buf])
    }

    /// Digest every multisig member signs
    pub fn signing_digest(&self) -> H256 {
        let hash = self.hash();
        let input_count = self.inputs.len() as u64;
        blake2b_256(&[hash.as_bytes(), &input_count.to_le_bytes()])
    }

    /// The on-chain view of this transaction
    pub fn to_transaction(&self) -> Transaction {
        Transaction {
            hash: self.hash(),
            inputs: self.inputs.iter().map(|c| c.out_point).collect(),
            outputs: self.outputs.clone(),
            outputs_data: self.outputs_data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: UnsignedTx,
    pub witness: Bytes,
}

impl SignedTx {
    pub fn hash(&self) -> H256 {
        self.tx.hash()
    }
}

/// u128 little-endian token amount as stored in cell data
pub fn encode_amount(amount: u128) -> Bytes {
    Bytes::from(amount.to_le_bytes().to_vec())
}

pub fn decode_amount(data: &[u8]) -> Option<u128> {
    let raw: [u8; 16] = data.get(..16)?.try_into().ok()?;
    Some(u128::from_le_bytes(raw))
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn write_out_point(buf: &mut Vec<u8>, out_point: &OutPoint) {
    buf.extend_from_slice(out_point.tx_hash.as_bytes());
    buf.extend_from_slice(&out_point.index.to_le_bytes());
}
