//! Burn payload carried in the recipient cell of a CKB burn transaction
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! chain tag      u8
//! recipient      u32 length + bytes
//! asset          u32 length + bytes
//! amount         u128
//! bridge lock    32-byte code hash
//! owner lock     32-byte lock hash
//! ```
//!
//! Recipient and asset are raw bytes for ETH (hex addresses) and UTF-8
//! strings for every other chain.

use crate::error::{RelayerError, RelayerResult};
use crate::types::{Asset, Chain, H256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnPayload {
    pub chain: Chain,
    pub recipient: String,
    pub asset: String,
    pub amount: u128,
    pub bridge_lock_code_hash: H256,
    pub owner_lock_hash: H256,
}

impl BurnPayload {
    pub fn encode(&self) -> RelayerResult<Vec<u8>> {
        if Chain::from_tag(self.chain.tag()).is_none() {
            return Err(RelayerError::InvalidPayload(format!(
                "{} cannot be a burn destination",
                self.chain
            )));
        }
        let recipient = self.chain.encode_field(&self.recipient)?;
        let asset = self.chain.encode_field(&self.asset)?;

        let mut buf = Vec::with_capacity(1 + 8 + recipient.len() + asset.len() + 16 + 64);
        buf.push(self.chain.tag());
        write_field(&mut buf, &recipient)?;
        write_field(&mut buf, &asset)?;
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(self.bridge_lock_code_hash.as_bytes());
        buf.extend_from_slice(self.owner_lock_hash.as_bytes());
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> RelayerResult<Self> {
        let mut reader = Reader::new(bytes);
        let tag = reader.take(1)?[0];
        let chain = Chain::from_tag(tag)
            .ok_or_else(|| RelayerError::InvalidPayload(format!("unknown chain tag {tag}")))?;
        let recipient = chain.decode_field(reader.field()?)?;
        let asset = chain.decode_field(reader.field()?)?;
        let amount = u128::from_le_bytes(reader.array()?);
        let bridge_lock_code_hash = H256(reader.array()?);
        let owner_lock_hash = H256(reader.array()?);
        reader.finish()?;

        Ok(Self {
            chain,
            recipient,
            asset,
            amount,
            bridge_lock_code_hash,
            owner_lock_hash,
        })
    }

    pub fn asset(&self) -> RelayerResult<Asset> {
        Asset::new(self.chain, self.asset.clone())
    }
}

fn write_field(buf: &mut Vec<u8>, field: &[u8]) -> RelayerResult<()> {
    let len = u32::try_from(field.len())
        .map_err(|_| RelayerError::InvalidPayload("field longer than u32::MAX".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(field);
    Ok(())
}

pub(super) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(super) fn take(&mut self, n: usize) -> RelayerResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                RelayerError::InvalidPayload(format!(
                    "need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(super) fn array<const N: usize>(&mut self) -> RelayerResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(super) fn u32(&mut self) -> RelayerResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(super) fn field(&mut self) -> RelayerResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(super) fn finish(&self) -> RelayerResult<()> {
        if self.pos != self.buf.len() {
            return Err(RelayerError::InvalidPayload(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}
