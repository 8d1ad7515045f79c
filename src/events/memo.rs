//! Memo outputs on external chains
//!
//! A depositor tags a lock transaction with the CKB address to mint to; the
//! relayer tags its own unlock transactions with the burns they settle.

use super::payload::Reader;
use crate::error::{RelayerError, RelayerResult};
use crate::types::H256;

const TAG_LOCK: u8 = 0x01;
const TAG_UNLOCK: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    Lock { recipient: String },
    Unlock { burn_hashes: Vec<H256> },
}

impl Memo {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Memo::Lock { recipient } => {
                buf.push(TAG_LOCK);
                buf.extend_from_slice(&(recipient.len() as u32).to_le_bytes());
                buf.extend_from_slice(recipient.as_bytes());
            }
            Memo::Unlock { burn_hashes } => {
                buf.push(TAG_UNLOCK);
                buf.extend_from_slice(&(burn_hashes.len() as u32).to_le_bytes());
                for hash in burn_hashes {
                    buf.extend_from_slice(hash.as_bytes());
                }
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> RelayerResult<Self> {
        let mut reader = Reader::new(bytes);
        let memo = match reader.take(1)?[0] {
            TAG_LOCK => {
                let raw = reader.field()?;
                let recipient = String::from_utf8(raw.to_vec())
                    .map_err(|e| RelayerError::InvalidPayload(format!("memo recipient: {e}")))?;
                if recipient.is_empty() {
                    return Err(RelayerError::InvalidPayload("empty memo recipient".into()));
                }
                Memo::Lock { recipient }
            }
            TAG_UNLOCK => {
                let count = reader.u32()? as usize;
                let mut burn_hashes = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    burn_hashes.push(H256(reader.array()?));
                }
                Memo::Unlock { burn_hashes }
            }
            tag => {
                return Err(RelayerError::InvalidPayload(format!("unknown memo tag {tag}")));
            }
        };
        reader.finish()?;
        Ok(memo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_memo_layout() {
        let memo = Memo::Lock {
            recipient: "ckt1abc".into(),
        };
        let bytes = memo.encode();
        assert_eq!(bytes[0], TAG_LOCK);
        assert_eq!(&bytes[1..5], &7u32.to_le_bytes());
        assert_eq!(Memo::decode(&bytes).unwrap(), memo);
    }

    #[test]
    fn unlock_memo_lists_burns() {
        let memo = Memo::Unlock {
            burn_hashes: vec![H256::repeat_byte(1), H256::repeat_byte(2)],
        };
        let bytes = memo.encode();
        assert_eq!(bytes.len(), 1 + 4 + 64);
        assert_eq!(Memo::decode(&bytes).unwrap(), memo);
    }

    #[test]
    fn malformed_memos_are_rejected() {
        assert!(Memo::decode(&[]).is_err());
        assert!(Memo::decode(&[0x07, 0, 0, 0, 0]).is_err());
        assert!(Memo::decode(&[TAG_LOCK, 0, 0, 0, 0]).is_err());
        assert!(Memo::decode(&[TAG_UNLOCK, 1, 0, 0, 0, 0xaa]).is_err());
    }
}
