use super::{Bytes, HashType, Script, H256};
use crate::error::{RelayerError, RelayerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chains the relayer talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ckb,
    Btc,
    Eth,
    Eos,
    Tron,
}

impl Chain {
    /// Wire tag used in burn payloads and bridge lock args
    pub fn tag(self) -> u8 {
        match self {
            Chain::Ckb => 0,
            Chain::Btc => 1,
            Chain::Eth => 2,
            Chain::Eos => 3,
            Chain::Tron => 4,
        }
    }

    /// Only external chains have a tag on the wire
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Chain::Btc),
            2 => Some(Chain::Eth),
            3 => Some(Chain::Eos),
            4 => Some(Chain::Tron),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Ckb => "ckb",
            Chain::Btc => "btc",
            Chain::Eth => "eth",
            Chain::Eos => "eos",
            Chain::Tron => "tron",
        }
    }

    /// Identifier of the chain's native coin
    pub fn native_asset_id(self) -> &'static str {
        match self {
            Chain::Ckb => "ckb",
            Chain::Btc => "btc",
            Chain::Eth => "0x0000000000000000000000000000000000000000",
            Chain::Eos => "EOS",
            Chain::Tron => "trx",
        }
    }

    /// Encode an address or asset identifier into its wire bytes.
    ///
    /// ETH identifiers are hex and travel as raw bytes, everything else is UTF-8.
    pub fn encode_field(self, value: &str) -> RelayerResult<Vec<u8>> {
        match self {
            Chain::Eth => {
                let digits = value.strip_prefix("0x").unwrap_or(value);
                hex::decode(digits).map_err(|e| {
                    RelayerError::InvalidPayload(format!("invalid hex field {value}: {e}"))
                })
            }
            _ => Ok(value.as_bytes().to_vec()),
        }
    }

    pub fn decode_field(self, bytes: &[u8]) -> RelayerResult<String> {
        match self {
            Chain::Eth => Ok(format!("0x{}", hex::encode(bytes))),
            _ => String::from_utf8(bytes.to_vec())
                .map_err(|e| RelayerError::InvalidPayload(format!("invalid utf-8 field: {e}"))),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ckb" => Ok(Chain::Ckb),
            "btc" => Ok(Chain::Btc),
            "eth" => Ok(Chain::Eth),
            "eos" => Ok(Chain::Eos),
            "tron" => Ok(Chain::Tron),
            other => Err(RelayerError::Config(format!("unknown chain {other}"))),
        }
    }
}

/// A bridged asset, identified on its origin chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "chain", content = "id", rename_all = "lowercase")]
pub enum Asset {
    Btc(String),
    Eth(String),
    Eos(String),
    Tron(String),
}

impl Asset {
    pub fn new(chain: Chain, id: impl Into<String>) -> RelayerResult<Self> {
        let id = id.into();
        match chain {
            Chain::Btc => Ok(Asset::Btc(id)),
            // checksummed and lowercase spellings must map to one bridge cell
            Chain::Eth => Ok(Asset::Eth(id.to_ascii_lowercase())),
            Chain::Eos => Ok(Asset::Eos(id)),
            Chain::Tron => Ok(Asset::Tron(id)),
            Chain::Ckb => Err(RelayerError::InvalidPayload(
                "ckb is not an asset origin".into(),
            )),
        }
    }

    pub fn native(chain: Chain) -> RelayerResult<Self> {
        Self::new(chain, chain.native_asset_id())
    }

    pub fn chain(&self) -> Chain {
        match self {
            Asset::Btc(_) => Chain::Btc,
            Asset::Eth(_) => Chain::Eth,
            Asset::Eos(_) => Chain::Eos,
            Asset::Tron(_) => Chain::Tron,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Asset::Btc(id) | Asset::Eth(id) | Asset::Eos(id) | Asset::Tron(id) => id,
        }
    }

    pub fn is_native(&self) -> bool {
        self.id() == self.chain().native_asset_id()
    }

    pub fn encode_id(&self) -> RelayerResult<Vec<u8>> {
        self.chain().encode_field(self.id())
    }

    /// Bridge lock args: `owner_lock_hash ‖ chain tag ‖ identifier bytes`
    pub fn bridge_lock_args(&self, owner_lock_hash: &H256) -> Bytes {
        let id = self.id().as_bytes();
        let mut args = Vec::with_capacity(33 + id.len());
        args.extend_from_slice(owner_lock_hash.as_bytes());
        args.push(self.chain().tag());
        args.extend_from_slice(id);
        Bytes::from(args)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain(), self.id())
    }
}

/// Lock script standing for an external-chain address in the neutral model
pub fn external_lock(chain: Chain, address: &str) -> RelayerResult<Script> {
    Ok(Script::new(
        H256::from_low_u64_be(chain.tag() as u64),
        HashType::Data,
        chain.encode_field(address)?,
    ))
}

/// Type script marking a non-native token output on an external chain
pub fn token_type(asset: &Asset) -> RelayerResult<Script> {
    Ok(Script::new(
        H256::from_low_u64_be(0x100 | asset.chain().tag() as u64),
        HashType::Type,
        asset.encode_id()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eth_assets_are_case_insensitive() {
        let upper = Asset::new(Chain::Eth, "0xAbCdEf0000000000000000000000000000000001").unwrap();
        let lower = Asset::new(Chain::Eth, "0xabcdef0000000000000000000000000000000001").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.encode_id().unwrap().len(), 20);
    }

    #[test]
    fn ckb_is_not_an_asset() {
        assert!(Asset::new(Chain::Ckb, "ckb").is_err());
        assert!(Chain::from_tag(0).is_none());
        assert_eq!(Chain::from_tag(Chain::Tron.tag()), Some(Chain::Tron));
    }

    #[test]
    fn bridge_lock_args_layout() {
        let owner = H256::repeat_byte(7);
        let args = Asset::native(Chain::Btc).unwrap().bridge_lock_args(&owner);
        assert_eq!(&args[..32], owner.as_bytes());
        assert_eq!(args[32], Chain::Btc.tag());
        assert_eq!(&args[33..], b"btc");
    }

    #[test]
    fn native_detection() {
        assert!(Asset::native(Chain::Eth).unwrap().is_native());
        assert!(!Asset::new(Chain::Eos, "USDT").unwrap().is_native());
    }

    #[test]
    fn eth_fields_roundtrip_as_lowercase_hex() {
        let bytes = Chain::Eth.encode_field("0xDEADbeef").unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(Chain::Eth.decode_field(&bytes).unwrap(), "0xdeadbeef");
        assert!(Chain::Eth.encode_field("0xzz").is_err());
    }
}
