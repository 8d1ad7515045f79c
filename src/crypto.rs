//! Hash helpers shared by script, transaction and multisig code

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ethers::types::{H160, H256};

type Blake2b256 = Blake2b<U32>;

/// blake2b-256 over the concatenation of `parts`
pub fn blake2b_256(parts: &[&[u8]]) -> H256 {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(hasher.finalize().as_slice())
}

/// First 20 bytes of the blake2b-256 digest
pub fn blake160(data: &[u8]) -> H160 {
    let digest = blake2b_256(&[data]);
    H160::from_slice(&digest.as_bytes()[..20])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenation_is_hashed_as_one_message() {
        assert_eq!(blake2b_256(&[b"ab", b"cd"]), blake2b_256(&[b"abcd"]));
        assert_ne!(blake2b_256(&[b"abcd"]), blake2b_256(&[b"abce"]));
    }

    #[test]
    fn blake160_is_digest_prefix() {
        let full = blake2b_256(&[b"multisig"]);
        assert_eq!(blake160(b"multisig").as_bytes(), &full.as_bytes()[..20]);
    }
}
