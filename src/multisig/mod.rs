//! Committee multisig: the M-of-N script and the signing round around it

mod coordinator;
mod signer;

pub use coordinator::MultisigCoordinator;
pub use signer::{
    recover_signer, HttpPeerSigner, LocalSigner, PeerSigner, SignRequest, SignResponse,
    SignerService,
};

use crate::crypto::blake160;
use crate::error::{RelayerError, RelayerResult};
use crate::types::{H160, H256};

use std::collections::HashSet;

/// Members are identified by their secp256k1 address
pub type SignerId = H160;

/// M-of-N multisig script metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScript {
    pub require_first_n: u8,
    pub threshold: u8,
    pub signers: Vec<SignerId>,
}

impl MultisigScript {
    pub fn new(require_first_n: u8, threshold: u8, signers: Vec<SignerId>) -> RelayerResult<Self> {
        if signers.len() > u8::MAX as usize {
            return Err(RelayerError::Config(format!(
                "at most 255 multisig members, got {}",
                signers.len()
            )));
        }
        if threshold == 0 || threshold as usize > signers.len() {
            return Err(RelayerError::Config(format!(
                "threshold {threshold} out of range for {} members",
                signers.len()
            )));
        }
        if require_first_n > threshold {
            return Err(RelayerError::Config(format!(
                "require_first_n {require_first_n} exceeds threshold {threshold}"
            )));
        }
        let unique: HashSet<_> = signers.iter().collect();
        if unique.len() != signers.len() {
            return Err(RelayerError::Config("duplicate multisig member".into()));
        }
        Ok(Self {
            require_first_n,
            threshold,
            signers,
        })
    }

    pub fn contains(&self, id: &SignerId) -> bool {
        self.signers.contains(id)
    }

    /// `0 ‖ require_first_n ‖ M ‖ N ‖ ids…`
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 20 * self.signers.len());
        out.extend_from_slice(&[
            0,
            self.require_first_n,
            self.threshold,
            self.signers.len() as u8,
        ]);
        for signer in &self.signers {
            out.extend_from_slice(signer.as_bytes());
        }
        out
    }

    /// Args of the committee lock
    pub fn lock_args(&self) -> Vec<u8> {
        blake160(&self.serialize()).as_bytes().to_vec()
    }

    /// Hash of the serialized metadata, handy for logs
    pub fn id(&self) -> H256 {
        crate::crypto::blake2b_256(&[&self.serialize()])
    }
}
