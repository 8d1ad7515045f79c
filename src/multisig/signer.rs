//! Local key, the signing service peers call, and the HTTP peer client

use super::SignerId;
use crate::error::{RelayerError, RelayerResult};
use crate::types::{Bytes, UnsignedTx, H256};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Signature;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One signing round as sent to every peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub round_id: Uuid,
    pub digest: H256,
    pub tx: UnsignedTx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    pub signer_id: SignerId,
    /// 65 bytes `r ‖ s ‖ recovery id`
    pub signature: Bytes,
}

/// A remote committee member
#[async_trait]
pub trait PeerSigner: Send + Sync {
    fn name(&self) -> &str;

    async fn request_signature(&self, request: &SignRequest) -> RelayerResult<SignResponse>;
}

/// This node's committee key
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    /// Load the key from an environment variable
    pub fn from_env(var: &str) -> RelayerResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| RelayerError::Config(format!("No signing key configured, set {var}")))?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &str) -> RelayerResult<Self> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Config(format!("Invalid private key: {e}")))?;
        Ok(Self { wallet })
    }

    pub fn id(&self) -> SignerId {
        self.wallet.address()
    }

    pub fn sign_digest(&self, digest: &H256) -> RelayerResult<Bytes> {
        let signature = self
            .wallet
            .sign_hash(*digest)
            .map_err(|e| RelayerError::Signing(e.to_string()))?;
        let mut bytes = signature.to_vec();
        // ethers encodes v as 27/28, CKB witnesses carry the raw recovery id
        if let Some(v) = bytes.last_mut() {
            *v = v.saturating_sub(27);
        }
        Ok(Bytes::from(bytes))
    }
}

/// Address that produced `signature` over `digest`
pub fn recover_signer(digest: &H256, signature: &[u8]) -> RelayerResult<SignerId> {
    if signature.len() != 65 {
        return Err(RelayerError::Signing(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let parsed =
        Signature::try_from(signature).map_err(|e| RelayerError::Signing(e.to_string()))?;
    parsed
        .recover(*digest)
        .map_err(|e| RelayerError::Signing(e.to_string()))
}

/// How long a served digest is remembered unless configured otherwise
const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// Answers signing requests from the other committee members
pub struct SignerService {
    signer: Arc<LocalSigner>,
    /// Digests served within the retention window and the round that asked
    recent: DashMap<H256, (Uuid, Instant)>,
    retention: Duration,
    served: AtomicUsize,
}

impl SignerService {
    pub fn new(signer: Arc<LocalSigner>) -> Self {
        Self {
            signer,
            recent: DashMap::new(),
            retention: DEFAULT_RETENTION,
            served: AtomicUsize::new(0),
        }
    }

    /// Forget served digests after `retention`
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn signer_id(&self) -> SignerId {
        self.signer.id()
    }

    /// Signatures over digests not already served within the retention window
    pub fn signed_count(&self) -> usize {
        self.served.load(Ordering::Relaxed)
    }

    /// Digests currently remembered
    pub fn tracked_digests(&self) -> usize {
        self.recent.len()
    }

    /// Sign `request` after checking the digest really commits to its transaction
    pub fn handle(&self, request: &SignRequest) -> RelayerResult<SignResponse> {
        let expected = request.tx.signing_digest();
        if expected != request.digest {
            warn!(round = %request.round_id, "Rejecting sign request with mismatched digest");
            return Err(RelayerError::Signing(format!(
                "digest {:#x} does not match transaction digest {:#x}",
                request.digest, expected
            )));
        }
        if !request.tx.is_balanced() {
            warn!(round = %request.round_id, "Rejecting unbalanced transaction");
            return Err(RelayerError::Signing("transaction is not balanced".into()));
        }

        let signature = self.signer.sign_digest(&request.digest)?;
        self.recent
            .retain(|_, (_, served_at)| served_at.elapsed() < self.retention);
        let served_at = Instant::now();
        if let Some((previous, _)) = self
            .recent
            .insert(request.digest, (request.round_id, served_at))
        {
            debug!(round = %request.round_id, %previous, "Digest signed again");
        } else {
            self.served.fetch_add(1, Ordering::Relaxed);
            info!(
                round = %request.round_id,
                digest = %format!("{:#x}", request.digest),
                "Signed transaction"
            );
        }
        Ok(SignResponse {
            signer_id: self.signer.id(),
            signature,
        })
    }
}

/// Peer reached through its `/sign` endpoint
pub struct HttpPeerSigner {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl HttpPeerSigner {
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Config(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: format!("{}/sign", url.trim_end_matches('/')),
            http,
        })
    }
}

#[async_trait]
impl PeerSigner for HttpPeerSigner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_signature(&self, request: &SignRequest) -> RelayerResult<SignResponse> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayerError::Signing(format!("{}: {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayerError::Signing(format!(
                "{} answered {status}: {body}",
                self.name
            )));
        }
        response
            .json::<SignResponse>()
            .await
            .map_err(|e| RelayerError::Signing(format!("{}: invalid response: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn signature_recovers_to_signer() {
        let signer = testing::signer(0);
        let digest = H256::repeat_byte(0x5a);
        let signature = signer.sign_digest(&digest).unwrap();

        assert_eq!(signature.len(), 65);
        assert!(signature[64] <= 1);
        assert_eq!(recover_signer(&digest, &signature).unwrap(), signer.id());
        assert_ne!(
            recover_signer(&H256::repeat_byte(0x5b), &signature).unwrap(),
            signer.id()
        );
    }

    #[test]
    fn short_signature_is_rejected() {
        assert!(recover_signer(&H256::zero(), &[0u8; 64]).is_err());
    }

    #[test]
    fn service_signs_matching_digest() {
        let service = SignerService::new(Arc::new(testing::signer(1)));
        let tx = testing::balanced_tx();
        let request = SignRequest {
            round_id: Uuid::new_v4(),
            digest: tx.signing_digest(),
            tx,
        };

        let response = service.handle(&request).unwrap();
        assert_eq!(response.signer_id, service.signer_id());
        assert_eq!(
            recover_signer(&request.digest, &response.signature).unwrap(),
            service.signer_id()
        );
        service.handle(&request).unwrap();
        assert_eq!(service.signed_count(), 1);
    }

    #[test]
    fn served_digests_expire_after_retention() {
        let service =
            SignerService::new(Arc::new(testing::signer(1))).with_retention(Duration::ZERO);
        for fee in [100, 200, 300] {
            let mut tx = testing::balanced_tx();
            tx.fee = fee;
            tx.outputs[0].capacity = 1_000 - fee;
            let request = SignRequest {
                round_id: Uuid::new_v4(),
                digest: tx.signing_digest(),
                tx,
            };
            service.handle(&request).unwrap();
        }
        assert_eq!(service.signed_count(), 3);
        assert_eq!(service.tracked_digests(), 1);
    }

    #[test]
    fn service_rejects_mismatched_digest() {
        let service = SignerService::new(Arc::new(testing::signer(1)));
        let request = SignRequest {
            round_id: Uuid::new_v4(),
            digest: H256::repeat_byte(1),
            tx: testing::balanced_tx(),
        };
        assert!(matches!(
            service.handle(&request),
            Err(RelayerError::Signing(_))
        ));
    }

    #[test]
    fn service_rejects_unbalanced_transaction() {
        let service = SignerService::new(Arc::new(testing::signer(1)));
        let mut tx = testing::balanced_tx();
        tx.fee += 1;
        let request = SignRequest {
            round_id: Uuid::new_v4(),
            digest: tx.signing_digest(),
            tx,
        };
        assert!(service.handle(&request).is_err());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        assert!(matches!(
            LocalSigner::from_env("CKB_BRIDGE_TEST_KEY_THAT_IS_NOT_SET"),
            Err(RelayerError::Config(_))
        ));
    }
}
