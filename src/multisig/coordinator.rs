//! M-of-N signing round over a transaction's signing digest

use super::signer::{recover_signer, LocalSigner, PeerSigner, SignRequest, SignResponse};
use super::{MultisigScript, SignerId};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::types::{Bytes, SignedTx, UnsignedTx, H256};

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct MultisigCoordinator {
    script: MultisigScript,
    local: Arc<LocalSigner>,
    peers: Vec<Arc<dyn PeerSigner>>,
}

impl MultisigCoordinator {
    pub fn new(
        script: MultisigScript,
        local: Arc<LocalSigner>,
        peers: Vec<Arc<dyn PeerSigner>>,
    ) -> RelayerResult<Self> {
        if !script.contains(&local.id()) {
            return Err(RelayerError::Config(format!(
                "local signer {:#x} is not a multisig member",
                local.id()
            )));
        }
        Ok(Self {
            script,
            local,
            peers,
        })
    }

    pub fn script(&self) -> &MultisigScript {
        &self.script
    }

    pub fn local_id(&self) -> SignerId {
        self.local.id()
    }

    /// Signatures needed from peers on top of the local one
    fn peers_needed(&self) -> usize {
        (self.script.threshold as usize).saturating_sub(1)
    }

    /// Check a peer answer and return the member it came from
    fn verify(&self, digest: &H256, response: &SignResponse) -> RelayerResult<SignerId> {
        let recovered = recover_signer(digest, &response.signature)?;
        if recovered != response.signer_id {
            return Err(RelayerError::Signing(format!(
                "signature recovers to {recovered:#x}, claimed {:#x}",
                response.signer_id
            )));
        }
        if !self.script.contains(&recovered) {
            return Err(RelayerError::Signing(format!(
                "{recovered:#x} is not a multisig member"
            )));
        }
        if recovered == self.local.id() {
            return Err(RelayerError::Signing("peer answered with our own key".into()));
        }
        Ok(recovered)
    }

    /// Collect a threshold of signatures over `tx` or fail at the deadline
    ///
    /// Witness layout: local signature ‖ multisig metadata ‖ peer signatures
    /// ordered by signer id.
    pub async fn collect(&self, tx: UnsignedTx, timeout: Duration) -> RelayerResult<SignedTx> {
        let digest = tx.signing_digest();
        let round_id = Uuid::new_v4();
        let needed = self.peers_needed();
        let local_signature = self.local.sign_digest(&digest)?;

        debug!(
            round = %round_id,
            digest = %format!("{digest:#x}"),
            needed,
            peers = self.peers.len(),
            "Starting signing round"
        );

        let mut collected: BTreeMap<SignerId, Bytes> = BTreeMap::new();
        if needed > 0 {
            let request = SignRequest {
                round_id,
                digest,
                tx: tx.clone(),
            };
            let deadline = Instant::now() + timeout;
            let request_ref = &request;
            let mut responses: FuturesUnordered<_> = self
                .peers
                .iter()
                .map(|peer| async move {
                    (peer.name().to_string(), peer.request_signature(request_ref).await)
                })
                .collect();

            while collected.len() < needed {
                let next = match tokio::time::timeout_at(deadline, responses.next()).await {
                    Ok(Some(next)) => next,
                    Ok(None) => break,
                    Err(_) => {
                        warn!(round = %round_id, "Signing round deadline reached");
                        break;
                    }
                };
                match next {
                    (peer, Ok(response)) => match self.verify(&digest, &response) {
                        Ok(id) => {
                            if collected.insert(id, response.signature).is_some() {
                                debug!(round = %round_id, peer = %peer, "Duplicate signature ignored");
                            }
                        }
                        Err(e) => warn!(round = %round_id, peer = %peer, error = %e, "Invalid signature"),
                    },
                    (peer, Err(e)) => {
                        warn!(round = %round_id, peer = %peer, error = %e, "Peer did not sign")
                    }
                }
            }
        }

        if collected.len() < needed {
            metrics::record_signature_round("quorum_timeout");
            return Err(RelayerError::SignatureQuorumTimeout {
                collected: collected.len() + 1,
                required: self.script.threshold as usize,
            });
        }

        let mut witness = local_signature.to_vec();
        witness.extend_from_slice(&self.script.serialize());
        for signature in collected.values() {
            witness.extend_from_slice(signature);
        }

        info!(
            round = %round_id,
            signatures = collected.len() + 1,
            "Signing round complete"
        );
        metrics::record_signature_round("complete");
        Ok(SignedTx {
            tx,
            witness: Bytes::from(witness),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multisig::SignerService;
    use crate::testing::{self, SilentPeer, StaticPeer};

    const TIMEOUT: Duration = Duration::from_millis(200);

    /// Committee of three test keys, threshold `m`, coordinated by key 0
    fn committee(m: u8) -> MultisigScript {
        testing::committee(3, m)
    }

    fn service(index: usize) -> Arc<SignerService> {
        Arc::new(SignerService::new(Arc::new(testing::signer(index))))
    }

    #[tokio::test]
    async fn two_of_three_collects_one_peer() {
        let peers: Vec<Arc<dyn PeerSigner>> = vec![
            Arc::new(StaticPeer::new("b", service(1))),
            Arc::new(StaticPeer::new("c", service(2))),
        ];
        let coordinator =
            MultisigCoordinator::new(committee(2), Arc::new(testing::signer(0)), peers).unwrap();
        let tx = testing::balanced_tx();
        let digest = tx.signing_digest();

        let signed = coordinator.collect(tx, TIMEOUT).await.unwrap();
        let witness = signed.witness.to_vec();
        let metadata = coordinator.script().serialize();

        assert_eq!(witness.len(), 65 + metadata.len() + 65);
        assert_eq!(
            recover_signer(&digest, &witness[..65]).unwrap(),
            coordinator.local_id()
        );
        assert_eq!(&witness[65..65 + metadata.len()], metadata.as_slice());
        let peer = recover_signer(&digest, &witness[65 + metadata.len()..]).unwrap();
        assert!(peer == testing::signer(1).id() || peer == testing::signer(2).id());
    }

    #[tokio::test]
    async fn peer_signatures_are_ordered_by_id() {
        let peers: Vec<Arc<dyn PeerSigner>> = vec![
            Arc::new(StaticPeer::new("c", service(2))),
            Arc::new(StaticPeer::new("b", service(1))),
        ];
        let coordinator =
            MultisigCoordinator::new(committee(3), Arc::new(testing::signer(0)), peers).unwrap();
        let tx = testing::balanced_tx();
        let digest = tx.signing_digest();

        let witness = coordinator.collect(tx, TIMEOUT).await.unwrap().witness.to_vec();
        let start = 65 + coordinator.script().serialize().len();
        let first = recover_signer(&digest, &witness[start..start + 65]).unwrap();
        let second = recover_signer(&digest, &witness[start + 65..]).unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn no_peers_times_out() {
        let coordinator =
            MultisigCoordinator::new(committee(2), Arc::new(testing::signer(0)), vec![]).unwrap();
        match coordinator.collect(testing::balanced_tx(), TIMEOUT).await {
            Err(RelayerError::SignatureQuorumTimeout {
                collected,
                required,
            }) => {
                assert_eq!(collected, 1);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_peers_hit_the_deadline() {
        let peers: Vec<Arc<dyn PeerSigner>> = vec![Arc::new(SilentPeer), Arc::new(SilentPeer)];
        let coordinator =
            MultisigCoordinator::new(committee(2), Arc::new(testing::signer(0)), peers).unwrap();

        let started = Instant::now();
        let result = coordinator
            .collect(testing::balanced_tx(), Duration::from_millis(50))
            .await;
        assert!(matches!(
            result,
            Err(RelayerError::SignatureQuorumTimeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn duplicate_and_outsider_signatures_do_not_count() {
        // the same member twice and a key outside the committee
        let peers: Vec<Arc<dyn PeerSigner>> = vec![
            Arc::new(StaticPeer::new("b", service(1))),
            Arc::new(StaticPeer::new("b-again", service(1))),
            Arc::new(StaticPeer::new("outsider", service(7))),
        ];
        let coordinator =
            MultisigCoordinator::new(committee(3), Arc::new(testing::signer(0)), peers).unwrap();
        match coordinator.collect(testing::balanced_tx(), TIMEOUT).await {
            Err(RelayerError::SignatureQuorumTimeout { collected, .. }) => assert_eq!(collected, 2),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_member_needs_no_peers() {
        let script = testing::committee(1, 1);
        let coordinator =
            MultisigCoordinator::new(script, Arc::new(testing::signer(0)), vec![]).unwrap();
        let signed = coordinator
            .collect(testing::balanced_tx(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(
            signed.witness.len(),
            65 + coordinator.script().serialize().len()
        );
    }

    #[test]
    fn coordinator_must_be_a_member() {
        let result =
            MultisigCoordinator::new(committee(2), Arc::new(testing::signer(9)), vec![]);
        assert!(result.is_err());
    }
}
