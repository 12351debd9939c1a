use meshmon_crypto::{Signer, Verifier};
use meshmon_model::SignedBlock;
use meshmon_types::{ReplacementType, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// The nonce pair every data-bearing packet carries, binding it to one
/// direction of one `RawConnection` (spec §4.6). A peer that has swapped
/// nonces, or is replaying a packet from a prior connection, fails the
/// `ConnectionValidator` check below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub local_nonce: String,
    pub remote_nonce: String,
    pub network_id: String,
    pub node_id: String,
}

pub type ValidatorBlock = SignedBlock<Validator>;

pub fn encode(block: &ValidatorBlock) -> Result<String, serde_json::Error> {
    serde_json::to_string(block)
}

pub fn decode(raw: &str) -> Result<ValidatorBlock, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Generates the local/remote nonce pair for one `RawConnection` and signs
/// outbound validators / verifies inbound ones against it. Tracks the date
/// of the most recently accepted packet so an out-of-date or replayed
/// packet is rejected (spec §4.6).
pub struct ConnectionValidator {
    send: Validator,
    recv: Validator,
    most_recent: std::sync::Mutex<Option<Timestamp>>,
}

impl ConnectionValidator {
    pub fn new(local_nonce: String, remote_nonce: String, network_id: String, local_node_id: String, remote_node_id: String) -> Self {
        Self {
            send: Validator {
                local_nonce: local_nonce.clone(),
                remote_nonce: remote_nonce.clone(),
                network_id: network_id.clone(),
                node_id: local_node_id,
            },
            recv: Validator {
                local_nonce: remote_nonce,
                remote_nonce: local_nonce,
                network_id,
                node_id: remote_node_id,
            },
            most_recent: std::sync::Mutex::new(None),
        }
    }

    /// Signs a fresh validator block for an outbound packet.
    pub fn sign(&self, signer: &Signer) -> ValidatorBlock {
        SignedBlock::new(signer, self.send.clone(), "validator", ReplacementType::Newer)
    }

    /// Verifies an inbound validator: signature, nonce match, and strictly
    /// advancing date relative to the last accepted packet.
    pub fn accept(&self, verifier: &Verifier, block: &ValidatorBlock) -> Result<(), TransportError> {
        #[allow(clippy::unwrap_used)]
        let mut most_recent = self.most_recent.lock().unwrap();
        if let Some(prev) = *most_recent {
            if block.date <= prev {
                return Err(TransportError::ValidatorRejected);
            }
        }
        if block.data != self.recv {
            return Err(TransportError::ValidatorRejected);
        }
        if !block.verify(verifier) {
            return Err(TransportError::ValidatorRejected);
        }
        *most_recent = Some(block.date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::key_files;

    fn signer(node_id: &str) -> meshmon_crypto::Signer {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-transport-validator-test-{}-{node_id}", std::process::id()));
        #[allow(clippy::expect_used)]
        key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate")
    }

    #[test]
    fn matching_nonces_round_trip() {
        let signer_a = signer("a");
        let signer_b = signer("b");
        let local = ConnectionValidator::new(
            "n1".into(),
            "n2".into(),
            "mesh-a".into(),
            "a".into(),
            "b".into(),
        );
        let remote = ConnectionValidator::new(
            "n2".into(),
            "n1".into(),
            "mesh-a".into(),
            "b".into(),
            "a".into(),
        );

        let packet = local.sign(&signer_a);
        remote.accept(&signer_a.verifier(), &packet).expect("valid nonce pair and signature");
    }

    #[test]
    fn replayed_packet_is_rejected() {
        let signer_a = signer("c");
        let local = ConnectionValidator::new("n1".into(), "n2".into(), "mesh-a".into(), "c".into(), "d".into());
        let remote = ConnectionValidator::new("n2".into(), "n1".into(), "mesh-a".into(), "d".into(), "c".into());

        let packet = local.sign(&signer_a);
        remote.accept(&signer_a.verifier(), &packet).expect("first delivery accepted");
        assert!(remote.accept(&signer_a.verifier(), &packet).is_err());
    }

    #[test]
    fn mismatched_nonce_is_rejected() {
        let signer_a = signer("e");
        let local = ConnectionValidator::new("n1".into(), "n2".into(), "mesh-a".into(), "e".into(), "f".into());
        let other = ConnectionValidator::new("n3".into(), "n4".into(), "mesh-a".into(), "g".into(), "h".into());

        let packet = local.sign(&signer_a);
        assert!(other.accept(&signer_a.verifier(), &packet).is_err());
    }
}
