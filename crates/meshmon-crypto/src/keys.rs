use std::collections::HashMap;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use meshmon_types::NodeId;

use crate::error::CryptoError;

/// Re-exported so callers never need to name the `ed25519_dalek` crate directly.
pub type Signature = ed25519_dalek::Signature;

/// Holds the private key for one node and signs on its behalf.
#[derive(Clone)]
pub struct Signer {
    node_id: NodeId,
    signing_key: SigningKey,
}

impl Signer {
    pub fn new(node_id: NodeId, signing_key: SigningKey) -> Self {
        Self {
            node_id,
            signing_key,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.node_id.clone(), self.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Holds the public key for one node (self or a peer) and verifies against it.
#[derive(Clone)]
pub struct Verifier {
    node_id: NodeId,
    verifying_key: VerifyingKey,
}

impl Verifier {
    pub fn new(node_id: NodeId, verifying_key: VerifyingKey) -> Self {
        Self {
            node_id,
            verifying_key,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key.verify(message, signature).is_ok()
    }
}

/// A node's own signer plus the verifiers for every peer it knows about,
/// for one network. Store-level merges consult this to validate foreign
/// `NodeData`; peers absent from the mapping are silently dropped (spec §3).
pub struct KeyMapping {
    pub signer: Signer,
    verifiers: HashMap<NodeId, Verifier>,
}

impl KeyMapping {
    pub fn new(signer: Signer) -> Self {
        let self_verifier = signer.verifier();
        let mut verifiers = HashMap::new();
        verifiers.insert(self_verifier.node_id().clone(), self_verifier);
        Self { signer, verifiers }
    }

    pub fn add_verifier(&mut self, verifier: Verifier) {
        self.verifiers.insert(verifier.node_id().clone(), verifier);
    }

    pub fn get_verifier(&self, node_id: &str) -> Option<&Verifier> {
        self.verifiers.get(node_id)
    }

    pub fn require_verifier(&self, node_id: &str) -> Result<&Verifier, CryptoError> {
        self.get_verifier(node_id)
            .ok_or_else(|| CryptoError::KeyUnknown(node_id.to_string()))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.verifiers.keys()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}
