//! Key file persistence (spec §6): private keys as PEM PKCS#8 (no passphrase),
//! public keys as PEM SubjectPublicKeyInfo, both Ed25519, named
//! `<dir>/<node_id>.key` and `<dir>/<node_id>.pub`.

use std::path::{Path, PathBuf};

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::pkcs8::LineEnding;
use ed25519_dalek::{SigningKey, VerifyingKey};
use meshmon_types::NodeId;
use rand::rngs::OsRng;

use crate::error::CryptoError;
use crate::keys::{Signer, Verifier};

fn private_key_path(dir: &Path, node_id: &str) -> PathBuf {
    dir.join(format!("{node_id}.key"))
}

fn public_key_path(dir: &Path, node_id: &str) -> PathBuf {
    dir.join(format!("{node_id}.pub"))
}

fn io_err(path: &Path, source: std::io::Error) -> CryptoError {
    CryptoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Loads a node's private signing key from `<dir>/<node_id>.key`.
pub fn load_signer(dir: &Path, node_id: &str) -> Result<Signer, CryptoError> {
    let path = private_key_path(dir, node_id);
    let pem = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let signing_key =
        SigningKey::from_pkcs8_pem(&pem).map_err(|e| CryptoError::Parse(e.to_string()))?;
    Ok(Signer::new(node_id.to_string(), signing_key))
}

/// Loads a peer's public verifying key from `<dir>/<node_id>.pub`.
pub fn load_verifier(dir: &Path, node_id: &str) -> Result<Verifier, CryptoError> {
    let path = public_key_path(dir, node_id);
    let pem = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let verifying_key =
        VerifyingKey::from_public_key_pem(&pem).map_err(|e| CryptoError::Parse(e.to_string()))?;
    Ok(Verifier::new(node_id.to_string(), verifying_key))
}

/// Generates a fresh Ed25519 keypair for `node_id` and writes both PEM files
/// into `dir`, overwriting neither if a private key already exists.
pub fn generate_and_save(dir: &Path, node_id: &NodeId) -> Result<Signer, CryptoError> {
    let key_path = private_key_path(dir, node_id);
    if key_path.exists() {
        return load_signer(dir, node_id);
    }
    let signing_key = SigningKey::generate(&mut OsRng);
    save_signer(dir, node_id, &signing_key)?;
    Ok(Signer::new(node_id.clone(), signing_key))
}

fn save_signer(dir: &Path, node_id: &str, signing_key: &SigningKey) -> Result<(), CryptoError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let key_path = private_key_path(dir, node_id);
    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Parse(e.to_string()))?;
    std::fs::write(&key_path, private_pem.as_bytes()).map_err(|e| io_err(&key_path, e))?;

    let pub_path = public_key_path(dir, node_id);
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Parse(e.to_string()))?;
    std::fs::write(&pub_path, public_pem.as_bytes()).map_err(|e| io_err(&pub_path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_pem_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let signer = generate_and_save(dir.path(), &"alice".to_string()).expect("generate");
        let loaded = load_signer(dir.path(), "alice").expect("load");
        assert_eq!(signer.node_id(), loaded.node_id());

        let sig = loaded.sign(b"hello");
        let verifier = load_verifier(dir.path(), "alice").expect("load verifier");
        assert!(verifier.verify(b"hello", &sig));
        assert!(!verifier.verify(b"goodbye", &sig));
    }

    #[test]
    fn reusing_generate_and_save_does_not_rotate_the_key() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let first = generate_and_save(dir.path(), &"bob".to_string()).expect("generate");
        let second = generate_and_save(dir.path(), &"bob".to_string()).expect("generate again");
        assert_eq!(first.verifying_key(), second.verifying_key());
    }
}
