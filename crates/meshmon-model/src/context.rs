use std::collections::{BTreeMap, BTreeSet};

use meshmon_crypto::{canonical_bytes, format_timestamp, Signature, Signer, Verifier};
use meshmon_types::{Path, ReplacementType, Timestamp};
use serde::{Deserialize, Serialize};

use crate::block::SignedBlock;
use crate::error::ModelError;

/// A signed mapping from key to block, constrained by an allowed-keys set
/// (spec §3). The header (`context_name`, `date`, `allowed_keys`) is itself
/// signed; a key may appear in `data` only if it is currently allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    context_name: String,
    date: Timestamp,
    allowed_keys: BTreeSet<String>,
    data: BTreeMap<String, SignedBlock<serde_json::Value>>,
    signature: Signature,
}

fn header_bytes(context_name: &str, date: &Timestamp, allowed_keys: &BTreeSet<String>) -> Vec<u8> {
    let mut map = serde_json::Map::new();
    map.insert(
        "context_name".to_string(),
        serde_json::Value::String(context_name.to_string()),
    );
    map.insert(
        "date".to_string(),
        serde_json::Value::String(format_timestamp(date)),
    );
    map.insert(
        "allowed_keys".to_string(),
        serde_json::to_value(allowed_keys).unwrap_or(serde_json::Value::Null),
    );
    canonical_bytes(&serde_json::Value::Object(map))
}

impl Context {
    pub fn new(signer: &Signer, context_name: impl Into<String>, allowed_keys: BTreeSet<String>) -> Self {
        let context_name = context_name.into();
        let date = chrono::Utc::now();
        let signature = signer.sign(&header_bytes(&context_name, &date, &allowed_keys));
        Self {
            context_name,
            date,
            allowed_keys,
            data: BTreeMap::new(),
            signature,
        }
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn allowed_keys(&self) -> &BTreeSet<String> {
        &self.allowed_keys
    }

    pub fn get(&self, key: &str) -> Option<&SignedBlock<serde_json::Value>> {
        self.data.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SignedBlock<serde_json::Value>)> {
        self.data.iter()
    }

    fn header_verifies(&self, verifier: &Verifier) -> bool {
        let msg = header_bytes(&self.context_name, &self.date, &self.allowed_keys);
        verifier.verify(&msg, &self.signature)
    }

    /// Writes/replaces one entry owned by `self`. Fails if `key` is not
    /// currently in `allowed_keys` (invariant 2, spec §3).
    pub fn set(
        &mut self,
        signer: &Signer,
        key: &str,
        value: serde_json::Value,
        replacement_type: ReplacementType,
    ) -> Result<(), ModelError> {
        if !self.allowed_keys.contains(key) {
            return Err(ModelError::KeyNotAllowed(key.to_string()));
        }
        let block = SignedBlock::new(signer, value, key, replacement_type);
        self.data.insert(key.to_string(), block);
        Ok(())
    }

    /// Re-signs the header with a new `allowed_keys` set, pruning any data
    /// entries whose key is no longer permitted.
    pub fn resign_allowed_keys(&mut self, signer: &Signer, allowed_keys: BTreeSet<String>) {
        let date = chrono::Utc::now();
        let signature = signer.sign(&header_bytes(&self.context_name, &date, &allowed_keys));
        self.date = date;
        self.signature = signature;
        self.allowed_keys = allowed_keys;
        self.data.retain(|k, _| self.allowed_keys.contains(k));
    }

    /// Recursively verifies the header and every entry under `verifier`.
    pub fn verify(&self, verifier: &Verifier) -> bool {
        if !self.header_verifies(verifier) {
            return false;
        }
        self.data.values().all(|block| block.verify(verifier))
    }

    /// Merges `other` into `self`, returning the paths whose value changed.
    pub fn update(&mut self, prefix: &Path, other: &Context, verifier: &Verifier) -> Vec<Path> {
        if self.context_name != other.context_name {
            tracing::warn!(
                context = %self.context_name,
                other = %other.context_name,
                "context name mismatch, skipping merge"
            );
            return Vec::new();
        }

        let mut changed = Vec::new();

        if other.date > self.date && other.header_verifies(verifier) {
            self.date = other.date;
            self.signature = other.signature;
            self.allowed_keys = other.allowed_keys.clone();
            let allowed = self.allowed_keys.clone();
            self.data.retain(|k, _| allowed.contains(k));
        }

        for (key, incoming) in other.data.iter() {
            if !self.allowed_keys.contains(key) {
                continue;
            }
            if !incoming.verify(verifier) {
                tracing::warn!(key = %key, "dropping unverifiable context entry");
                continue;
            }
            match self.data.get(key) {
                None => {
                    self.data.insert(key.clone(), incoming.clone());
                    changed.push(prefix.join(key));
                }
                Some(current) => {
                    if current.admits_replacement(incoming) && current.data != incoming.data {
                        self.data.insert(key.clone(), incoming.clone());
                        changed.push(prefix.join(key));
                    }
                }
            }
        }

        changed
    }

    /// Returns a value which, applied to the older of `self`/`other`, yields
    /// the newer — `None` if `self == other` (spec §8 property 4 and S7).
    pub fn diff(&self, other: &Context) -> Option<Context> {
        if self.is_equal(other) {
            return None;
        }
        let (newer_header, _) = if other.date > self.date {
            (other, self)
        } else {
            (self, other)
        };

        let mut keys: BTreeSet<&String> = self.data.keys().chain(other.data.keys()).collect();
        keys.retain(|k| newer_header.allowed_keys.contains(*k));

        let mut data = BTreeMap::new();
        for key in keys {
            let joined = match (self.data.get(key), other.data.get(key)) {
                (Some(a), Some(b)) => a.join(b),
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => continue,
            };
            data.insert(key.clone(), joined);
        }

        Some(Context {
            context_name: newer_header.context_name.clone(),
            date: newer_header.date,
            allowed_keys: newer_header.allowed_keys.clone(),
            data,
            signature: newer_header.signature.clone(),
        })
    }

    pub fn all_paths(&self, prefix: &Path) -> Vec<Path> {
        self.data.keys().map(|k| prefix.join(k)).collect()
    }

    fn is_equal(&self, other: &Context) -> bool {
        self == other
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.context_name == other.context_name
            && self.date == other.date
            && self.allowed_keys == other.allowed_keys
            && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::key_files;

    fn signer(node_id: &str) -> meshmon_crypto::Signer {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-model-ctx-test-{}-{node_id}", std::process::id()));
        key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate")
    }

    fn allowed(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn set_rejects_disallowed_key() {
        let signer = signer("a");
        let mut ctx = Context::new(&signer, "x", allowed(&["k"]));
        let err = ctx
            .set(&signer, "not-allowed", serde_json::json!(1), ReplacementType::Newer)
            .unwrap_err();
        assert_eq!(err.to_string().contains("not-allowed"), true);
    }

    #[test]
    fn diff_is_none_for_equal_contexts() {
        let signer = signer("b");
        let mut a = Context::new(&signer, "x", allowed(&["k"]));
        a.set(&signer, "k", serde_json::json!(1), ReplacementType::Newer)
            .expect("set");
        let b = a.clone();
        assert!(a.diff(&b).is_none());
    }

    #[test]
    fn update_applies_later_write_then_earlier_does_not_regress() {
        let signer = signer("c");
        let mut origin = Context::new(&signer, "x", allowed(&["k"]));
        origin
            .set(&signer, "k", serde_json::json!("v1"), ReplacementType::Newer)
            .expect("set v1");
        let v1_snapshot = origin.clone();
        std::thread::sleep(std::time::Duration::from_millis(2));
        origin
            .set(&signer, "k", serde_json::json!("v2"), ReplacementType::Newer)
            .expect("set v2");
        let v2_snapshot = origin.clone();

        let mut receiver = Context::new(&signer, "x", allowed(&["k"]));
        let verifier = signer.verifier();
        receiver.update(&Path::new("x"), &v2_snapshot, &verifier);
        receiver.update(&Path::new("x"), &v1_snapshot, &verifier);

        assert_eq!(receiver.get("k").expect("present").data, serde_json::json!("v2"));
    }
}
