use meshmon_crypto::{canonical_bytes, format_timestamp, Signature, Signer, Verifier};
use meshmon_types::{ReplacementType, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The atomic signed unit of the store (spec §3): data + date + id +
/// replacement_type + signature. `T` is the opaque (from the signature's
/// point of view) payload; callers parse it into a typed schema themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlock<T> {
    pub data: T,
    pub date: Timestamp,
    pub block_id: String,
    pub replacement_type: ReplacementType,
    pub signature: Signature,
}

/// Builds the canonical signing payload `{date, data, block_id,
/// replacement_type, secret?}` and serializes it to canonical bytes.
fn signing_bytes<T: Serialize>(
    date: &Timestamp,
    data: &T,
    block_id: &str,
    replacement_type: ReplacementType,
    secret: Option<&str>,
) -> Vec<u8> {
    let mut map = serde_json::Map::new();
    map.insert(
        "date".to_string(),
        serde_json::Value::String(format_timestamp(date)),
    );
    map.insert(
        "data".to_string(),
        serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
    );
    map.insert(
        "block_id".to_string(),
        serde_json::Value::String(block_id.to_string()),
    );
    map.insert(
        "replacement_type".to_string(),
        serde_json::to_value(replacement_type).unwrap_or(serde_json::Value::Null),
    );
    if let Some(secret) = secret {
        map.insert(
            "secret".to_string(),
            serde_json::Value::String(secret.to_string()),
        );
    }
    canonical_bytes(&serde_json::Value::Object(map))
}

impl<T: Serialize + Clone> SignedBlock<T> {
    /// Signs `data` with `signer`, stamping the current time.
    pub fn new(
        signer: &Signer,
        data: T,
        block_id: impl Into<String>,
        replacement_type: ReplacementType,
    ) -> Self {
        Self::new_at(signer, data, block_id, replacement_type, chrono::Utc::now())
    }

    pub fn new_at(
        signer: &Signer,
        data: T,
        block_id: impl Into<String>,
        replacement_type: ReplacementType,
        date: Timestamp,
    ) -> Self {
        Self::new_with_secret_at(signer, data, block_id, replacement_type, date, None)
    }

    /// Signs `data` binding an out-of-band `secret` into the signature
    /// (used by the leader-election inner block, spec §3).
    pub fn new_with_secret(
        signer: &Signer,
        data: T,
        block_id: impl Into<String>,
        replacement_type: ReplacementType,
        secret: Option<&str>,
    ) -> Self {
        Self::new_with_secret_at(
            signer,
            data,
            block_id,
            replacement_type,
            chrono::Utc::now(),
            secret,
        )
    }

    pub fn new_with_secret_at(
        signer: &Signer,
        data: T,
        block_id: impl Into<String>,
        replacement_type: ReplacementType,
        date: Timestamp,
        secret: Option<&str>,
    ) -> Self {
        let block_id = block_id.into();
        let msg = signing_bytes(&date, &data, &block_id, replacement_type, secret);
        let signature = signer.sign(&msg);
        Self {
            data,
            date,
            block_id,
            replacement_type,
            signature,
        }
    }

    pub fn verify(&self, verifier: &Verifier) -> bool {
        self.verify_with_secret(verifier, None)
    }

    pub fn verify_with_secret(&self, verifier: &Verifier, secret: Option<&str>) -> bool {
        let msg = signing_bytes(
            &self.date,
            &self.data,
            &self.block_id,
            self.replacement_type,
            secret,
        );
        verifier.verify(&msg, &self.signature)
    }
}

impl<T> SignedBlock<T> {
    /// Whether `incoming` (verified separately by the caller) should replace
    /// `self` under the matching-`block_id` replacement policy (spec §3).
    pub fn admits_replacement(&self, incoming: &SignedBlock<T>) -> bool {
        self.block_id == incoming.block_id
            && incoming
                .replacement_type
                .admits_replacement(&self.date, &incoming.date)
    }
}

impl<T: Serialize + DeserializeOwned + Clone + PartialEq> SignedBlock<T> {
    /// The element-wise join of two blocks with the same `block_id`: the one
    /// that wins the other's replacement policy. Ties (equal dates) keep `self`.
    pub fn join(&self, other: &SignedBlock<T>) -> SignedBlock<T> {
        if self.date == other.date {
            return self.clone();
        }
        if self.admits_replacement(other) {
            other.clone()
        } else {
            self.clone()
        }
    }
}

impl<T: PartialEq> PartialEq for SignedBlock<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.date == other.date
            && self.block_id == other.block_id
            && self.replacement_type == other.replacement_type
            && self.signature == other.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::key_files;

    fn signer(node_id: &str) -> meshmon_crypto::Signer {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-model-test-{}-{node_id}", std::process::id()));
        key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate")
    }

    #[test]
    fn roundtrip_verifies_and_tamper_fails() {
        let signer = signer("a");
        let block = SignedBlock::new(&signer, serde_json::json!({"k": 1}), "k", ReplacementType::Newer);
        assert!(block.verify(&signer.verifier()));

        let mut tampered = block.clone();
        tampered.data = serde_json::json!({"k": 2});
        assert!(!tampered.verify(&signer.verifier()));
    }

    #[test]
    fn newer_replacement_policy() {
        let signer = signer("b");
        let t0 = chrono::Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let old = SignedBlock::new_at(&signer, 1u32, "x", ReplacementType::Newer, t0);
        let new = SignedBlock::new_at(&signer, 2u32, "x", ReplacementType::Newer, t1);
        assert!(old.admits_replacement(&new));
        assert!(!new.admits_replacement(&old));
    }

    #[test]
    fn older_replacement_policy() {
        let signer = signer("c");
        let t10 = chrono::Utc::now();
        let t5 = t10 - chrono::Duration::seconds(5);
        let t20 = t10 + chrono::Duration::seconds(10);
        let stored = SignedBlock::new_at(&signer, 1u32, "x", ReplacementType::Older, t10);
        let earlier = SignedBlock::new_at(&signer, 2u32, "x", ReplacementType::Older, t5);
        let later = SignedBlock::new_at(&signer, 3u32, "x", ReplacementType::Older, t20);
        assert!(stored.admits_replacement(&earlier));
        assert!(!stored.admits_replacement(&later));
    }
}
