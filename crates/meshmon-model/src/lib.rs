#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The signed, mergeable data model (C2): `SignedBlock`, `Context`,
//! `ConsistentContext`, `Consistency`, `NodeData`, `Store`. Every mergeable
//! type exposes `verify`/`update`/`diff`/`all_paths` (spec §4.1).

mod block;
mod consistency;
mod consistent_context;
mod context;
mod error;
mod node_data;
mod store;

pub use block::SignedBlock;
pub use consistency::{ClockTableEntry, Consistency, NodeStatus, NodeStatusEntry, PulseTableEntry};
pub use consistent_context::{ConsistentContext, LeaderBlock, LeaderInner, LeaderStatus};
pub use context::Context;
pub use error::ModelError;
pub use node_data::NodeData;
pub use store::Store;

#[cfg(test)]
mod scenario_tests {
    use super::*;
    use meshmon_crypto::{key_files, KeyMapping};
    use meshmon_types::{Path, ReplacementType};
    use std::collections::{BTreeMap, BTreeSet};

    fn signer(node_id: &str) -> meshmon_crypto::Signer {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "meshmon-model-scenario-{}-{node_id}",
            std::process::id()
        ));
        key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate")
    }

    /// S2 — replacement policy: later write wins regardless of merge order.
    #[test]
    fn s2_replacement_policy_order_independent() {
        let a = signer("a");
        let b = signer("b");
        let mut key_mapping = KeyMapping::new(b);
        key_mapping.add_verifier(a.verifier());

        let mut store_a = Store::new();
        let node_a = store_a.get_mut_or_insert("a");
        let mut ctx = Context::new(&a, "x", BTreeSet::from(["k".to_string()]));
        ctx.set(&a, "k", serde_json::json!("v1"), ReplacementType::Newer)
            .expect("set v1");
        node_a.contexts.insert("x".to_string(), ctx);
        let snapshot_t0 = store_a.clone();

        std::thread::sleep(std::time::Duration::from_millis(2));
        let node_a = store_a.get_mut_or_insert("a");
        let ctx = node_a.contexts.get_mut("x").expect("ctx exists");
        ctx.set(&a, "k", serde_json::json!("v2"), ReplacementType::Newer)
            .expect("set v2");
        let snapshot_t1 = store_a.clone();

        let secrets = BTreeMap::new();
        let mut store_b = Store::new();
        store_b.update(&snapshot_t1, &key_mapping, &secrets);
        store_b.update(&snapshot_t0, &key_mapping, &secrets);

        let got = store_b
            .get("a")
            .and_then(|n| n.contexts.get("x"))
            .and_then(|c| c.get("k"))
            .expect("value present");
        assert_eq!(got.data, serde_json::json!("v2"));
    }

    /// S3 — OLDER replacement: a block with replacement_type=OLDER only
    /// accepts writes with an earlier date.
    #[test]
    fn s3_older_replacement_policy() {
        let a = signer("c");
        let t10 = chrono::Utc::now();
        let t5 = t10 - chrono::Duration::seconds(5);
        let t20 = t10 + chrono::Duration::seconds(20);

        let stored = SignedBlock::new_at(&a, 1u32, "x", ReplacementType::Older, t10);
        let earlier = SignedBlock::new_at(&a, 2u32, "x", ReplacementType::Older, t5);
        let later = SignedBlock::new_at(&a, 3u32, "x", ReplacementType::Older, t20);

        assert!(stored.admits_replacement(&earlier));
        assert!(!stored.admits_replacement(&later));
    }

    /// S6 — signature tamper: a flipped byte in one block causes only that
    /// block to be dropped; everything else still merges.
    #[test]
    fn s6_tampered_block_is_dropped_others_survive() {
        let a = signer("d");
        let b = signer("e");
        let mut key_mapping = KeyMapping::new(b);
        key_mapping.add_verifier(a.verifier());

        let mut store_a = Store::new();
        let node_a = store_a.get_mut_or_insert("a");
        node_a.values.insert(
            "good".to_string(),
            SignedBlock::new(&a, serde_json::json!(1), "good", ReplacementType::Newer),
        );
        let mut tampered = SignedBlock::new(&a, serde_json::json!(2), "bad", ReplacementType::Newer);
        tampered.data = serde_json::json!(999); // flips the signed payload post-hoc
        node_a.values.insert("bad".to_string(), tampered);

        let secrets = BTreeMap::new();
        let mut store_b = Store::new();
        store_b.update(&store_a, &key_mapping, &secrets);

        let node_b = store_b.get("a").expect("node present");
        assert!(node_b.values.contains_key("good"));
        assert!(!node_b.values.contains_key("bad"));
    }

    /// S7 — diff minimality: equal stores diff to None; one changed value
    /// yields a diff touching exactly that value.
    #[test]
    fn s7_diff_minimality() {
        let a = signer("f");
        let mut store_a = Store::new();
        let node = store_a.get_mut_or_insert("a");
        node.values.insert(
            "k".to_string(),
            SignedBlock::new(&a, serde_json::json!(1), "k", ReplacementType::Newer),
        );
        let store_b = store_a.clone();
        assert!(store_a.diff(&store_b).is_none());

        std::thread::sleep(std::time::Duration::from_millis(2));
        let node = store_a.get_mut_or_insert("a");
        node.values.insert(
            "k".to_string(),
            SignedBlock::new(&a, serde_json::json!(2), "k", ReplacementType::Newer),
        );

        let diff = store_a.diff(&store_b).expect("one value changed");
        assert_eq!(diff.nodes.len(), 1);
        let node_diff = diff.get("a").expect("node a present");
        assert_eq!(node_diff.values.len(), 1);
        assert!(node_diff.contexts.is_empty());
        assert!(node_diff.consistency.is_none());
    }

    #[test]
    fn all_paths_reports_nested_contexts_and_values() {
        let a = signer("g");
        let mut store = Store::new();
        let node = store.get_mut_or_insert("a");
        let mut ctx = Context::new(&a, "x", BTreeSet::from(["k".to_string()]));
        ctx.set(&a, "k", serde_json::json!(1), ReplacementType::Newer)
            .expect("set");
        node.contexts.insert("x".to_string(), ctx);
        node.values.insert(
            "v".to_string(),
            SignedBlock::new(&a, serde_json::json!(1), "v", ReplacementType::Newer),
        );

        let paths = store.all_paths();
        assert!(paths.contains(&Path::new("nodes.a.contexts.x.k")));
        assert!(paths.contains(&Path::new("nodes.a.values.v")));
    }
}
