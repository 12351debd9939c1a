use std::sync::Mutex;

use meshmon_model::Store;

/// Tracks, per peer, the last `Store` snapshot that peer is known to have
/// acknowledged, so the dispatch engine (C4) only ever ships the incremental
/// difference rather than the whole store (spec §4.2).
///
/// `diff`/`ack`/`clear` give rollback-on-failure semantics: a caller computes
/// `diff`, attempts to send it, and only calls `ack` once the send succeeds.
/// A failed send leaves `last_acked` untouched, so the next `diff` naturally
/// re-includes whatever was not delivered.
pub struct IncrementalUpdater {
    last_acked: Mutex<Option<Store>>,
}

impl IncrementalUpdater {
    pub fn new() -> Self {
        Self {
            last_acked: Mutex::new(None),
        }
    }

    /// The incremental update to send to `dest_node_id`, or `None` if the
    /// peer is already caught up to `current`. `dest_node_id`'s own
    /// partition is always excluded — a peer needs no echo of its own data.
    pub fn diff(&self, current: &Store, dest_node_id: &str) -> Option<Store> {
        #[allow(clippy::unwrap_used)]
        let last_acked = self.last_acked.lock().unwrap();
        let mut diff = match last_acked.as_ref() {
            Some(baseline) => baseline.diff(current)?,
            None => current.clone(),
        };
        diff.nodes.remove(dest_node_id);
        if diff.nodes.is_empty() {
            None
        } else {
            Some(diff)
        }
    }

    /// Records that the peer has successfully applied up through `current`.
    pub fn ack(&self, current: &Store) {
        #[allow(clippy::unwrap_used)]
        {
            *self.last_acked.lock().unwrap() = Some(current.clone());
        }
    }

    /// Forgets the last-acked baseline, so the next `diff` ships the whole
    /// store again (used when a connection drops and is re-established,
    /// since the peer's actual state is then unknown).
    pub fn clear(&self) {
        #[allow(clippy::unwrap_used)]
        {
            *self.last_acked.lock().unwrap() = None;
        }
    }
}

impl Default for IncrementalUpdater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::key_files;
    use meshmon_model::SignedBlock;
    use meshmon_types::ReplacementType;

    fn signer(node_id: &str) -> meshmon_crypto::Signer {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "meshmon-store-updater-test-{}-{node_id}",
            std::process::id()
        ));
        #[allow(clippy::expect_used)]
        key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate")
    }

    #[test]
    fn first_diff_is_the_whole_store_then_shrinks_after_ack() {
        let signer = signer("a");
        let mut store = Store::new();
        let node = store.get_mut_or_insert("a");
        node.values.insert(
            "k".to_string(),
            SignedBlock::new(&signer, serde_json::json!(1), "k", ReplacementType::Newer),
        );

        let updater = IncrementalUpdater::new();
        let first = updater.diff(&store, "b").expect("unacked store always diffs");
        assert_eq!(first.get("a").expect("node").values.len(), 1);

        updater.ack(&store);
        assert!(updater.diff(&store, "b").is_none());

        std::thread::sleep(std::time::Duration::from_millis(2));
        let node = store.get_mut_or_insert("a");
        node.values.insert(
            "k2".to_string(),
            SignedBlock::new(&signer, serde_json::json!(2), "k2", ReplacementType::Newer),
        );
        let second = updater.diff(&store, "b").expect("one new key");
        assert_eq!(second.get("a").expect("node").values.len(), 1);
    }

    #[test]
    fn diff_excludes_the_destination_peers_own_partition() {
        let signer = signer("a");
        let mut store = Store::new();
        let node = store.get_mut_or_insert("a");
        node.values.insert(
            "k".to_string(),
            SignedBlock::new(&signer, serde_json::json!(1), "k", ReplacementType::Newer),
        );

        let updater = IncrementalUpdater::new();
        assert!(updater.diff(&store, "a").is_none(), "peer should not be echoed its own partition");
        assert!(updater.diff(&store, "other").is_some());
    }

    #[test]
    fn clear_forces_a_full_resend() {
        let signer = signer("b");
        let mut store = Store::new();
        let node = store.get_mut_or_insert("b");
        node.values.insert(
            "k".to_string(),
            SignedBlock::new(&signer, serde_json::json!(1), "k", ReplacementType::Newer),
        );

        let updater = IncrementalUpdater::new();
        updater.ack(&store);
        assert!(updater.diff(&store, "other").is_none());

        updater.clear();
        assert!(updater.diff(&store, "other").is_some());
    }
}
