use std::collections::{BTreeMap, BTreeSet};

use meshmon_crypto::KeyMapping;
use meshmon_types::{NodeId, Path};
use serde::{Deserialize, Serialize};

use crate::node_data::NodeData;

/// The root of the replicated data model (spec §3): `node_id → NodeData`.
/// Store-level merge validates each foreign partition under the matching
/// verifier from `KeyMapping`; nodes absent from the mapping are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    pub nodes: BTreeMap<NodeId, NodeData>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeData> {
        self.nodes.get(node_id)
    }

    pub fn get_mut_or_insert(&mut self, node_id: &str) -> &mut NodeData {
        self.nodes.entry(node_id.to_string()).or_default()
    }

    /// Merges `other` into `self`, returning the paths whose value changed.
    /// Verification failures are absorbed per node/element; the batch never
    /// half-applies (spec §4.1's invariant).
    pub fn update(
        &mut self,
        other: &Store,
        key_mapping: &KeyMapping,
        secrets: &BTreeMap<String, String>,
    ) -> Vec<Path> {
        let mut changed = Vec::new();
        for (node_id, incoming) in other.nodes.iter() {
            let Some(verifier) = key_mapping.get_verifier(node_id) else {
                tracing::debug!(node_id, "peer absent from key mapping, dropping");
                continue;
            };
            let prefix = Path::new("nodes").join(node_id);
            match self.nodes.get_mut(node_id) {
                Some(existing) => {
                    changed.extend(existing.update(&prefix, incoming, verifier, secrets));
                }
                None => {
                    if incoming.verify(verifier, secrets) {
                        changed.extend(incoming.all_paths(&prefix));
                        self.nodes.insert(node_id.clone(), incoming.clone());
                    } else {
                        tracing::warn!(node_id, "dropping unverifiable node partition");
                    }
                }
            }
        }
        changed
    }

    /// `None` when `self == other` under deep value comparison — satisfies
    /// S7's literal `A.diff(B) == None` requirement rather than returning an
    /// always-present, possibly-empty diff.
    pub fn diff(&self, other: &Store) -> Option<Store> {
        let node_ids: BTreeSet<&NodeId> = self.nodes.keys().chain(other.nodes.keys()).collect();
        let mut nodes = BTreeMap::new();
        for node_id in node_ids {
            match (self.nodes.get(node_id), other.nodes.get(node_id)) {
                (Some(a), Some(b)) => {
                    if let Some(d) = a.diff(b) {
                        nodes.insert(node_id.clone(), d);
                    }
                }
                (Some(a), None) => {
                    nodes.insert(node_id.clone(), a.clone());
                }
                (None, Some(b)) => {
                    nodes.insert(node_id.clone(), b.clone());
                }
                (None, None) => {}
            }
        }
        if nodes.is_empty() {
            None
        } else {
            Some(Store { nodes })
        }
    }

    pub fn all_paths(&self) -> Vec<Path> {
        self.nodes
            .iter()
            .flat_map(|(node_id, data)| data.all_paths(&Path::new("nodes").join(node_id)))
            .collect()
    }
}
