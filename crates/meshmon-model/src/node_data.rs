use std::collections::{BTreeMap, BTreeSet};

use meshmon_crypto::Verifier;
use meshmon_types::Path;
use serde::{Deserialize, Serialize};

use crate::block::SignedBlock;
use crate::consistency::Consistency;
use crate::context::Context;

/// One node's partition of the store (spec §3): named contexts, loose
/// key/value blocks, and an optional consistency envelope. Exclusively
/// owned (for writes) by the node whose id it is keyed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub contexts: BTreeMap<String, Context>,
    pub values: BTreeMap<String, SignedBlock<serde_json::Value>>,
    pub consistency: Option<Consistency>,
}

impl NodeData {
    pub fn new() -> Self {
        Self {
            contexts: BTreeMap::new(),
            values: BTreeMap::new(),
            consistency: None,
        }
    }

    pub fn verify(&self, verifier: &Verifier, secrets: &BTreeMap<String, String>) -> bool {
        if !self.contexts.values().all(|c| c.verify(verifier)) {
            return false;
        }
        if !self.values.values().all(|v| v.verify(verifier)) {
            return false;
        }
        match &self.consistency {
            Some(c) => c.verify(verifier, secrets),
            None => true,
        }
    }

    pub fn update(
        &mut self,
        prefix: &Path,
        other: &NodeData,
        verifier: &Verifier,
        secrets: &BTreeMap<String, String>,
    ) -> Vec<Path> {
        let mut changed = Vec::new();

        for (name, incoming_ctx) in other.contexts.iter() {
            let ctx_prefix = prefix.join("contexts").join(name);
            match self.contexts.get_mut(name) {
                Some(existing) => {
                    changed.extend(existing.update(&ctx_prefix, incoming_ctx, verifier));
                }
                None => {
                    if incoming_ctx.verify(verifier) {
                        changed.extend(incoming_ctx.all_paths(&ctx_prefix));
                        self.contexts.insert(name.clone(), incoming_ctx.clone());
                    } else {
                        tracing::warn!(name, "dropping unverifiable context");
                    }
                }
            }
        }

        for (key, incoming) in other.values.iter() {
            if !incoming.verify(verifier) {
                tracing::warn!(key, "dropping unverifiable value");
                continue;
            }
            let path = prefix.join("values").join(key);
            match self.values.get(key) {
                None => {
                    self.values.insert(key.clone(), incoming.clone());
                    changed.push(path);
                }
                Some(current) => {
                    if current.admits_replacement(incoming) && current.data != incoming.data {
                        self.values.insert(key.clone(), incoming.clone());
                        changed.push(path);
                    }
                }
            }
        }

        if let Some(incoming_consistency) = &other.consistency {
            let consistency_prefix = prefix.join("consistency");
            match &mut self.consistency {
                Some(existing) => {
                    changed.extend(existing.update(
                        &consistency_prefix,
                        incoming_consistency,
                        verifier,
                        secrets,
                    ));
                }
                None => {
                    if incoming_consistency.verify(verifier, secrets) {
                        changed.extend(incoming_consistency.all_paths(&consistency_prefix));
                        self.consistency = Some(incoming_consistency.clone());
                    } else {
                        tracing::warn!("dropping unverifiable consistency block");
                    }
                }
            }
        }

        changed
    }

    pub fn diff(&self, other: &NodeData) -> Option<NodeData> {
        let mut context_names: BTreeSet<&String> =
            self.contexts.keys().chain(other.contexts.keys()).collect();
        let mut contexts = BTreeMap::new();
        let mut any_context_changed = false;
        for name in context_names.drain() {
            match (self.contexts.get(name), other.contexts.get(name)) {
                (Some(a), Some(b)) => match a.diff(b) {
                    Some(d) => {
                        any_context_changed = true;
                        contexts.insert(name.clone(), d);
                    }
                    None => {
                        contexts.insert(name.clone(), a.clone());
                    }
                },
                (Some(a), None) => {
                    any_context_changed = true;
                    contexts.insert(name.clone(), a.clone());
                }
                (None, Some(b)) => {
                    any_context_changed = true;
                    contexts.insert(name.clone(), b.clone());
                }
                (None, None) => {}
            }
        }

        let mut value_keys: BTreeSet<&String> =
            self.values.keys().chain(other.values.keys()).collect();
        let mut values = BTreeMap::new();
        let mut any_value_changed = false;
        for key in value_keys.drain() {
            match (self.values.get(key), other.values.get(key)) {
                (Some(a), Some(b)) => {
                    if a != b {
                        any_value_changed = true;
                    }
                    values.insert(key.clone(), a.join(b));
                }
                (Some(a), None) => {
                    any_value_changed = true;
                    values.insert(key.clone(), a.clone());
                }
                (None, Some(b)) => {
                    any_value_changed = true;
                    values.insert(key.clone(), b.clone());
                }
                (None, None) => {}
            }
        }

        let consistency_diff = match (&self.consistency, &other.consistency) {
            (Some(a), Some(b)) => a.diff(b),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        let consistency_changed = consistency_diff.is_some();
        let consistency = consistency_diff.or_else(|| self.consistency.clone());

        if !any_context_changed && !any_value_changed && !consistency_changed {
            return None;
        }

        Some(NodeData {
            contexts,
            values,
            consistency,
        })
    }

    pub fn all_paths(&self, prefix: &Path) -> Vec<Path> {
        let mut paths = Vec::new();
        for (name, ctx) in self.contexts.iter() {
            paths.extend(ctx.all_paths(&prefix.join("contexts").join(name)));
        }
        for key in self.values.keys() {
            paths.push(prefix.join("values").join(key));
        }
        if let Some(consistency) = &self.consistency {
            paths.extend(consistency.all_paths(&prefix.join("consistency")));
        }
        paths
    }
}

impl Default for NodeData {
    fn default() -> Self {
        Self::new()
    }
}
