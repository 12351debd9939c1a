use std::collections::{BTreeMap, BTreeSet};

use meshmon_crypto::{Signer, Verifier};
use meshmon_types::{NodeId, Path, ReplacementType, Timestamp};
use serde::{Deserialize, Serialize};

use crate::block::SignedBlock;
use crate::consistent_context::ConsistentContext;
use crate::context::Context;

/// An entry in `pulse_table`: the peer's most recently observed `clock_pulse`
/// and the local wall-clock time at which it was observed (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseTableEntry {
    pub current_pulse: Timestamp,
    pub current_time: Timestamp,
}

/// An entry in `clock_table`: a peer's measured clock skew and RTT, computed
/// when that peer's copy of my own pulse-table entry is observed (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockTableEntry {
    pub last_pulse: Timestamp,
    pub pulse_interval: f64,
    pub delta_secs: f64,
    pub rtt_secs: f64,
    pub remote_time: Timestamp,
}

/// Derived liveness (spec §4.4's node-status handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusEntry {
    pub status: NodeStatus,
}

/// Per-node consistency envelope (spec §3): clock/pulse/status tables, an
/// optional clock pulse, and the named consistent contexts this node
/// participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consistency {
    pub clock_table: Context,
    pub pulse_table: Context,
    pub node_status_table: Context,
    pub clock_pulse: Option<SignedBlock<serde_json::Value>>,
    pub consistent_contexts: BTreeMap<String, ConsistentContext>,
}

impl Consistency {
    pub fn new(signer: &Signer, member_ids: BTreeSet<NodeId>) -> Self {
        Self {
            clock_table: Context::new(signer, "clock_table", member_ids.clone()),
            pulse_table: Context::new(signer, "pulse_table", member_ids.clone()),
            node_status_table: Context::new(signer, "node_status_table", member_ids),
            clock_pulse: None,
            consistent_contexts: BTreeMap::new(),
        }
    }

    pub fn emit_clock_pulse(&mut self, signer: &Signer) {
        self.clock_pulse = Some(SignedBlock::new(
            signer,
            serde_json::Value::Null,
            "clock_pulse",
            ReplacementType::Newer,
        ));
    }

    pub fn set_pulse_table_entry(&mut self, signer: &Signer, peer: &str, entry: PulseTableEntry) {
        let value = serde_json::to_value(entry).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self
            .pulse_table
            .set(signer, peer, value, ReplacementType::Newer)
        {
            tracing::warn!(peer, error = %e, "failed to write pulse_table entry");
        }
    }

    pub fn set_clock_table_entry(&mut self, signer: &Signer, peer: &str, entry: ClockTableEntry) {
        let value = serde_json::to_value(entry).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self
            .clock_table
            .set(signer, peer, value, ReplacementType::Newer)
        {
            tracing::warn!(peer, error = %e, "failed to write clock_table entry");
        }
    }

    pub fn set_node_status_entry(&mut self, signer: &Signer, peer: &str, status: NodeStatus) {
        let value = serde_json::to_value(NodeStatusEntry { status }).unwrap_or(serde_json::Value::Null);
        if let Err(e) = self
            .node_status_table
            .set(signer, peer, value, ReplacementType::Newer)
        {
            tracing::warn!(peer, error = %e, "failed to write node_status_table entry");
        }
    }

    pub fn verify(&self, verifier: &Verifier, secrets: &BTreeMap<String, String>) -> bool {
        if !self.clock_table.verify(verifier)
            || !self.pulse_table.verify(verifier)
            || !self.node_status_table.verify(verifier)
        {
            return false;
        }
        if let Some(pulse) = &self.clock_pulse {
            if !pulse.verify(verifier) {
                return false;
            }
        }
        self.consistent_contexts.iter().all(|(name, cc)| match secrets.get(name) {
            Some(secret) => cc.verify(verifier, secret),
            None => cc.context.verify(verifier) && cc.leader.verify(verifier),
        })
    }

    pub fn update(
        &mut self,
        prefix: &Path,
        other: &Consistency,
        verifier: &Verifier,
        secrets: &BTreeMap<String, String>,
    ) -> Vec<Path> {
        let mut changed = Vec::new();
        changed.extend(
            self.clock_table
                .update(&prefix.join("clock_table"), &other.clock_table, verifier),
        );
        changed.extend(
            self.pulse_table
                .update(&prefix.join("pulse_table"), &other.pulse_table, verifier),
        );
        changed.extend(self.node_status_table.update(
            &prefix.join("node_status_table"),
            &other.node_status_table,
            verifier,
        ));

        if let Some(incoming) = &other.clock_pulse {
            let accept = match &self.clock_pulse {
                Some(current) => current.admits_replacement(incoming) && incoming.verify(verifier),
                None => incoming.verify(verifier),
            };
            if accept {
                self.clock_pulse = Some(incoming.clone());
                changed.push(prefix.join("clock_pulse"));
            }
        }

        for (name, incoming_cc) in other.consistent_contexts.iter() {
            let Some(secret) = secrets.get(name) else {
                tracing::warn!(name, "no secret configured for consistent context, skipping merge");
                continue;
            };
            match self.consistent_contexts.get_mut(name) {
                Some(existing) => {
                    changed.extend(existing.update(
                        &prefix.join("consistent_contexts").join(name),
                        incoming_cc,
                        verifier,
                        secret,
                    ));
                }
                None => {
                    if incoming_cc.verify(verifier, secret) {
                        self.consistent_contexts
                            .insert(name.clone(), incoming_cc.clone());
                        changed.extend(
                            incoming_cc.all_paths(&prefix.join("consistent_contexts").join(name)),
                        );
                    } else {
                        tracing::warn!(name, "dropping unverifiable consistent context");
                    }
                }
            }
        }

        changed
    }

    /// `None` only when every field is unchanged — this joint check (rather
    /// than inspecting a subset of the tables) is what keeps a
    /// `pulse_table`-only change from being silently dropped.
    pub fn diff(&self, other: &Consistency) -> Option<Consistency> {
        let clock_table_diff = self.clock_table.diff(&other.clock_table);
        let pulse_table_diff = self.pulse_table.diff(&other.pulse_table);
        let node_status_diff = self.node_status_table.diff(&other.node_status_table);
        let clock_pulse_equal = self.clock_pulse == other.clock_pulse;
        let consistent_contexts_equal = self.consistent_contexts == other.consistent_contexts;

        if clock_table_diff.is_none()
            && pulse_table_diff.is_none()
            && node_status_diff.is_none()
            && clock_pulse_equal
            && consistent_contexts_equal
        {
            return None;
        }

        let clock_pulse = if clock_pulse_equal {
            self.clock_pulse.clone()
        } else {
            match (&self.clock_pulse, &other.clock_pulse) {
                (Some(a), Some(b)) => Some(a.join(b)),
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(b.clone()),
                (None, None) => None,
            }
        };

        let mut consistent_contexts = BTreeMap::new();
        let names: BTreeSet<&String> = self
            .consistent_contexts
            .keys()
            .chain(other.consistent_contexts.keys())
            .collect();
        for name in names {
            let joined = match (
                self.consistent_contexts.get(name),
                other.consistent_contexts.get(name),
            ) {
                (Some(a), Some(b)) => a.diff(b).unwrap_or_else(|| a.clone()),
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => continue,
            };
            consistent_contexts.insert(name.clone(), joined);
        }

        Some(Consistency {
            clock_table: clock_table_diff.unwrap_or_else(|| self.clock_table.clone()),
            pulse_table: pulse_table_diff.unwrap_or_else(|| self.pulse_table.clone()),
            node_status_table: node_status_diff.unwrap_or_else(|| self.node_status_table.clone()),
            clock_pulse,
            consistent_contexts,
        })
    }

    pub fn all_paths(&self, prefix: &Path) -> Vec<Path> {
        let mut paths = self.clock_table.all_paths(&prefix.join("clock_table"));
        paths.extend(self.pulse_table.all_paths(&prefix.join("pulse_table")));
        paths.extend(
            self.node_status_table
                .all_paths(&prefix.join("node_status_table")),
        );
        if self.clock_pulse.is_some() {
            paths.push(prefix.join("clock_pulse"));
        }
        for (name, cc) in self.consistent_contexts.iter() {
            paths.extend(cc.all_paths(&prefix.join("consistent_contexts").join(name)));
        }
        paths
    }
}
