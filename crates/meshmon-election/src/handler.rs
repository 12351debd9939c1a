use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use meshmon_dispatch::{PathMatcher, UpdateHandler, UpdateManager};
use meshmon_model::{ConsistentContext, Context, LeaderInner, LeaderStatus, NodeStatus, NodeStatusEntry};
use meshmon_store::SharedStore;

/// Runs the majority-quorum leader election protocol (spec §4.5) for one
/// named consistent context. A node instantiates one of these per cluster
/// it participates in.
pub struct LeaderElectionHandler {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    cluster_name: String,
    secret: String,
    network_id: String,
    matcher: PathMatcher,
    /// The leader candidate observed on the previous tick — becoming LEADER
    /// only happens once the same candidate holds for two consecutive
    /// ticks (spec §9's "stable for one full tick" gate).
    pending_leader: Mutex<Option<String>>,
}

impl LeaderElectionHandler {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<UpdateManager>,
        cluster_name: impl Into<String>,
        secret: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Arc<Self> {
        let cluster_name = cluster_name.into();
        let node_id = regex::escape(store.node_id());
        let cluster_pattern = regex::escape(&cluster_name);
        let patterns = [
            format!(r"^nodes\.{node_id}\.consistency\.node_status_table\."),
            format!(r"^nodes\.[\w-]+\.consistency\.consistent_contexts\.{cluster_pattern}\.leader$"),
        ];
        #[allow(clippy::unwrap_used)]
        let matcher = PathMatcher::regex(&[&patterns[0], &patterns[1]]).unwrap();
        Arc::new(Self {
            store,
            manager,
            cluster_name,
            secret: secret.into(),
            network_id: network_id.into(),
            matcher,
            pending_leader: Mutex::new(None),
        })
    }

    fn own_leader_inner(&self) -> Option<LeaderInner> {
        self.store
            .with_node_consistency(self.store.node_id(), |c| {
                c.consistent_contexts
                    .get(&self.cluster_name)
                    .map(|cc| cc.leader.data.data.clone())
            })
            .flatten()
    }

    fn own_status_of(&self, peer: &str) -> Option<NodeStatus> {
        self.store
            .with_node_consistency(self.store.node_id(), |c| {
                c.node_status_table
                    .get(peer)
                    .and_then(|b| serde_json::from_value::<NodeStatusEntry>(b.data.clone()).ok())
                    .map(|e| e.status)
            })
            .flatten()
    }

    /// True iff `candidate` was also the winning candidate on the previous
    /// tick; otherwise remembers it and returns false.
    fn confirm_stable(&self, candidate: &str) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut pending = self.pending_leader.lock().unwrap();
        if pending.as_deref() == Some(candidate) {
            true
        } else {
            *pending = Some(candidate.to_string());
            false
        }
    }

    fn reset_pending(&self) {
        #[allow(clippy::unwrap_used)]
        let mut pending = self.pending_leader.lock().unwrap();
        *pending = None;
    }

    fn set_status(&self, status: LeaderStatus, node_id: String) {
        if let Some(current) = self.own_leader_inner() {
            if current.status == status && current.node_id == node_id {
                return;
            }
        }
        let cluster_name = self.cluster_name.clone();
        let secret = self.secret.clone();
        let write = self.store.with_consistency_mut(|signer, consistency| {
            let cc = consistency
                .consistent_contexts
                .entry(cluster_name.clone())
                .or_insert_with(|| {
                    ConsistentContext::new(signer, &secret, Context::new(signer, cluster_name.clone(), BTreeSet::new()))
                });
            cc.set_leader_status(signer, &secret, LeaderInner { status, node_id });
        });
        if let Err(e) = write {
            tracing::warn!(cluster = %self.cluster_name, error = %e, "cannot record leader status");
            return;
        }
        let path = format!(
            "nodes.{}.consistency.consistent_contexts.{}.leader",
            self.store.node_id(),
            self.cluster_name
        );
        self.manager.trigger_update([path]);
    }
}

impl UpdateHandler for LeaderElectionHandler {
    fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    fn handle_update(&self) {
        let self_id = self.store.node_id().clone();
        let key_mapping = self.store.key_mapping();

        // 1. Membership: every node whose leader block verifies under our secret.
        let members: BTreeSet<String> = self
            .store
            .nodes()
            .into_iter()
            .filter(|n| {
                let Some(verifier) = key_mapping.get_verifier(n) else {
                    return false;
                };
                self.store
                    .with_node_consistency(n, |c| {
                        c.consistent_contexts
                            .get(&self.cluster_name)
                            .is_some_and(|cc| cc.is_member(verifier, &self.secret))
                    })
                    .unwrap_or(false)
            })
            .collect();

        if !members.contains(&self_id) {
            // We have not joined this cluster ourselves yet.
            return;
        }

        // 2. Online view: members I currently believe are ONLINE (I am trivially online to myself).
        let online: BTreeSet<String> = members
            .iter()
            .filter(|n| **n == self_id || self.own_status_of(n) == Some(NodeStatus::Online))
            .cloned()
            .collect();

        // 3. Quorum.
        if online.len() * 2 <= members.len() {
            self.set_status(LeaderStatus::NotParticipating, self_id.clone());
            self.manager.trigger_event("instant_update");
            self.reset_pending();
            return;
        }

        // 4. Consistency check: every online peer's node_status_table must agree
        // with mine on every member both of us have an opinion about.
        let mut my_view: BTreeMap<String, NodeStatus> = BTreeMap::new();
        for m in members.iter() {
            if let Some(status) = self.own_status_of(m) {
                my_view.insert(m.clone(), status);
            }
        }
        for peer in online.iter().filter(|n| **n != self_id) {
            let peer_view: Option<BTreeMap<String, NodeStatus>> = self.store.with_node_consistency(peer, |c| {
                members
                    .iter()
                    .filter_map(|m| {
                        c.node_status_table
                            .get(m)
                            .and_then(|b| serde_json::from_value::<NodeStatusEntry>(b.data.clone()).ok())
                            .map(|e| (m.clone(), e.status))
                    })
                    .collect()
            });
            let Some(peer_view) = peer_view else { continue };
            for (m, status) in peer_view.iter() {
                if let Some(mine) = my_view.get(m) {
                    if mine != status {
                        self.set_status(LeaderStatus::WaitingForConsensus, self_id.clone());
                        self.manager.trigger_event("instant_update");
                        self.reset_pending();
                        return;
                    }
                }
            }
        }

        // 5. Current leaders.
        let leaders: Vec<String> = online
            .iter()
            .filter(|n| {
                self.store
                    .with_node_consistency(n, |c| {
                        c.consistent_contexts
                            .get(&self.cluster_name)
                            .map(|cc| cc.leader.data.data.status == LeaderStatus::Leader)
                    })
                    .flatten()
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        match leaders.as_slice() {
            [one] if *one == self_id => {
                self.reset_pending();
            }
            [one] => {
                self.set_status(LeaderStatus::Follower, one.clone());
                self.reset_pending();
            }
            [] => {
                if let Some(candidate) = online.iter().min().cloned() {
                    if candidate == self_id {
                        if self.confirm_stable(&candidate) {
                            self.set_status(LeaderStatus::Leader, self_id.clone());
                            self.manager.trigger_event("leader_elected");
                            meshmon_telemetry::metrics()
                                .inc_leader_change(&self.network_id, &self.cluster_name);
                            meshmon_telemetry::metrics().set_is_leader(
                                &self.network_id,
                                &self.cluster_name,
                                true,
                            );
                        }
                    } else {
                        self.set_status(LeaderStatus::Follower, candidate);
                        self.reset_pending();
                        meshmon_telemetry::metrics().set_is_leader(
                            &self.network_id,
                            &self.cluster_name,
                            false,
                        );
                    }
                }
            }
            _ => {
                self.set_status(LeaderStatus::WaitingForConsensus, self_id.clone());
                self.reset_pending();
            }
        }

        self.manager.trigger_event("instant_update");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::{key_files, KeyMapping};

    fn node(node_id: &str, peers: &[meshmon_crypto::Verifier]) -> Arc<SharedStore> {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-election-test-{}-{node_id}", std::process::id()));
        let signer = key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate");
        let mut key_mapping = KeyMapping::new(signer);
        for peer in peers {
            key_mapping.add_verifier(peer.clone());
        }
        Arc::new(SharedStore::new(key_mapping))
    }

    fn join_cluster(store: &Arc<SharedStore>, cluster: &str, secret: &str) {
        store
            .with_consistency_mut(|signer, consistency| {
                consistency.consistent_contexts.insert(
                    cluster.to_string(),
                    ConsistentContext::new(signer, secret, Context::new(signer, cluster, BTreeSet::new())),
                );
            })
            .expect("node has a consistency envelope");
    }

    #[test]
    fn without_quorum_self_becomes_not_participating() {
        let store_b = node("b", &[]);
        let store_c = node("c", &[]);
        join_cluster(&store_b, "cluster", "shared-secret");
        join_cluster(&store_c, "cluster", "shared-secret");

        let store_a = node(
            "a",
            &[
                store_b.key_mapping().signer().verifier(),
                store_c.key_mapping().signer().verifier(),
            ],
        );
        store_a.ensure_consistency(BTreeSet::from(["b".to_string(), "c".to_string()]));
        join_cluster(&store_a, "cluster", "shared-secret");

        store_a.update(&store_b.snapshot());
        store_a.update(&store_c.snapshot());
        // b and c never get marked ONLINE in a's node_status_table, so only
        // a itself is in the online view: 1 out of 3 members is not quorum.

        let manager = UpdateManager::new();
        let handler = LeaderElectionHandler::new(store_a.clone(), manager, "cluster", "shared-secret", "mesh-a");
        handler.handle_update();

        let status = handler.own_leader_inner().expect("leader entry present");
        assert_eq!(status.status, LeaderStatus::NotParticipating);
    }

    #[test]
    fn sole_member_online_elects_itself_after_two_stable_ticks() {
        let store = node("a", &[]);
        store.ensure_consistency(BTreeSet::new());
        join_cluster(&store, "cluster", "shared-secret");

        let manager = UpdateManager::new();
        let handler = LeaderElectionHandler::new(store.clone(), manager, "cluster", "shared-secret", "mesh-a");

        handler.handle_update();
        assert_eq!(
            handler.own_leader_inner().expect("entry").status,
            LeaderStatus::NotParticipating
        );

        handler.handle_update();
        assert_eq!(handler.own_leader_inner().expect("entry").status, LeaderStatus::Leader);
    }
}
