use meshmon_crypto::{Signer, Verifier};
use meshmon_types::{Path, ReplacementType};
use serde::{Deserialize, Serialize};

use crate::block::SignedBlock;
use crate::context::Context;

/// A node's claimed role within one named consistent-cluster (spec §3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaderStatus {
    Leader,
    Follower,
    WaitingForConsensus,
    NotParticipating,
}

/// The inner, secret-bound half of the double-wrapped leader block: `node_id`
/// is the asserting node's own id, except when `status == Follower`, in
/// which case it names the node believed to be leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderInner {
    pub status: LeaderStatus,
    pub node_id: String,
}

/// Outer binds `{leader-entry, date}` for ordering; inner binds `{status,
/// node_id, secret}` for cluster admission. Keeping the double-wrap verbatim
/// is what lets "who is leader now" and "who may join this cluster" vary
/// independently (spec §9).
pub type LeaderBlock = SignedBlock<SignedBlock<LeaderInner>>;

/// A `Context` paired with a signed leader block, admitting a leader-election
/// protocol under a shared secret (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistentContext {
    pub context: Context,
    pub leader: LeaderBlock,
}

impl ConsistentContext {
    pub fn new(signer: &Signer, secret: &str, context: Context) -> Self {
        let inner = SignedBlock::new_with_secret(
            signer,
            LeaderInner {
                status: LeaderStatus::NotParticipating,
                node_id: signer.node_id().clone(),
            },
            "leader",
            ReplacementType::Newer,
            Some(secret),
        );
        let leader = SignedBlock::new(signer, inner, "leader", ReplacementType::Newer);
        Self { context, leader }
    }

    /// Re-signs the leader entry, bumping the outer date so it wins any
    /// future `Newer` merge.
    pub fn set_leader_status(&mut self, signer: &Signer, secret: &str, status: LeaderInner) {
        let inner = SignedBlock::new_with_secret(
            signer,
            status,
            "leader",
            ReplacementType::Newer,
            Some(secret),
        );
        self.leader = SignedBlock::new(signer, inner, "leader", ReplacementType::Newer);
    }

    /// Two nodes are members of the same consistent-cluster iff their inner
    /// leader blocks verify under the same `secret`.
    pub fn is_member(&self, verifier: &Verifier, secret: &str) -> bool {
        self.leader.data.verify_with_secret(verifier, Some(secret))
    }

    pub fn verify(&self, verifier: &Verifier, secret: &str) -> bool {
        self.context.verify(verifier) && self.leader.verify(verifier) && self.is_member(verifier, secret)
    }

    pub fn update(
        &mut self,
        prefix: &Path,
        other: &ConsistentContext,
        verifier: &Verifier,
        secret: &str,
    ) -> Vec<Path> {
        let mut changed = self
            .context
            .update(&prefix.join("context"), &other.context, verifier);

        if self.leader.admits_replacement(&other.leader)
            && other.leader.verify(verifier)
            && other.leader.data.verify_with_secret(verifier, Some(secret))
        {
            self.leader = other.leader.clone();
            changed.push(prefix.join("leader"));
        }

        changed
    }

    pub fn diff(&self, other: &ConsistentContext) -> Option<ConsistentContext> {
        let context_diff = self.context.diff(&other.context);
        let leader_equal = self.leader == other.leader;
        if context_diff.is_none() && leader_equal {
            return None;
        }
        let leader = if leader_equal {
            self.leader.clone()
        } else {
            self.leader.join(&other.leader)
        };
        Some(ConsistentContext {
            context: context_diff.unwrap_or_else(|| self.context.clone()),
            leader,
        })
    }

    pub fn all_paths(&self, prefix: &Path) -> Vec<Path> {
        let mut paths = self.context.all_paths(&prefix.join("context"));
        paths.push(prefix.join("leader"));
        paths
    }
}

impl PartialEq for ConsistentContext {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.leader == other.leader
    }
}
