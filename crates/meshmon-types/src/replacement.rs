use serde::{Deserialize, Serialize};

/// Governs whether a `SignedBlock` is replaced by an incoming one with a later
/// or an earlier `date`. Most blocks are `Newer`; a handful of protocol
/// primitives (see `meshmon-model::leader`) use `Older` deliberately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplacementType {
    Newer,
    Older,
}

impl ReplacementType {
    /// Per spec §3: replace iff (`Newer` ∧ recv.date > local.date) ∨ (`Older` ∧ recv.date < local.date).
    pub fn admits_replacement<T: PartialOrd>(self, local: &T, incoming: &T) -> bool {
        match self {
            ReplacementType::Newer => incoming > local,
            ReplacementType::Older => incoming < local,
        }
    }
}
