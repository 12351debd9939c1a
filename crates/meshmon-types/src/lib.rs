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

//! Shared primitive types and the error-code contract used across MeshMon crates.

pub mod error;
pub mod path;
pub mod replacement;

pub use error::ErrorCode;
pub use path::Path;
pub use replacement::ReplacementType;

/// Identifies a node within a network. Equality/ordering is plain lexicographic
/// on the underlying string, used directly by the leader-election tie-break.
pub type NodeId = String;

/// Identifies a configured network (a key in `StoreManager`).
pub type NetworkId = String;

/// UTC timestamp used for every `date` field in the signed data model.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
