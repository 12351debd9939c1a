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

//! Per-consistent-context leader election (C6): majority-quorum membership,
//! a stale-view consistency check, and tie-break election by node-id (spec
//! §4.5).

mod handler;

pub use handler::LeaderElectionHandler;
