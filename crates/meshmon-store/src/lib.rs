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

//! The typed view API over the signed data model (`SharedStore`) and the
//! per-peer incremental updater (C3) that turns it into bandwidth-bounded
//! diffs (spec §4.2/§6).

mod error;
mod shared_store;
mod updater;
mod views;

pub use error::StoreError;
pub use shared_store::SharedStore;
pub use updater::IncrementalUpdater;
pub use views::{CtxView, MutableCtxView};
