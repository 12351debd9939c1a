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

//! The update/event dispatch engine (C4): dedupe queues, path matchers, the
//! fan-out controller, and the two worker loops (`UpdateManager`) that drive
//! registered handlers whenever the store changes or an out-of-band event
//! fires (spec §4.3).

mod controller;
mod error;
mod handler;
mod matcher;
mod queue;
mod manager;
mod rate_limited;

pub use controller::UpdateController;
pub use error::DispatchError;
pub use handler::UpdateHandler;
pub use matcher::PathMatcher;
pub use queue::DedupeQueue;
pub use manager::UpdateManager;
pub use rate_limited::RateLimitedHandler;
