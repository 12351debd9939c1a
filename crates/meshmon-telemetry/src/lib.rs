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

//! # MeshMon Telemetry
//!
//! Observability infrastructure shared by every MeshMon component: structured
//! logging initialization, a Prometheus metrics endpoint, and abstract sinks
//! that decouple instrumentation call-sites from the metrics backend.

/// A lightweight HTTP server exposing `/metrics`, `/healthz`, and `/readyz`.
pub mod http;
/// Initialization routine for global structured logging.
pub mod init;
/// Concrete metrics sink backed by the `prometheus` crate.
pub mod prometheus_sink;
/// Abstract `*MetricsSink` traits defining the contract for metrics reporting.
pub mod sinks;
/// RAII timer for measuring the duration of a scope.
pub mod time;

pub use sinks::metrics;
pub use time::Timer;
