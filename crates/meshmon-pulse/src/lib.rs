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

//! The pulse/clock handlers (C5): a periodic clock-pulse generator plus the
//! three `UpdateHandler`s that turn peers' raw pulses into RTT/offset
//! estimates and liveness (spec §4.4).

mod clock_table;
mod generator;
mod node_status;
mod pulse_table;

pub use clock_table::ClockTableHandler;
pub use generator::ClockPulseGenerator;
pub use node_status::NodeStatusHandler;
pub use pulse_table::PulseTableHandler;
