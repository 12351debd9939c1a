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

//! Bidirectional gRPC streaming transport (C7): connection lifecycle,
//! handshake/nonce validation, heartbeats, and incremental-update exchange
//! between peers (spec §4.6).

pub mod proto {
    tonic::include_proto!("meshmon.v1");
}

mod connection;
mod dialler;
mod error;
mod heartbeat;
mod router;
mod service;
mod update;
mod validator;

pub use connection::{Connection, ConnectionManager, Initiator, RawConnection};
pub use dialler::{can_dial, Dialler};
pub use error::TransportError;
pub use heartbeat::{HeartbeatController, PingEntry, PingStatus};
pub use service::{MeshMonServer, PacketStream};
pub use update::{IncomingUpdateHandler, OutgoingUpdateHandler};
pub use validator::{ConnectionValidator, Validator, ValidatorBlock};
