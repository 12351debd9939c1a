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

//! Ed25519 signing primitives (C1): signer/verifier wrappers, PEM key file
//! persistence, canonical JSON encoding, and the per-network key mapping.

pub mod canonical;
pub mod error;
pub mod key_files;
pub mod keys;

pub use canonical::{canonical_bytes, format_timestamp};
pub use error::CryptoError;
pub use keys::{KeyMapping, Signature, Signer, Verifier};
