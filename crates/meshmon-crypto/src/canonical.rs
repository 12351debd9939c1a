//! Canonical JSON encoding for signed payloads (spec §6).
//!
//! `serde_json::Value::Object` is backed by a `BTreeMap` unless the
//! `preserve_order` feature is enabled anywhere in the dependency graph
//! (it is not, in this workspace), so keys come out sorted for free. Combined
//! with `serde_json`'s default compact writer (no insignificant whitespace)
//! this gives the bit-exact canonical form the spec requires.

use chrono::SecondsFormat;
use meshmon_types::Timestamp;

/// Serializes `value` to its canonical byte representation: UTF-8 JSON,
/// object keys sorted, no insignificant whitespace.
pub fn canonical_bytes(value: &serde_json::Value) -> Vec<u8> {
    // serde_json::to_vec is already compact; sortedness comes from BTreeMap.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Formats a timestamp as ISO-8601 UTC with an explicit `+00:00` offset
/// (chrono's default `Serialize` impl emits a bare `Z`, which this avoids).
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}
