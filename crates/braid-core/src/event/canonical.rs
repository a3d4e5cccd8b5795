//! Canonical serialization for event ids.
//!
//! The id commits to every field except the signature. The hash input is the
//! compact JSON array
//!
//! ```text
//! [0,"<pubkey>",<created_at>,<kind>,<tags>,"<content>"]
//! ```
//!
//! Rules:
//! - Compact: no whitespace between tokens.
//! - Array and tag order is preserved exactly as signed.
//! - Strings use serde_json escaping; non-ASCII is emitted verbatim.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::EventKind;

/// Produce the canonical byte string the id is computed over.
#[must_use]
pub fn canonical_form(
    pubkey: &str,
    created_at: u64,
    kind: EventKind,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let tags: Vec<Value> = tags
        .iter()
        .map(|tag| Value::Array(tag.iter().cloned().map(Value::String).collect()))
        .collect();
    let array = Value::Array(vec![
        Value::from(0),
        Value::String(pubkey.to_string()),
        Value::from(created_at),
        Value::from(kind.as_u32()),
        Value::Array(tags),
        Value::String(content.to_string()),
    ]);
    array.to_string()
}

/// Compute the hex SHA-256 id for the given event fields.
///
/// # Examples
///
/// ```
/// use braid_core::event::{EventKind, compute_id};
///
/// let id = compute_id("ab", 1, EventKind::TextNote, &[], "hi");
/// assert_eq!(id.len(), 64);
/// ```
#[must_use]
pub fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: EventKind,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let digest = Sha256::digest(canonical_form(pubkey, created_at, kind, tags, content).as_bytes());
    hex::encode(digest)
}
