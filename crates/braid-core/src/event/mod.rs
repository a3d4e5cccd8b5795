//! Signed event data model.
//!
//! Every piece of tracker state travels as an immutable, content-addressed,
//! signed event:
//!
//! ```text
//! {id, pubkey, created_at, kind, tags: [[string]], content, sig}
//! ```
//!
//! - `id`: hex SHA-256 of the canonical serialization (see [`canonical`])
//! - `pubkey`: hex Ed25519 verifying key of the author
//! - `sig`: hex Ed25519 signature over the raw id bytes
//!
//! Events are never mutated after signing. Derived state (current
//! announcement, lifecycle status, threads) is computed from sets of events
//! by the reducers in the sibling modules.

pub mod canonical;
pub mod kind;
pub mod sign;
pub mod validate;

pub use canonical::compute_id;
pub use kind::EventKind;
pub use sign::{EventBuilder, Keys, SignerError};
pub use validate::{Rejection, ValidationReport, validate_event};

use serde::{Deserialize, Serialize};

/// A single signed event as exchanged with relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Content address: hex SHA-256 of the canonical serialization.
    pub id: String,

    /// Author's hex-encoded public key.
    pub pubkey: String,

    /// Unix seconds, as claimed by the author.
    pub created_at: u64,

    /// Event kind.
    pub kind: EventKind,

    /// Generic key/value tag list. Interpreted only by [`crate::tags`].
    pub tags: Vec<Vec<String>>,

    /// Free-form content. May hold a legacy JSON encoding of the fields that
    /// newer events carry as tags.
    pub content: String,

    /// Hex signature over the id bytes.
    pub sig: String,
}

impl Event {
    /// Short id prefix for log lines and terse output.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let author = self.pubkey.get(..8).unwrap_or(&self.pubkey);
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.created_at,
            author,
            self.kind,
            self.short_id()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        let keys = Keys::from_secret_bytes([7u8; 32]);
        EventBuilder::new(EventKind::Issue, "Login times out after 30s")
            .tag(["subject", "Login timeout"])
            .tag(["t", "bug"])
            .created_at(1_708_012_200)
            .sign(&keys)
    }

    #[test]
    fn serde_json_roundtrip() {
        let event = sample();
        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }

    #[test]
    fn wire_shape_uses_integer_kind() {
        let event = sample();
        let value = serde_json::to_value(&event).expect("to value");
        assert_eq!(value["kind"], 1621);
        assert_eq!(value["created_at"], 1_708_012_200);
        assert!(value["tags"].is_array());
    }

    #[test]
    fn display_is_terse() {
        let event = sample();
        let display = event.to_string();
        assert!(display.contains("1708012200"));
        assert!(display.contains("issue(1621)"));
        assert!(display.contains(event.short_id()));
    }

    #[test]
    fn short_id_handles_short_values() {
        let mut event = sample();
        event.id = "abc".into();
        assert_eq!(event.short_id(), "abc");
    }
}
