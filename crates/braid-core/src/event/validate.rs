//! Event validation.
//!
//! A pure predicate applied to every event before it can influence any
//! derived state. Checks run in a fixed order:
//!
//! 1. **Shape**: lowercase hex field lengths and the content size limit.
//! 2. **Identity**: the recomputed content hash equals the claimed `id`
//!    (mismatch ⇒ corrupt).
//! 3. **Signature**: `sig` verifies over the id bytes under `pubkey`
//!    (failure ⇒ forged or unsigned).
//!
//! Rejected events are dropped and logged; they never reach the projection.

use ed25519_dalek::{Signature, VerifyingKey};
use tracing::{debug, warn};

use super::{Event, compute_id};

/// Maximum allowed size (in bytes) of an event's content.
pub const MAX_CONTENT_BYTES: usize = 1_048_576; // 1 MiB

/// Why an event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A field does not have the expected encoding.
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    /// Content exceeds [`MAX_CONTENT_BYTES`].
    #[error("content is {size} bytes, exceeds limit of {max} bytes")]
    OversizedContent { size: usize, max: usize },

    /// The recomputed content hash differs from the claimed id.
    #[error("id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: String, computed: String },

    /// The signature does not verify under the author key.
    #[error("signature does not verify for author {pubkey}")]
    BadSignature { pubkey: String },
}

impl Rejection {
    /// Corrupt events failed the content-hash check; forged events carry a
    /// correct hash but an invalid signature.
    #[must_use]
    pub const fn is_forgery(&self) -> bool {
        matches!(self, Self::BadSignature { .. })
    }
}

/// Validate a single event.
///
/// # Errors
///
/// Returns the first [`Rejection`] encountered.
pub fn validate_event(event: &Event) -> Result<(), Rejection> {
    let pubkey = decode_fixed::<32>("pubkey", &event.pubkey)?;
    let claimed_id = decode_fixed::<32>("id", &event.id)?;
    let sig = decode_fixed::<64>("sig", &event.sig)?;

    if event.content.len() > MAX_CONTENT_BYTES {
        return Err(Rejection::OversizedContent {
            size: event.content.len(),
            max: MAX_CONTENT_BYTES,
        });
    }

    let computed = compute_id(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    );
    if computed != event.id {
        return Err(Rejection::IdMismatch {
            claimed: event.id.clone(),
            computed,
        });
    }

    let key = VerifyingKey::from_bytes(&pubkey).map_err(|_| Rejection::BadSignature {
        pubkey: event.pubkey.clone(),
    })?;
    let signature = Signature::from_bytes(&sig);
    key.verify_strict(&claimed_id, &signature)
        .map_err(|_| Rejection::BadSignature {
            pubkey: event.pubkey.clone(),
        })
}

/// Validate and log. Returns `true` when the event may be ingested.
#[must_use]
pub fn accept(event: &Event) -> bool {
    match validate_event(event) {
        Ok(()) => true,
        Err(rejection) => {
            if rejection.is_forgery() {
                warn!(event_id = %event.id, author = %event.pubkey, %rejection, "dropping forged event");
            } else {
                debug!(event_id = %event.id, %rejection, "dropping corrupt event");
            }
            false
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

/// Summary of validating a batch of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of events that passed.
    pub accepted: usize,
    /// Rejected event ids with the reason.
    pub rejected: Vec<(String, Rejection)>,
}

impl ValidationReport {
    /// Returns `true` if no event was rejected.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Total events processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.accepted + self.rejected.len()
    }
}

/// Split a batch into valid events and a report of the rejected ones.
#[must_use]
pub fn validate_batch(events: Vec<Event>) -> (Vec<Event>, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut valid = Vec::with_capacity(events.len());
    for event in events {
        match validate_event(&event) {
            Ok(()) => {
                report.accepted += 1;
                valid.push(event);
            }
            Err(rejection) => {
                debug!(event_id = %event.id, %rejection, "batch validation rejected event");
                report.rejected.push((event.id, rejection));
            }
        }
    }
    (valid, report)
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], Rejection> {
    if value.len() != N * 2 {
        return Err(Rejection::Malformed {
            field,
            reason: format!("expected {} hex chars, found {}", N * 2, value.len()),
        });
    }
    if let Some(c) = value.chars().find(|c| !matches!(*c, '0'..='9' | 'a'..='f')) {
        return Err(Rejection::Malformed {
            field,
            reason: format!("invalid character {c:?}, expected lowercase hex"),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out).map_err(|e| Rejection::Malformed {
        field,
        reason: e.to_string(),
    })?;
    Ok(out)
}
