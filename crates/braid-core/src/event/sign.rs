//! Event authoring: key material and the signing builder.
//!
//! Local edits (status changes, bounty actions, ref-state announcements after
//! a bridge push) are authored here and then travel through exactly the same
//! validation and projection path as events received from relays.

use ed25519_dalek::{Signer as _, SigningKey};
use std::path::Path;

use super::{Event, EventKind, compute_id};

/// Errors raised while locating or using a signing key.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// No key was configured anywhere we look.
    #[error("no valid signing method available")]
    Unavailable,

    /// A key was configured but could not be decoded.
    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    /// The configured key file could not be read.
    #[error("failed to read secret key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An Ed25519 keypair used to sign events.
#[derive(Clone)]
pub struct Keys {
    signing: SigningKey,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl Keys {
    /// Generate a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Build keys from raw secret bytes.
    #[must_use]
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a 64-character hex secret.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::InvalidKey`] if the input is not 32 bytes of hex.
    pub fn from_secret_hex(secret: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| SignerError::InvalidKey(format!("not hex: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|raw: Vec<u8>| SignerError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))?;
        Ok(Self::from_secret_bytes(secret))
    }

    /// Read a hex secret from a file (first line, whitespace trimmed).
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Io`] if the file cannot be read, or
    /// [`SignerError::InvalidKey`] if its contents are not a valid secret.
    pub fn from_secret_file(path: &Path) -> Result<Self, SignerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SignerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_secret_hex(raw.lines().next().unwrap_or_default())
    }

    /// Resolve a signer from, in order: an explicit hex secret (usually the
    /// `BRAID_SECRET_KEY` environment variable), then a key file.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Unavailable`] when neither source is set.
    pub fn resolve(secret_hex: Option<&str>, key_path: Option<&Path>) -> Result<Self, SignerError> {
        if let Some(secret) = secret_hex.filter(|s| !s.trim().is_empty()) {
            return Self::from_secret_hex(secret);
        }
        if let Some(path) = key_path {
            return Self::from_secret_file(path);
        }
        Err(SignerError::Unavailable)
    }

    /// Hex-encoded public key, as used in the `pubkey` field.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    /// Hex-encoded secret, for writing a freshly generated key to disk.
    #[must_use]
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub(crate) fn sign_id(&self, id: &str) -> String {
        // The id is always produced by `compute_id`, so it is valid hex.
        let bytes = hex::decode(id).unwrap_or_default();
        hex::encode(self.signing.sign(&bytes).to_bytes())
    }
}

/// Builder for new signed events.
///
/// ```
/// use braid_core::event::{EventBuilder, EventKind, Keys};
///
/// let keys = Keys::from_secret_bytes([1u8; 32]);
/// let event = EventBuilder::new(EventKind::Issue, "steps to reproduce...")
///     .tag(["subject", "Crash on start"])
///     .created_at(1_700_000_000)
///     .sign(&keys);
/// assert!(braid_core::event::validate_event(&event).is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: EventKind,
    content: String,
    tags: Vec<Vec<String>>,
    created_at: Option<u64>,
}

impl EventBuilder {
    #[must_use]
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    /// Append one tag.
    #[must_use]
    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Append several tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Pin the timestamp instead of using the current wall clock.
    #[must_use]
    pub const fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Compute the id and sign it.
    #[must_use]
    pub fn sign(self, keys: &Keys) -> Event {
        let pubkey = keys.public_key_hex();
        let created_at = self.created_at.unwrap_or_else(now_unix_secs);
        let id = compute_id(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let sig = keys.sign_id(&id);
        Event {
            id,
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

fn now_unix_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::validate_event;

    #[test]
    fn signed_events_validate() {
        let keys = Keys::generate();
        let event = EventBuilder::new(EventKind::Comment, "looks good")
            .tag(["E", "abc"])
            .sign(&keys);
        assert_eq!(event.pubkey, keys.public_key_hex());
        assert_eq!(event.sig.len(), 128);
        validate_event(&event).expect("fresh event must validate");
    }

    #[test]
    fn same_secret_same_pubkey() {
        let a = Keys::from_secret_bytes([9u8; 32]);
        let b = Keys::from_secret_hex(&a.secret_hex()).expect("hex roundtrip");
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn resolve_without_sources_is_unavailable() {
        let err = Keys::resolve(None, None).expect_err("no signer");
        assert!(matches!(err, SignerError::Unavailable));
        assert_eq!(err.to_string(), "no valid signing method available");
    }

    #[test]
    fn resolve_ignores_blank_env_value() {
        let err = Keys::resolve(Some("   "), None).expect_err("blank is unset");
        assert!(matches!(err, SignerError::Unavailable));
    }

    #[test]
    fn resolve_rejects_short_secret() {
        let err = Keys::resolve(Some("abcd"), None).expect_err("too short");
        assert!(err.to_string().contains("expected 32 bytes"));
    }

    #[test]
    fn resolve_reads_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("secret.key");
        let keys = Keys::from_secret_bytes([3u8; 32]);
        std::fs::write(&path, format!("{}\n", keys.secret_hex())).expect("write key");
        let loaded = Keys::resolve(None, Some(&path)).expect("load from file");
        assert_eq!(loaded.public_key_hex(), keys.public_key_hex());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keys = Keys::from_secret_bytes([5u8; 32]);
        let debug = format!("{keys:?}");
        assert!(!debug.contains(&keys.secret_hex()));
        assert!(debug.contains(&keys.public_key_hex()));
    }
}
