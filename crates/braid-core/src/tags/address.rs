//! Addresses of replaceable entities.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::event::EventKind;

/// Identity of a replaceable entity: only the newest event per key is current.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplaceableKey {
    pub pubkey: String,
    pub kind: EventKind,
    /// Value of the `d` tag. A missing `d` tag is the empty identifier.
    pub identifier: String,
}

impl ReplaceableKey {
    #[must_use]
    pub fn new(pubkey: impl Into<String>, kind: EventKind, identifier: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            kind,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for ReplaceableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.as_u32(), self.pubkey, self.identifier)
    }
}

/// A reference to a repository announcement, written `30617:<pubkey>:<d>`.
///
/// The identifier may itself contain `:`; only the first two separators are
/// structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoAddress {
    pub pubkey: String,
    pub identifier: String,
}

impl RepoAddress {
    #[must_use]
    pub fn new(pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// The replaceable key of the announcement this address points at.
    #[must_use]
    pub fn announcement_key(&self) -> ReplaceableKey {
        ReplaceableKey::new(
            self.pubkey.clone(),
            EventKind::RepoAnnouncement,
            self.identifier.clone(),
        )
    }
}

impl fmt::Display for RepoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            EventKind::RepoAnnouncement.as_u32(),
            self.pubkey,
            self.identifier
        )
    }
}

/// Error returned when a string is not a repository address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository address '{raw}': {reason}")]
pub struct AddressError {
    pub raw: String,
    pub reason: &'static str,
}

impl FromStr for RepoAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| AddressError {
            raw: s.to_string(),
            reason,
        };
        let mut parts = s.trim().splitn(3, ':');
        let kind = parts.next().ok_or_else(|| err("empty"))?;
        if kind != "30617" {
            return Err(err("kind must be 30617"));
        }
        let pubkey = parts
            .next()
            .filter(|pk| pk.len() == 64 && pk.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| err("pubkey must be 64 hex characters"))?;
        let identifier = parts
            .next()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| err("missing identifier"))?;
        Ok(Self::new(pubkey.to_ascii_lowercase(), identifier))
    }
}

impl TryFrom<String> for RepoAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoAddress> for String {
    fn from(value: RepoAddress) -> Self {
        value.to_string()
    }
}
