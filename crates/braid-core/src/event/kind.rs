//! Event kind catalogue.
//!
//! Kinds are plain integers on the wire. The variants below are the ones the
//! reconciliation engine understands; everything else is carried as
//! [`EventKind::Other`] and ignored by the reducers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{LifecycleState, RootFamily};

/// The event kinds known to braid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// Text note; carries comments in the legacy encoding.
    TextNote,
    /// Threaded comment in the tag encoding.
    Comment,
    /// Patch submitted against a repository.
    Patch,
    /// Pull request against a repository.
    PullRequest,
    /// Issue against a repository.
    Issue,
    /// Status change: (re)open.
    StatusOpen,
    /// Status change: applied (merged / resolved).
    StatusApplied,
    /// Status change: closed.
    StatusClosed,
    /// Status change: draft.
    StatusDraft,
    /// Bounty offer or bounty state change for an issue.
    Bounty,
    /// Replaceable repository announcement.
    RepoAnnouncement,
    /// Replaceable repository ref-state (branch and tag heads).
    RepoState,
    /// Any kind braid does not interpret.
    Other(u32),
}

impl EventKind {
    /// All interpreted kinds in catalogue order.
    pub const KNOWN: [Self; 12] = [
        Self::TextNote,
        Self::Comment,
        Self::Patch,
        Self::PullRequest,
        Self::Issue,
        Self::StatusOpen,
        Self::StatusApplied,
        Self::StatusClosed,
        Self::StatusDraft,
        Self::Bounty,
        Self::RepoAnnouncement,
        Self::RepoState,
    ];

    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::TextNote,
            1111 => Self::Comment,
            1617 => Self::Patch,
            1618 => Self::PullRequest,
            1621 => Self::Issue,
            1630 => Self::StatusOpen,
            1631 => Self::StatusApplied,
            1632 => Self::StatusClosed,
            1633 => Self::StatusDraft,
            1640 => Self::Bounty,
            30617 => Self::RepoAnnouncement,
            30618 => Self::RepoState,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::TextNote => 1,
            Self::Comment => 1111,
            Self::Patch => 1617,
            Self::PullRequest => 1618,
            Self::Issue => 1621,
            Self::StatusOpen => 1630,
            Self::StatusApplied => 1631,
            Self::StatusClosed => 1632,
            Self::StatusDraft => 1633,
            Self::Bounty => 1640,
            Self::RepoAnnouncement => 30617,
            Self::RepoState => 30618,
            Self::Other(value) => value,
        }
    }

    /// Parameterized-replaceable kinds: only the newest event per
    /// `(author, kind, d)` is current.
    #[must_use]
    pub const fn is_replaceable(self) -> bool {
        let n = self.as_u32();
        n >= 30_000 && n < 40_000
    }

    /// Repository metadata never counts toward activity totals.
    #[must_use]
    pub const fn is_metadata(self) -> bool {
        matches!(self, Self::RepoAnnouncement | Self::RepoState)
    }

    #[must_use]
    pub const fn root_family(self) -> Option<RootFamily> {
        match self {
            Self::Issue => Some(RootFamily::Issue),
            Self::Patch => Some(RootFamily::Patch),
            Self::PullRequest => Some(RootFamily::PullRequest),
            _ => None,
        }
    }

    #[must_use]
    pub const fn status_state(self) -> Option<LifecycleState> {
        match self {
            Self::StatusOpen => Some(LifecycleState::Open),
            Self::StatusApplied => Some(LifecycleState::Applied),
            Self::StatusClosed => Some(LifecycleState::Closed),
            Self::StatusDraft => Some(LifecycleState::Draft),
            _ => None,
        }
    }

    /// The status kind that declares `state`.
    #[must_use]
    pub const fn for_status(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Open => Self::StatusOpen,
            LifecycleState::Applied => Self::StatusApplied,
            LifecycleState::Closed => Self::StatusClosed,
            LifecycleState::Draft => Self::StatusDraft,
        }
    }

    #[must_use]
    pub const fn is_comment(self) -> bool {
        matches!(self, Self::Comment | Self::TextNote)
    }

    /// Short human label used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TextNote => "note",
            Self::Comment => "comment",
            Self::Patch => "patch",
            Self::PullRequest => "pull-request",
            Self::Issue => "issue",
            Self::StatusOpen => "status.open",
            Self::StatusApplied => "status.applied",
            Self::StatusClosed => "status.closed",
            Self::StatusDraft => "status.draft",
            Self::Bounty => "bounty",
            Self::RepoAnnouncement => "repo.announcement",
            Self::RepoState => "repo.state",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.as_u32())
    }
}

impl From<u32> for EventKind {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

// Custom serde: kinds travel as bare integers.
impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u32::deserialize(deserializer)?;
        Ok(Self::from_u32(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_roundtrip_through_numbers() {
        for kind in EventKind::KNOWN {
            assert_eq!(EventKind::from_u32(kind.as_u32()), kind);
        }
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let kind = EventKind::from_u32(7);
        assert_eq!(kind, EventKind::Other(7));
        assert_eq!(kind.as_u32(), 7);
        assert!(!kind.is_replaceable());
    }

    #[test]
    fn replaceable_range() {
        assert!(EventKind::RepoAnnouncement.is_replaceable());
        assert!(EventKind::RepoState.is_replaceable());
        assert!(EventKind::Other(30_023).is_replaceable());
        assert!(!EventKind::Issue.is_replaceable());
        assert!(!EventKind::Other(40_000).is_replaceable());
    }

    #[test]
    fn status_kinds_map_both_ways() {
        for state in [
            LifecycleState::Open,
            LifecycleState::Applied,
            LifecycleState::Closed,
            LifecycleState::Draft,
        ] {
            assert_eq!(EventKind::for_status(state).status_state(), Some(state));
        }
        assert_eq!(EventKind::Issue.status_state(), None);
    }

    #[test]
    fn serde_uses_bare_integers() {
        let json = serde_json::to_string(&EventKind::Issue).expect("serialize");
        assert_eq!(json, "1621");
        let back: EventKind = serde_json::from_str("30618").expect("deserialize");
        assert_eq!(back, EventKind::RepoState);
        let other: EventKind = serde_json::from_str("9").expect("deserialize");
        assert_eq!(other, EventKind::Other(9));
    }

    #[test]
    fn metadata_kinds() {
        assert!(EventKind::RepoAnnouncement.is_metadata());
        assert!(EventKind::RepoState.is_metadata());
        assert!(!EventKind::Issue.is_metadata());
        assert!(!EventKind::Comment.is_metadata());
    }
}
