//! Typed records produced by the tag parser.
//!
//! One record shape per event kind. Reducers and the projection consume these
//! and never look at raw tags again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::address::RepoAddress;
use crate::model::{BountyState, LifecycleState, RootFamily};

/// Repository announcement (kind 30617).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAnnouncement {
    pub identifier: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub clone: Vec<String>,
    pub web: Vec<String>,
    pub relays: Vec<String>,
    /// Additional maintainer pubkeys besides the announcing author.
    pub maintainers: Vec<String>,
    pub labels: Vec<String>,
}

/// Repository ref-state (kind 30618): branch and tag heads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub identifier: String,
    /// `refs/heads/main` → commit id.
    pub refs: BTreeMap<String, String>,
    /// Symbolic HEAD, e.g. `ref: refs/heads/main`.
    pub head: Option<String>,
}

/// Issue, patch or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootItem {
    pub family: RootFamily,
    pub subject: Option<String>,
    pub body: String,
    pub labels: Vec<String>,
    pub repo: Option<RepoAddress>,
    pub assignees: Vec<String>,
    /// Tip commit of a pull request (`c` tag).
    pub tip_commit: Option<String>,
    /// Source branch of a pull request (`branch-name` tag).
    pub branch: Option<String>,
}

/// A status change for one root item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub root: String,
    pub state: LifecycleState,
    /// Root family this status applies to. `None` applies to every family.
    pub family_filter: Option<RootFamily>,
    pub repo: Option<RepoAddress>,
}

impl StatusChange {
    /// Whether this status may affect a root of `family`.
    #[must_use]
    pub fn applies_to(&self, family: RootFamily) -> bool {
        self.family_filter.is_none_or(|f| f == family)
    }
}

/// A comment in a discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub root: String,
    /// Immediate parent comment. `None` for top-level replies.
    pub parent: Option<String>,
    pub body: String,
}

/// A bounty offer or bounty state update for an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyOffer {
    pub issue: String,
    pub amount_sats: Option<u64>,
    pub state: BountyState,
}

/// The typed interpretation of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    RepoAnnouncement(RepoAnnouncement),
    RepoState(RepoState),
    Root(RootItem),
    Status(StatusChange),
    Comment(CommentRef),
    Bounty(BountyOffer),
    /// A known kind missing a field it cannot do without (e.g. a status
    /// event without any root reference).
    Incomplete { reason: String },
    /// A kind no reducer interprets.
    Unsupported,
}

impl Record {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::RepoAnnouncement(_) => "repo_announcement",
            Self::RepoState(_) => "repo_state",
            Self::Root(_) => "root",
            Self::Status(_) => "status",
            Self::Comment(_) => "comment",
            Self::Bounty(_) => "bounty",
            Self::Incomplete { .. } => "incomplete",
            Self::Unsupported => "unsupported",
        }
    }
}
