//! Status reconciler.
//!
//! The lifecycle of a root item (issue, patch, pull request) is never stored
//! on the item. It is derived from a side channel of status events that
//! reference the item, each declaring `Open`, `Applied`, `Closed` or `Draft`
//! as of its own timestamp.
//!
//! The reconciler keeps a grow-only set of status candidates per root. The
//! current state is the candidate with the greatest [`Precedence`] among those
//! whose kind filter matches the root's family. Because derivation is a max
//! over a set, arrival order and duplicates do not matter. With no candidate
//! the item is implicitly `Open` since its own `created_at`.
//!
//! There is no terminal state: a later `Open` reopens a closed item.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};
use tracing::debug;

use crate::model::{LifecycleState, ParseValueError, RootFamily};
use crate::resolve::Precedence;
use crate::tags::{ParsedEvent, Record, StatusChange};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One status event as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCandidate {
    pub event_id: String,
    pub author: String,
    pub created_at: u64,
    pub state: LifecycleState,
    pub family_filter: Option<RootFamily>,
}

impl StatusCandidate {
    #[must_use]
    pub fn from_change(event_id: &str, author: &str, created_at: u64, change: &StatusChange) -> Self {
        Self {
            event_id: event_id.to_string(),
            author: author.to_string(),
            created_at,
            state: change.state,
            family_filter: change.family_filter,
        }
    }

    #[must_use]
    pub fn precedence(&self) -> Precedence<'_> {
        Precedence::new(self.created_at, &self.event_id)
    }

    fn matches(&self, family: Option<RootFamily>) -> bool {
        match (self.family_filter, family) {
            (Some(filter), Some(family)) => filter == family,
            _ => true,
        }
    }
}

/// The derived lifecycle state of a root item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    /// `created_at` of the deciding status event, or of the root itself.
    pub since: u64,
    /// The deciding status event. `None` for the implicit initial `Open`.
    pub event_id: Option<String>,
}

impl LifecycleStatus {
    #[must_use]
    pub const fn implicit_open(root_created_at: u64) -> Self {
        Self {
            state: LifecycleState::Open,
            since: root_created_at,
            event_id: None,
        }
    }

    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        self.event_id.is_none()
    }
}

/// Outcome of offering one event to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The visible state of `root` changed.
    Transitioned { root: String, to: LifecycleStatus },
    /// The event was a duplicate, lost to a newer status, or was not a
    /// status event at all.
    Ignored,
}

/// Who may change the status of a root item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusPolicy {
    /// Any signed status event counts.
    #[default]
    Anyone,
    /// Only the root author and the repository maintainers.
    AuthorOrMaintainers,
}

impl StatusPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anyone => "anyone",
            Self::AuthorOrMaintainers => "author-or-maintainers",
        }
    }
}

impl fmt::Display for StatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusPolicy {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anyone" => Ok(Self::Anyone),
            "author-or-maintainers" | "maintainers" => Ok(Self::AuthorOrMaintainers),
            _ => Err(ParseValueError {
                expected: "anyone or author-or-maintainers",
                raw: s.to_string(),
            }),
        }
    }
}

/// Pubkeys allowed to change a root's status under
/// [`StatusPolicy::AuthorOrMaintainers`].
#[derive(Debug, Clone, Copy)]
pub struct Authority<'a> {
    pub root_author: &'a str,
    /// Repository owner and listed maintainers.
    pub maintainers: &'a [String],
}

impl Authority<'_> {
    #[must_use]
    pub fn permits(&self, pubkey: &str) -> bool {
        pubkey.eq_ignore_ascii_case(self.root_author)
            || self.maintainers.iter().any(|m| m.eq_ignore_ascii_case(pubkey))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RootInfo {
    family: RootFamily,
    created_at: u64,
}

// ---------------------------------------------------------------------------
// StatusReconciler
// ---------------------------------------------------------------------------

/// Grow-only store of status candidates, keyed by `(root, event id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReconciler {
    candidates: BTreeMap<String, BTreeMap<String, StatusCandidate>>,
    roots: BTreeMap<String, RootInfo>,
}

impl StatusReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a parsed event.
    ///
    /// Root items are remembered so later lookups know their family; status
    /// events join the candidate set. Everything else is ignored.
    pub fn apply(&mut self, parsed: &ParsedEvent) -> Applied {
        match &parsed.record {
            Record::Root(item) => self.learn_root(
                parsed.id(),
                RootInfo {
                    family: item.family,
                    created_at: parsed.created_at(),
                },
            ),
            Record::Status(change) => self.insert(
                &change.root,
                StatusCandidate::from_change(parsed.id(), parsed.author(), parsed.created_at(), change),
            ),
            _ => Applied::Ignored,
        }
    }

    /// Remember a root's family. Candidates that arrived first were judged
    /// without a family filter, so the winner may change here.
    fn learn_root(&mut self, root: &str, info: RootInfo) -> Applied {
        let known = self.roots.get(root).map(|i| i.family);
        let before = self.winner(root, known).map(|c| c.event_id.clone());
        self.roots.insert(root.to_string(), info);

        let after = self.winner(root, Some(info.family));
        if before.as_deref() == after.map(|c| c.event_id.as_str()) {
            return Applied::Ignored;
        }
        let to = Self::derive(after.into_iter(), info.created_at);
        debug!(root, state = %to.state, since = to.since, "root family changed current status");
        Applied::Transitioned {
            root: root.to_string(),
            to,
        }
    }

    /// Add one candidate for `root`.
    pub fn insert(&mut self, root: &str, candidate: StatusCandidate) -> Applied {
        let family = self.roots.get(root).map(|info| info.family);
        let before = self.winner(root, family).map(|c| c.event_id.clone());

        let set = self.candidates.entry(root.to_string()).or_default();
        if set.contains_key(&candidate.event_id) {
            return Applied::Ignored;
        }
        set.insert(candidate.event_id.clone(), candidate);

        let after = self.winner(root, family);
        match after {
            Some(winner) if before.as_deref() != Some(winner.event_id.as_str()) => {
                let to = LifecycleStatus {
                    state: winner.state,
                    since: winner.created_at,
                    event_id: Some(winner.event_id.clone()),
                };
                debug!(root, state = %to.state, since = to.since, "status transitioned");
                Applied::Transitioned {
                    root: root.to_string(),
                    to,
                }
            }
            _ => {
                debug!(root, "status event did not change current state");
                Applied::Ignored
            }
        }
    }

    /// Current lifecycle status of a root item.
    #[must_use]
    pub fn current(
        &self,
        root_id: &str,
        family: RootFamily,
        root_created_at: u64,
    ) -> LifecycleStatus {
        Self::derive(self.candidates_for(root_id, Some(family)), root_created_at)
    }

    /// Like [`current`](Self::current), but only counting status events
    /// whose author the policy permits.
    #[must_use]
    pub fn current_with_policy(
        &self,
        root_id: &str,
        family: RootFamily,
        root_created_at: u64,
        policy: StatusPolicy,
        authority: &Authority<'_>,
    ) -> LifecycleStatus {
        let candidates = self
            .candidates_for(root_id, Some(family))
            .filter(|c| match policy {
                StatusPolicy::Anyone => true,
                StatusPolicy::AuthorOrMaintainers => authority.permits(&c.author),
            });
        Self::derive(candidates, root_created_at)
    }

    /// Current status of a root item seen through [`apply`](Self::apply).
    #[must_use]
    pub fn current_for(&self, root_id: &str) -> Option<LifecycleStatus> {
        let info = self.roots.get(root_id)?;
        Some(self.current(root_id, info.family, info.created_at))
    }

    /// All candidates recorded for a root, in precedence order.
    #[must_use]
    pub fn history(&self, root_id: &str) -> Vec<&StatusCandidate> {
        let mut all: Vec<_> = self.candidates_for(root_id, None).collect();
        all.sort_by(|a, b| a.precedence().cmp(&b.precedence()));
        all
    }

    /// Join another reconciler into this one.
    pub fn merge(&mut self, other: &Self) {
        for (root, info) in &other.roots {
            self.roots.insert(root.clone(), *info);
        }
        for (root, set) in &other.candidates {
            let mine = self.candidates.entry(root.clone()).or_default();
            for (id, candidate) in set {
                mine.entry(id.clone()).or_insert_with(|| candidate.clone());
            }
        }
    }

    /// Number of distinct status events held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn candidates_for(
        &self,
        root_id: &str,
        family: Option<RootFamily>,
    ) -> impl Iterator<Item = &StatusCandidate> {
        self.candidates
            .get(root_id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(move |c| c.matches(family))
    }

    fn winner(&self, root_id: &str, family: Option<RootFamily>) -> Option<&StatusCandidate> {
        self.candidates_for(root_id, family)
            .max_by(|a, b| a.precedence().cmp(&b.precedence()))
    }

    fn derive<'a>(
        candidates: impl Iterator<Item = &'a StatusCandidate>,
        root_created_at: u64,
    ) -> LifecycleStatus {
        candidates
            .max_by(|a, b| a.precedence().cmp(&b.precedence()))
            .map_or_else(
                || LifecycleStatus::implicit_open(root_created_at),
                |winner| LifecycleStatus {
                    state: winner.state,
                    since: winner.created_at,
                    event_id: Some(winner.event_id.clone()),
                },
            )
    }
}

/// Derive the status from stored candidates without building a reconciler.
#[must_use]
pub fn derive_status(
    candidates: &[StatusCandidate],
    family: RootFamily,
    root_created_at: u64,
) -> LifecycleStatus {
    StatusReconciler::derive(
        candidates.iter().filter(|c| c.matches(Some(family))),
        root_created_at,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
