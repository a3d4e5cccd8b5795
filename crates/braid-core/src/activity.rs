//! Activity ledger.
//!
//! Activity records are derived, unsigned facts ("alice opened an issue on
//! repo X at T"). They come from two places that must agree:
//!
//! - [`replay_local`]: cached domain objects (issues, PRs, patches, comments,
//!   commits), whose timestamps may be in seconds or milliseconds;
//! - [`count_events`]: a live relay query, where repository metadata events
//!   are classified out and never counted.
//!
//! Both paths produce records with the same [`ActivityRecord::dedup_key`],
//! `type|repo|user|unix-seconds`, so feeding the same action through either
//! path, any number of times, yields one record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};
use tracing::trace;

use crate::model::{ParseValueError, RootFamily};
use crate::tags::{ParsedEvent, Record};

/// Timestamps above this are taken to be milliseconds.
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Normalize a seconds-or-milliseconds timestamp to whole seconds.
#[must_use]
pub const fn floor_to_secs(raw: u64) -> u64 {
    if raw >= MILLIS_THRESHOLD { raw / 1000 } else { raw }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Issue,
    PullRequest,
    Patch,
    Comment,
    Commit,
    Status,
    Bounty,
}

impl ActivityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
            Self::Patch => "patch",
            Self::Comment => "comment",
            Self::Commit => "commit",
            Self::Status => "status",
            Self::Bounty => "bounty",
        }
    }

    #[must_use]
    pub const fn for_family(family: RootFamily) -> Self {
        match family {
            RootFamily::Issue => Self::Issue,
            RootFamily::Patch => Self::Patch,
            RootFamily::PullRequest => Self::PullRequest,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(Self::Issue),
            "pull_request" => Ok(Self::PullRequest),
            "patch" => Ok(Self::Patch),
            "comment" => Ok(Self::Comment),
            "commit" => Ok(Self::Commit),
            "status" => Ok(Self::Status),
            "bounty" => Ok(Self::Bounty),
            _ => Err(ParseValueError {
                expected: "activity type",
                raw: s.to_string(),
            }),
        }
    }
}

/// One derived activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub user: String,
    pub repo: String,
    /// Unix seconds.
    pub timestamp: u64,
}

impl ActivityRecord {
    #[must_use]
    pub fn new(kind: ActivityType, user: impl Into<String>, repo: impl Into<String>, raw_ts: u64) -> Self {
        Self {
            kind,
            user: user.into(),
            repo: repo.into(),
            timestamp: floor_to_secs(raw_ts),
        }
    }

    /// `type|repo|user|seconds`.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind.as_str(),
            self.repo,
            self.user,
            self.timestamp
        )
    }
}

// ---------------------------------------------------------------------------
// Ingestion paths
// ---------------------------------------------------------------------------

/// A locally cached domain object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalItem {
    pub kind: ActivityType,
    pub user: String,
    pub repo: String,
    /// Seconds or milliseconds since the epoch.
    pub at: u64,
}

/// Path (a): replay cached objects.
#[must_use]
pub fn replay_local(items: &[LocalItem]) -> Vec<ActivityRecord> {
    items
        .iter()
        .map(|item| ActivityRecord::new(item.kind, item.user.clone(), item.repo.clone(), item.at))
        .collect()
}

/// How a relay event counts toward activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Activity(ActivityType),
    /// Repository announcement or ref-state.
    Metadata,
    /// Not attributable (unsupported or incomplete).
    Ignored,
}

#[must_use]
pub fn classify(parsed: &ParsedEvent) -> Classification {
    if parsed.kind().is_metadata() {
        return Classification::Metadata;
    }
    match &parsed.record {
        Record::Root(item) => Classification::Activity(ActivityType::for_family(item.family)),
        Record::Comment(_) => Classification::Activity(ActivityType::Comment),
        Record::Status(_) => Classification::Activity(ActivityType::Status),
        Record::Bounty(_) => Classification::Activity(ActivityType::Bounty),
        Record::RepoAnnouncement(_) | Record::RepoState(_) => Classification::Metadata,
        Record::Incomplete { .. } | Record::Unsupported => Classification::Ignored,
    }
}

/// Path (b): count events from a live relay query.
///
/// `repo` names the repository the query was scoped to; an event carrying
/// its own repository reference is attributed to that instead.
#[must_use]
pub fn count_events(events: &[ParsedEvent], repo: &str) -> Vec<ActivityRecord> {
    events
        .iter()
        .filter_map(|parsed| match classify(parsed) {
            Classification::Activity(kind) => {
                let repo = event_repo(parsed).unwrap_or_else(|| repo.to_string());
                Some(ActivityRecord::new(kind, parsed.author(), repo, parsed.created_at()))
            }
            Classification::Metadata | Classification::Ignored => {
                trace!(event_id = %parsed.event.short_id(), "event does not count as activity");
                None
            }
        })
        .collect()
}

fn event_repo(parsed: &ParsedEvent) -> Option<String> {
    match &parsed.record {
        Record::Root(item) => item.repo.as_ref().map(ToString::to_string),
        Record::Status(change) => change.repo.as_ref().map(ToString::to_string),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Per-type and per-user counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTotals {
    pub total: u64,
    pub by_type: BTreeMap<ActivityType, u64>,
    pub by_user: BTreeMap<String, u64>,
}

/// Deduplicated set of activity records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    records: BTreeMap<String, ActivityRecord>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns `false` if its dedup key is already present.
    pub fn insert(&mut self, record: ActivityRecord) -> bool {
        let key = record.dedup_key();
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, record);
        true
    }

    /// Insert many; returns how many were new.
    pub fn extend(&mut self, records: impl IntoIterator<Item = ActivityRecord>) -> usize {
        records.into_iter().filter(|r| self.insert(r.clone())).count()
    }

    #[must_use]
    pub fn totals(&self) -> ActivityTotals {
        let mut totals = ActivityTotals::default();
        for record in self.records.values() {
            totals.total += 1;
            *totals.by_type.entry(record.kind).or_default() += 1;
            *totals.by_user.entry(record.user.clone()).or_default() += 1;
        }
        totals
    }

    /// Records restricted to one repository.
    pub fn for_repo<'a>(&'a self, repo: &'a str) -> impl Iterator<Item = &'a ActivityRecord> + 'a {
        self.records.values().filter(move |r| r.repo == repo)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
