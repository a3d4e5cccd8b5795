//! Tag parser.
//!
//! Turns a validated [`Event`] into a [`ParsedEvent`]: the original event plus
//! one strongly typed [`Record`]. Two historical encodings exist side by side:
//!
//! - **tags**: structured fields live in the tag list (`subject`, `t`, `a`,
//!   `e` with markers, ...).
//! - **legacy**: a JSON object in `content` (see [`legacy`]), and positional
//!   `e` tags for comment threading.
//!
//! Per field, a value found in tags wins; the legacy value only fills gaps.
//! Unknown or malformed tags are skipped. Parsing never fails: a kind that
//! cannot be interpreted becomes [`Record::Unsupported`] or
//! [`Record::Incomplete`].

pub mod address;
pub mod legacy;
pub mod record;

pub use address::{AddressError, RepoAddress, ReplaceableKey};
pub use record::{
    BountyOffer, CommentRef, Record, RepoAnnouncement, RepoState, RootItem, StatusChange,
};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::event::{Event, EventKind};
use crate::model::{BountyState, RootFamily};
use legacy::{LegacyContent, OneOrMany};

/// An event together with its typed interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub event: Event,
    pub record: Record,
}

impl ParsedEvent {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.event.id
    }

    #[must_use]
    pub fn author(&self) -> &str {
        &self.event.pubkey
    }

    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.event.created_at
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.event.kind
    }

    /// The replaceable key for replaceable kinds, `None` otherwise.
    #[must_use]
    pub fn replaceable_key(&self) -> Option<ReplaceableKey> {
        if !self.event.kind.is_replaceable() {
            return None;
        }
        let identifier = Tags::new(&self.event.tags)
            .value("d")
            .unwrap_or_default()
            .to_string();
        Some(ReplaceableKey::new(
            self.event.pubkey.clone(),
            self.event.kind,
            identifier,
        ))
    }
}

/// Parse one event.
#[must_use]
pub fn parse(event: Event) -> ParsedEvent {
    let record = interpret(&event);
    trace!(event_id = %event.short_id(), record = record.type_name(), "parsed event");
    ParsedEvent { event, record }
}

fn interpret(event: &Event) -> Record {
    let tags = Tags::new(&event.tags);
    match event.kind {
        EventKind::RepoAnnouncement => Record::RepoAnnouncement(announcement(&tags, &event.content)),
        EventKind::RepoState => Record::RepoState(repo_state(&tags, &event.content)),
        EventKind::Issue | EventKind::Patch | EventKind::PullRequest => {
            event.kind.root_family().map_or(Record::Unsupported, |family| {
                Record::Root(root_item(family, &tags, &event.content))
            })
        }
        EventKind::StatusOpen
        | EventKind::StatusApplied
        | EventKind::StatusClosed
        | EventKind::StatusDraft => status(event.kind, &tags, &event.content),
        EventKind::Comment => comment(&tags, &event.content),
        EventKind::TextNote => legacy_comment(&tags, &event.content),
        EventKind::Bounty => bounty(&tags, &event.content),
        EventKind::Other(_) => Record::Unsupported,
    }
}

// ---------------------------------------------------------------------------
// Tag access
// ---------------------------------------------------------------------------

/// Read-only view over a raw tag list.
#[derive(Debug, Clone, Copy)]
pub struct Tags<'a> {
    raw: &'a [Vec<String>],
}

impl<'a> Tags<'a> {
    #[must_use]
    pub const fn new(raw: &'a [Vec<String>]) -> Self {
        Self { raw }
    }

    /// All tags named `name` that carry at least one value.
    pub fn named(self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.raw
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| &tag[1..])
    }

    /// First non-empty value of the first tag named `name`.
    #[must_use]
    pub fn value(self, name: &'a str) -> Option<&'a str> {
        self.named(name)
            .map(|values| values[0].as_str())
            .find(|v| !v.trim().is_empty())
    }

    /// Every value of every tag named `name` (multi-value tags flattened),
    /// deduplicated with first-seen order kept.
    #[must_use]
    pub fn values(self, name: &'a str) -> Vec<String> {
        dedup(self.named(name).flatten().cloned())
    }

    /// First value of a tag named `name` whose marker (position 3) equals
    /// `marker`.
    #[must_use]
    pub fn marked(self, name: &'a str, marker: &str) -> Option<&'a str> {
        self.named(name)
            .find(|values| values.get(2).is_some_and(|m| m == marker))
            .map(|values| values[0].as_str())
    }
}

fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn is_event_id(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn or_legacy(tag: Option<&str>, legacy: Option<&str>) -> Option<String> {
    tag.or(legacy)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn or_legacy_list(tag: Vec<String>, legacy: Option<Vec<String>>) -> Vec<String> {
    if tag.is_empty() {
        dedup(legacy.unwrap_or_default())
    } else {
        tag
    }
}

/// Zero-or-one repository reference: the first `a` tag that parses wins.
fn repo_address(tags: &Tags<'_>, legacy: Option<&LegacyContent>) -> Option<RepoAddress> {
    tags.named("a")
        .find_map(|values| values[0].parse().ok())
        .or_else(|| legacy.and_then(|l| l.repo.as_deref()).and_then(|r| r.parse().ok()))
}

// ---------------------------------------------------------------------------
// Per-kind schemas
// ---------------------------------------------------------------------------

fn announcement(tags: &Tags<'_>, content: &str) -> RepoAnnouncement {
    let legacy = LegacyContent::decode(content).unwrap_or_default();
    RepoAnnouncement {
        identifier: tags.value("d").unwrap_or_default().to_string(),
        name: or_legacy(tags.value("name"), legacy.name.as_deref()),
        description: or_legacy(tags.value("description"), legacy.description.as_deref()),
        clone: or_legacy_list(tags.values("clone"), legacy.clone.map(OneOrMany::into_vec)),
        web: or_legacy_list(tags.values("web"), legacy.web.map(OneOrMany::into_vec)),
        relays: or_legacy_list(tags.values("relays"), legacy.relays),
        maintainers: or_legacy_list(tags.values("maintainers"), legacy.maintainers),
        labels: or_legacy_list(tags.values("t"), legacy.labels),
    }
}

fn repo_state(tags: &Tags<'_>, content: &str) -> RepoState {
    let legacy = LegacyContent::decode(content).unwrap_or_default();
    let mut refs = legacy.refs.unwrap_or_default();
    // Tag values override legacy refs of the same name.
    for tag in tags.raw {
        if let [name, target, ..] = tag.as_slice() {
            if name.starts_with("refs/") && !target.trim().is_empty() {
                refs.insert(name.clone(), target.trim().to_string());
            }
        }
    }
    RepoState {
        identifier: tags.value("d").unwrap_or_default().to_string(),
        refs,
        head: or_legacy(tags.value("HEAD"), legacy.head.as_deref()),
    }
}

fn root_item(family: RootFamily, tags: &Tags<'_>, content: &str) -> RootItem {
    let legacy = LegacyContent::decode(content);
    let body = match &legacy {
        Some(l) => l.body().unwrap_or_default().to_string(),
        None => content.to_string(),
    };
    let assignees = dedup(
        tags.named("p")
            .filter(|values| values.get(2).is_some_and(|m| m == "assignee"))
            .map(|values| values[0].clone()),
    );
    RootItem {
        family,
        subject: or_legacy(
            tags.value("subject"),
            legacy.as_ref().and_then(LegacyContent::subject),
        ),
        body,
        labels: or_legacy_list(tags.values("t"), legacy.as_ref().and_then(|l| l.labels.clone())),
        repo: repo_address(tags, legacy.as_ref()),
        assignees,
        tip_commit: tags.value("c").map(ToString::to_string),
        branch: tags.value("branch-name").map(ToString::to_string),
    }
}

fn status(kind: EventKind, tags: &Tags<'_>, content: &str) -> Record {
    let Some(state) = kind.status_state() else {
        return Record::Unsupported;
    };
    let legacy = LegacyContent::decode(content);
    let root = tags
        .marked("e", "root")
        .or_else(|| tags.value("e"))
        .or_else(|| legacy.as_ref().and_then(|l| l.issue.as_deref()))
        .filter(|id| is_event_id(id));
    let Some(root) = root else {
        return Record::Incomplete {
            reason: "status event references no root item".into(),
        };
    };
    Record::Status(StatusChange {
        root: root.to_ascii_lowercase(),
        state,
        family_filter: tags.value("k").and_then(RootFamily::from_kind_tag),
        repo: repo_address(tags, legacy.as_ref()),
    })
}

/// Tag-encoded comment: `E` names the thread root, `e` the parent.
fn comment(tags: &Tags<'_>, content: &str) -> Record {
    let root = tags
        .value("E")
        .or_else(|| tags.marked("e", "root"))
        .filter(|id| is_event_id(id));
    let Some(root) = root else {
        // Some writers emit only NIP-10 style tags on the new kind.
        return legacy_comment(tags, content);
    };
    let parent = tags
        .marked("e", "reply")
        .or_else(|| tags.value("e"))
        .filter(|id| is_event_id(id));
    comment_record(root, parent, content)
}

/// Legacy comment: marked `e` tags, or positional (first = root,
/// last = reply).
fn legacy_comment(tags: &Tags<'_>, content: &str) -> Record {
    let refs: Vec<&[String]> = tags.named("e").filter(|v| is_event_id(&v[0])).collect();
    if refs.is_empty() {
        return Record::Incomplete {
            reason: "comment references no thread root".into(),
        };
    }

    let has_markers = refs
        .iter()
        .any(|v| v.get(2).is_some_and(|m| m == "root" || m == "reply"));
    let (root, parent) = if has_markers {
        let root = tags.marked("e", "root").filter(|id| is_event_id(id));
        let reply = tags.marked("e", "reply").filter(|id| is_event_id(id));
        match (root, reply) {
            (Some(root), reply) => (root, reply),
            (None, Some(reply)) => (reply, None),
            (None, None) => (refs[0][0].as_str(), None),
        }
    } else {
        let first = refs[0][0].as_str();
        let last = refs[refs.len() - 1][0].as_str();
        (first, (refs.len() > 1).then_some(last))
    };
    comment_record(root, parent, content)
}

fn comment_record(root: &str, parent: Option<&str>, content: &str) -> Record {
    let root = root.to_ascii_lowercase();
    let parent = parent
        .map(str::to_ascii_lowercase)
        .filter(|parent| *parent != root);
    Record::Comment(CommentRef {
        root,
        parent,
        body: content.to_string(),
    })
}

fn bounty(tags: &Tags<'_>, content: &str) -> Record {
    let legacy = LegacyContent::decode(content).unwrap_or_default();
    let issue = tags
        .marked("e", "root")
        .or_else(|| tags.value("e"))
        .or(legacy.issue.as_deref())
        .filter(|id| is_event_id(id));
    let Some(issue) = issue else {
        return Record::Incomplete {
            reason: "bounty references no issue".into(),
        };
    };
    let amount_sats = tags
        .value("amount")
        .and_then(|raw| raw.trim().parse().ok())
        .or(legacy.amount);
    let state = tags
        .value("status")
        .and_then(|raw| raw.parse::<BountyState>().ok())
        .or_else(|| legacy.status.as_deref().and_then(|raw| raw.parse().ok()))
        .unwrap_or(BountyState::Pending);
    Record::Bounty(BountyOffer {
        issue: issue.to_ascii_lowercase(),
        amount_sats,
        state,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
