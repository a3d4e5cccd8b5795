//! `SQLite` query helpers for the projection database.
//!
//! All functions take a shared `&Connection` and return `anyhow::Result<T>`
//! with typed structs (never raw rows). Lifecycle status is never read from a
//! column: it is derived from the stored status events on every read, so it
//! cannot drift from the candidate set.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::activity::{ActivityRecord, ActivityType, Ledger, LocalItem};
use crate::bounty::{Bounty, WithdrawLink};
use crate::event::{Event, EventKind};
use crate::model::{BountyState, LifecycleState, RootFamily};
use crate::status::{Authority, LifecycleStatus, StatusCandidate, StatusPolicy, derive_status};
use crate::tags::{Record, RepoAddress, RepoAnnouncement, RepoState, ReplaceableKey, RootItem};
use crate::thread::{self, Comment, Thread};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One root item with its derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub family: RootFamily,
    pub author: String,
    pub created_at: u64,
    pub subject: Option<String>,
    /// Repository address, or empty when unknown.
    pub repo: String,
    pub labels: Vec<String>,
    pub status: LifecycleStatus,
    pub comment_count: usize,
}

/// Everything `show` needs for a single root item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub summary: ItemSummary,
    pub body: String,
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub thread: Thread,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounty: Option<Bounty>,
    pub status_history: Vec<StatusCandidate>,
}

/// The current event for a replaceable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReplaceable {
    pub event_id: String,
    pub created_at: u64,
    pub record: Record,
}

/// A raw event with the repository scope it was ingested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event: Event,
    pub repo_scope: String,
}

/// Filter for [`list_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub family: Option<RootFamily>,
    /// Applied after status derivation.
    pub state: Option<LifecycleState>,
    pub repo: Option<String>,
    pub label: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Root items
// ---------------------------------------------------------------------------

struct RootRow {
    id: String,
    family: RootFamily,
    author: String,
    created_at: u64,
    subject: Option<String>,
    repo: String,
    record_json: String,
}

fn row_to_root(row: &Row<'_>) -> rusqlite::Result<RootRow> {
    let family: String = row.get(1)?;
    Ok(RootRow {
        id: row.get(0)?,
        family: parse_column(&family, 1)?,
        author: row.get(2)?,
        created_at: row.get(3)?,
        subject: row.get(4)?,
        repo: row.get(5)?,
        record_json: row.get(6)?,
    })
}

fn parse_column<T>(raw: &str, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// List root items matching `filter`, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_items(
    conn: &Connection,
    filter: &ItemFilter,
    policy: StatusPolicy,
) -> Result<Vec<ItemSummary>> {
    let mut conditions: Vec<String> = Vec::new();
    let mut param_values: Vec<String> = Vec::new();

    if let Some(family) = filter.family {
        param_values.push(family.as_str().to_string());
        conditions.push(format!("r.family = ?{}", param_values.len()));
    }
    if let Some(ref repo) = filter.repo {
        param_values.push(repo.clone());
        conditions.push(format!("r.repo = ?{}", param_values.len()));
    }

    let mut joins = String::new();
    if let Some(ref label) = filter.label {
        param_values.push(label.clone());
        let _ = write!(
            joins,
            " INNER JOIN item_labels il ON il.item_id = r.item_id AND il.label = ?{}",
            param_values.len()
        );
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT r.item_id, r.family, r.author, r.created_at, r.subject, r.repo, r.record_json \
         FROM root_items r{joins}{where_clause} ORDER BY r.created_at DESC, r.item_id ASC"
    );

    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("prepare list_items query: {sql}"))?;
    let rows = stmt
        .query_map(params_from_iter(param_values.iter()), row_to_root)
        .context("execute list_items query")?;

    let mut items = Vec::new();
    for row in rows {
        let root = row.context("read list_items row")?;
        let summary = summarize(conn, root, policy)?;
        if filter.state.is_some_and(|state| summary.status.state != state) {
            continue;
        }
        items.push(summary);
        if filter.limit.is_some_and(|limit| items.len() >= limit) {
            break;
        }
    }
    Ok(items)
}

fn summarize(conn: &Connection, root: RootRow, policy: StatusPolicy) -> Result<ItemSummary> {
    let candidates = status_candidates(conn, &root.id)?;
    let status = status_under_policy(conn, &root, &candidates, policy)?;
    let labels = get_labels(conn, &root.id)?;
    let comment_count: usize = conn
        .query_row(
            "SELECT COUNT(*) FROM comments WHERE root_id = ?1",
            params![root.id],
            |row| row.get(0),
        )
        .context("count comments")?;

    Ok(ItemSummary {
        id: root.id,
        family: root.family,
        author: root.author,
        created_at: root.created_at,
        subject: root.subject,
        repo: root.repo,
        labels,
        status,
        comment_count,
    })
}

fn status_under_policy(
    conn: &Connection,
    root: &RootRow,
    candidates: &[StatusCandidate],
    policy: StatusPolicy,
) -> Result<LifecycleStatus> {
    match policy {
        StatusPolicy::Anyone => Ok(derive_status(candidates, root.family, root.created_at)),
        StatusPolicy::AuthorOrMaintainers => {
            let maintainers = repo_maintainers(conn, &root.repo)?;
            let authority = Authority {
                root_author: &root.author,
                maintainers: &maintainers,
            };
            let permitted: Vec<StatusCandidate> = candidates
                .iter()
                .filter(|c| authority.permits(&c.author))
                .cloned()
                .collect();
            Ok(derive_status(&permitted, root.family, root.created_at))
        }
    }
}

/// Owner plus listed maintainers of a repository address. An unparseable or
/// empty address has no maintainers.
fn repo_maintainers(conn: &Connection, repo: &str) -> Result<Vec<String>> {
    let Ok(address) = repo.parse::<RepoAddress>() else {
        return Ok(Vec::new());
    };
    let mut maintainers = vec![address.pubkey.clone()];
    if let Some(announcement) = repo_announcement(conn, &address)? {
        maintainers.extend(announcement.maintainers);
    }
    maintainers.sort();
    maintainers.dedup();
    Ok(maintainers)
}

/// Resolve a full item id from a unique prefix (at least 4 characters).
///
/// # Errors
///
/// Returns an error if the prefix is ambiguous or the query fails.
pub fn resolve_item_id(conn: &Connection, prefix: &str) -> Result<Option<String>> {
    let prefix = prefix.trim().to_ascii_lowercase();
    if prefix.len() < 4 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(None);
    }
    let mut stmt = conn
        .prepare("SELECT item_id FROM root_items WHERE item_id LIKE ?1 || '%' LIMIT 2")
        .context("prepare resolve_item_id")?;
    let matches: Vec<String> = stmt
        .query_map(params![prefix], |row| row.get(0))
        .context("execute resolve_item_id")?
        .collect::<rusqlite::Result<_>>()
        .context("read resolve_item_id rows")?;
    match matches.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(one.clone())),
        _ => anyhow::bail!("item id prefix '{prefix}' is ambiguous"),
    }
}

/// Fetch one root item with its thread, bounty and status history.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_item(
    conn: &Connection,
    item_id: &str,
    policy: StatusPolicy,
) -> Result<Option<ItemDetail>> {
    let root = conn
        .query_row(
            "SELECT item_id, family, author, created_at, subject, repo, record_json \
             FROM root_items WHERE item_id = ?1",
            params![item_id],
            row_to_root,
        )
        .optional()
        .with_context(|| format!("get_item for '{item_id}'"))?;
    let Some(root) = root else {
        return Ok(None);
    };

    let record: Record =
        serde_json::from_str(&root.record_json).context("decode stored root record")?;
    let item = match record {
        Record::Root(item) => item,
        other => anyhow::bail!("item {item_id} stores a {} record", other.type_name()),
    };
    let RootItem {
        body,
        assignees,
        tip_commit,
        branch,
        ..
    } = item;

    let mut status_history = status_candidates(conn, &root.id)?;
    status_history.sort_by(|a, b| a.precedence().cmp(&b.precedence()));
    let thread = thread::assemble(&root.id, get_comments(conn, &root.id)?);
    let bounty = get_bounty(conn, &root.id)?;
    let summary = summarize(conn, root, policy)?;

    Ok(Some(ItemDetail {
        summary,
        body,
        assignees,
        tip_commit,
        branch,
        thread,
        bounty,
        status_history,
    }))
}

/// Labels of an item, sorted.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_labels(conn: &Connection, item_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT label FROM item_labels WHERE item_id = ?1 ORDER BY label")
        .context("prepare get_labels")?;
    let labels = stmt
        .query_map(params![item_id], |row| row.get(0))
        .context("execute get_labels")?
        .collect::<rusqlite::Result<_>>()
        .context("read labels")?;
    Ok(labels)
}

// ---------------------------------------------------------------------------
// Status and comments
// ---------------------------------------------------------------------------

/// Every stored status event that references `root_id`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn status_candidates(conn: &Connection, root_id: &str) -> Result<Vec<StatusCandidate>> {
    let mut stmt = conn
        .prepare(
            "SELECT event_id, author, created_at, state, family_filter \
             FROM status_events WHERE root_id = ?1",
        )
        .context("prepare status_candidates")?;
    let rows = stmt
        .query_map(params![root_id], |row| {
            let state: String = row.get(3)?;
            let filter: Option<String> = row.get(4)?;
            Ok(StatusCandidate {
                event_id: row.get(0)?,
                author: row.get(1)?,
                created_at: row.get(2)?,
                state: parse_column(&state, 3)?,
                family_filter: filter.as_deref().map(|f| parse_column(f, 4)).transpose()?,
            })
        })
        .context("execute status_candidates")?;
    rows.collect::<rusqlite::Result<_>>()
        .context("read status candidates")
}

/// Comments stored for a root, in arrival-independent order.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_comments(conn: &Connection, root_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn
        .prepare(
            "SELECT event_id, author, created_at, parent_id, body FROM comments \
             WHERE root_id = ?1 ORDER BY created_at ASC, event_id ASC",
        )
        .context("prepare get_comments")?;
    let rows = stmt
        .query_map(params![root_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                author: row.get(1)?,
                created_at: row.get(2)?,
                parent: row.get(3)?,
                body: row.get(4)?,
            })
        })
        .context("execute get_comments")?;
    rows.collect::<rusqlite::Result<_>>().context("read comments")
}

// ---------------------------------------------------------------------------
// Replaceables
// ---------------------------------------------------------------------------

/// The current event for a replaceable key.
///
/// # Errors
///
/// Returns an error if the query fails or the stored record cannot be decoded.
pub fn get_replaceable(conn: &Connection, key: &ReplaceableKey) -> Result<Option<StoredReplaceable>> {
    let row: Option<(String, u64, String)> = conn
        .query_row(
            "SELECT event_id, created_at, record_json FROM replaceables \
             WHERE pubkey = ?1 AND kind = ?2 AND identifier = ?3",
            params![key.pubkey, key.kind.as_u32(), key.identifier],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .with_context(|| format!("get_replaceable for {key}"))?;

    row.map(|(event_id, created_at, record_json)| {
        let record = serde_json::from_str(&record_json)
            .with_context(|| format!("decode replaceable record for {key}"))?;
        Ok(StoredReplaceable {
            event_id,
            created_at,
            record,
        })
    })
    .transpose()
}

/// Current announcement of a repository.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn repo_announcement(conn: &Connection, address: &RepoAddress) -> Result<Option<RepoAnnouncement>> {
    Ok(
        get_replaceable(conn, &address.announcement_key())?.and_then(|stored| match stored.record {
            Record::RepoAnnouncement(announcement) => Some(announcement),
            _ => None,
        }),
    )
}

/// Current ref state of a repository.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn repo_state(conn: &Connection, address: &RepoAddress) -> Result<Option<RepoState>> {
    let key = ReplaceableKey::new(
        address.pubkey.clone(),
        EventKind::RepoState,
        address.identifier.clone(),
    );
    Ok(get_replaceable(conn, &key)?.and_then(|stored| match stored.record {
        Record::RepoState(state) => Some(state),
        _ => None,
    }))
}

// ---------------------------------------------------------------------------
// Bounties
// ---------------------------------------------------------------------------

fn row_to_bounty(row: &Row<'_>) -> rusqlite::Result<Bounty> {
    let state: String = row.get(2)?;
    let link: Option<String> = row.get(5)?;
    let withdraw_link = link
        .as_deref()
        .map(serde_json::from_str::<WithdrawLink>)
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Bounty {
        issue_id: row.get(0)?,
        amount_sats: row.get(1)?,
        state: parse_column::<BountyState>(&state, 2)?,
        updated_at: row.get(3)?,
        event_id: row.get(4)?,
        withdraw_link,
    })
}

/// Stored bounty for an issue.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_bounty(conn: &Connection, issue_id: &str) -> Result<Option<Bounty>> {
    conn.query_row(
        "SELECT issue_id, amount_sats, state, updated_at, event_id, withdraw_link_json \
         FROM bounties WHERE issue_id = ?1",
        params![issue_id],
        row_to_bounty,
    )
    .optional()
    .with_context(|| format!("get_bounty for '{issue_id}'"))
}

/// All stored bounties, ordered by issue id.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_bounties(conn: &Connection) -> Result<Vec<Bounty>> {
    let mut stmt = conn
        .prepare(
            "SELECT issue_id, amount_sats, state, updated_at, event_id, withdraw_link_json \
             FROM bounties ORDER BY issue_id",
        )
        .context("prepare list_bounties")?;
    let rows = stmt
        .query_map([], row_to_bounty)
        .context("execute list_bounties")?;
    rows.collect::<rusqlite::Result<_>>().context("read bounties")
}

/// Upsert the current state of a bounty.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save_bounty(conn: &Connection, bounty: &Bounty) -> Result<()> {
    let link_json = bounty
        .withdraw_link
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("serialize withdraw link")?;
    conn.execute(
        "INSERT INTO bounties (issue_id, amount_sats, state, updated_at, event_id, withdraw_link_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (issue_id) DO UPDATE SET
            amount_sats = excluded.amount_sats,
            state = excluded.state,
            updated_at = excluded.updated_at,
            event_id = excluded.event_id,
            withdraw_link_json = excluded.withdraw_link_json",
        params![
            bounty.issue_id,
            bounty.amount_sats,
            bounty.state.as_str(),
            bounty.updated_at,
            bounty.event_id,
            link_json,
        ],
    )
    .with_context(|| format!("save bounty for '{}'", bounty.issue_id))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Persist activity records; existing dedup keys are left untouched.
///
/// Returns how many records were new.
///
/// # Errors
///
/// Returns an error if a write fails.
pub fn record_activities(conn: &Connection, records: &[ActivityRecord]) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO activities (dedup_key, activity_type, repo, user, ts) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .context("prepare record_activities")?;
    let mut inserted = 0;
    for record in records {
        inserted += stmt
            .execute(params![
                record.dedup_key(),
                record.kind.as_str(),
                record.repo,
                record.user,
                record.timestamp,
            ])
            .with_context(|| format!("record activity {}", record.dedup_key()))?;
    }
    Ok(inserted)
}

/// Load the persisted ledger, optionally restricted to one repository.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn load_ledger(conn: &Connection, repo: Option<&str>) -> Result<Ledger> {
    let mut stmt = conn
        .prepare(
            "SELECT activity_type, user, repo, ts FROM activities \
             WHERE ?1 IS NULL OR repo = ?1",
        )
        .context("prepare load_ledger")?;
    let rows = stmt
        .query_map(params![repo], |row| {
            let kind: String = row.get(0)?;
            Ok(ActivityRecord::new(
                parse_column::<ActivityType>(&kind, 0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get(3)?,
            ))
        })
        .context("execute load_ledger")?;

    let mut ledger = Ledger::new();
    for row in rows {
        ledger.insert(row.context("read activity row")?);
    }
    Ok(ledger)
}

/// A commit the bridge reported on a pushed branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LandedCommit {
    pub sha: String,
    pub author: String,
    /// Repository the commit is attributed to.
    pub repo: String,
    /// Seconds or milliseconds since the epoch, as the bridge reports it.
    pub committed_at: u64,
}

/// Remember landed commits; a commit already known for its repository is
/// left untouched.
///
/// Returns how many commits were new.
///
/// # Errors
///
/// Returns an error if a write fails.
pub fn record_commits(conn: &Connection, commits: &[LandedCommit]) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO landed_commits (repo, sha, author, committed_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("prepare record_commits")?;
    let mut inserted = 0;
    for commit in commits {
        inserted += stmt
            .execute(params![commit.repo, commit.sha, commit.author, commit.committed_at])
            .with_context(|| format!("record commit {}", commit.sha))?;
    }
    Ok(inserted)
}

/// Cached domain objects for local activity replay: root items, comments and
/// landed commits.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn local_items(conn: &Connection, repo: Option<&str>) -> Result<Vec<LocalItem>> {
    let mut items = Vec::new();

    let mut roots = conn
        .prepare(
            "SELECT family, author, repo, created_at FROM root_items \
             WHERE ?1 IS NULL OR repo = ?1",
        )
        .context("prepare local root items")?;
    let rows = roots
        .query_map(params![repo], |row| {
            let family: String = row.get(0)?;
            Ok(LocalItem {
                kind: ActivityType::for_family(parse_column(&family, 0)?),
                user: row.get(1)?,
                repo: row.get(2)?,
                at: row.get(3)?,
            })
        })
        .context("execute local root items")?;
    for row in rows {
        items.push(row.context("read local root item")?);
    }

    let mut comments = conn
        .prepare(
            "SELECT author, repo, created_at FROM comments \
             WHERE ?1 IS NULL OR repo = ?1",
        )
        .context("prepare local comments")?;
    let rows = comments
        .query_map(params![repo], |row| {
            Ok(LocalItem {
                kind: ActivityType::Comment,
                user: row.get(0)?,
                repo: row.get(1)?,
                at: row.get(2)?,
            })
        })
        .context("execute local comments")?;
    for row in rows {
        items.push(row.context("read local comment")?);
    }

    let mut commits = conn
        .prepare(
            "SELECT author, repo, committed_at FROM landed_commits \
             WHERE ?1 IS NULL OR repo = ?1",
        )
        .context("prepare local commits")?;
    let rows = commits
        .query_map(params![repo], |row| {
            Ok(LocalItem {
                kind: ActivityType::Commit,
                user: row.get(0)?,
                repo: row.get(1)?,
                at: row.get(2)?,
            })
        })
        .context("execute local commits")?;
    for row in rows {
        items.push(row.context("read local commit")?);
    }

    Ok(items)
}

// ---------------------------------------------------------------------------
// Raw events and bookkeeping
// ---------------------------------------------------------------------------

/// Every stored raw event in `(created_at, event_id)` order.
///
/// # Errors
///
/// Returns an error if the query fails or a stored event cannot be decoded.
pub fn raw_events(conn: &Connection) -> Result<Vec<StoredEvent>> {
    let mut stmt = conn
        .prepare("SELECT raw_json, repo_scope FROM events ORDER BY created_at ASC, event_id ASC")
        .context("prepare raw_events")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("execute raw_events")?;

    let mut events = Vec::new();
    for row in rows {
        let (raw_json, repo_scope) = row.context("read raw event row")?;
        let event = serde_json::from_str(&raw_json).context("decode stored raw event")?;
        events.push(StoredEvent { event, repo_scope });
    }
    Ok(events)
}

/// Number of stored raw events.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn event_count(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
        .context("count events")
}

/// Unix seconds of the last completed sync, 0 if never.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn last_sync_at(conn: &Connection) -> Result<u64> {
    conn.query_row(
        "SELECT last_sync_at FROM projection_meta WHERE id = 1",
        [],
        |row| row.get(0),
    )
    .context("read last_sync_at")
}

/// Record a completed sync.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn set_last_sync_at(conn: &Connection, at: u64) -> Result<()> {
    conn.execute(
        "UPDATE projection_meta SET last_sync_at = MAX(last_sync_at, ?1) WHERE id = 1",
        params![at],
    )
    .context("update last_sync_at")?;
    Ok(())
}

/// Unix seconds of the last rebuild, 0 if never.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn last_rebuild_at(conn: &Connection) -> Result<u64> {
    conn.query_row(
        "SELECT last_rebuild_at FROM projection_meta WHERE id = 1",
        [],
        |row| row.get(0),
    )
    .context("read last_rebuild_at")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::db::project::Projector;
    use crate::event::{EventBuilder, Keys};

    fn author() -> Keys {
        Keys::from_secret_bytes([31u8; 32])
    }

    fn stranger() -> Keys {
        Keys::from_secret_bytes([32u8; 32])
    }

    fn repo(keys: &Keys) -> String {
        format!("30617:{}:braid", keys.public_key_hex())
    }

    fn issue(keys: &Keys, subject: &str, labels: &[&str], at: u64) -> Event {
        labels
            .iter()
            .fold(
                EventBuilder::new(EventKind::Issue, "details")
                    .tag(["subject", subject])
                    .tag(["a", repo(&author()).as_str()]),
                |b, l| b.tag(["t", *l]),
            )
            .created_at(at)
            .sign(keys)
    }

    fn status(keys: &Keys, kind: EventKind, root: &str, at: u64) -> Event {
        EventBuilder::new(kind, "")
            .tag(["e", root, "", "root"])
            .created_at(at)
            .sign(keys)
    }

    #[test]
    fn list_derives_status_from_candidates() {
        let conn = open_in_memory().expect("db");
        let root = issue(&author(), "Crash", &["bug"], 50);
        let events = vec![
            status(&author(), EventKind::StatusOpen, &root.id, 100),
            status(&author(), EventKind::StatusClosed, &root.id, 200),
            status(&author(), EventKind::StatusApplied, &root.id, 150),
            root.clone(),
        ];
        Projector::new(&conn).project_batch(&events).expect("project");

        let items = list_items(&conn, &ItemFilter::default(), StatusPolicy::Anyone).expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status.state, LifecycleState::Closed);
        assert_eq!(items[0].status.since, 200);
        assert_eq!(items[0].labels, vec!["bug"]);
        assert_eq!(items[0].repo, repo(&author()));
    }

    #[test]
    fn filters_apply_to_family_label_and_state() {
        let conn = open_in_memory().expect("db");
        let a = issue(&author(), "A", &["bug"], 10);
        let b = issue(&author(), "B", &["docs"], 20);
        let closed = status(&author(), EventKind::StatusClosed, &b.id, 30);
        Projector::new(&conn)
            .project_batch(&[a.clone(), b, closed])
            .expect("project");

        let by_label = ItemFilter {
            label: Some("bug".into()),
            ..ItemFilter::default()
        };
        let items = list_items(&conn, &by_label, StatusPolicy::Anyone).expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, a.id);

        let open_only = ItemFilter {
            state: Some(LifecycleState::Open),
            ..ItemFilter::default()
        };
        let items = list_items(&conn, &open_only, StatusPolicy::Anyone).expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].subject.as_deref(), Some("A"));

        let patches = ItemFilter {
            family: Some(RootFamily::Patch),
            ..ItemFilter::default()
        };
        assert!(list_items(&conn, &patches, StatusPolicy::Anyone).expect("list").is_empty());
    }

    #[test]
    fn policy_ignores_status_from_strangers() {
        let conn = open_in_memory().expect("db");
        let root = issue(&author(), "Guarded", &[], 10);
        let events = vec![
            root.clone(),
            status(&stranger(), EventKind::StatusClosed, &root.id, 20),
        ];
        Projector::new(&conn).project_batch(&events).expect("project");

        let anyone = get_item(&conn, &root.id, StatusPolicy::Anyone)
            .expect("get")
            .expect("item");
        assert_eq!(anyone.summary.status.state, LifecycleState::Closed);

        let guarded = get_item(&conn, &root.id, StatusPolicy::AuthorOrMaintainers)
            .expect("get")
            .expect("item");
        assert_eq!(guarded.summary.status.state, LifecycleState::Open);
        assert!(guarded.summary.status.is_implicit());
        assert_eq!(guarded.status_history.len(), 1);
    }

    #[test]
    fn repo_owner_may_change_status() {
        let conn = open_in_memory().expect("db");
        let root = issue(&stranger(), "Reported", &[], 10);
        let announcement = EventBuilder::new(EventKind::RepoAnnouncement, "")
            .tag(["d", "braid"])
            .tag(["maintainers", stranger().public_key_hex().as_str()])
            .created_at(5)
            .sign(&author());
        let closed_by_owner = status(&author(), EventKind::StatusClosed, &root.id, 20);
        Projector::new(&conn)
            .project_batch(&[announcement, root.clone(), closed_by_owner])
            .expect("project");

        let detail = get_item(&conn, &root.id, StatusPolicy::AuthorOrMaintainers)
            .expect("get")
            .expect("item");
        assert_eq!(detail.summary.status.state, LifecycleState::Closed);
    }

    #[test]
    fn detail_carries_thread_and_body() {
        let conn = open_in_memory().expect("db");
        let root = issue(&author(), "Threaded", &[], 10);
        let top = EventBuilder::new(EventKind::Comment, "first")
            .tag(["E", root.id.as_str()])
            .created_at(20)
            .sign(&stranger());
        let reply = EventBuilder::new(EventKind::Comment, "second")
            .tag(["E", root.id.as_str()])
            .tag(["e", top.id.as_str()])
            .created_at(30)
            .sign(&author());
        Projector::new(&conn)
            .project_batch(&[reply, root.clone(), top])
            .expect("project");

        let detail = get_item(&conn, &root.id, StatusPolicy::Anyone)
            .expect("get")
            .expect("item");
        assert_eq!(detail.body, "details");
        assert_eq!(detail.summary.comment_count, 2);
        let flat = detail.thread.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].1.body, "first");
        assert_eq!(flat[1].0, 1);
    }

    #[test]
    fn prefix_resolution() {
        let conn = open_in_memory().expect("db");
        let root = issue(&author(), "Prefixed", &[], 10);
        Projector::new(&conn).project_batch(&[root.clone()]).expect("project");

        assert_eq!(
            resolve_item_id(&conn, &root.id[..8]).expect("resolve"),
            Some(root.id.clone())
        );
        assert_eq!(resolve_item_id(&conn, "zz").expect("resolve"), None);
    }

    #[test]
    fn bounty_upsert_roundtrip() {
        let conn = open_in_memory().expect("db");
        let mut bounty = Bounty {
            issue_id: "i".repeat(64),
            amount_sats: Some(500),
            state: BountyState::Pending,
            updated_at: 10,
            event_id: None,
            withdraw_link: None,
        };
        save_bounty(&conn, &bounty).expect("save");
        bounty.state = BountyState::Released;
        bounty.withdraw_link = Some(WithdrawLink {
            id: "w".into(),
            url: "lnurl".into(),
            amount_sats: 500,
        });
        save_bounty(&conn, &bounty).expect("save again");

        assert_eq!(get_bounty(&conn, &bounty.issue_id).expect("get"), Some(bounty));
        assert_eq!(list_bounties(&conn).expect("list").len(), 1);
    }

    #[test]
    fn activities_are_recorded_once() {
        let conn = open_in_memory().expect("db");
        let record = ActivityRecord::new(ActivityType::Commit, "alice", "repo", 1_700_000_000_123);
        assert_eq!(record_activities(&conn, &[record.clone()]).expect("first"), 1);
        let same_second = ActivityRecord::new(ActivityType::Commit, "alice", "repo", 1_700_000_000);
        assert_eq!(record_activities(&conn, &[same_second]).expect("second"), 0);

        let ledger = load_ledger(&conn, Some("repo")).expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert!(load_ledger(&conn, Some("other")).expect("ledger").is_empty());
    }

    #[test]
    fn local_items_mirror_projected_activity() {
        let conn = open_in_memory().expect("db");
        let root = issue(&author(), "Replay", &[], 10);
        let comment = EventBuilder::new(EventKind::Comment, "hi")
            .tag(["E", root.id.as_str()])
            .created_at(20)
            .sign(&stranger());
        Projector::new(&conn)
            .with_scope(repo(&author()))
            .project_batch(&[root, comment])
            .expect("project");

        let mut ledger = load_ledger(&conn, None).expect("ledger");
        let replayed = crate::activity::replay_local(&local_items(&conn, None).expect("items"));
        assert_eq!(ledger.extend(replayed), 0, "local replay adds nothing new");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn landed_commit_seen_twice_counts_once() {
        let conn = open_in_memory().expect("db");
        let commit = LandedCommit {
            sha: "c".repeat(40),
            author: "alice".into(),
            repo: "repo".into(),
            committed_at: 1_700_000_000_250,
        };
        assert_eq!(record_commits(&conn, &[commit.clone()]).expect("first"), 1);
        assert_eq!(record_commits(&conn, &[commit.clone()]).expect("again"), 0);

        let items = local_items(&conn, Some("repo")).expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ActivityType::Commit);

        // The same commit also arriving as a seconds-resolution record.
        let mut ledger = Ledger::new();
        ledger.insert(ActivityRecord::new(ActivityType::Commit, "alice", "repo", 1_700_000_000));
        assert_eq!(ledger.extend(crate::activity::replay_local(&items)), 0);
        assert_eq!(ledger.totals().by_type.get(&ActivityType::Commit).copied(), Some(1));

        assert!(local_items(&conn, Some("other")).expect("items").is_empty());
    }

    #[test]
    fn sync_marker_only_moves_forward() {
        let conn = open_in_memory().expect("db");
        assert_eq!(last_sync_at(&conn).expect("read"), 0);
        set_last_sync_at(&conn, 200).expect("set");
        set_last_sync_at(&conn, 100).expect("set");
        assert_eq!(last_sync_at(&conn).expect("read"), 200);
    }
}
