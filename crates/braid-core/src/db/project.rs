//! Event ingestion → SQLite projection pipeline.
//!
//! The [`Projector`] validates incoming events, stores each accepted event
//! once in the raw `events` table, and folds its typed record into the
//! derived tables. Every write is keyed so that replaying any subset of
//! events, in any order, any number of times, leaves the same rows behind:
//!
//! - raw events, root items, labels, status events and comments use
//!   `INSERT OR IGNORE` on their event id;
//! - replaceable entities are replaced only by an event with greater
//!   [`Precedence`];
//! - bounties go through [`BountyBook::apply_event`];
//! - activity records use `INSERT OR IGNORE` on their dedup key.
//!
//! # Repository scope
//!
//! A projector may be scoped to the repository a sync was run for. The scope
//! is stored with each raw event so a rebuild attributes activity to the
//! same repository as the original ingest did.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::query;
use crate::activity;
use crate::bounty::BountyBook;
use crate::event::{Event, Rejection, validate_event};
use crate::resolve::Precedence;
use crate::tags::{self, ParsedEvent, Record};

// ---------------------------------------------------------------------------
// ProjectionStats
// ---------------------------------------------------------------------------

/// Statistics returned after a projection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    /// Events stored and folded into the projection.
    pub projected: usize,
    /// Events already present, skipped.
    pub duplicates: usize,
    /// Events that failed validation.
    pub rejected: usize,
    /// Events that caused database errors (logged and skipped).
    pub errors: usize,
}

impl ProjectionStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.projected + self.duplicates + self.rejected + self.errors
    }
}

/// Outcome of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectResult {
    Projected,
    Duplicate,
    Rejected(Rejection),
}

// ---------------------------------------------------------------------------
// Projector
// ---------------------------------------------------------------------------

/// Folds events into the SQLite projection.
pub struct Projector<'conn> {
    conn: &'conn Connection,
    repo_scope: String,
}

impl<'conn> Projector<'conn> {
    /// Create an unscoped projector backed by the given connection.
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            repo_scope: String::new(),
        }
    }

    /// Attribute events without their own repository reference to `repo`.
    #[must_use]
    pub fn with_scope(mut self, repo: impl Into<String>) -> Self {
        self.repo_scope = repo.into();
        self
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.repo_scope
    }

    /// Project a batch of events that did not come from a relay (files,
    /// fixtures, locally signed events).
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot begin or commit.
    pub fn project_batch(&self, events: &[Event]) -> Result<ProjectionStats> {
        self.run_batch(events.iter().map(|event| (None, event)))
    }

    /// Project a batch of `(relay_url, event)` pairs as delivered by a
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot begin or commit.
    pub fn project_received(&self, events: &[(String, Event)]) -> Result<ProjectionStats> {
        self.run_batch(
            events
                .iter()
                .map(|(relay, event)| (Some(relay.as_str()), event)),
        )
    }

    fn run_batch<'a>(
        &self,
        events: impl Iterator<Item = (Option<&'a str>, &'a Event)>,
    ) -> Result<ProjectionStats> {
        let mut stats = ProjectionStats::default();

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .context("begin projection transaction")?;

        for (relay, event) in events {
            match self.ingest_event(event, relay) {
                Ok(ProjectResult::Projected) => stats.projected += 1,
                Ok(ProjectResult::Duplicate) => stats.duplicates += 1,
                Ok(ProjectResult::Rejected(_)) => stats.rejected += 1,
                Err(e) => {
                    warn!(
                        event_id = %event.short_id(),
                        kind = %event.kind,
                        error = %e,
                        "skipping event due to projection error"
                    );
                    stats.errors += 1;
                }
            }
        }

        self.conn
            .execute_batch("COMMIT")
            .context("commit projection transaction")?;

        debug!(
            projected = stats.projected,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            errors = stats.errors,
            "projection batch committed"
        );
        Ok(stats)
    }

    /// Validate, store and project a single event (outside of any managed
    /// transaction).
    ///
    /// # Errors
    ///
    /// Returns an error if a database write fails. Validation failures are
    /// reported as [`ProjectResult::Rejected`], not as errors.
    pub fn ingest_event(&self, event: &Event, relay: Option<&str>) -> Result<ProjectResult> {
        if let Err(rejection) = validate_event(event) {
            if rejection.is_forgery() {
                warn!(event_id = %event.short_id(), relay, %rejection, "dropping forged event");
            } else {
                debug!(event_id = %event.short_id(), relay, %rejection, "dropping malformed event");
            }
            return Ok(ProjectResult::Rejected(rejection));
        }

        self.conn
            .execute_batch("SAVEPOINT ingest_event")
            .context("open ingest savepoint")?;
        match self.store_and_project(event, relay) {
            Ok(result) => {
                self.conn
                    .execute_batch("RELEASE ingest_event")
                    .context("release ingest savepoint")?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO ingest_event; RELEASE ingest_event")
                {
                    warn!(event_id = %event.short_id(), error = %rollback, "failed to roll back partial ingest");
                }
                Err(e)
            }
        }
    }

    /// The raw row and the derived rows of one event land together or not
    /// at all; the caller holds the savepoint.
    fn store_and_project(&self, event: &Event, relay: Option<&str>) -> Result<ProjectResult> {
        if !self.store_raw(event, relay)? {
            return Ok(ProjectResult::Duplicate);
        }

        let parsed = tags::parse(event.clone());
        self.project_parsed(&parsed)?;
        Ok(ProjectResult::Projected)
    }

    // -----------------------------------------------------------------------
    // Raw store
    // -----------------------------------------------------------------------

    fn store_raw(&self, event: &Event, relay: Option<&str>) -> Result<bool> {
        let raw_json = serde_json::to_string(event).context("serialize raw event")?;
        let received_at = chrono::Utc::now().timestamp();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO events (
                    event_id, pubkey, kind, created_at, raw_json, repo_scope,
                    first_relay, received_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id,
                    event.pubkey,
                    event.kind.as_u32(),
                    event.created_at,
                    raw_json,
                    self.repo_scope,
                    relay,
                    received_at,
                ],
            )
            .with_context(|| format!("store raw event {}", event.short_id()))?;
        Ok(inserted > 0)
    }

    // -----------------------------------------------------------------------
    // Record dispatch
    // -----------------------------------------------------------------------

    /// Fold an already-stored event into the derived tables.
    pub(crate) fn project_parsed(&self, parsed: &ParsedEvent) -> Result<()> {
        match &parsed.record {
            Record::RepoAnnouncement(_) | Record::RepoState(_) => self.project_replaceable(parsed)?,
            Record::Root(_) => self.project_root(parsed)?,
            Record::Status(_) => self.project_status(parsed)?,
            Record::Comment(_) => self.project_comment(parsed)?,
            Record::Bounty(_) => self.project_bounty(parsed)?,
            Record::Incomplete { reason } => {
                debug!(event_id = %parsed.event.short_id(), reason, "stored incomplete event without projecting");
            }
            Record::Unsupported => {
                debug!(event_id = %parsed.event.short_id(), kind = %parsed.kind(), "stored unsupported kind without projecting");
            }
        }

        let records = activity::count_events(std::slice::from_ref(parsed), &self.repo_scope);
        query::record_activities(self.conn, &records)?;
        Ok(())
    }

    fn project_replaceable(&self, parsed: &ParsedEvent) -> Result<()> {
        let Some(key) = parsed.replaceable_key() else {
            return Ok(());
        };

        let current: Option<(u64, String)> = self
            .conn
            .query_row(
                "SELECT created_at, event_id FROM replaceables
                 WHERE pubkey = ?1 AND kind = ?2 AND identifier = ?3",
                params![key.pubkey, key.kind.as_u32(), key.identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("load current replaceable")?;

        if let Some((created_at, event_id)) = &current {
            let incoming = Precedence::new(parsed.created_at(), parsed.id());
            if incoming <= Precedence::new(*created_at, event_id) {
                debug!(key = %key, event_id = %parsed.event.short_id(), "replaceable event superseded");
                return Ok(());
            }
        }

        let record_json = serde_json::to_string(&parsed.record).context("serialize record")?;
        self.conn
            .execute(
                "INSERT INTO replaceables (pubkey, kind, identifier, event_id, created_at, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (pubkey, kind, identifier) DO UPDATE SET
                    event_id = excluded.event_id,
                    created_at = excluded.created_at,
                    record_json = excluded.record_json",
                params![
                    key.pubkey,
                    key.kind.as_u32(),
                    key.identifier,
                    parsed.id(),
                    parsed.created_at(),
                    record_json,
                ],
            )
            .with_context(|| format!("upsert replaceable {key}"))?;
        Ok(())
    }

    fn project_root(&self, parsed: &ParsedEvent) -> Result<()> {
        let Record::Root(item) = &parsed.record else {
            anyhow::bail!("expected root record");
        };
        let repo = item
            .repo
            .as_ref()
            .map_or_else(|| self.repo_scope.clone(), ToString::to_string);
        let record_json = serde_json::to_string(&parsed.record).context("serialize record")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO root_items (
                    item_id, family, author, created_at, subject, repo, record_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    parsed.id(),
                    item.family.as_str(),
                    parsed.author(),
                    parsed.created_at(),
                    item.subject,
                    repo,
                    record_json,
                ],
            )
            .with_context(|| format!("insert root item {}", parsed.event.short_id()))?;

        for label in item.labels.iter().filter(|l| !l.trim().is_empty()) {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO item_labels (item_id, label) VALUES (?1, ?2)",
                    params![parsed.id(), label],
                )
                .with_context(|| format!("insert label '{label}'"))?;
        }
        Ok(())
    }

    fn project_status(&self, parsed: &ParsedEvent) -> Result<()> {
        let Record::Status(change) = &parsed.record else {
            anyhow::bail!("expected status record");
        };
        self.conn
            .execute(
                "INSERT OR IGNORE INTO status_events (
                    event_id, root_id, author, created_at, state, family_filter
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    parsed.id(),
                    change.root,
                    parsed.author(),
                    parsed.created_at(),
                    change.state.as_str(),
                    change.family_filter.map(|f| f.as_str()),
                ],
            )
            .with_context(|| format!("insert status event {}", parsed.event.short_id()))?;
        Ok(())
    }

    fn project_comment(&self, parsed: &ParsedEvent) -> Result<()> {
        let Record::Comment(comment) = &parsed.record else {
            anyhow::bail!("expected comment record");
        };
        self.conn
            .execute(
                "INSERT OR IGNORE INTO comments (
                    event_id, root_id, parent_id, author, created_at, repo, body
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    parsed.id(),
                    comment.root,
                    comment.parent,
                    parsed.author(),
                    parsed.created_at(),
                    self.repo_scope,
                    comment.body,
                ],
            )
            .with_context(|| format!("insert comment {}", parsed.event.short_id()))?;
        Ok(())
    }

    fn project_bounty(&self, parsed: &ParsedEvent) -> Result<()> {
        let Record::Bounty(offer) = &parsed.record else {
            anyhow::bail!("expected bounty record");
        };
        let mut book = BountyBook::new();
        if let Some(existing) = query::get_bounty(self.conn, &offer.issue)? {
            book.restore(existing);
        }
        if book.apply_event(parsed) {
            if let Some(bounty) = book.get(&offer.issue) {
                query::save_bounty(self.conn, bounty)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
