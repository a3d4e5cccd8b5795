//! Full projection rebuild from the stored raw events.
//!
//! `braid rebuild` clears every derived table and replays the raw `events`
//! table through the projector, proving the derived state is disposable and
//! reproducible. Raw events are kept, and so is the activity ledger, whose
//! `INSERT OR IGNORE` re-inserts are no-ops.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::db::{project::Projector, query, schema};
use crate::tags;

/// Report returned after a full projection rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Raw events replayed.
    pub event_count: usize,
    /// Root items in the rebuilt projection.
    pub item_count: usize,
    /// Events that could not be re-projected (logged and skipped).
    pub errors: usize,
    pub elapsed: Duration,
}

/// Clear the derived tables and re-project every stored raw event.
///
/// Runs in one transaction: a failure leaves the previous projection intact.
///
/// # Errors
///
/// Returns an error if the stored events cannot be read or the transaction
/// fails.
pub fn rebuild(conn: &Connection) -> Result<RebuildReport> {
    let start = Instant::now();

    conn.execute_batch("BEGIN IMMEDIATE")
        .context("begin rebuild transaction")?;

    match replay(conn) {
        Ok((event_count, errors)) => {
            let item_count: usize = conn
                .query_row("SELECT COUNT(*) FROM root_items", [], |row| row.get(0))
                .context("count items after rebuild")?;
            conn.execute(
                "UPDATE projection_meta SET last_rebuild_at = ?1 WHERE id = 1",
                params![chrono::Utc::now().timestamp()],
            )
            .context("record rebuild time")?;
            conn.execute_batch("COMMIT")
                .context("commit rebuild transaction")?;

            let elapsed = start.elapsed();
            tracing::info!(
                event_count,
                item_count,
                errors,
                elapsed_ms = elapsed.as_millis(),
                "projection rebuild complete"
            );
            Ok(RebuildReport {
                event_count,
                item_count,
                errors,
                elapsed,
            })
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn replay(conn: &Connection) -> Result<(usize, usize)> {
    for table in schema::DERIVED_TABLES {
        conn.execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("clear {table}"))?;
    }

    let stored = query::raw_events(conn).context("load raw events")?;
    let mut errors = 0;
    for entry in &stored {
        let parsed = tags::parse(entry.event.clone());
        let projector = Projector::new(conn).with_scope(entry.repo_scope.clone());
        if let Err(e) = projector.project_parsed(&parsed) {
            tracing::warn!(
                event_id = %entry.event.short_id(),
                error = %e,
                "skipping event during rebuild"
            );
            errors += 1;
        }
    }
    Ok((stored.len(), errors))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_projection;
    use crate::event::{Event, EventBuilder, EventKind, Keys};
    use crate::model::LifecycleState;
    use crate::status::StatusPolicy;

    fn keys() -> Keys {
        Keys::from_secret_bytes([41u8; 32])
    }

    fn sample_events() -> Vec<Event> {
        let keys = keys();
        let repo = format!("30617:{}:braid", keys.public_key_hex());
        let announcement = EventBuilder::new(EventKind::RepoAnnouncement, "")
            .tag(["d", "braid"])
            .tag(["name", "Braid"])
            .created_at(1)
            .sign(&keys);
        let issue = EventBuilder::new(EventKind::Issue, "it broke")
            .tag(["subject", "Broken"])
            .tag(["a", repo.as_str()])
            .tag(["t", "bug"])
            .created_at(10)
            .sign(&keys);
        let closed = EventBuilder::new(EventKind::StatusClosed, "")
            .tag(["e", issue.id.as_str(), "", "root"])
            .created_at(20)
            .sign(&keys);
        let comment = EventBuilder::new(EventKind::Comment, "fixed on main")
            .tag(["E", issue.id.as_str()])
            .created_at(15)
            .sign(&keys);
        let bounty = EventBuilder::new(EventKind::Bounty, "")
            .tag(["e", issue.id.as_str()])
            .tag(["amount", "1000"])
            .created_at(12)
            .sign(&keys);
        vec![announcement, issue, closed, comment, bounty]
    }

    fn snapshot(conn: &Connection) -> Vec<(String, i64)> {
        ["replaceables", "root_items", "item_labels", "status_events", "comments", "bounties", "activities"]
            .iter()
            .map(|table| {
                let count: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                    .expect("count");
                ((*table).to_string(), count)
            })
            .collect()
    }

    #[test]
    fn rebuild_reproduces_projection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_projection(&dir.path().join("braid.db")).expect("open");
        Projector::new(&conn)
            .with_scope("30617:scope:braid")
            .project_batch(&sample_events())
            .expect("project");
        let before = snapshot(&conn);

        let report = rebuild(&conn).expect("rebuild");
        assert_eq!(report.event_count, 5);
        assert_eq!(report.item_count, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(snapshot(&conn), before);
        assert!(query::last_rebuild_at(&conn).expect("meta") > 0);

        let items = query::list_items(&conn, &query::ItemFilter::default(), StatusPolicy::Anyone)
            .expect("list");
        assert_eq!(items[0].status.state, LifecycleState::Closed);
    }

    #[test]
    fn rebuild_restores_wiped_derived_tables() {
        let conn = crate::db::open_in_memory().expect("db");
        Projector::new(&conn)
            .project_batch(&sample_events())
            .expect("project");
        let before = snapshot(&conn);

        for table in schema::DERIVED_TABLES {
            conn.execute(&format!("DELETE FROM {table}"), []).expect("wipe");
        }
        rebuild(&conn).expect("rebuild");
        assert_eq!(snapshot(&conn), before);
    }

    #[test]
    fn rebuild_of_empty_store_is_empty() {
        let conn = crate::db::open_in_memory().expect("db");
        let report = rebuild(&conn).expect("rebuild");
        assert_eq!(report.event_count, 0);
        assert_eq!(report.item_count, 0);
    }
}
