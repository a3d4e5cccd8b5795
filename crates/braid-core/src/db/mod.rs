//! SQLite projection database.
//!
//! Connections are opened with:
//! - `journal_mode = WAL` so readers keep working while a sync merges
//! - `busy_timeout = 5s` to ride out short contention between processes
//! - `foreign_keys = ON`; the schema declares none, but ad hoc tables added
//!   by later migrations get enforcement for free

pub mod migrations;
pub mod project;
pub mod query;
pub mod rebuild;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used for projection DB connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the projection at `path`, creating it and its directory on first
/// use, and migrate it.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_projection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create projection db directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open projection database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply projection migrations")?;

    Ok(conn)
}

/// Open an in-memory projection. Used by tests and dry runs.
///
/// # Errors
///
/// Returns an error if migrating the database fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory projection")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply projection migrations")?;
    Ok(conn)
}

/// Pragmas every file-backed connection gets, applied in order.
const FILE_PRAGMAS: &[(&str, &str)] = &[("foreign_keys", "ON"), ("synchronous", "NORMAL")];

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    for (name, value) in FILE_PRAGMAS {
        conn.pragma_update(None, name, value)?;
    }
    // journal_mode answers with the mode actually in effect.
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(%mode, "projection database is not in WAL mode; readers may block during sync");
    }
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
}
