//! SQLite schema migrations for the projection database.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 3;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "events and derived item tables",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "bounties and activity ledger",
        sql: schema::MIGRATION_V2_SQL,
    },
    Migration {
        version: 3,
        name: "landed commits",
        sql: schema::MIGRATION_V3_SQL,
    },
];

/// The projection's `PRAGMA user_version`.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

/// Bring the projection up to [`LATEST_SCHEMA_VERSION`].
///
/// Every step runs in its own transaction together with the `user_version`
/// bump. A database written by a newer binary is refused rather than
/// projected into with an older reducer.
///
/// # Errors
///
/// Returns an error if a step fails or the database is newer than this
/// binary.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = current_schema_version(conn)?;
    if start > LATEST_SCHEMA_VERSION {
        return Err(rusqlite::Error::InvalidParameterName(format!(
            "projection schema v{start} is newer than supported v{LATEST_SCHEMA_VERSION}; run `braid rebuild` with a newer braid"
        )));
    }

    let pending = MIGRATIONS.iter().filter(|m| m.version > start);
    let mut reached = start;
    for step in pending {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE projection_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        tracing::debug!(version = step.version, name = step.name, "migrated projection");
        reached = step.version;
    }
    Ok(reached)
}
