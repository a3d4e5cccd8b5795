//! `braid rebuild`: replay stored events into fresh derived tables.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use crate::output::render;
use crate::project::Project;

#[derive(Debug, Serialize)]
struct RebuildOutput {
    events: usize,
    items: usize,
    errors: usize,
    elapsed_ms: u128,
}

/// Run `braid rebuild`: re-project every stored raw event into fresh
/// derived tables.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken or the rebuild fails.
pub fn run_rebuild(project: &Project) -> Result<()> {
    let _lock = project.write_lock()?;
    let conn = project.open_db()?;
    let report = braid_core::db::rebuild::rebuild(&conn)?;

    let out = RebuildOutput {
        events: report.event_count,
        items: report.item_count,
        errors: report.errors,
        elapsed_ms: report.elapsed.as_millis(),
    };
    render(project.output, &out, |o, w| {
        writeln!(
            w,
            "rebuild: events={} items={} errors={} elapsed_ms={}",
            o.events, o.items, o.errors, o.elapsed_ms
        )
    })
}
