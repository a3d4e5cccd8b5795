//! `braid list`: root items with their derived status.

use anyhow::Result;
use braid_core::db::query::{self, ItemFilter, ItemSummary};
use braid_core::model::{LifecycleState, RootFamily};
use clap::Args;
use std::io::Write;

use crate::output::{format_timestamp, pretty_rule, render_mode, short};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by derived state: open, applied, closed, draft.
    #[arg(short, long, value_parser = parse_state)]
    pub state: Option<LifecycleState>,

    /// Filter by family: issue, patch, pull-request.
    #[arg(short, long, value_parser = parse_family)]
    pub kind: Option<RootFamily>,

    /// Only items in this repository (`30617:<pubkey>:<identifier>`).
    #[arg(long)]
    pub repo: Option<String>,

    /// Filter by label.
    #[arg(short, long)]
    pub label: Option<String>,

    /// Maximum items to show.
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,
}

fn parse_state(raw: &str) -> Result<LifecycleState, String> {
    raw.parse().map_err(|e| format!("{e}"))
}

fn parse_family(raw: &str) -> Result<RootFamily, String> {
    raw.parse().map_err(|e| format!("{e}"))
}

/// Execute `braid list`.
///
/// # Errors
///
/// Returns an error if the projection is missing or the query fails.
pub fn run_list(args: &ListArgs, project: &Project) -> Result<()> {
    let conn = project.open_existing_db()?;
    let filter = ItemFilter {
        family: args.kind,
        state: args.state,
        repo: args.repo.clone(),
        label: args.label.clone(),
        limit: Some(args.limit),
    };
    let items = query::list_items(&conn, &filter, project.status_policy())?;

    render_mode(project.output, &items, render_text, render_pretty)
}

#[allow(clippy::ptr_arg)]
fn render_text(items: &Vec<ItemSummary>, w: &mut dyn Write) -> std::io::Result<()> {
    for item in items {
        writeln!(
            w,
            "{}  {}  {}  {}",
            short(&item.id, 12),
            item.family,
            item.status.state,
            item.subject.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn render_pretty(items: &Vec<ItemSummary>, w: &mut dyn Write) -> std::io::Result<()> {
    if items.is_empty() {
        return writeln!(w, "No items found. Run `braid sync --repo <address>` first.");
    }
    writeln!(
        w,
        "{:<12}  {:<12}  {:<8}  {:>4}  {:<16}  SUBJECT",
        "ID", "KIND", "STATE", "REPL", "CREATED"
    )?;
    pretty_rule(w)?;
    for item in items {
        writeln!(
            w,
            "{:<12}  {:<12}  {:<8}  {:>4}  {:<16}  {}",
            short(&item.id, 12),
            item.family.as_str(),
            item.status.state.to_string(),
            item.comment_count,
            format_timestamp(item.created_at),
            item.subject.as_deref().unwrap_or("(no subject)")
        )?;
    }
    Ok(())
}
