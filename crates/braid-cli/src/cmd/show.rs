//! `braid show`: one root item with its status and comment tree.
//!
//! Accepts a unique id prefix.

use anyhow::Result;
use braid_core::db::query::{self, ItemDetail};
use braid_core::error::ErrorCode;
use braid_core::thread::{Promotion, Thread};
use clap::Args;
use std::io::Write;

use crate::output::{fail, format_timestamp, pretty_kv, pretty_section, render_mode, short};
use crate::project::Project;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Item id, or a unique prefix of one.
    pub id: String,
}

/// Execute `braid show <id>`.
///
/// # Errors
///
/// Returns an error if the projection is missing, the id does not resolve,
/// or the query fails.
pub fn run_show(args: &ShowArgs, project: &Project) -> Result<()> {
    let conn = project.open_existing_db()?;

    let Some(id) = query::resolve_item_id(&conn, &args.id)? else {
        return Err(fail(
            project.output,
            ErrorCode::ItemNotFound,
            format!("item '{}' not found", args.id),
        ));
    };
    let Some(item) = query::get_item(&conn, &id, project.status_policy())? else {
        return Err(fail(
            project.output,
            ErrorCode::ItemNotFound,
            format!("item '{id}' not found"),
        ));
    };

    render_mode(project.output, &item, render_text, render_pretty)
}

fn render_text(item: &ItemDetail, w: &mut dyn Write) -> std::io::Result<()> {
    let summary = &item.summary;
    writeln!(w, "id {}", summary.id)?;
    writeln!(w, "kind {}", summary.family)?;
    writeln!(w, "state {}", summary.status.state)?;
    writeln!(w, "author {}", summary.author)?;
    if let Some(subject) = &summary.subject {
        writeln!(w, "subject {subject}")?;
    }
    if !summary.labels.is_empty() {
        writeln!(w, "labels {}", summary.labels.join(","))?;
    }
    if let Some(bounty) = &item.bounty {
        writeln!(
            w,
            "bounty {} {}",
            bounty.state,
            bounty.amount_sats.map_or_else(|| "-".to_string(), |a| a.to_string())
        )?;
    }
    for (depth, comment) in item.thread.flatten() {
        writeln!(
            w,
            "comment {} depth={depth} author={} {}",
            short(&comment.id, 12),
            short(&comment.author, 12),
            comment.body.lines().next().unwrap_or_default()
        )?;
    }
    Ok(())
}

fn render_pretty(item: &ItemDetail, w: &mut dyn Write) -> std::io::Result<()> {
    let summary = &item.summary;
    pretty_section(
        w,
        &format!(
            "{} {}",
            short(&summary.id, 12),
            summary.subject.as_deref().unwrap_or("(no subject)")
        ),
    )?;
    pretty_kv(w, "Kind", summary.family.as_str())?;
    let decided_by = summary
        .status
        .event_id
        .as_deref()
        .map_or_else(|| "implicit".to_string(), |id| short(id, 12).to_string());
    pretty_kv(
        w,
        "State",
        format!(
            "{} (since {}, {decided_by})",
            summary.status.state,
            format_timestamp(summary.status.since)
        ),
    )?;
    pretty_kv(w, "Author", short(&summary.author, 16))?;
    pretty_kv(w, "Created", format_timestamp(summary.created_at))?;
    if !summary.repo.is_empty() {
        pretty_kv(w, "Repo", &summary.repo)?;
    }
    if !summary.labels.is_empty() {
        pretty_kv(w, "Labels", summary.labels.join(", "))?;
    }
    if !item.assignees.is_empty() {
        let assignees: Vec<&str> = item.assignees.iter().map(|a| short(a, 16)).collect();
        pretty_kv(w, "Assignees", assignees.join(", "))?;
    }
    if let Some(branch) = &item.branch {
        pretty_kv(w, "Branch", branch)?;
    }
    if let Some(tip) = &item.tip_commit {
        pretty_kv(w, "Tip", short(tip, 12))?;
    }
    if let Some(bounty) = &item.bounty {
        let amount = bounty
            .amount_sats
            .map_or_else(|| "unknown amount".to_string(), |a| format!("{a} sats"));
        pretty_kv(w, "Bounty", format!("{} ({amount})", bounty.state))?;
    }

    if !item.body.trim().is_empty() {
        writeln!(w)?;
        writeln!(w, "{}", item.body.trim_end())?;
    }

    if item.status_history.len() > 1 {
        writeln!(w)?;
        pretty_section(w, "Status history")?;
        for candidate in &item.status_history {
            writeln!(
                w,
                "{}  {:<8}  {}",
                format_timestamp(candidate.created_at),
                candidate.state.to_string(),
                short(&candidate.author, 16)
            )?;
        }
    }

    writeln!(w)?;
    pretty_section(w, &format!("Comments ({})", item.thread.len()))?;
    render_tree(&item.thread, w)
}

fn render_tree(thread: &Thread, w: &mut dyn Write) -> std::io::Result<()> {
    for node in &thread.nodes {
        let indent = "  ".repeat(node.depth);
        let marker = match node.promoted {
            Some(Promotion::Orphan) => " [reply to missing comment]",
            Some(Promotion::CycleBreak) => " [reply cycle]",
            None => "",
        };
        writeln!(
            w,
            "{indent}- {} {}{marker}",
            short(&node.comment.author, 12),
            format_timestamp(node.comment.created_at)
        )?;
        for line in node.comment.body.lines() {
            writeln!(w, "{indent}  {line}")?;
        }
    }
    Ok(())
}
