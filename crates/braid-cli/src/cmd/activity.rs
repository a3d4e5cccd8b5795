//! `braid activity`: who did what, counted once per activity.
//!
//! Records from the persisted ledger, a replay of locally cached items and
//! (with `--live`) a fresh relay count all land in one deduplicating ledger,
//! so the same comment seen through two paths is counted once.

use anyhow::Result;
use braid_core::activity::{ActivityTotals, Ledger, count_events, replay_local};
use braid_core::db::query;
use braid_core::tags::{self, RepoAddress};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

use crate::cmd::sync::{relay_failure, reply_filters, repo_filters};
use crate::output::{format_timestamp, invalid, pretty_kv, pretty_section, render_mode, short};
use crate::project::{Project, runtime};

#[derive(Args, Debug)]
pub struct ActivityArgs {
    /// Restrict to one repository (`30617:<pubkey>:<identifier>`).
    #[arg(long)]
    pub repo: Option<String>,

    /// Also count events fetched from the relays right now. Requires --repo.
    #[arg(long, requires = "repo")]
    pub live: bool,

    /// How many users to list.
    #[arg(long, default_value = "10")]
    pub top: usize,
}

#[derive(Debug, Default, Serialize)]
struct Sources {
    stored: usize,
    local_new: usize,
    live_new: usize,
}

#[derive(Debug, Serialize)]
struct ActivityOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    repo: Option<String>,
    #[serde(flatten)]
    totals: ActivityTotals,
    top_users: Vec<(String, u64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest: Option<u64>,
    sources: Sources,
    partial: bool,
}

/// Execute `braid activity`.
///
/// # Errors
///
/// Returns an error if the projection cannot be read, the repository address
/// is invalid, or a live query reaches no relay.
pub fn run_activity(args: &ActivityArgs, project: &Project) -> Result<()> {
    let repo = args
        .repo
        .as_deref()
        .map(str::parse::<RepoAddress>)
        .transpose()
        .map_err(|e| invalid(project.output, format!("{e}")))?;
    let repo_key = repo.as_ref().map(ToString::to_string);
    let conn = if args.live {
        project.open_db()?
    } else {
        project.open_existing_db()?
    };

    let mut ledger: Ledger = query::load_ledger(&conn, repo_key.as_deref())?;
    let mut sources = Sources {
        stored: ledger.len(),
        ..Sources::default()
    };
    let local = replay_local(&query::local_items(&conn, repo_key.as_deref())?);
    sources.local_new = ledger.extend(local);
    debug!(stored = sources.stored, local_new = sources.local_new, "ledger loaded");

    let mut partial = false;
    if let (true, Some(repo)) = (args.live, &repo) {
        let key = repo.to_string();
        let coordinator = project.coordinator();
        let rt = runtime()?;

        let fetched = rt
            .block_on(coordinator.fetch(repo_filters(repo, None)))
            .map_err(|e| relay_failure(project.output, &e))?;
        partial |= fetched.settlement.is_partial();

        let mut parsed: Vec<_> = fetched.events.into_iter().map(|(_, e)| tags::parse(e)).collect();
        let roots: Vec<String> = parsed
            .iter()
            .filter(|p| p.event.kind.root_family().is_some())
            .map(|p| p.id().to_string())
            .collect();
        if !roots.is_empty() {
            let replies = rt
                .block_on(coordinator.fetch(reply_filters(&roots, None)))
                .map_err(|e| relay_failure(project.output, &e))?;
            partial |= replies.settlement.is_partial();
            parsed.extend(replies.events.into_iter().map(|(_, e)| tags::parse(e)));
        }

        let live = count_events(&parsed, &key);
        sources.live_new = ledger.extend(live.iter().cloned());
        let _lock = project.write_lock()?;
        let stored = query::record_activities(&conn, &live)?;
        info!(counted = live.len(), stored, "live activity recorded");
    }

    let totals = ledger.totals();
    let mut top_users: Vec<(String, u64)> = totals
        .by_user
        .iter()
        .map(|(user, count)| (user.clone(), *count))
        .collect();
    top_users.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_users.truncate(args.top);

    let out = ActivityOutput {
        repo: repo_key,
        latest: ledger.iter().map(|r| r.timestamp).max(),
        totals,
        top_users,
        sources,
        partial,
    };
    render_mode(project.output, &out, render_text, render_pretty)
}

fn render_text(out: &ActivityOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "total {}", out.totals.total)?;
    for (kind, count) in &out.totals.by_type {
        writeln!(w, "type {kind} {count}")?;
    }
    for (user, count) in &out.top_users {
        writeln!(w, "user {user} {count}")?;
    }
    Ok(())
}

fn render_pretty(out: &ActivityOutput, w: &mut dyn Write) -> std::io::Result<()> {
    if let Some(repo) = &out.repo {
        pretty_kv(w, "Repo", repo)?;
    }
    pretty_kv(w, "Total", out.totals.total.to_string())?;
    if let Some(latest) = out.latest {
        pretty_kv(w, "Latest", format_timestamp(latest))?;
    }
    if out.partial {
        pretty_kv(w, "Note", "some relays did not finish; live counts may be low")?;
    }

    writeln!(w)?;
    pretty_section(w, "By type")?;
    for (kind, count) in &out.totals.by_type {
        writeln!(w, "{:<14} {count:>6}", kind.as_str())?;
    }

    writeln!(w)?;
    pretty_section(w, "Top users")?;
    for (user, count) in &out.top_users {
        writeln!(w, "{:<18} {count:>6}", short(user, 16))?;
    }
    Ok(())
}
