//! `braid sync`: pull a repository's events from every relay into the
//! projection.
//!
//! Two rounds: the repository round fetches the announcement, ref state and
//! root items addressed to the repository; the reply round fetches comments,
//! status changes and bounties that reference the known root items by id.

use anyhow::Result;
use braid_core::db::project::{ProjectionStats, Projector};
use braid_core::db::query::{self, ItemFilter};
use braid_core::error::ErrorCode;
use braid_core::event::{Event, EventKind};
use braid_core::tags::RepoAddress;
use braid_relay::{DeliveryStats, Filter, RelayError, SettleReason, Settlement};
use clap::Args;
use rusqlite::Connection;
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

use crate::output::{OutputMode, fail, invalid, pretty_kv, render_mode};
use crate::project::{Project, now_secs, runtime};

/// Root ids per `#e` filter in the reply round.
const IDS_PER_FILTER: usize = 200;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository address: `30617:<pubkey>:<identifier>`.
    #[arg(long)]
    pub repo: String,

    /// Only fetch events created at or after this unix time. Defaults to the
    /// last fully settled sync.
    #[arg(long)]
    pub since: Option<u64>,

    /// Ignore the last sync time and fetch everything.
    #[arg(long, conflicts_with = "since")]
    pub full: bool,
}

#[derive(Debug, Default, Serialize)]
struct RoundStats {
    received: usize,
    projected: usize,
    duplicates: usize,
    rejected: usize,
    errors: usize,
}

impl RoundStats {
    fn add(&mut self, delivery: DeliveryStats, projection: &ProjectionStats) {
        self.received += delivery.delivered;
        self.duplicates += delivery.duplicates + projection.duplicates;
        self.rejected += delivery.rejected + projection.rejected;
        self.projected += projection.projected;
        self.errors += projection.errors;
    }
}

#[derive(Debug, Serialize)]
struct SyncOutput {
    repo: String,
    since: Option<u64>,
    relays: usize,
    partial: bool,
    settlements: Vec<Settlement>,
    #[serde(flatten)]
    stats: RoundStats,
}

/// Filters for the repository round.
pub fn repo_filters(repo: &RepoAddress, since: Option<u64>) -> Vec<Filter> {
    let replaceables = Filter::new()
        .authors([repo.pubkey.as_str()])
        .kinds([EventKind::RepoAnnouncement, EventKind::RepoState])
        .tag('d', [repo.identifier.as_str()]);
    let mut roots = Filter::new()
        .kinds([
            EventKind::Issue,
            EventKind::Patch,
            EventKind::PullRequest,
            EventKind::StatusOpen,
            EventKind::StatusApplied,
            EventKind::StatusClosed,
            EventKind::StatusDraft,
        ])
        .tag('a', [repo.to_string()]);
    if let Some(since) = since {
        roots = roots.since(since);
    }
    vec![replaceables, roots]
}

/// Filters for the reply round: everything that points at `root_ids`.
pub fn reply_filters(root_ids: &[String], since: Option<u64>) -> Vec<Filter> {
    root_ids
        .chunks(IDS_PER_FILTER)
        .map(|ids| {
            let filter = Filter::new()
                .kinds([
                    EventKind::Comment,
                    EventKind::TextNote,
                    EventKind::StatusOpen,
                    EventKind::StatusApplied,
                    EventKind::StatusClosed,
                    EventKind::StatusDraft,
                    EventKind::Bounty,
                ])
                .tag('e', ids.iter().map(String::as_str));
            match since {
                Some(since) => filter.since(since),
                None => filter,
            }
        })
        .collect()
}

/// Map a coordinator failure onto the user-facing error code.
pub fn relay_failure(output: OutputMode, err: &RelayError) -> anyhow::Error {
    match err {
        RelayError::NoRelays => fail(output, ErrorCode::RelaysUnreachable, "no relays configured"),
        other => fail(output, ErrorCode::RelaysUnreachable, other.to_string()),
    }
}

fn root_ids(conn: &Connection, repo: &str, project: &Project) -> Result<Vec<String>> {
    let filter = ItemFilter {
        repo: Some(repo.to_string()),
        ..ItemFilter::default()
    };
    Ok(query::list_items(conn, &filter, project.status_policy())?
        .into_iter()
        .map(|item| item.id)
        .collect())
}

fn project_round(
    project: &Project,
    conn: &Connection,
    repo: &str,
    events: &[(String, Event)],
) -> Result<ProjectionStats> {
    let _lock = project.write_lock()?;
    Projector::new(conn).with_scope(repo).project_received(events)
}

/// Execute `braid sync`.
///
/// # Errors
///
/// Returns an error if the address is invalid, no relay can be reached, or
/// the projection cannot be written.
pub fn run_sync(args: &SyncArgs, project: &Project) -> Result<()> {
    let repo: RepoAddress = args
        .repo
        .parse()
        .map_err(|e| invalid(project.output, format!("{e}")))?;
    let repo_key = repo.to_string();
    let conn = project.open_db()?;

    let since = match (args.since, args.full) {
        (Some(since), _) => Some(since),
        (None, true) => None,
        (None, false) => Some(query::last_sync_at(&conn)?).filter(|at| *at > 0),
    };
    let started_at = now_secs();
    let coordinator = project.coordinator();
    let rt = runtime()?;

    info!(repo = %repo_key, ?since, relays = coordinator.relays().len(), "syncing");
    let mut stats = RoundStats::default();
    let mut settlements = Vec::new();

    let fetched = rt
        .block_on(coordinator.fetch(repo_filters(&repo, since)))
        .map_err(|e| relay_failure(project.output, &e))?;
    let projected = project_round(project, &conn, &repo_key, &fetched.events)?;
    stats.add(fetched.stats, &projected);
    settlements.push(fetched.settlement);

    let ids = root_ids(&conn, &repo_key, project)?;
    if !ids.is_empty() {
        let replies = rt
            .block_on(coordinator.fetch(reply_filters(&ids, since)))
            .map_err(|e| relay_failure(project.output, &e))?;
        let projected = project_round(project, &conn, &repo_key, &replies.events)?;
        stats.add(replies.stats, &projected);
        settlements.push(replies.settlement);
    }

    let partial = settlements.iter().any(Settlement::is_partial);
    if partial {
        warn!(
            code = ErrorCode::SettlementPartial.code(),
            "sync settled partially; keeping the previous sync time"
        );
    } else {
        let _lock = project.write_lock()?;
        query::set_last_sync_at(&conn, started_at)?;
    }

    let out = SyncOutput {
        repo: repo_key,
        since,
        relays: coordinator.relays().len(),
        partial,
        settlements,
        stats,
    };
    render_mode(project.output, &out, render_text, render_pretty)
}

fn settlement_line(settlement: &Settlement) -> String {
    let reason = match settlement.reason {
        SettleReason::AllEose => "complete",
        SettleReason::Timeout => "timed out",
        SettleReason::NoRelayReachable => "unreachable",
    };
    format!(
        "{reason}: {} eose, {} failed, {} pending",
        settlement.eose.len(),
        settlement.failed.len(),
        settlement.pending.len()
    )
}

fn render_text(out: &SyncOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "sync: repo={} received={} projected={} duplicates={} rejected={} partial={}",
        out.repo,
        out.stats.received,
        out.stats.projected,
        out.stats.duplicates,
        out.stats.rejected,
        out.partial
    )
}

fn render_pretty(out: &SyncOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_kv(w, "Repo", &out.repo)?;
    pretty_kv(w, "Relays", out.relays.to_string())?;
    for (round, settlement) in ["repository", "replies"].iter().zip(&out.settlements) {
        pretty_kv(w, "Round", format!("{round} ({})", settlement_line(settlement)))?;
    }
    pretty_kv(w, "Received", out.stats.received.to_string())?;
    pretty_kv(w, "Projected", out.stats.projected.to_string())?;
    pretty_kv(w, "Duplicates", out.stats.duplicates.to_string())?;
    pretty_kv(w, "Rejected", out.stats.rejected.to_string())?;
    if out.stats.errors > 0 {
        pretty_kv(w, "Errors", out.stats.errors.to_string())?;
    }
    if out.partial {
        let mut missing: Vec<&str> = out
            .settlements
            .iter()
            .flat_map(|s| s.failed.iter().chain(&s.pending))
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        missing.dedup();
        writeln!(
            w,
            "warning[{}]: results may be incomplete; no end of stored events from {}",
            ErrorCode::SettlementPartial.code(),
            missing.join(", ")
        )?;
    }
    Ok(())
}
