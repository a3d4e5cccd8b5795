//! `braid push`: push a directory to the git bridge, then announce the
//! resulting ref state.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use braid_bridge::{
    CancelFlag, CommitSummary, Destination, FileJournal, HttpBridgeClient, PushOptions,
    PushOutcome, PushPipeline, await_convergence, collect_files, recent_commits,
};
use braid_core::db::project::{ProjectResult, Projector};
use braid_core::db::query::{self, LandedCommit};
use braid_core::error::ErrorCode;
use braid_core::event::{Event, EventBuilder, EventKind, Keys};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::output::{fail, invalid, pretty_kv, pretty_section, render_mode, short};
use crate::project::{Project, runtime};

const CONVERGENCE_ATTEMPTS: u32 = 10;
const CONVERGENCE_INTERVAL: Duration = Duration::from_secs(2);
/// Commits read back after a push to feed the activity ledger.
const LEDGER_COMMITS: usize = 30;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Directory to push.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Bridge account that owns the repository.
    #[arg(long)]
    pub owner: String,

    /// Repository name on the bridge.
    #[arg(long)]
    pub repo: String,

    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Skip chunks a previous interrupted push already landed.
    #[arg(long)]
    pub resume: bool,

    /// Repository identifier for the ref-state event. Defaults to --repo.
    #[arg(long)]
    pub identifier: Option<String>,

    /// Push only; do not sign or publish a ref-state event.
    #[arg(long)]
    pub no_announce: bool,

    /// Wait until the bridge reports the repository.
    #[arg(long)]
    pub wait: bool,

    /// Show this many recent commits on the branch afterwards.
    #[arg(long, value_name = "N")]
    pub log: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Announcement {
    event_id: String,
    address: String,
    published_to: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PushOutput {
    destination: String,
    files: usize,
    #[serde(flatten)]
    outcome: PushOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    announcement: Option<Announcement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    converged: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    commits: Vec<CommitSummary>,
}

/// The ref-state event for the refs a push produced.
pub fn ref_state_event(
    keys: &Keys,
    identifier: &str,
    branch: &str,
    refs: &BTreeMap<String, String>,
) -> Event {
    let head = format!("ref: refs/heads/{branch}");
    EventBuilder::new(EventKind::RepoState, "")
        .tag(["d", identifier])
        .tags(refs.iter().map(|(name, sha)| vec![name.clone(), sha.clone()]))
        .tag(["HEAD", head.as_str()])
        .sign(keys)
}

/// Trip `cancel` on Ctrl-C; the pipeline stops between chunks.
fn cancel_on_interrupt(rt: &tokio::runtime::Runtime, cancel: CancelFlag) {
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current chunk");
            cancel.cancel();
        }
    });
}

/// Execute `braid push`.
///
/// # Errors
///
/// Returns an error if no bridge is configured, the files cannot be read,
/// announcing needs a signer that is missing, or the push does not complete.
pub fn run_push(args: &PushArgs, project: &Project) -> Result<()> {
    let bridge = &project.config.project.bridge;
    let Some(url) = bridge.url.as_deref() else {
        return Err(fail(
            project.output,
            ErrorCode::BridgeUnavailable,
            "no bridge url configured",
        ));
    };
    let keys = if args.no_announce {
        None
    } else {
        Some(project.signer()?)
    };

    let files = collect_files(&args.dir).map_err(|e| invalid(project.output, e.to_string()))?;
    if files.is_empty() {
        return Err(invalid(
            project.output,
            format!("nothing to push in {}", args.dir.display()),
        ));
    }
    let dest = Destination::new(&args.owner, &args.repo, &args.branch);
    let client = HttpBridgeClient::new(url);
    let mut options = PushOptions::from(bridge);
    options.resume = args.resume;

    let rt = runtime()?;
    let cancel = CancelFlag::new();
    cancel_on_interrupt(&rt, cancel.clone());

    info!(%dest, files = files.len(), bridge = client.base_url(), "pushing");
    let mut journal = FileJournal::new(project.braid_dir().join("push"));
    let outcome = PushPipeline::new(&client, options)
        .with_journal(&mut journal)
        .with_cancel(cancel)
        .run(&dest, &files);
    drop(rt);

    let announcement = match (&keys, &outcome.refs) {
        (Some(keys), Some(refs)) => {
            let identifier = args.identifier.as_deref().unwrap_or(&args.repo);
            Some(announce(project, keys, identifier, &args.branch, refs)?)
        }
        (Some(_), None) => {
            warn!("bridge reported no refs; nothing to announce");
            None
        }
        (None, _) => None,
    };

    let converged = if args.wait && outcome.is_complete() {
        Some(
            await_convergence(&client, &dest, CONVERGENCE_ATTEMPTS, CONVERGENCE_INTERVAL)
                .map_err(|e| fail(project.output, ErrorCode::BridgeUnavailable, e.to_string()))?,
        )
    } else {
        None
    };
    let mut commits = if outcome.chunks_succeeded > 0 {
        let limit = args.log.unwrap_or(0).max(LEDGER_COMMITS);
        recent_commits(&client, &dest, limit, 30).unwrap_or_else(|e| {
            warn!(error = %e, "could not list commits");
            Vec::new()
        })
    } else {
        Vec::new()
    };
    if !commits.is_empty() {
        let repo_key = keys.as_ref().map_or_else(
            || dest.to_string(),
            |keys| repo_address(keys, args.identifier.as_deref().unwrap_or(&args.repo)),
        );
        remember_commits(project, &repo_key, &commits)?;
    }
    commits.truncate(args.log.unwrap_or(0));

    let complete = outcome.is_complete();
    let summary = outcome.summary();
    let out = PushOutput {
        destination: dest.to_string(),
        files: files.len(),
        outcome,
        announcement,
        converged,
        commits,
    };
    render_mode(project.output, &out, render_text, render_pretty)?;

    if complete {
        Ok(())
    } else {
        Err(fail(project.output, ErrorCode::PushPartial, summary))
    }
}

fn announce(
    project: &Project,
    keys: &Keys,
    identifier: &str,
    branch: &str,
    refs: &BTreeMap<String, String>,
) -> Result<Announcement> {
    let event = ref_state_event(keys, identifier, branch, refs);
    let address = repo_address(keys, identifier);
    {
        let conn = project.open_db()?;
        let lock = project.write_lock()?;
        match Projector::new(&conn).ingest_event(&event, None)? {
            ProjectResult::Projected | ProjectResult::Duplicate => {}
            ProjectResult::Rejected(reason) => {
                warn!(?reason, "ref-state event not projected locally");
            }
        }
        lock.release();
    }
    let report = project.publish(&event)?;
    Ok(Announcement {
        event_id: event.id,
        address,
        published_to: report.map(|r| r.accepted.len()),
    })
}

fn repo_address(keys: &Keys, identifier: &str) -> String {
    format!(
        "{}:{}:{identifier}",
        EventKind::RepoAnnouncement.as_u32(),
        keys.public_key_hex()
    )
}

/// Commits the bridge reports on the branch, as ledger entries for `repo`.
fn landed(repo: &str, commits: &[CommitSummary]) -> Vec<LandedCommit> {
    commits
        .iter()
        .filter(|c| !c.sha.trim().is_empty())
        .map(|c| LandedCommit {
            sha: c.sha.clone(),
            author: c.author.clone(),
            repo: repo.to_string(),
            committed_at: c.timestamp,
        })
        .collect()
}

fn remember_commits(project: &Project, repo: &str, commits: &[CommitSummary]) -> Result<()> {
    let conn = project.open_db()?;
    let lock = project.write_lock()?;
    let new = query::record_commits(&conn, &landed(repo, commits))?;
    lock.release();
    info!(repo, new, "landed commits recorded");
    Ok(())
}

fn render_text(out: &PushOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "push: {} {}", out.destination, out.outcome.summary())?;
    if let Some(refs) = &out.outcome.refs {
        for (name, sha) in refs {
            writeln!(w, "ref {name} {sha}")?;
        }
    }
    if let Some(a) = &out.announcement {
        writeln!(w, "announced {} {}", a.event_id, a.address)?;
    }
    for commit in &out.commits {
        writeln!(w, "commit {} {}", short(&commit.sha, 12), commit.message)?;
    }
    Ok(())
}

fn render_pretty(out: &PushOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_kv(w, "Destination", &out.destination)?;
    pretty_kv(w, "Files", out.files.to_string())?;
    pretty_kv(
        w,
        "Chunks",
        format!(
            "{}/{} ({} resumed)",
            out.outcome.chunks_succeeded, out.outcome.chunks_total, out.outcome.chunks_resumed
        ),
    )?;
    if let Some(failure) = &out.outcome.failure {
        pretty_kv(w, "Failed", format!("chunk {}: {}", failure.chunk, failure.reason))?;
    }
    if out.outcome.cancelled {
        pretty_kv(w, "Cancelled", "yes")?;
    }
    if let Some(refs) = &out.outcome.refs {
        for (name, sha) in refs {
            pretty_kv(w, "Ref", format!("{name} {}", short(sha, 12)))?;
        }
    }
    if let Some(a) = &out.announcement {
        let published = a
            .published_to
            .map_or_else(|| "kept locally".to_string(), |n| format!("{n} relay(s)"));
        pretty_kv(w, "Announced", format!("{} ({published})", short(&a.event_id, 12)))?;
    }
    if let Some(converged) = out.converged {
        pretty_kv(w, "Visible", if converged { "yes" } else { "not yet" })?;
    }
    if !out.commits.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Recent commits")?;
        for commit in &out.commits {
            writeln!(w, "{}  {}", short(&commit.sha, 12), commit.message)?;
        }
    }
    Ok(())
}
