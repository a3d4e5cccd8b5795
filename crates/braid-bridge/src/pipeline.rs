//! Chunked push pipeline.
//!
//! Each chunk makes the bridge create a commit in the same working tree, so
//! chunks go strictly one after another. The first failure or timeout stops
//! the run; chunks that already landed stay landed. The outcome says how far
//! the push got and which refs the bridge last reported.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use braid_core::config::BridgeConfig;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{ChunkLimits, ChunkPlan, FileEntry, plan_chunks};
use crate::client::{BridgeClient, CommitSummary, PushFile, PushRequest};
use crate::error::BridgeError;
use crate::journal::{ChunkRecord, Destination, PushJournal, plan_id};

/// Shared flag a caller flips to stop a running push before its next chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub limits: ChunkLimits,
    pub chunk_timeout: Duration,
    /// Skip chunks the journal already holds for this plan.
    pub resume: bool,
    /// Commit time sent with every chunk. Defaults to the start of the run.
    pub commit_timestamp: Option<u64>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            limits: ChunkLimits::default(),
            chunk_timeout: Duration::from_secs(60),
            resume: false,
            commit_timestamp: None,
        }
    }
}

impl From<&BridgeConfig> for PushOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            limits: ChunkLimits::from(config),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
            ..Self::default()
        }
    }
}

/// Why a chunk did not land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    /// Zero-based chunk index.
    pub chunk: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub plan_id: String,
    pub chunks_total: usize,
    /// Chunks that landed, including ones skipped on resume.
    pub chunks_succeeded: usize,
    pub chunks_resumed: usize,
    /// Refs from the most recent chunk that reported any.
    pub refs: Option<BTreeMap<String, String>>,
    pub refs_from_chunk: Option<usize>,
    pub failure: Option<ChunkFailure>,
    pub cancelled: bool,
}

impl PushOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && !self.cancelled && self.chunks_succeeded == self.chunks_total
    }

    /// Some chunks landed and some did not.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.is_complete() && self.chunks_succeeded > 0
    }

    /// One-line user-facing summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_complete() {
            format!("pushed {} chunk(s)", self.chunks_total)
        } else if self.cancelled {
            format!(
                "push cancelled ({} of {} chunks)",
                self.chunks_succeeded, self.chunks_total
            )
        } else {
            format!(
                "push failed partway ({} of {} chunks)",
                self.chunks_succeeded, self.chunks_total
            )
        }
    }
}

pub struct PushPipeline<'a> {
    client: &'a dyn BridgeClient,
    journal: Option<&'a mut dyn PushJournal>,
    options: PushOptions,
    cancel: CancelFlag,
}

impl<'a> PushPipeline<'a> {
    #[must_use]
    pub fn new(client: &'a dyn BridgeClient, options: PushOptions) -> Self {
        Self {
            client,
            journal: None,
            options,
            cancel: CancelFlag::default(),
        }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: &'a mut dyn PushJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Push `files` to `dest` chunk by chunk.
    #[instrument(skip_all, fields(dest = %dest, files = files.len()))]
    pub fn run(&mut self, dest: &Destination, files: &[FileEntry]) -> PushOutcome {
        let plan = plan_chunks(files, self.options.limits);
        let mut outcome = PushOutcome {
            plan_id: plan_id(dest, files),
            chunks_total: plan.len(),
            ..PushOutcome::default()
        };
        let commit_timestamp = self
            .options
            .commit_timestamp
            .unwrap_or_else(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default());
        let landed = self.resumable_chunks(&outcome.plan_id);

        info!(plan_id = %outcome.plan_id, chunks = plan.len(), "starting push");
        for chunk in &plan {
            if let Some(record) = landed.get(&chunk.index) {
                debug!(chunk = chunk.index, "already landed; skipping");
                outcome.chunks_resumed += 1;
                outcome.chunks_succeeded += 1;
                account_refs(&mut outcome, chunk.index, record.refs.clone());
                continue;
            }

            if self.cancel.is_cancelled() {
                warn!(chunk = chunk.index, "push cancelled");
                outcome.cancelled = true;
                break;
            }

            match self.push_chunk(dest, files, chunk, plan.len(), commit_timestamp) {
                Ok(refs) => {
                    outcome.chunks_succeeded += 1;
                    self.journal_chunk(&outcome.plan_id, chunk.index, refs.clone());
                    account_refs(&mut outcome, chunk.index, refs);
                }
                Err(reason) => {
                    warn!(
                        chunk = chunk.index + 1,
                        total = plan.len(),
                        %reason,
                        "chunk failed; aborting remaining chunks"
                    );
                    outcome.failure = Some(ChunkFailure {
                        chunk: chunk.index,
                        reason,
                    });
                    break;
                }
            }
        }

        if outcome.is_complete() {
            if let Some(journal) = self.journal.as_deref_mut()
                && let Err(e) = journal.clear(&outcome.plan_id)
            {
                warn!(error = %e, "could not clear push journal");
            }
            info!(chunks = outcome.chunks_total, "push complete");
        } else {
            warn!(summary = %outcome.summary(), "push incomplete");
        }
        outcome
    }

    fn resumable_chunks(&self, plan_id: &str) -> BTreeMap<usize, ChunkRecord> {
        if !self.options.resume {
            return BTreeMap::new();
        }
        let Some(journal) = self.journal.as_deref() else {
            return BTreeMap::new();
        };
        journal.completed(plan_id).unwrap_or_else(|e| {
            warn!(error = %e, "push journal unreadable; pushing every chunk");
            BTreeMap::new()
        })
    }

    fn journal_chunk(&mut self, plan_id: &str, index: usize, refs: Option<BTreeMap<String, String>>) {
        let Some(journal) = self.journal.as_deref_mut() else {
            return;
        };
        let record = ChunkRecord {
            index,
            refs,
            completed_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = journal.record(plan_id, record) {
            warn!(chunk = index, error = %e, "could not journal landed chunk");
        }
    }

    fn push_chunk(
        &self,
        dest: &Destination,
        files: &[FileEntry],
        chunk: &ChunkPlan,
        total: usize,
        commit_timestamp: u64,
    ) -> Result<Option<BTreeMap<String, String>>, String> {
        let request = PushRequest {
            owner: dest.owner.clone(),
            repo: dest.repo.clone(),
            branch: dest.branch.clone(),
            files: files[chunk.files.clone()].iter().map(PushFile::from).collect(),
            commit_timestamp,
            chunk_index: chunk.index,
            chunk_total: total,
        };
        debug!(
            chunk = chunk.index,
            files = chunk.len(),
            estimated_bytes = chunk.estimated_bytes,
            "pushing chunk"
        );

        let response = self
            .client
            .push(&request, self.options.chunk_timeout)
            .map_err(|e| e.to_string())?;
        if !response.accepted {
            return Err(response
                .message
                .unwrap_or_else(|| "bridge did not accept the chunk".to_string()));
        }
        Ok(response.refs.filter(|refs| !refs.is_empty()))
    }
}

/// Keep the newest reported refs; warn when a chunk reported none.
fn account_refs(outcome: &mut PushOutcome, index: usize, refs: Option<BTreeMap<String, String>>) {
    if let Some(refs) = refs {
        outcome.refs = Some(refs);
        outcome.refs_from_chunk = Some(index);
        return;
    }

    if index + 1 == outcome.chunks_total {
        warn!(
            chunk = index,
            fallback = ?outcome.refs_from_chunk,
            "final chunk reported no refs; using the last chunk that did"
        );
    } else {
        warn!(
            chunk = index,
            "intermediate chunk reported no refs; later ref announcements may point at stale heads"
        );
    }
}

/// Up to `limit` commits on the destination branch, newest first.
///
/// # Errors
///
/// Returns the first [`BridgeError`] from the bridge.
pub fn recent_commits(
    client: &dyn BridgeClient,
    dest: &Destination,
    limit: usize,
    per_page: u32,
) -> Result<Vec<CommitSummary>, BridgeError> {
    const MAX_PAGES: u32 = 50;

    let per_page = per_page.max(1);
    let mut commits = Vec::new();
    for page in 1..=MAX_PAGES {
        if commits.len() >= limit {
            break;
        }
        let batch = client.commits(&dest.owner, &dest.repo, &dest.branch, page, per_page)?;
        let short_page = batch.len() < per_page as usize;
        commits.extend(batch);
        if short_page {
            break;
        }
    }
    commits.truncate(limit);
    Ok(commits)
}

/// Poll the bridge until the repository exists or `attempts` run out.
///
/// # Errors
///
/// Returns the last [`BridgeError`] if every probe failed outright.
pub fn await_convergence(
    client: &dyn BridgeClient,
    dest: &Destination,
    attempts: u32,
    interval: Duration,
) -> Result<bool, BridgeError> {
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match client.repo_exists(&dest.owner, &dest.repo) {
            Ok(true) => {
                debug!(attempt, "repository visible on bridge");
                return Ok(true);
            }
            Ok(false) => last_error = None,
            Err(e) => {
                debug!(attempt, error = %e, "convergence probe failed");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            std::thread::sleep(interval);
        }
    }
    last_error.map_or(Ok(false), Err)
}
