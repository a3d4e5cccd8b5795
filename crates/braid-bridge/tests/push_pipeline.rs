//! Push pipeline behaviour against a scripted bridge.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use braid_bridge::{
    BridgeClient, BridgeError, CancelFlag, ChunkLimits, CommitSummary, Destination, FileEntry,
    FileJournal, MemoryJournal, PushJournal, PushOptions, PushPipeline, PushRequest, PushResponse,
    await_convergence, plan_id, recent_commits,
};

#[derive(Debug, Clone)]
enum Reply {
    Refs(&'static str),
    NoRefs,
    Reject(&'static str),
    Timeout,
}

#[derive(Default)]
struct ScriptedBridge {
    replies: Vec<Reply>,
    requests: Mutex<Vec<PushRequest>>,
    exists_after: u32,
    probes: AtomicU32,
    commits: Vec<CommitSummary>,
}

impl ScriptedBridge {
    fn replying(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            ..Self::default()
        }
    }

    fn pushed_chunks(&self) -> Vec<usize> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .map(|r| r.chunk_index)
            .collect()
    }
}

fn refs(sha: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("refs/heads/main".to_string(), sha.to_string())])
}

impl BridgeClient for ScriptedBridge {
    fn push(&self, request: &PushRequest, timeout: Duration) -> Result<PushResponse, BridgeError> {
        assert_eq!(timeout, Duration::from_secs(7));
        self.requests.lock().expect("lock").push(request.clone());
        match self.replies.get(request.chunk_index).cloned().unwrap_or(Reply::NoRefs) {
            Reply::Refs(sha) => Ok(PushResponse {
                accepted: true,
                refs: Some(refs(sha)),
                message: None,
            }),
            Reply::NoRefs => Ok(PushResponse {
                accepted: true,
                refs: None,
                message: None,
            }),
            Reply::Reject(message) => Ok(PushResponse {
                accepted: false,
                refs: None,
                message: Some(message.to_string()),
            }),
            Reply::Timeout => Err(BridgeError::Transport("timed out reading response".into())),
        }
    }

    fn repo_exists(&self, _owner: &str, _repo: &str) -> Result<bool, BridgeError> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(probe >= self.exists_after)
    }

    fn commits(
        &self,
        _owner: &str,
        _repo: &str,
        _branch: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, BridgeError> {
        let start = (page as usize - 1) * per_page as usize;
        Ok(self
            .commits
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }
}

fn dest() -> Destination {
    Destination::new("alice", "braid", "main")
}

fn files(n: usize) -> Vec<FileEntry> {
    (0..n)
        .map(|i| FileEntry::new(format!("docs/page_{i:02}.md"), format!("# page {i}\n")))
        .collect()
}

fn options() -> PushOptions {
    PushOptions {
        limits: ChunkLimits {
            max_files: 30,
            max_bytes: 3 * 1024 * 1024,
        },
        chunk_timeout: Duration::from_secs(7),
        resume: false,
        commit_timestamp: Some(1_700_000_000),
    }
}

#[test]
fn full_push_reports_last_chunk_refs() {
    let bridge = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::Refs("c2"), Reply::Refs("c3")]);
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &files(75));

    assert!(outcome.is_complete());
    assert!(!outcome.is_partial());
    assert_eq!(outcome.chunks_total, 3);
    assert_eq!(outcome.chunks_succeeded, 3);
    assert_eq!(outcome.refs, Some(refs("c3")));
    assert_eq!(outcome.refs_from_chunk, Some(2));
    assert_eq!(outcome.summary(), "pushed 3 chunk(s)");

    let requests = bridge.requests.lock().expect("lock");
    let sizes: Vec<usize> = requests.iter().map(|r| r.files.len()).collect();
    assert_eq!(sizes, vec![30, 30, 15]);
    assert!(requests.iter().all(|r| r.chunk_total == 3));
    assert!(requests.iter().all(|r| r.commit_timestamp == 1_700_000_000));
    assert_eq!(requests[1].files[0].path, "docs/page_30.md");
}

#[test]
fn failure_in_chunk_two_keeps_chunk_one_refs() {
    let bridge = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::Timeout, Reply::Refs("c3")]);
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &files(75));

    assert!(outcome.is_partial());
    assert!(!outcome.is_complete());
    assert_eq!(outcome.chunks_succeeded, 1);
    assert_eq!(outcome.refs, Some(refs("c1")));
    assert_eq!(outcome.refs_from_chunk, Some(0));
    let failure = outcome.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.chunk, 1);
    assert!(failure.reason.contains("timed out"));
    assert_eq!(outcome.summary(), "push failed partway (1 of 3 chunks)");
    // Chunk three is never attempted.
    assert_eq!(bridge.pushed_chunks(), vec![0, 1]);
}

#[test]
fn rejected_chunk_stops_the_push() {
    let bridge = ScriptedBridge::replying(vec![Reply::Reject("branch is protected")]);
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &files(40));

    assert!(!outcome.is_partial());
    assert_eq!(outcome.chunks_succeeded, 0);
    assert_eq!(
        outcome.failure.map(|f| f.reason),
        Some("branch is protected".to_string())
    );
    assert_eq!(outcome.refs, None);
}

#[test]
fn final_chunk_without_refs_falls_back() {
    let bridge = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::Refs("c2"), Reply::NoRefs]);
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &files(75));
    assert!(outcome.is_complete());
    assert_eq!(outcome.refs, Some(refs("c2")));
    assert_eq!(outcome.refs_from_chunk, Some(1));
}

#[test]
fn intermediate_chunk_without_refs_is_skipped_over() {
    let bridge = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::NoRefs, Reply::Refs("c3")]);
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &files(75));
    assert_eq!(outcome.refs, Some(refs("c3")));
    assert_eq!(outcome.refs_from_chunk, Some(2));
}

#[test]
fn cancellation_is_checked_before_each_chunk() {
    let bridge = ScriptedBridge::replying(vec![Reply::Refs("c1")]);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let outcome = PushPipeline::new(&bridge, options())
        .with_cancel(cancel)
        .run(&dest(), &files(75));

    assert!(outcome.cancelled);
    assert!(!outcome.is_complete());
    assert_eq!(outcome.chunks_succeeded, 0);
    assert!(bridge.pushed_chunks().is_empty());
    assert_eq!(outcome.summary(), "push cancelled (0 of 3 chunks)");
}

#[test]
fn resume_skips_journaled_chunks() {
    let files = files(75);
    let mut journal = MemoryJournal::new();

    let failing = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::Timeout]);
    let first = PushPipeline::new(&failing, options())
        .with_journal(&mut journal)
        .run(&dest(), &files);
    assert!(first.is_partial());
    assert_eq!(journal.completed(&first.plan_id).expect("journal").len(), 1);

    let healthy = ScriptedBridge::replying(vec![Reply::Refs("x"), Reply::Refs("c2"), Reply::NoRefs]);
    let second = PushPipeline::new(&healthy, PushOptions { resume: true, ..options() })
        .with_journal(&mut journal)
        .run(&dest(), &files);

    assert!(second.is_complete());
    assert_eq!(second.plan_id, first.plan_id);
    assert_eq!(second.chunks_resumed, 1);
    assert_eq!(second.chunks_succeeded, 3);
    assert_eq!(healthy.pushed_chunks(), vec![1, 2]);
    assert_eq!(second.refs, Some(refs("c2")));
    // A complete push clears its journal entry.
    assert!(journal.completed(&second.plan_id).expect("journal").is_empty());
}

#[test]
fn without_resume_every_chunk_is_pushed_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut journal = FileJournal::new(dir.path());
    let files = files(45);

    let failing = ScriptedBridge::replying(vec![Reply::Refs("c1"), Reply::Timeout]);
    PushPipeline::new(&failing, options())
        .with_journal(&mut journal)
        .run(&dest(), &files);
    assert!(dir.path().join(format!("{}.json", plan_id(&dest(), &files))).exists());

    let healthy = ScriptedBridge::replying(vec![Reply::Refs("a"), Reply::Refs("b")]);
    let outcome = PushPipeline::new(&healthy, options())
        .with_journal(&mut journal)
        .run(&dest(), &files);
    assert!(outcome.is_complete());
    assert_eq!(healthy.pushed_chunks(), vec![0, 1]);
}

#[test]
fn empty_push_is_trivially_complete() {
    let bridge = ScriptedBridge::default();
    let outcome = PushPipeline::new(&bridge, options()).run(&dest(), &[]);
    assert!(outcome.is_complete());
    assert_eq!(outcome.chunks_total, 0);
    assert!(bridge.pushed_chunks().is_empty());
}

#[test]
fn convergence_polls_until_visible() {
    let bridge = ScriptedBridge {
        exists_after: 3,
        ..ScriptedBridge::default()
    };
    assert!(await_convergence(&bridge, &dest(), 5, Duration::ZERO).expect("probe"));
    assert_eq!(bridge.probes.load(Ordering::SeqCst), 3);

    let never = ScriptedBridge {
        exists_after: 100,
        ..ScriptedBridge::default()
    };
    assert!(!await_convergence(&never, &dest(), 2, Duration::ZERO).expect("probe"));
}

#[test]
fn recent_commits_pages_up_to_limit() {
    let bridge = ScriptedBridge {
        commits: (0..25)
            .map(|i| CommitSummary {
                sha: format!("{i:040x}"),
                message: format!("commit {i}"),
                author: "alice".into(),
                timestamp: 1_700_000_000 - i,
            })
            .collect(),
        ..ScriptedBridge::default()
    };
    let commits = recent_commits(&bridge, &dest(), 12, 5).expect("commits");
    assert_eq!(commits.len(), 12);
    assert_eq!(commits[11].message, "commit 11");

    let all = recent_commits(&bridge, &dest(), 100, 10).expect("commits");
    assert_eq!(all.len(), 25);
}
