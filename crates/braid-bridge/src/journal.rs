//! Push journal: which chunks of a plan already landed.
//!
//! A push is a saga without rollback. The journal records every chunk the
//! bridge accepted, keyed by a plan id derived from the destination and the
//! file contents, so a re-run of the same push can skip what already landed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunk::FileEntry;
use crate::error::BridgeError;

/// Where a push lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl Destination {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Stable id for pushing `files` to `dest`: BLAKE3 over the destination and
/// every `(path, content digest)` pair, in order.
#[must_use]
pub fn plan_id(dest: &Destination, files: &[FileEntry]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [&dest.owner, &dest.repo, &dest.branch] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update(&[0]);
        hasher.update(blake3::hash(&file.content).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// A chunk the bridge accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: usize,
    #[serde(default)]
    pub refs: Option<BTreeMap<String, String>>,
    pub completed_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct JournalFile {
    plan_id: String,
    chunks: BTreeMap<usize, ChunkRecord>,
}

pub trait PushJournal {
    /// Chunks already recorded for `plan_id`, keyed by chunk index.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Journal`] if stored state cannot be read.
    fn completed(&self, plan_id: &str) -> Result<BTreeMap<usize, ChunkRecord>, BridgeError>;

    /// # Errors
    ///
    /// Returns [`BridgeError::Journal`] if the record cannot be stored.
    fn record(&mut self, plan_id: &str, chunk: ChunkRecord) -> Result<(), BridgeError>;

    /// Forget a plan once every chunk landed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Journal`] if stored state cannot be removed.
    fn clear(&mut self, plan_id: &str) -> Result<(), BridgeError>;
}

#[derive(Debug, Default)]
pub struct MemoryJournal {
    plans: HashMap<String, BTreeMap<usize, ChunkRecord>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PushJournal for MemoryJournal {
    fn completed(&self, plan_id: &str) -> Result<BTreeMap<usize, ChunkRecord>, BridgeError> {
        Ok(self.plans.get(plan_id).cloned().unwrap_or_default())
    }

    fn record(&mut self, plan_id: &str, chunk: ChunkRecord) -> Result<(), BridgeError> {
        self.plans
            .entry(plan_id.to_string())
            .or_default()
            .insert(chunk.index, chunk);
        Ok(())
    }

    fn clear(&mut self, plan_id: &str) -> Result<(), BridgeError> {
        self.plans.remove(plan_id);
        Ok(())
    }
}

/// One JSON file per plan under a directory (`.braid/push/` by default).
#[derive(Debug, Clone)]
pub struct FileJournal {
    dir: PathBuf,
}

impl FileJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{plan_id}.json"))
    }

    fn journal_err(path: &Path, reason: impl std::fmt::Display) -> BridgeError {
        BridgeError::Journal {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn load(&self, plan_id: &str) -> Result<JournalFile, BridgeError> {
        let path = self.path_for(plan_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let file: JournalFile =
                    serde_json::from_str(&text).map_err(|e| Self::journal_err(&path, e))?;
                if file.plan_id != plan_id {
                    return Err(Self::journal_err(&path, "journal belongs to another plan"));
                }
                Ok(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JournalFile {
                plan_id: plan_id.to_string(),
                chunks: BTreeMap::new(),
            }),
            Err(e) => Err(Self::journal_err(&path, e)),
        }
    }

    fn store(&self, file: &JournalFile) -> Result<(), BridgeError> {
        let path = self.path_for(&file.plan_id);
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::journal_err(&self.dir, e))?;
        let json = serde_json::to_string_pretty(file).map_err(|e| Self::journal_err(&path, e))?;

        // Write then rename so a crash never leaves a torn journal.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| Self::journal_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Self::journal_err(&path, e))
    }
}

impl PushJournal for FileJournal {
    fn completed(&self, plan_id: &str) -> Result<BTreeMap<usize, ChunkRecord>, BridgeError> {
        Ok(self.load(plan_id)?.chunks)
    }

    fn record(&mut self, plan_id: &str, chunk: ChunkRecord) -> Result<(), BridgeError> {
        let mut file = self.load(plan_id)?;
        file.chunks.insert(chunk.index, chunk);
        self.store(&file)
    }

    fn clear(&mut self, plan_id: &str) -> Result<(), BridgeError> {
        let path = self.path_for(plan_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::journal_err(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, sha: Option<&str>) -> ChunkRecord {
        ChunkRecord {
            index,
            refs: sha.map(|s| BTreeMap::from([("refs/heads/main".to_string(), s.to_string())])),
            completed_at: 1_700_000_000,
        }
    }

    #[test]
    fn plan_id_depends_on_destination_and_content() {
        let dest = Destination::new("alice", "braid", "main");
        let files = vec![FileEntry::new("a", "1"), FileEntry::new("b", "2")];
        let id = plan_id(&dest, &files);
        assert_eq!(id.len(), 64);
        assert_eq!(id, plan_id(&dest, &files.clone()));

        let edited = vec![FileEntry::new("a", "1"), FileEntry::new("b", "3")];
        assert_ne!(id, plan_id(&dest, &edited));
        assert_ne!(id, plan_id(&Destination::new("alice", "braid", "dev"), &files));
        // Separators keep field boundaries distinct.
        assert_ne!(
            plan_id(&Destination::new("ab", "c", "m"), &[]),
            plan_id(&Destination::new("a", "bc", "m"), &[])
        );
    }

    #[test]
    fn memory_journal_records_and_clears() {
        let mut journal = MemoryJournal::new();
        journal.record("p", record(0, Some("aaa"))).expect("record");
        journal.record("p", record(1, None)).expect("record");
        assert_eq!(journal.completed("p").expect("load").len(), 2);
        assert!(journal.completed("other").expect("load").is_empty());
        journal.clear("p").expect("clear");
        assert!(journal.completed("p").expect("load").is_empty());
    }

    #[test]
    fn file_journal_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = FileJournal::new(dir.path().join("push"));
        assert!(journal.completed("plan").expect("empty").is_empty());

        journal.record("plan", record(0, Some("aaa"))).expect("record");
        journal.record("plan", record(1, None)).expect("record");

        let reopened = FileJournal::new(dir.path().join("push"));
        let chunks = reopened.completed("plan").expect("load");
        assert_eq!(chunks.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(chunks[&0], record(0, Some("aaa")));

        journal.clear("plan").expect("clear");
        journal.clear("plan").expect("clear twice");
        assert!(reopened.completed("plan").expect("load").is_empty());
    }

    #[test]
    fn corrupt_journal_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("plan.json"), "{not json").expect("write");
        let journal = FileJournal::new(dir.path());
        assert!(matches!(
            journal.completed("plan"),
            Err(BridgeError::Journal { .. })
        ));
    }
}
