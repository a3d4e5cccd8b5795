//! Splitting a file set into bridge-sized chunks.
//!
//! The bridge sits behind a transport with a request body ceiling, so a
//! chunk is bounded twice: by file count and by the estimated size of the
//! JSON request it will become. Text files travel as JSON strings, anything
//! else as base64.

use std::ops::Range;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use braid_core::config::BridgeConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BridgeError;

/// Bytes per file for `{"path":..,"content":..,"encoding":..}` framing.
pub const PER_FILE_OVERHEAD: usize = 48;
/// Bytes for the request envelope around the file list.
pub const REQUEST_OVERHEAD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_files: usize,
    pub max_bytes: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_files: 30,
            max_bytes: 3 * 1024 * 1024,
        }
    }
}

impl From<&BridgeConfig> for ChunkLimits {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_files: config.max_files.max(1),
            max_bytes: config.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    Utf8,
    Base64,
}

/// One file to push, addressed by its repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub content: Vec<u8>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn encoding(&self) -> FileEncoding {
        if std::str::from_utf8(&self.content).is_ok() {
            FileEncoding::Utf8
        } else {
            FileEncoding::Base64
        }
    }

    /// Content as it goes on the wire, with its encoding.
    #[must_use]
    pub fn encoded_content(&self) -> (String, FileEncoding) {
        match std::str::from_utf8(&self.content) {
            Ok(text) => (text.to_string(), FileEncoding::Utf8),
            Err(_) => (STANDARD.encode(&self.content), FileEncoding::Base64),
        }
    }

    /// Estimated bytes this file adds to a push request.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let content = match std::str::from_utf8(&self.content) {
            Ok(text) => json_escaped_len(text),
            Err(_) => base64::encoded_len(self.content.len(), true).unwrap_or(usize::MAX),
        };
        content
            .saturating_add(json_escaped_len(&self.path))
            .saturating_add(PER_FILE_OVERHEAD)
    }
}

/// Length of `text` once written as a JSON string body.
fn json_escaped_len(text: &str) -> usize {
    text.chars()
        .map(|c| match c {
            '"' | '\\' | '\n' | '\r' | '\t' | '\u{8}' | '\u{c}' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        })
        .sum()
}

/// A contiguous run of the input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub index: usize,
    pub files: Range<usize>,
    pub estimated_bytes: usize,
}

impl ChunkPlan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Split `files` into ordered chunks within `limits`.
///
/// A file that alone exceeds `max_bytes` becomes a chunk of its own; the
/// bridge may still refuse it.
#[must_use]
pub fn plan_chunks(files: &[FileEntry], limits: ChunkLimits) -> Vec<ChunkPlan> {
    let max_files = limits.max_files.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = REQUEST_OVERHEAD;

    for (i, file) in files.iter().enumerate() {
        let size = file.estimated_size();
        let count = i - start;

        if count > 0 && (count >= max_files || bytes.saturating_add(size) > limits.max_bytes) {
            chunks.push(ChunkPlan {
                index: chunks.len(),
                files: start..i,
                estimated_bytes: bytes,
            });
            start = i;
            bytes = REQUEST_OVERHEAD;
        }

        if REQUEST_OVERHEAD.saturating_add(size) > limits.max_bytes {
            warn!(
                path = %file.path,
                estimated_bytes = size,
                max_bytes = limits.max_bytes,
                "file exceeds the chunk size limit; pushing it alone"
            );
        }
        bytes = bytes.saturating_add(size);
    }

    if start < files.len() {
        chunks.push(ChunkPlan {
            index: chunks.len(),
            files: start..files.len(),
            estimated_bytes: bytes,
        });
    }
    chunks
}

/// Read every regular file under `root`, sorted by path. `.git` and
/// `.braid` directories are skipped.
///
/// # Errors
///
/// Returns [`BridgeError::Read`] if a directory or file cannot be read.
pub fn collect_files(root: &Path) -> Result<Vec<FileEntry>, BridgeError> {
    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileEntry>) -> Result<(), BridgeError> {
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BridgeError::Read { path, source }
    };

    for entry in std::fs::read_dir(dir).map_err(read_err(dir))? {
        let entry = entry.map_err(read_err(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(read_err(&path))?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if name == ".git" || name == ".braid" {
                continue;
            }
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let content = std::fs::read(&path).map_err(read_err(&path))?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let rel = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(FileEntry::new(rel, content));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_files(n: usize) -> Vec<FileEntry> {
        (0..n)
            .map(|i| FileEntry::new(format!("src/file_{i:03}.rs"), format!("// file {i}\n")))
            .collect()
    }

    #[test]
    fn seventy_five_files_make_three_chunks() {
        let chunks = plan_chunks(&small_files(75), ChunkLimits::default());
        let sizes: Vec<usize> = chunks.iter().map(ChunkPlan::len).collect();
        assert_eq!(sizes, vec![30, 30, 15]);
        assert_eq!(chunks[1].files, 30..60);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn byte_limit_splits_before_file_limit() {
        let files: Vec<FileEntry> = (0..4)
            .map(|i| FileEntry::new(format!("f{i}"), "x".repeat(400)))
            .collect();
        let limits = ChunkLimits {
            max_files: 30,
            max_bytes: REQUEST_OVERHEAD + 2 * (400 + 2 + PER_FILE_OVERHEAD),
        };
        let chunks = plan_chunks(&files, limits);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.estimated_bytes <= limits.max_bytes));
    }

    #[test]
    fn oversized_file_travels_alone() {
        let files = vec![
            FileEntry::new("a", "small"),
            FileEntry::new("big", "y".repeat(10_000)),
            FileEntry::new("c", "small"),
        ];
        let limits = ChunkLimits {
            max_files: 30,
            max_bytes: 1_000,
        };
        let chunks = plan_chunks(&files, limits);
        let ranges: Vec<Range<usize>> = chunks.iter().map(|c| c.files.clone()).collect();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(plan_chunks(&[], ChunkLimits::default()).is_empty());
    }

    #[test]
    fn binary_content_is_estimated_as_base64() {
        let binary = FileEntry::new("img.png", vec![0xff, 0xfe, 0x00, 0x01, 0x80, 0x81]);
        assert_eq!(binary.encoding(), FileEncoding::Base64);
        assert_eq!(binary.estimated_size(), 8 + "img.png".len() + PER_FILE_OVERHEAD);
        let (content, encoding) = binary.encoded_content();
        assert_eq!(encoding, FileEncoding::Base64);
        assert_eq!(content, "//4AAYCB");
    }

    #[test]
    fn text_estimate_counts_json_escapes() {
        let text = FileEntry::new("q", "a\"b\n\u{1}");
        assert_eq!(text.encoding(), FileEncoding::Utf8);
        assert_eq!(text.estimated_size(), (1 + 2 + 1 + 2 + 6) + 1 + PER_FILE_OVERHEAD);
    }

    #[test]
    fn collect_files_walks_sorted_and_skips_git() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src/nested")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
        std::fs::write(dir.path().join("src/nested/b.rs"), "b").expect("write");
        std::fs::write(dir.path().join("README.md"), "readme").expect("write");
        std::fs::write(dir.path().join(".git/HEAD"), "ref").expect("write");

        let files = collect_files(dir.path()).expect("collect");
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/nested/b.rs"]);
    }

    #[test]
    fn limits_follow_config() {
        let config = BridgeConfig {
            url: None,
            max_files: 0,
            max_bytes: 10,
            chunk_timeout_secs: 1,
        };
        let limits = ChunkLimits::from(&config);
        assert_eq!(limits.max_files, 1);
        assert_eq!(limits.max_bytes, 10);
    }
}
