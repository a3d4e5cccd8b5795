//! Bridge HTTP API.
//!
//! ```text
//! POST {base}/api/push                               PushRequest -> PushResponse
//! GET  {base}/api/repos/{owner}/{repo}/exists        -> {"exists": bool}
//! GET  {base}/api/repos/{owner}/{repo}/commits       ?branch=&page=&per_page= -> [CommitSummary]
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::chunk::{FileEncoding, FileEntry};
use crate::error::BridgeError;

/// Timeout for the small status and listing requests.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFile {
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
}

impl From<&FileEntry> for PushFile {
    fn from(entry: &FileEntry) -> Self {
        let (content, encoding) = entry.encoded_content();
        Self {
            path: entry.path.clone(),
            content,
            encoding,
        }
    }
}

/// Body of one chunk push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub files: Vec<PushFile>,
    pub commit_timestamp: u64,
    pub chunk_index: usize,
    pub chunk_total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: bool,
    /// Ref name → commit id after this chunk's commit, when reported.
    #[serde(default)]
    pub refs: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

/// The operations the push pipeline needs from a bridge.
pub trait BridgeClient: Send + Sync {
    /// Push one chunk. `timeout` bounds the whole request.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] on transport failure, timeout, or a non-2xx
    /// status.
    fn push(&self, request: &PushRequest, timeout: Duration) -> Result<PushResponse, BridgeError>;

    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the bridge cannot be queried.
    fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, BridgeError>;

    /// One page of commits on `branch`, newest first. Pages start at 1.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the bridge cannot be queried.
    fn commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, BridgeError>;
}

/// [`BridgeClient`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpBridgeClient {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpBridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().user_agent("braid").build();
        Self { base_url, agent }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn push_url(&self) -> String {
        format!("{}/api/push", self.base_url)
    }

    fn repo_url(&self, owner: &str, repo: &str, endpoint: &str) -> Result<String, BridgeError> {
        check_segment("owner", owner)?;
        check_segment("repo", repo)?;
        Ok(format!("{}/api/repos/{owner}/{repo}/{endpoint}", self.base_url))
    }

    fn get_json<T: DeserializeOwned>(&self, request: ureq::Request) -> Result<T, BridgeError> {
        let response = request.timeout(QUERY_TIMEOUT).call()?;
        response
            .into_json::<T>()
            .map_err(|err| BridgeError::Decode(err.to_string()))
    }
}

impl BridgeClient for HttpBridgeClient {
    fn push(&self, request: &PushRequest, timeout: Duration) -> Result<PushResponse, BridgeError> {
        let response = self
            .agent
            .post(&self.push_url())
            .timeout(timeout)
            .send_json(request)?;
        response
            .into_json::<PushResponse>()
            .map_err(|err| BridgeError::Decode(err.to_string()))
    }

    fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, BridgeError> {
        let url = self.repo_url(owner, repo, "exists")?;
        match self.get_json::<ExistsResponse>(self.agent.get(&url)) {
            Ok(body) => Ok(body.exists),
            Err(BridgeError::Http { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>, BridgeError> {
        let url = self.repo_url(owner, repo, "commits")?;
        let request = self
            .agent
            .get(&url)
            .query("branch", branch)
            .query("page", &page.to_string())
            .query("per_page", &per_page.to_string());
        self.get_json(request)
    }
}

/// Owner and repository names become URL path segments.
fn check_segment(what: &'static str, value: &str) -> Result<(), BridgeError> {
    let ok = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(BridgeError::InvalidName {
            what,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let client = HttpBridgeClient::new("https://bridge.example/");
        assert_eq!(client.base_url(), "https://bridge.example");
        assert_eq!(client.push_url(), "https://bridge.example/api/push");
        assert_eq!(
            client.repo_url("alice", "braid", "exists").expect("url"),
            "https://bridge.example/api/repos/alice/braid/exists"
        );
    }

    #[test]
    fn path_segments_are_checked() {
        let client = HttpBridgeClient::new("https://bridge.example");
        for bad in ["", "..", "a/b", "a b", "a?b"] {
            assert!(
                matches!(
                    client.repo_url(bad, "braid", "exists"),
                    Err(BridgeError::InvalidName { what: "owner", .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(client.repo_url("a.b_c-d", "r", "commits").is_ok());
    }

    #[test]
    fn push_request_wire_shape() {
        let request = PushRequest {
            owner: "alice".into(),
            repo: "braid".into(),
            branch: "main".into(),
            files: vec![
                PushFile::from(&FileEntry::new("a.txt", "hi")),
                PushFile::from(&FileEntry::new("b.bin", vec![0xffu8, 0x00])),
            ],
            commit_timestamp: 1_700_000_000,
            chunk_index: 0,
            chunk_total: 2,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["files"][0]["encoding"], "utf8");
        assert_eq!(json["files"][1]["encoding"], "base64");
        assert_eq!(json["files"][1]["content"], "/wA=");
        assert_eq!(json["chunk_total"], 2);
    }

    #[test]
    fn push_response_tolerates_missing_refs() {
        let response: PushResponse =
            serde_json::from_str(r#"{"accepted": true, "refs": null}"#).expect("parse");
        assert!(response.accepted);
        assert!(response.refs.is_none());
        assert!(response.message.is_none());

        let response: PushResponse = serde_json::from_str(
            r#"{"accepted": true, "refs": {"refs/heads/main": "abc123"}, "message": "ok"}"#,
        )
        .expect("parse");
        assert_eq!(
            response.refs.expect("refs").get("refs/heads/main").map(String::as_str),
            Some("abc123")
        );
    }

    #[test]
    fn commit_listing_parses() {
        let commits: Vec<CommitSummary> = serde_json::from_str(
            r#"[{"sha": "abc", "message": "init", "author": "alice", "timestamp": 5}, {"sha": "def"}]"#,
        )
        .expect("parse");
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].message, "");
    }
}
