//! Relay self-description document.
//!
//! Relays publish a JSON document describing themselves at their HTTP(S)
//! origin, served when the request carries
//! `Accept: application/nostr+json`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

const ACCEPT: &str = "application/nostr+json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default)]
    pub supported_nips: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human descriptions of the custom kinds this relay hosts, keyed by kind
    /// number.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kinds: BTreeMap<String, String>,
    /// Fields this struct does not model (limitations, fees, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RelayInfo {
    /// # Errors
    ///
    /// Returns an error if `json` is not a JSON object of the expected shape.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn supports(&self, nip: u32) -> bool {
        self.supported_nips.contains(&nip)
    }

    #[must_use]
    pub fn kind_description(&self, kind: u32) -> Option<&str> {
        self.kinds.get(&kind.to_string()).map(String::as_str)
    }
}

/// HTTP(S) URL the document is served from for a relay URL.
///
/// # Errors
///
/// Returns [`RelayError::Info`] for URLs that are neither WebSocket nor HTTP.
pub fn info_url(relay_url: &str) -> Result<String, RelayError> {
    let url = relay_url.trim();
    if let Some(rest) = url.strip_prefix("wss://") {
        Ok(format!("https://{rest}"))
    } else if let Some(rest) = url.strip_prefix("ws://") {
        Ok(format!("http://{rest}"))
    } else if url.starts_with("https://") || url.starts_with("http://") {
        Ok(url.to_string())
    } else {
        Err(RelayError::Info {
            url: relay_url.to_string(),
            reason: "expected a ws://, wss://, http:// or https:// URL".into(),
        })
    }
}

/// Fetch and decode the document. Blocking.
///
/// # Errors
///
/// Returns [`RelayError::Info`] if the request fails or the body does not
/// decode.
pub fn fetch_info_blocking(relay_url: &str, timeout: Duration) -> Result<RelayInfo, RelayError> {
    let url = info_url(relay_url)?;
    let fail = |reason: String| RelayError::Info {
        url: url.clone(),
        reason,
    };

    let response = ureq::get(&url)
        .set("Accept", ACCEPT)
        .set("User-Agent", "braid")
        .timeout(timeout)
        .call()
        .map_err(|err| fail(err.to_string()))?;

    let info = response
        .into_json::<RelayInfo>()
        .map_err(|err| fail(format!("invalid relay document: {err}")))?;
    tracing::debug!(relay = relay_url, name = ?info.name, "fetched relay info");
    Ok(info)
}

/// Async wrapper over [`fetch_info_blocking`].
///
/// # Errors
///
/// Same as [`fetch_info_blocking`].
pub async fn fetch_info(relay_url: &str, timeout: Duration) -> Result<RelayInfo, RelayError> {
    let owned = relay_url.to_string();
    tokio::task::spawn_blocking(move || fetch_info_blocking(&owned, timeout))
        .await
        .map_err(|err| RelayError::Info {
            url: relay_url.to_string(),
            reason: format!("info task failed: {err}"),
        })?
}
