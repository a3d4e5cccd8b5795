//! The legacy content encoding.
//!
//! Older clients put structured fields in a JSON object in `content` instead
//! of tags. Every field is optional and unknown fields are ignored. A content
//! string that is not a JSON object, or an object with none of the known
//! fields, is plain text.

use serde::Deserialize;
use std::collections::BTreeMap;

/// A value that older clients wrote either as a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LegacyContent {
    pub subject: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub repo: Option<String>,
    pub name: Option<String>,
    pub clone: Option<OneOrMany>,
    pub web: Option<OneOrMany>,
    pub relays: Option<Vec<String>>,
    pub maintainers: Option<Vec<String>>,
    pub refs: Option<BTreeMap<String, String>>,
    pub head: Option<String>,
    pub status: Option<String>,
    pub amount: Option<u64>,
    pub issue: Option<String>,
}

impl LegacyContent {
    /// Decode `content`, returning `None` when it is not a JSON object
    /// carrying at least one known field.
    #[must_use]
    pub fn decode(content: &str) -> Option<Self> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed)
            .ok()
            .filter(|legacy: &Self| *legacy != Self::default())
    }

    /// The subject, under either of its historical names.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref().or(self.title.as_deref())
    }

    /// The long-form text, under either of its historical names.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref().or(self.description.as_deref())
    }
}
