//! Relay wire protocol.
//!
//! Every frame is a JSON array whose first element names the message:
//!
//! ```text
//! client → relay   ["REQ", <sub>, <filter>...]   ["CLOSE", <sub>]   ["EVENT", <event>]
//! relay → client   ["EVENT", <sub>, <event>]     ["EOSE", <sub>]
//!                  ["OK", <id>, <bool>, <msg>]   ["NOTICE", <msg>]  ["CLOSED", <sub>, <msg>]
//! ```

use braid_core::event::{Event, EventKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// A frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {kind} frame: {reason}")]
    Shape { kind: String, reason: &'static str },

    #[error("unknown frame type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Subscription filter. Empty fields are unconstrained; tag constraints are
/// serialized as `"#<letter>": [...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds.extend(kinds.into_iter().map(EventKind::as_u32));
        self
    }

    /// Require a tag named `letter` with one of `values`.
    #[must_use]
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(format!("#{letter}"))
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub const fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies this filter. Relays do the real filtering;
    /// this is used by in-memory relays in tests and for sanity checks.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id.eq_ignore_ascii_case(&event.id)) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u32()) {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since)
            || self.until.is_some_and(|until| event.created_at > until)
        {
            return false;
        }
        self.tags.iter().all(|(key, wanted)| {
            let name = key.trim_start_matches('#');
            event.tags.iter().any(|tag| {
                tag.len() >= 2 && tag[0] == name && wanted.iter().any(|w| *w == tag[1])
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
    Event(Box<Event>),
}

impl ClientMessage {
    /// Encode as a compact JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a filter or event fails to serialize.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let frame = match self {
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut array = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    array.push(serde_json::to_value(filter)?);
                }
                Value::Array(array)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
            Self::Event(event) => json!(["EVENT", serde_json::to_value(event.as_ref())?]),
        };
        Ok(frame.to_string())
    }

    /// Decode a client frame (used by in-memory relays).
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] for invalid JSON or an unexpected shape.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let (kind, items) = split_frame(text)?;
        match kind.as_str() {
            "REQ" => {
                let subscription_id = string_at(&items, 0, &kind, "missing subscription id")?;
                let filters = items
                    .into_iter()
                    .skip(1)
                    .map(serde_json::from_value)
                    .collect::<Result<_, _>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close(string_at(&items, 0, &kind, "missing subscription id")?)),
            "EVENT" => {
                let event = items.into_iter().next().ok_or(MessageError::Shape {
                    kind: kind.clone(),
                    reason: "missing event",
                })?;
                Ok(Self::Event(Box::new(serde_json::from_value(event)?)))
            }
            _ => Err(MessageError::UnknownType(kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    Eose(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Closed {
        subscription_id: String,
        message: String,
    },
}

impl RelayMessage {
    /// Decode a relay frame.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] for invalid JSON, an unknown frame type, or a
    /// frame missing required elements.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let (kind, items) = split_frame(text)?;
        match kind.as_str() {
            "EVENT" => {
                let subscription_id = string_at(&items, 0, &kind, "missing subscription id")?;
                let event = items.into_iter().nth(1).ok_or(MessageError::Shape {
                    kind: kind.clone(),
                    reason: "missing event",
                })?;
                Ok(Self::Event {
                    subscription_id,
                    event: Box::new(serde_json::from_value(event)?),
                })
            }
            "EOSE" => Ok(Self::Eose(string_at(&items, 0, &kind, "missing subscription id")?)),
            "OK" => Ok(Self::Ok {
                event_id: string_at(&items, 0, &kind, "missing event id")?,
                accepted: items.get(1).and_then(Value::as_bool).ok_or(MessageError::Shape {
                    kind: kind.clone(),
                    reason: "missing accepted flag",
                })?,
                message: optional_string_at(&items, 2),
            }),
            "NOTICE" => Ok(Self::Notice(optional_string_at(&items, 0))),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(&items, 0, &kind, "missing subscription id")?,
                message: optional_string_at(&items, 1),
            }),
            _ => Err(MessageError::UnknownType(kind)),
        }
    }

    /// Encode as a compact JSON frame (used by in-memory relays).
    ///
    /// # Errors
    ///
    /// Returns an error if the event fails to serialize.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let frame = match self {
            Self::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, serde_json::to_value(event.as_ref())?]),
            Self::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            Self::Notice(message) => json!(["NOTICE", message]),
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
        };
        Ok(frame.to_string())
    }
}

fn split_frame(text: &str) -> Result<(String, Vec<Value>), MessageError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(mut items) = value else {
        return Err(MessageError::Shape {
            kind: "frame".into(),
            reason: "not a JSON array",
        });
    };
    if items.is_empty() {
        return Err(MessageError::Shape {
            kind: "frame".into(),
            reason: "empty array",
        });
    }
    let Value::String(kind) = items.remove(0) else {
        return Err(MessageError::Shape {
            kind: "frame".into(),
            reason: "first element is not a string",
        });
    };
    Ok((kind, items))
}

fn string_at(
    items: &[Value],
    index: usize,
    kind: &str,
    reason: &'static str,
) -> Result<String, MessageError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| MessageError::Shape {
            kind: kind.to_string(),
            reason,
        })
}

fn optional_string_at(items: &[Value], index: usize) -> String {
    items
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
