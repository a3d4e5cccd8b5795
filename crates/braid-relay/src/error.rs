use std::time::Duration;

use crate::message::MessageError;

/// Failures talking to a relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("{url} did not answer within {waited:?}")]
    Timeout { url: String, waited: Duration },

    #[error("transport error on {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("connection to {0} closed")]
    Closed(String),

    #[error(transparent)]
    Codec(#[from] MessageError),

    #[error("could not reach any relay")]
    NoRelayReachable,

    #[error("no relays configured")]
    NoRelays,

    #[error("relay info request to {url} failed: {reason}")]
    Info { url: String, reason: String },
}
