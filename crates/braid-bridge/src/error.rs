use std::path::PathBuf;

/// Failures talking to the bridge or keeping push state.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("bridge request failed: {0}")]
    Transport(String),

    #[error("could not decode bridge response: {0}")]
    Decode(String),

    #[error("invalid {what} '{value}': only letters, digits, '.', '_' and '-' are allowed")]
    InvalidName { what: &'static str, value: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("push journal error at {}: {reason}", path.display())]
    Journal { path: PathBuf, reason: String },
}

impl From<ureq::Error> for BridgeError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response
                    .into_string()
                    .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
                Self::Http { status, body }
            }
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}
