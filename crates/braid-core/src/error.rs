use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ItemNotFound,
    InvalidStateTransition,
    RelaysUnreachable,
    SettlementPartial,
    PushPartial,
    BridgeUnavailable,
    NoSigner,
    CorruptProjection,
    LockContention,
    PaymentFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::RelaysUnreachable => "E4001",
            Self::SettlementPartial => "E4002",
            Self::PushPartial => "E4101",
            Self::BridgeUnavailable => "E4102",
            Self::NoSigner => "E4201",
            Self::CorruptProjection => "E3003",
            Self::LockContention => "E5002",
            Self::PaymentFailed => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Item not found",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::RelaysUnreachable => "Could not reach any relay",
            Self::SettlementPartial => "Some relays did not finish sending stored events",
            Self::PushPartial => "Push failed partway",
            Self::BridgeUnavailable => "Bridge unavailable",
            Self::NoSigner => "No valid signing method available",
            Self::CorruptProjection => "Corrupt SQLite projection",
            Self::LockContention => "Lock contention",
            Self::PaymentFailed => "Payment collaborator failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `braid sync` to create the local projection."),
            Self::ConfigParseError => Some("Fix syntax in .braid/config.toml and retry."),
            Self::ItemNotFound => Some("Run `braid sync` to fetch the item from relays."),
            Self::InvalidStateTransition => {
                Some("Bounties move pending -> paid -> released, or to cancelled.")
            }
            Self::RelaysUnreachable => {
                Some("Check [relays] urls in .braid/config.toml or set BRAID_RELAYS.")
            }
            Self::SettlementPartial => Some("Results may be incomplete; run `braid sync` again later."),
            Self::PushPartial => Some("Re-run the push with --resume to continue after the last landed chunk."),
            Self::BridgeUnavailable => Some("Check [bridge] url and network connectivity."),
            Self::NoSigner => Some("Set BRAID_SECRET_KEY or secret_key_path in the user config."),
            Self::CorruptProjection => Some("Run `braid rebuild` to repair the SQLite projection."),
            Self::LockContention => Some("Retry after the other `braid` process releases its lock."),
            Self::PaymentFailed => Some("Retry the bounty action; the payment provider may be down."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
