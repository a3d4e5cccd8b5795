use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The three root item families a status event can be filtered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootFamily {
    Issue,
    Patch,
    PullRequest,
}

impl RootFamily {
    pub const ALL: [Self; 3] = [Self::Issue, Self::Patch, Self::PullRequest];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Patch => "patch",
            Self::PullRequest => "pull-request",
        }
    }

    /// The event kind number that creates a root item of this family.
    #[must_use]
    pub const fn kind_number(self) -> u32 {
        match self {
            Self::Issue => 1621,
            Self::Patch => 1617,
            Self::PullRequest => 1618,
        }
    }

    /// Resolve a `k` filter tag value (a kind number rendered as text).
    #[must_use]
    pub fn from_kind_tag(value: &str) -> Option<Self> {
        match value.trim() {
            "1621" => Some(Self::Issue),
            "1617" => Some(Self::Patch),
            "1618" => Some(Self::PullRequest),
            _ => None,
        }
    }
}

/// The four lifecycle states a root item can be in.
///
/// There is no terminal state: a later status event can move an item from
/// any state to any other (reopen, un-merge, re-draft).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Open,
    Applied,
    Closed,
    Draft,
}

impl LifecycleState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Applied => "applied",
            Self::Closed => "closed",
            Self::Draft => "draft",
        }
    }

    /// Wording used when rendering a state for a given family; applied
    /// issues read as resolved, applied pull requests as merged.
    #[must_use]
    pub const fn label_for(self, family: RootFamily) -> &'static str {
        match (self, family) {
            (Self::Applied, RootFamily::Issue) => "resolved",
            (Self::Applied, RootFamily::PullRequest | RootFamily::Patch) => "merged",
            (other, _) => other.as_str(),
        }
    }
}

/// Payment lifecycle of a bounty attached to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BountyState {
    Pending,
    Paid,
    Released,
    Cancelled,
}

impl BountyState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
        }
    }

    /// Validate whether an explicit user transition from self to `target` is
    /// allowed.
    ///
    /// Valid transitions:
    /// - `pending -> paid`
    /// - `paid -> released`
    /// - `pending -> cancelled`
    /// - `paid -> cancelled`
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for no-op transitions and for anything
    /// leaving `released` or `cancelled`.
    pub fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition> {
        if self == target {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        let allowed = matches!(
            (self, target),
            (Self::Pending, Self::Paid | Self::Cancelled)
                | (Self::Paid, Self::Released | Self::Cancelled)
        );

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "transition not allowed by bounty lifecycle rules",
            })
        }
    }
}

/// A rejected bounty state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: BountyState,
    pub to: BountyState,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid bounty transition {} -> {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Error returned when parsing an unknown enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError {
    pub expected: &'static str,
    pub raw: String,
}

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} value '{}'", self.expected, self.raw)
    }
}

impl std::error::Error for ParseValueError {}

impl fmt::Display for RootFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BountyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RootFamily {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "issue" => Ok(Self::Issue),
            "patch" => Ok(Self::Patch),
            "pull-request" | "pr" => Ok(Self::PullRequest),
            _ => Err(ParseValueError {
                expected: "family",
                raw: s.to_string(),
            }),
        }
    }
}

impl FromStr for LifecycleState {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "applied" | "merged" | "resolved" => Ok(Self::Applied),
            "closed" => Ok(Self::Closed),
            "draft" => Ok(Self::Draft),
            _ => Err(ParseValueError {
                expected: "state",
                raw: s.to_string(),
            }),
        }
    }
}

impl FromStr for BountyState {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "released" => Ok(Self::Released),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ParseValueError {
                expected: "bounty state",
                raw: s.to_string(),
            }),
        }
    }
}
