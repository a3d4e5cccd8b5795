//! Bounty lifecycle.
//!
//! A bounty is tied to one issue and moves `pending → paid → released`, or to
//! `cancelled` from `pending` or `paid`. It changes in exactly two ways:
//!
//! - an explicit local user action, checked against the transition table;
//! - an incoming bounty event that is newer than the stored state (same
//!   precedence rule as replaceable events).
//!
//! Money movement is delegated to a [`PaymentGateway`]; braid never touches a
//! wallet directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::model::{BountyState, InvalidTransition};
use crate::resolve::Precedence;
use crate::tags::{ParsedEvent, Record};

// ---------------------------------------------------------------------------
// Payment collaborator
// ---------------------------------------------------------------------------

/// A withdraw link handed out by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawLink {
    pub id: String,
    pub url: String,
    pub amount_sats: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payment failed: {0}")]
pub struct PaymentError(pub String);

/// External payment service.
pub trait PaymentGateway {
    /// Create a withdraw link for `amount_sats`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the service refuses or is unreachable.
    fn create_withdraw_link(&self, amount_sats: u64, memo: &str) -> Result<WithdrawLink, PaymentError>;

    /// Release the escrowed funds behind `link`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the release does not go through.
    fn release_funds(&self, link: &WithdrawLink) -> Result<(), PaymentError>;
}

// ---------------------------------------------------------------------------
// Bounty
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    pub issue_id: String,
    pub amount_sats: Option<u64>,
    pub state: BountyState,
    /// Timestamp of the last accepted change.
    pub updated_at: u64,
    /// Event that produced the current state. `None` after a local action
    /// that has not been published yet.
    pub event_id: Option<String>,
    pub withdraw_link: Option<WithdrawLink>,
}

impl Bounty {
    fn precedence(&self) -> Precedence<'_> {
        Precedence::new(self.updated_at, self.event_id.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BountyError {
    #[error("no bounty exists for issue {0}")]
    NotFound(String),

    #[error("invalid bounty transition: {0}")]
    Transition(#[from] InvalidTransition),

    #[error("bounty on {0} has no amount to pay out")]
    MissingAmount(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

// ---------------------------------------------------------------------------
// BountyBook
// ---------------------------------------------------------------------------

/// All bounties known locally, keyed by issue id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BountyBook {
    bounties: BTreeMap<String, Bounty>,
}

impl BountyBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, issue_id: &str) -> Option<&Bounty> {
        self.bounties.get(issue_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bounty> {
        self.bounties.values()
    }

    /// Insert a stored bounty as-is (used when loading the projection).
    pub fn restore(&mut self, bounty: Bounty) {
        self.bounties.insert(bounty.issue_id.clone(), bounty);
    }

    /// Offer an incoming bounty event. Returns `true` if it became current.
    pub fn apply_event(&mut self, parsed: &ParsedEvent) -> bool {
        let Record::Bounty(offer) = &parsed.record else {
            return false;
        };
        let incoming = Precedence::new(parsed.created_at(), parsed.id());
        if let Some(existing) = self.bounties.get(&offer.issue) {
            if incoming <= existing.precedence() {
                debug!(issue = %offer.issue, event_id = %parsed.event.short_id(), "ignoring stale bounty event");
                return false;
            }
        }
        let previous_link = self
            .bounties
            .get(&offer.issue)
            .and_then(|b| b.withdraw_link.clone());
        let amount_sats = offer.amount_sats.or_else(|| {
            self.bounties
                .get(&offer.issue)
                .and_then(|b| b.amount_sats)
        });
        self.bounties.insert(
            offer.issue.clone(),
            Bounty {
                issue_id: offer.issue.clone(),
                amount_sats,
                state: offer.state,
                updated_at: parsed.created_at(),
                event_id: Some(parsed.id().to_string()),
                withdraw_link: previous_link,
            },
        );
        true
    }

    /// Open a new pending bounty on an issue. Returns `false` if one exists.
    pub fn offer(&mut self, issue_id: &str, amount_sats: u64, at: u64) -> bool {
        if self.bounties.contains_key(issue_id) {
            return false;
        }
        self.bounties.insert(
            issue_id.to_string(),
            Bounty {
                issue_id: issue_id.to_string(),
                amount_sats: Some(amount_sats),
                state: BountyState::Pending,
                updated_at: at,
                event_id: None,
                withdraw_link: None,
            },
        );
        true
    }

    /// Apply an explicit user action.
    ///
    /// Releasing funds creates a withdraw link and asks the gateway to
    /// release it; the state only changes if both calls succeed.
    ///
    /// # Errors
    ///
    /// - [`BountyError::NotFound`] if the issue has no bounty.
    /// - [`BountyError::Transition`] if the lifecycle forbids the move.
    /// - [`BountyError::MissingAmount`] when releasing a bounty of unknown size.
    /// - [`BountyError::Payment`] if the gateway fails.
    pub fn user_action(
        &mut self,
        issue_id: &str,
        target: BountyState,
        at: u64,
        gateway: &dyn PaymentGateway,
    ) -> Result<&Bounty, BountyError> {
        let bounty = self
            .bounties
            .get_mut(issue_id)
            .ok_or_else(|| BountyError::NotFound(issue_id.to_string()))?;
        bounty.state.can_transition_to(target)?;

        if target == BountyState::Released {
            let amount = bounty
                .amount_sats
                .ok_or_else(|| BountyError::MissingAmount(issue_id.to_string()))?;
            let memo = format!("bounty for issue {issue_id}");
            let link = gateway.create_withdraw_link(amount, &memo).inspect_err(|e| {
                warn!(issue = issue_id, error = %e, "could not create withdraw link");
            })?;
            gateway.release_funds(&link).inspect_err(|e| {
                warn!(issue = issue_id, error = %e, "could not release funds");
            })?;
            bounty.withdraw_link = Some(link);
        }

        info!(issue = issue_id, from = %bounty.state, to = %target, "bounty transition");
        bounty.state = target;
        bounty.updated_at = bounty.updated_at.max(at);
        bounty.event_id = None;
        Ok(bounty)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, EventKind, Keys};
    use crate::tags::parse;
    use std::cell::RefCell;

    const ISSUE: &str = "4444444444444444444444444444444444444444444444444444444444444444";

    #[derive(Default)]
    struct MockGateway {
        fail_release: bool,
        calls: RefCell<Vec<String>>,
    }

    impl PaymentGateway for MockGateway {
        fn create_withdraw_link(&self, amount_sats: u64, memo: &str) -> Result<WithdrawLink, PaymentError> {
            self.calls.borrow_mut().push(format!("create:{amount_sats}:{memo}"));
            Ok(WithdrawLink {
                id: "w1".into(),
                url: "lnurl1".into(),
                amount_sats,
            })
        }

        fn release_funds(&self, link: &WithdrawLink) -> Result<(), PaymentError> {
            self.calls.borrow_mut().push(format!("release:{}", link.id));
            if self.fail_release {
                Err(PaymentError("node offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn bounty_event(state: &str, amount: Option<&str>, created_at: u64) -> ParsedEvent {
        let mut builder = EventBuilder::new(EventKind::Bounty, "")
            .tag(["e", ISSUE, "", "root"])
            .tag(["status", state])
            .created_at(created_at);
        if let Some(amount) = amount {
            builder = builder.tag(["amount", amount]);
        }
        parse(builder.sign(&Keys::from_secret_bytes([6u8; 32])))
    }

    #[test]
    fn happy_path_pays_and_releases() {
        let gateway = MockGateway::default();
        let mut book = BountyBook::new();
        assert!(book.offer(ISSUE, 2_000, 10));
        book.user_action(ISSUE, BountyState::Paid, 20, &gateway)
            .expect("pending -> paid");
        let bounty = book
            .user_action(ISSUE, BountyState::Released, 30, &gateway)
            .expect("paid -> released");
        assert_eq!(bounty.state, BountyState::Released);
        assert_eq!(bounty.withdraw_link.as_ref().map(|l| l.amount_sats), Some(2_000));
        assert_eq!(
            gateway.calls.borrow().as_slice(),
            ["create:2000:bounty for issue 4444444444444444444444444444444444444444444444444444444444444444", "release:w1"]
        );
    }

    #[test]
    fn release_from_pending_is_rejected() {
        let gateway = MockGateway::default();
        let mut book = BountyBook::new();
        book.offer(ISSUE, 1, 10);
        let err = book
            .user_action(ISSUE, BountyState::Released, 20, &gateway)
            .expect_err("pending -> released skips paid");
        assert!(matches!(err, BountyError::Transition(_)));
        assert!(gateway.calls.borrow().is_empty());
    }

    #[test]
    fn failed_release_keeps_state() {
        let gateway = MockGateway {
            fail_release: true,
            ..MockGateway::default()
        };
        let mut book = BountyBook::new();
        book.offer(ISSUE, 1, 10);
        book.user_action(ISSUE, BountyState::Paid, 20, &gateway)
            .expect("pending -> paid");
        let err = book
            .user_action(ISSUE, BountyState::Released, 30, &gateway)
            .expect_err("gateway failure");
        assert!(matches!(err, BountyError::Payment(_)));
        assert_eq!(book.get(ISSUE).map(|b| b.state), Some(BountyState::Paid));
    }

    #[test]
    fn unknown_issue_is_not_found() {
        let mut book = BountyBook::new();
        let err = book
            .user_action(ISSUE, BountyState::Paid, 1, &MockGateway::default())
            .expect_err("no bounty");
        assert!(matches!(err, BountyError::NotFound(_)));
    }

    #[test]
    fn newer_event_wins_older_is_ignored() {
        let mut book = BountyBook::new();
        assert!(book.apply_event(&bounty_event("paid", Some("500"), 20)));
        assert!(!book.apply_event(&bounty_event("pending", Some("100"), 10)));
        let bounty = book.get(ISSUE).expect("bounty");
        assert_eq!(bounty.state, BountyState::Paid);
        assert_eq!(bounty.amount_sats, Some(500));
    }

    #[test]
    fn event_without_amount_keeps_known_amount() {
        let mut book = BountyBook::new();
        book.apply_event(&bounty_event("pending", Some("700"), 10));
        book.apply_event(&bounty_event("cancelled", None, 20));
        let bounty = book.get(ISSUE).expect("bounty");
        assert_eq!(bounty.state, BountyState::Cancelled);
        assert_eq!(bounty.amount_sats, Some(700));
    }

    #[test]
    fn duplicate_event_is_idempotent() {
        let event = bounty_event("paid", Some("1"), 20);
        let mut book = BountyBook::new();
        assert!(book.apply_event(&event));
        let snapshot = book.clone();
        assert!(!book.apply_event(&event));
        assert_eq!(book, snapshot);
    }

    #[test]
    fn event_newer_than_local_action_overrides_it() {
        let gateway = MockGateway::default();
        let mut book = BountyBook::new();
        book.offer(ISSUE, 10, 10);
        book.user_action(ISSUE, BountyState::Paid, 20, &gateway)
            .expect("pending -> paid");
        assert!(!book.apply_event(&bounty_event("cancelled", None, 15)));
        assert!(book.apply_event(&bounty_event("cancelled", None, 25)));
        assert_eq!(book.get(ISSUE).map(|b| b.state), Some(BountyState::Cancelled));
    }

    #[test]
    fn non_bounty_events_are_ignored() {
        let issue = parse(
            EventBuilder::new(EventKind::Issue, "")
                .created_at(1)
                .sign(&Keys::from_secret_bytes([6u8; 32])),
        );
        let mut book = BountyBook::new();
        assert!(!book.apply_event(&issue));
        assert_eq!(book.iter().count(), 0);
    }
}
