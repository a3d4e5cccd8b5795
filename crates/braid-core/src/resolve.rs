//! Replaceable-event resolver.
//!
//! Keeps exactly one current event per `(author, kind, d-identifier)` key.
//! The resolution rule is a total order over events, so applying any set of
//! events in any order, any number of times, lands on the same current record.
//!
//! # Precedence
//!
//! Given two events `a` and `b` for the same key:
//!
//! 1. **Timestamp**: greater `created_at` wins.
//! 2. **Event id**: on equal timestamps, the lexicographically *smaller* id
//!    wins. Ids are unique, so no ties remain.
//!
//! The same precedence decides status events and bounty events.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::event::Event;
use crate::tags::{ParsedEvent, ReplaceableKey};

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

/// Latest-wins ordering key of an event. A greater `Precedence` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Precedence<'a> {
    pub created_at: u64,
    pub id: &'a str,
}

impl<'a> Precedence<'a> {
    #[must_use]
    pub const fn new(created_at: u64, id: &'a str) -> Self {
        Self { created_at, id }
    }

    #[must_use]
    pub fn of(event: &'a Event) -> Self {
        Self::new(event.created_at, &event.id)
    }
}

impl Ord for Precedence<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            // Reversed: the smaller id ranks higher.
            .then_with(|| other.id.cmp(self.id))
    }
}

impl PartialOrd for Precedence<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns `true` if `candidate` replaces `current`.
#[must_use]
pub fn supersedes(candidate: &Event, current: &Event) -> bool {
    Precedence::of(candidate) > Precedence::of(current)
}

// ---------------------------------------------------------------------------
// ReplaceableResolver
// ---------------------------------------------------------------------------

/// In-memory map from replaceable key to its current event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceableResolver {
    current: BTreeMap<ReplaceableKey, ParsedEvent>,
}

impl ReplaceableResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an event.
    ///
    /// Returns `None` for non-replaceable kinds. Otherwise returns the current
    /// record for the event's key after the offer: the incoming event if it
    /// was installed, or the unchanged existing record if it lost.
    pub fn apply(&mut self, parsed: ParsedEvent) -> Option<&ParsedEvent> {
        let key = parsed.replaceable_key()?;
        let install = self
            .current
            .get(&key)
            .is_none_or(|existing| supersedes(&parsed.event, &existing.event));
        if install {
            self.current.insert(key.clone(), parsed);
        } else {
            debug!(%key, event_id = %parsed.event.short_id(), "discarding superseded replaceable event");
        }
        self.current.get(&key)
    }

    /// Current record for `key`.
    #[must_use]
    pub fn get(&self, key: &ReplaceableKey) -> Option<&ParsedEvent> {
        self.current.get(key)
    }

    /// Join another resolver into this one.
    pub fn merge(&mut self, other: &Self) {
        for parsed in other.current.values() {
            self.apply(parsed.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplaceableKey, &ParsedEvent)> {
        self.current.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
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

    fn announcement(keys: &Keys, d: &str, created_at: u64, name: &str) -> ParsedEvent {
        parse(
            EventBuilder::new(EventKind::RepoAnnouncement, "")
                .tag(["d", d])
                .tag(["name", name])
                .created_at(created_at)
                .sign(keys),
        )
    }

    #[test]
    fn precedence_orders_by_time_then_smaller_id() {
        assert!(Precedence::new(2, "ff") > Precedence::new(1, "00"));
        assert!(Precedence::new(1, "aa") > Precedence::new(1, "bb"));
        assert_eq!(
            Precedence::new(1, "aa").cmp(&Precedence::new(1, "aa")),
            Ordering::Equal
        );
    }

    #[test]
    fn converges_to_greatest_timestamp_in_any_order() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let events: Vec<_> = [10, 30, 20]
            .into_iter()
            .map(|t| announcement(&keys, "braid", t, &format!("v{t}")))
            .collect();

        let mut forward = ReplaceableResolver::new();
        for e in events.iter().cloned() {
            forward.apply(e);
        }
        let mut reverse = ReplaceableResolver::new();
        for e in events.iter().rev().cloned() {
            reverse.apply(e);
        }

        assert_eq!(forward, reverse);
        let key = events[0].replaceable_key().expect("replaceable");
        assert_eq!(forward.get(&key).map(ParsedEvent::created_at), Some(30));
    }

    #[test]
    fn apply_returns_existing_when_older() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let mut resolver = ReplaceableResolver::new();
        let newer = announcement(&keys, "braid", 30, "new");
        let newer_id = newer.id().to_string();
        resolver.apply(newer);
        let current = resolver
            .apply(announcement(&keys, "braid", 10, "old"))
            .expect("current");
        assert_eq!(current.id(), newer_id);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let event = announcement(&keys, "braid", 10, "x");
        let mut once = ReplaceableResolver::new();
        once.apply(event.clone());
        let mut twice = once.clone();
        twice.apply(event);
        assert_eq!(once, twice);
    }

    #[test]
    fn equal_timestamps_pick_smaller_id_regardless_of_order() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let a = announcement(&keys, "braid", 10, "a");
        let b = announcement(&keys, "braid", 10, "b");
        let expected = std::cmp::min(a.id().to_string(), b.id().to_string());

        let mut ab = ReplaceableResolver::new();
        ab.apply(a.clone());
        ab.apply(b.clone());
        let mut ba = ReplaceableResolver::new();
        ba.apply(b);
        ba.apply(a.clone());

        let key = a.replaceable_key().expect("replaceable");
        assert_eq!(ab.get(&key).map(ParsedEvent::id), Some(expected.as_str()));
        assert_eq!(ab, ba);
    }

    #[test]
    fn keys_are_independent() {
        let alice = Keys::from_secret_bytes([1u8; 32]);
        let bob = Keys::from_secret_bytes([2u8; 32]);
        let mut resolver = ReplaceableResolver::new();
        resolver.apply(announcement(&alice, "braid", 10, "a"));
        resolver.apply(announcement(&alice, "other", 5, "a"));
        resolver.apply(announcement(&bob, "braid", 1, "b"));
        assert_eq!(resolver.len(), 3);
    }

    #[test]
    fn non_replaceable_returns_none() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let issue = parse(
            EventBuilder::new(EventKind::Issue, "")
                .created_at(1)
                .sign(&keys),
        );
        let mut resolver = ReplaceableResolver::new();
        assert!(resolver.apply(issue).is_none());
        assert!(resolver.is_empty());
    }

    #[test]
    fn merge_is_a_join() {
        let keys = Keys::from_secret_bytes([1u8; 32]);
        let mut left = ReplaceableResolver::new();
        left.apply(announcement(&keys, "braid", 10, "l"));
        let mut right = ReplaceableResolver::new();
        right.apply(announcement(&keys, "braid", 20, "r"));
        right.apply(announcement(&keys, "side", 1, "r"));

        let mut lr = left.clone();
        lr.merge(&right);
        let mut rl = right.clone();
        rl.merge(&left);
        assert_eq!(lr, rl);
        assert_eq!(lr.len(), 2);
    }
}
