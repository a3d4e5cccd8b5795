//! Replicas that see the same event set, in any order and with any number of
//! duplicates, converge to the same projection.

use braid_core::db::open_in_memory;
use braid_core::db::project::Projector;
use braid_core::db::query::{self, ItemFilter, ItemSummary};
use braid_core::event::{Event, EventBuilder, EventKind, Keys};
use braid_core::model::LifecycleState;
use braid_core::status::StatusPolicy;
use braid_core::tags::{Record, RepoAddress};
use rusqlite::Connection;

fn alice() -> Keys {
    Keys::from_secret_bytes([1u8; 32])
}

fn bob() -> Keys {
    Keys::from_secret_bytes([2u8; 32])
}

fn repo() -> RepoAddress {
    RepoAddress::new(alice().public_key_hex(), "braid")
}

fn announcement(name: &str, at: u64) -> Event {
    EventBuilder::new(EventKind::RepoAnnouncement, "")
        .tag(["d", "braid"])
        .tag(["name", name])
        .created_at(at)
        .sign(&alice())
}

fn issue(subject: &str, at: u64) -> Event {
    EventBuilder::new(EventKind::Issue, "")
        .tag(["subject", subject])
        .tag(["a", repo().to_string().as_str()])
        .created_at(at)
        .sign(&bob())
}

fn status(kind: EventKind, root: &str, at: u64, keys: &Keys) -> Event {
    EventBuilder::new(kind, "")
        .tag(["e", root, "", "root"])
        .created_at(at)
        .sign(keys)
}

fn scenario() -> Vec<Event> {
    let first = issue("Crash on start", 100);
    let second = issue("Docs typo", 105);
    vec![
        announcement("ten", 10),
        announcement("thirty", 30),
        announcement("twenty", 20),
        status(EventKind::StatusOpen, &first.id, 100, &alice()),
        status(EventKind::StatusClosed, &first.id, 200, &alice()),
        status(EventKind::StatusApplied, &first.id, 150, &bob()),
        status(EventKind::StatusDraft, &second.id, 110, &bob()),
        EventBuilder::new(EventKind::Comment, "seen it too")
            .tag(["E", first.id.as_str()])
            .created_at(120)
            .sign(&alice()),
        first,
        second,
    ]
}

fn project(events: &[Event]) -> Connection {
    let conn = open_in_memory().expect("open db");
    let stats = Projector::new(&conn)
        .with_scope(repo().to_string())
        .project_batch(events)
        .expect("project batch");
    assert_eq!(stats.errors, 0, "projection had errors");
    conn
}

fn items(conn: &Connection) -> Vec<ItemSummary> {
    query::list_items(conn, &ItemFilter::default(), StatusPolicy::Anyone).expect("list")
}

fn announced_name(conn: &Connection) -> Option<String> {
    query::repo_announcement(conn, &repo())
        .expect("announcement")
        .and_then(|a| a.name)
}

#[test]
fn replaceable_converges_to_newest_in_both_orders() {
    let forward = [announcement("ten", 10), announcement("thirty", 30), announcement("twenty", 20)];
    let mut backward = forward.clone();
    backward.reverse();

    for order in [forward.to_vec(), backward.to_vec()] {
        let conn = project(&order);
        assert_eq!(announced_name(&conn).as_deref(), Some("thirty"));
        let stored = query::get_replaceable(&conn, &repo().announcement_key())
            .expect("query")
            .expect("stored");
        assert_eq!(stored.created_at, 30);
        assert!(matches!(stored.record, Record::RepoAnnouncement(_)));
    }
}

#[test]
fn status_example_derives_closed() {
    let conn = project(&scenario());
    let crash = items(&conn)
        .into_iter()
        .find(|i| i.subject.as_deref() == Some("Crash on start"))
        .expect("crash item");
    assert_eq!(crash.status.state, LifecycleState::Closed);
    assert_eq!(crash.status.since, 200);
}

#[test]
fn permutations_and_duplicates_converge() {
    let events = scenario();
    let baseline = project(&events);

    let mut reversed = events.clone();
    reversed.reverse();

    let mut rotated = events.clone();
    rotated.rotate_left(4);

    let mut doubled = events.clone();
    doubled.extend(events.iter().rev().cloned());

    for variant in [reversed, rotated, doubled] {
        let conn = project(&variant);
        assert_eq!(items(&conn), items(&baseline));
        assert_eq!(announced_name(&conn), announced_name(&baseline));
        assert_eq!(
            query::load_ledger(&conn, None).expect("ledger"),
            query::load_ledger(&baseline, None).expect("ledger")
        );
    }
}

#[test]
fn replicas_exchanging_raw_events_converge() {
    let events = scenario();
    let (left, right) = events.split_at(events.len() / 2);
    let a = project(left);
    let b = project(right);

    let from_b: Vec<Event> = query::raw_events(&b)
        .expect("raw")
        .into_iter()
        .map(|s| s.event)
        .collect();
    let from_a: Vec<Event> = query::raw_events(&a)
        .expect("raw")
        .into_iter()
        .map(|s| s.event)
        .collect();
    Projector::new(&a)
        .with_scope(repo().to_string())
        .project_batch(&from_b)
        .expect("a <- b");
    Projector::new(&b)
        .with_scope(repo().to_string())
        .project_batch(&from_a)
        .expect("b <- a");

    assert_eq!(items(&a), items(&b));
    assert_eq!(items(&a), items(&project(&events)));
}

#[test]
fn equal_timestamps_prefer_smaller_id() {
    let one = announcement("left", 50);
    let two = announcement("right", 50);
    let winner = if one.id < two.id { "left" } else { "right" };

    assert_eq!(announced_name(&project(&[one.clone(), two.clone()])).as_deref(), Some(winner));
    assert_eq!(announced_name(&project(&[two, one])).as_deref(), Some(winner));
}
