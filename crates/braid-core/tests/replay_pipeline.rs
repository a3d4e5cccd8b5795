//! End-to-end ingest: relay deliveries with duplicates and forgeries, on-disk
//! projection, rebuild and the two activity paths.

use braid_core::activity::{self, ActivityType, Ledger, LocalItem};
use braid_core::db::project::{ProjectResult, Projector};
use braid_core::db::query::{self, ItemFilter};
use braid_core::db::{open_projection, rebuild};
use braid_core::event::{Event, EventBuilder, EventKind, Keys, Rejection};
use braid_core::status::StatusPolicy;
use braid_core::tags::parse;

fn keys() -> Keys {
    Keys::from_secret_bytes([61u8; 32])
}

fn repo() -> String {
    format!("30617:{}:braid", keys().public_key_hex())
}

fn issue(at: u64) -> Event {
    EventBuilder::new(EventKind::Issue, "repro steps")
        .tag(["subject", "Flaky test"])
        .created_at(at)
        .sign(&keys())
}

#[test]
fn deliveries_from_many_relays_project_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = open_projection(&dir.path().join(".braid/braid.db")).expect("open");
    let root = issue(1_700_000_000);
    let reply = EventBuilder::new(EventKind::Comment, "same here")
        .tag(["E", root.id.as_str()])
        .created_at(1_700_000_100)
        .sign(&keys());
    let mut forged = reply.clone();
    forged.content = "injected".into();

    let deliveries = vec![
        ("wss://one".to_string(), root.clone()),
        ("wss://two".to_string(), reply.clone()),
        ("wss://two".to_string(), root.clone()),
        ("wss://three".to_string(), forged),
        ("wss://three".to_string(), reply),
    ];
    let stats = Projector::new(&conn)
        .with_scope(repo())
        .project_received(&deliveries)
        .expect("project");

    assert_eq!(stats.projected, 2);
    assert_eq!(stats.duplicates, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(query::event_count(&conn).expect("count"), 2);

    let detail = query::get_item(&conn, &root.id, StatusPolicy::Anyone)
        .expect("get")
        .expect("item");
    assert_eq!(detail.thread.len(), 1);
    assert_eq!(detail.thread.flatten()[0].1.body, "same here");
}

#[test]
fn forged_signature_is_reported() {
    let conn = braid_core::db::open_in_memory().expect("db");
    let mut event = issue(10);
    let other = Keys::from_secret_bytes([62u8; 32]);
    event.sig = EventBuilder::new(EventKind::Issue, "x").created_at(10).sign(&other).sig;

    let result = Projector::new(&conn).ingest_event(&event, Some("wss://evil")).expect("ingest");
    assert!(matches!(result, ProjectResult::Rejected(Rejection::BadSignature { .. })));
}

#[test]
fn rebuild_after_reopen_preserves_items_and_activity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("braid.db");
    {
        let conn = open_projection(&path).expect("open");
        Projector::new(&conn)
            .with_scope(repo())
            .project_batch(&[issue(100), issue(200)])
            .expect("project");
    }

    let conn = open_projection(&path).expect("reopen");
    let before_items = query::list_items(&conn, &ItemFilter::default(), StatusPolicy::Anyone)
        .expect("list");
    let before_ledger = query::load_ledger(&conn, Some(&repo())).expect("ledger");

    let report = rebuild::rebuild(&conn).expect("rebuild");
    assert_eq!(report.event_count, 2);
    assert_eq!(report.item_count, 2);
    assert_eq!(
        query::list_items(&conn, &ItemFilter::default(), StatusPolicy::Anyone).expect("list"),
        before_items
    );
    assert_eq!(query::load_ledger(&conn, Some(&repo())).expect("ledger"), before_ledger);
}

#[test]
fn local_and_live_paths_share_dedup_keys() {
    let root = issue(1_700_000_000);
    let live = activity::count_events(&[parse(root.clone())], &repo());
    let local = activity::replay_local(&[LocalItem {
        kind: ActivityType::Issue,
        user: root.pubkey.clone(),
        repo: repo(),
        // Cached objects may carry milliseconds.
        at: 1_700_000_000_999,
    }]);

    let mut ledger = Ledger::new();
    assert_eq!(ledger.extend(live), 1);
    assert_eq!(ledger.extend(local.clone()), 0);
    assert_eq!(ledger.extend(local), 0);
    assert_eq!(ledger.totals().total, 1);
    assert_eq!(ledger.totals().by_type.get(&ActivityType::Issue), Some(&1));
}

#[test]
fn metadata_events_never_count() {
    let announcement = EventBuilder::new(EventKind::RepoAnnouncement, "")
        .tag(["d", "braid"])
        .created_at(5)
        .sign(&keys());
    let state = EventBuilder::new(EventKind::RepoState, "")
        .tag(["d", "braid"])
        .tag(["refs/heads/main", "abc123"])
        .created_at(6)
        .sign(&keys());
    let records = activity::count_events(&[parse(announcement), parse(state)], &repo());
    assert!(records.is_empty());
}
