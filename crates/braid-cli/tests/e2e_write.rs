//! E2E CLI tests for commands that sign, publish or talk to the network:
//! - `braid bounty` transitions and their error codes
//! - `braid sync` / `braid push` / `braid relay-info` failing fast without
//!   relays, a bridge or a signer
//!
//! No test here reaches a real relay or bridge.

use assert_cmd::Command;
use braid_core::db::open_projection;
use braid_core::db::project::Projector;
use braid_core::event::{Event, EventBuilder, EventKind, Keys};
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

const SECRET_HEX: &str = "0707070707070707070707070707070707070707070707070707070707070707";

fn keys() -> Keys {
    Keys::from_secret_bytes([7u8; 32])
}

fn braid_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("braid"));
    cmd.current_dir(dir);
    cmd.env("BRAID_LOG", "error");
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env_remove("BRAID_RELAYS");
    cmd.env_remove("BRAID_SECRET_KEY");
    cmd.env_remove("BRAID_BRIDGE_URL");
    cmd.env_remove("FORMAT");
    cmd
}

fn signed_cmd(dir: &Path) -> Command {
    let mut cmd = braid_cmd(dir);
    cmd.env("BRAID_SECRET_KEY", SECRET_HEX);
    cmd
}

fn seed(dir: &Path, events: &[Event]) {
    let conn = open_projection(&dir.join(".braid").join("braid.db")).expect("open projection");
    Projector::new(&conn).project_batch(events).expect("project");
}

/// A project with one issue and one patch.
fn project() -> (TempDir, Event, Event) {
    let dir = TempDir::new().expect("tempdir");
    let issue = EventBuilder::new(EventKind::Issue, "body")
        .tag(["subject", "Needs a bounty"])
        .created_at(100)
        .sign(&keys());
    let patch = EventBuilder::new(EventKind::Patch, "diff --git a/x b/x")
        .created_at(110)
        .sign(&keys());
    seed(dir.path(), &[issue.clone(), patch.clone()]);
    (dir, issue, patch)
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("command should not crash");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

// ---------------------------------------------------------------------------
// bounty
// ---------------------------------------------------------------------------

#[test]
fn bounty_offer_then_pay() {
    let (dir, issue, _) = project();

    let offered = run_json(signed_cmd(dir.path()).args([
        "bounty",
        &issue.id[..10],
        "pending",
        "--amount",
        "5000",
        "--json",
    ]));
    assert_eq!(offered["issue_id"], issue.id.as_str());
    assert_eq!(offered["state"], "pending");
    assert_eq!(offered["amount_sats"], 5000);
    assert!(offered["event_id"].is_string());
    assert!(offered["published_to"].is_null());

    let paid = run_json(signed_cmd(dir.path()).args(["bounty", &issue.id, "paid", "--json"]));
    assert_eq!(paid["state"], "paid");
    assert_eq!(paid["amount_sats"], 5000);

    let shown = run_json(braid_cmd(dir.path()).args(["show", &issue.id, "--json"]));
    assert_eq!(shown["bounty"]["state"], "paid");
}

#[test]
fn bounty_survives_rebuild() {
    let (dir, issue, _) = project();
    signed_cmd(dir.path())
        .args(["bounty", &issue.id, "pending", "--amount", "21"])
        .assert()
        .success();

    braid_cmd(dir.path()).args(["rebuild"]).assert().success();

    let shown = run_json(braid_cmd(dir.path()).args(["show", &issue.id, "--json"]));
    assert_eq!(shown["bounty"]["state"], "pending");
    assert_eq!(shown["bounty"]["amount_sats"], 21);
}

#[test]
fn bounty_skipping_payment_is_invalid_transition() {
    let (dir, issue, _) = project();
    signed_cmd(dir.path())
        .args(["bounty", &issue.id, "pending", "--amount", "100"])
        .assert()
        .success();

    signed_cmd(dir.path())
        .args(["bounty", &issue.id, "released"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));
}

#[test]
fn bounty_release_without_link_is_payment_failure() {
    let (dir, issue, _) = project();
    for (state, extra) in [("pending", Some("100")), ("paid", None)] {
        let mut cmd = signed_cmd(dir.path());
        cmd.args(["bounty", &issue.id, state]);
        if let Some(amount) = extra {
            cmd.args(["--amount", amount]);
        }
        cmd.assert().success();
    }

    signed_cmd(dir.path())
        .args(["bounty", &issue.id, "released"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E6001"));

    let released = run_json(signed_cmd(dir.path()).args([
        "bounty",
        &issue.id,
        "released",
        "--withdraw-link",
        "lnurl1example",
        "--json",
    ]));
    assert_eq!(released["state"], "released");
    assert_eq!(released["withdraw_link"]["url"], "lnurl1example");
}

#[test]
fn bounty_without_signer_fails() {
    let (dir, issue, _) = project();
    braid_cmd(dir.path())
        .args(["bounty", &issue.id, "pending", "--amount", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E4201"));
}

#[test]
fn bounty_on_a_patch_is_rejected() {
    let (dir, _, patch) = project();
    signed_cmd(dir.path())
        .args(["bounty", &patch.id, "pending", "--amount", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not one"));
}

#[test]
fn bounty_offer_needs_amount() {
    let (dir, issue, _) = project();
    signed_cmd(dir.path())
        .args(["bounty", &issue.id, "pending"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--amount"));
}

// ---------------------------------------------------------------------------
// network commands without their collaborators
// ---------------------------------------------------------------------------

#[test]
fn sync_without_relays_is_unreachable() {
    let dir = TempDir::new().expect("tempdir");
    let repo = format!("30617:{}:braid", keys().public_key_hex());
    braid_cmd(dir.path())
        .args(["sync", "--repo", &repo])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E4001]"))
        .stderr(predicate::str::contains("no relays configured"));
}

#[test]
fn sync_rejects_malformed_address() {
    let dir = TempDir::new().expect("tempdir");
    braid_cmd(dir.path())
        .args(["sync", "--repo", "not-an-address"])
        .assert()
        .failure();
}

#[test]
fn push_without_bridge_is_unavailable() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("README.md"), "hello").expect("write");
    signed_cmd(dir.path())
        .args(["push", "--owner", "alice", "--repo", "braid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E4102"));
}

#[test]
fn push_announcing_needs_a_signer() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("README.md"), "hello").expect("write");
    braid_cmd(dir.path())
        .env("BRAID_BRIDGE_URL", "http://127.0.0.1:9")
        .args(["push", "--owner", "alice", "--repo", "braid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E4201"));
}

#[test]
fn relay_info_without_relays_fails() {
    let dir = TempDir::new().expect("tempdir");
    braid_cmd(dir.path())
        .args(["relay-info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E4001"));
}

#[test]
fn config_flag_points_at_another_store() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("alt.toml");
    std::fs::write(&config, "[store]\npath = \"alt/braid.db\"\n").expect("write config");
    let issue = EventBuilder::new(EventKind::Issue, "elsewhere")
        .tag(["subject", "Alt store"])
        .created_at(100)
        .sign(&keys());
    let conn = open_projection(&dir.path().join("alt/braid.db")).expect("open");
    Projector::new(&conn).project_batch(&[issue]).expect("project");
    drop(conn);

    let items = run_json(braid_cmd(dir.path()).args([
        "list",
        "--config",
        config.to_str().expect("utf8 path"),
        "--json",
    ]));
    assert_eq!(items[0]["subject"], "Alt store");

    braid_cmd(dir.path())
        .args(["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"));
}
