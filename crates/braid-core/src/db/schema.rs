//! Canonical SQLite projection schema for braid.
//!
//! - `events` is the raw, append-only store of every validated event. It is
//!   the source `rebuild` replays from.
//! - `replaceables` holds the current event per `(pubkey, kind, identifier)`.
//! - `root_items`, `item_labels`, `status_events` and `comments` are
//!   append-only projections keyed by event id; lifecycle status is derived
//!   from `status_events` at read time.
//! - `bounties` keeps the newest bounty state per issue.
//! - `activities` is the deduplicated activity ledger.
//! - `landed_commits` holds commits the git bridge reported after a push.
//! - `projection_meta` tracks schema version and sync bookkeeping.
//!
//! No table references another with a foreign key: events arrive in any
//! order, so a status or comment routinely lands before its root.

/// Migration v1: raw events plus the reconciled projections.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY CHECK (length(event_id) = 64),
    pubkey TEXT NOT NULL,
    kind INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    raw_json TEXT NOT NULL,
    repo_scope TEXT NOT NULL DEFAULT '',
    first_relay TEXT,
    received_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS replaceables (
    pubkey TEXT NOT NULL,
    kind INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    event_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    record_json TEXT NOT NULL,
    PRIMARY KEY (pubkey, kind, identifier)
);

CREATE TABLE IF NOT EXISTS root_items (
    item_id TEXT PRIMARY KEY,
    family TEXT NOT NULL CHECK (family IN ('issue', 'patch', 'pull-request')),
    author TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    subject TEXT,
    repo TEXT NOT NULL DEFAULT '',
    record_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_labels (
    item_id TEXT NOT NULL,
    label TEXT NOT NULL CHECK (length(trim(label)) > 0),
    PRIMARY KEY (item_id, label)
);

CREATE TABLE IF NOT EXISTS status_events (
    event_id TEXT PRIMARY KEY,
    root_id TEXT NOT NULL,
    author TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('open', 'applied', 'closed', 'draft')),
    family_filter TEXT CHECK (family_filter IS NULL OR family_filter IN ('issue', 'patch', 'pull-request'))
);

CREATE TABLE IF NOT EXISTS comments (
    event_id TEXT PRIMARY KEY,
    root_id TEXT NOT NULL,
    parent_id TEXT,
    author TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    repo TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projection_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_sync_at INTEGER NOT NULL DEFAULT 0,
    last_rebuild_at INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO projection_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_events_kind_created ON events(kind, created_at);
CREATE INDEX IF NOT EXISTS idx_root_items_family_created ON root_items(family, created_at);
CREATE INDEX IF NOT EXISTS idx_root_items_repo ON root_items(repo);
CREATE INDEX IF NOT EXISTS idx_item_labels_label ON item_labels(label);
CREATE INDEX IF NOT EXISTS idx_status_events_root ON status_events(root_id);
CREATE INDEX IF NOT EXISTS idx_comments_root_created ON comments(root_id, created_at);
";

/// Migration v2: bounty lifecycle and the activity ledger.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS bounties (
    issue_id TEXT PRIMARY KEY,
    amount_sats INTEGER,
    state TEXT NOT NULL CHECK (state IN ('pending', 'paid', 'released', 'cancelled')),
    updated_at INTEGER NOT NULL,
    event_id TEXT,
    withdraw_link_json TEXT
);

CREATE TABLE IF NOT EXISTS activities (
    dedup_key TEXT PRIMARY KEY,
    activity_type TEXT NOT NULL,
    repo TEXT NOT NULL,
    user TEXT NOT NULL,
    ts INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_repo_ts ON activities(repo, ts);
CREATE INDEX IF NOT EXISTS idx_activities_user ON activities(user);
";

/// Migration v3: commits landed through the bridge, replayed into activity.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS landed_commits (
    repo TEXT NOT NULL,
    sha TEXT NOT NULL,
    author TEXT NOT NULL,
    committed_at INTEGER NOT NULL,
    PRIMARY KEY (repo, sha)
);

CREATE INDEX IF NOT EXISTS idx_landed_commits_author ON landed_commits(author);
";

/// Indexes expected after all migrations.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_events_kind_created",
    "idx_root_items_family_created",
    "idx_root_items_repo",
    "idx_item_labels_label",
    "idx_status_events_root",
    "idx_comments_root_created",
    "idx_activities_repo_ts",
    "idx_activities_user",
    "idx_landed_commits_author",
];

/// Derived tables cleared by a rebuild. `events`, `activities` and
/// `landed_commits` survive: the first is the replay source, the others hold
/// facts that no event carries.
pub const DERIVED_TABLES: &[&str] = &[
    "replaceables",
    "root_items",
    "item_labels",
    "status_events",
    "comments",
    "bounties",
];
