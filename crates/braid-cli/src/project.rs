//! Per-invocation project context: resolved config, projection database,
//! write lock, signer and relay coordinator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use braid_core::config::{
    EffectiveConfig, EnvOverrides, PROJECT_DIR, load_project_config, load_project_config_file,
    load_user_config, merge_config,
};
use braid_core::db;
use braid_core::error::ErrorCode;
use braid_core::event::{Event, Keys, SignerError};
use braid_core::lock::ProjectionLock;
use braid_core::status::StatusPolicy;
use braid_relay::{Coordinator, CoordinatorConfig, PublishReport, RelayError};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::output::{OutputMode, fail};

/// How long a writer waits for another `braid` process to release the lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Project {
    pub root: PathBuf,
    pub config: EffectiveConfig,
    pub output: OutputMode,
}

impl Project {
    /// Resolve config for `root`. `config_path` replaces the project config
    /// file; user config and `BRAID_*` overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(root: &Path, json: bool, config_path: Option<&Path>) -> Result<Self> {
        let project = match config_path {
            Some(path) => load_project_config_file(path)?,
            None => load_project_config(root)?,
        };
        let user = load_user_config()?;
        let config = merge_config(root, project, user, EnvOverrides::from_env(), json);
        let output = OutputMode::from_resolved(&config.resolved_output);
        Ok(Self {
            root: root.to_path_buf(),
            config,
            output,
        })
    }

    pub fn braid_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn db_path(&self) -> &Path {
        &self.config.db_path
    }

    pub const fn status_policy(&self) -> StatusPolicy {
        self.config.project.status.policy
    }

    /// Open the projection, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_db(&self) -> Result<Connection> {
        db::open_projection(self.db_path())
    }

    /// Open the projection for reading; a missing database is reported as
    /// [`ErrorCode::NotInitialized`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database is missing or cannot be opened.
    pub fn open_existing_db(&self) -> Result<Connection> {
        if !self.db_path().exists() {
            return Err(fail(
                self.output,
                ErrorCode::NotInitialized,
                format!("no projection at {}", self.db_path().display()),
            ));
        }
        self.open_db().map_err(|e| {
            fail(
                self.output,
                ErrorCode::CorruptProjection,
                format!("could not open projection: {e:#}"),
            )
        })
    }

    /// Take the cross-process write lock on the projection.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorCode::LockContention`] error if another process
    /// holds the lock past [`LOCK_TIMEOUT`].
    pub fn write_lock(&self) -> Result<ProjectionLock> {
        let path = ProjectionLock::path_for(self.db_path());
        ProjectionLock::exclusive(&path, LOCK_TIMEOUT)
            .map_err(|e| fail(self.output, e.code(), e.to_string()))
    }

    /// The signing key from `BRAID_SECRET_KEY` or the user's key file.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorCode::NoSigner`] error when no usable key is set.
    pub fn signer(&self) -> Result<Keys> {
        Keys::resolve(
            self.config.secret_key.as_deref(),
            self.config.user.secret_key_path.as_deref(),
        )
        .map_err(|e: SignerError| fail(self.output, ErrorCode::NoSigner, e.to_string()))
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::websocket(CoordinatorConfig::from(&self.config.project.relays))
    }

    /// Publish a locally signed event to every configured relay.
    ///
    /// Not having relays configured is not an error for local edits: the
    /// event is already in the projection and goes out on a later publish.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot start.
    pub fn publish(&self, event: &Event) -> Result<Option<PublishReport>> {
        if self.config.project.relays.urls.is_empty() {
            info!(event_id = %event.short_id(), "no relays configured; event kept locally");
            return Ok(None);
        }
        let coordinator = self.coordinator();
        let report = runtime()?.block_on(coordinator.publish(event));
        match report {
            Ok(report) => {
                for (relay, message) in &report.rejected {
                    warn!(relay = %relay, %message, "relay rejected event");
                }
                Ok(Some(report))
            }
            Err(RelayError::NoRelayReachable | RelayError::NoRelays) => {
                warn!(event_id = %event.short_id(), "no relay accepted the event; kept locally");
                Ok(Some(PublishReport::default()))
            }
            Err(e) => Err(e).context("publish event"),
        }
    }
}

/// Multi-threaded runtime for the relay-facing commands.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("braid-relay")
        .build()
        .context("start async runtime")
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
