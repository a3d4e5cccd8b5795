use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::status::StatusPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub relays: RelayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    /// How long a subscription waits for every relay's end-of-stored-events.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    /// How long a publish waits for each relay's `OK`.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            settle_timeout_ms: default_settle_timeout_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_files: default_max_files(),
            max_bytes: default_max_bytes(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub policy: StatusPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Projection database path, relative to the project root.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub secret_key_path: Option<PathBuf>,
}

/// Values read from `BRAID_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub relays: Option<Vec<String>>,
    pub bridge_url: Option<String>,
    pub secret_key: Option<String>,
    pub format: Option<String>,
}

impl EnvOverrides {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            relays: env::var("BRAID_RELAYS").ok().map(|raw| split_list(&raw)),
            bridge_url: env::var("BRAID_BRIDGE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            secret_key: env::var("BRAID_SECRET_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            format: env::var("FORMAT").ok(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
    /// Secret key from the environment; never written anywhere.
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub db_path: PathBuf,
}

/// Directory holding project state.
pub const PROJECT_DIR: &str = ".braid";

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(PROJECT_DIR).join("config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    load_project_config_file(&path)
}

/// Read a project config from an explicit path (the `--config` flag).
pub fn load_project_config_file(path: &Path) -> Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("braid/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;
    Ok(merge_config(project_root, project, user, EnvOverrides::from_env(), cli_json))
}

/// Layer environment overrides over the file configs.
#[must_use]
pub fn merge_config(
    project_root: &Path,
    mut project: ProjectConfig,
    user: UserConfig,
    env: EnvOverrides,
    cli_json: bool,
) -> EffectiveConfig {
    if let Some(relays) = env.relays.filter(|r| !r.is_empty()) {
        project.relays.urls = relays;
    }
    if let Some(url) = env.bridge_url {
        project.bridge.url = Some(url);
    }

    let resolved_output = resolve_output(cli_json, user.output.clone(), env.format);
    let db_path = project.store.path.as_ref().map_or_else(
        || project_root.join(PROJECT_DIR).join("braid.db"),
        |p| project_root.join(p),
    );

    EffectiveConfig {
        project,
        user,
        resolved_output,
        secret_key: env.secret_key,
        db_path,
    }
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_settle_timeout_ms() -> u64 {
    8_000
}

const fn default_publish_timeout_ms() -> u64 {
    5_000
}

const fn default_max_files() -> usize {
    30
}

const fn default_max_bytes() -> usize {
    3 * 1024 * 1024
}

const fn default_chunk_timeout_secs() -> u64 {
    60
}
