//! `watchtower-core`: the monitoring engine. Per-service probe tasks,
//! the shared state store they update, the debounced incident FSM,
//! the notifier gate, the analytics engine, and snapshot persistence.
//! The HTTP handler layer, notifier delivery backends, and the
//! optional SQL retention backend are thin external collaborators and
//! live outside this crate.

pub mod analytics;
pub mod control;
pub mod error;
pub mod fsm;
pub mod model;
pub mod notify;
pub mod probe;
pub mod snapshot;
pub mod store;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

pub use error::{StoreError, StoreResult};
pub use model::{Incident, IncidentPolicy, Service, Silence, Status, StatusResult};
pub use store::Store;

/// Top-level process configuration, loaded from a JSON or YAML file
/// with per-field defaults so a partial config still parses.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to the durable snapshot file.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Address the minimal control-plane HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Services to bulk-register on first boot if no snapshot exists
    /// yet. Subsequent runs resume from the snapshot instead.
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub policy: IncidentPolicy,
    /// User-Agent header for outbound probe requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Optional log level (e.g., info, debug). If unset, uses
    /// `RUST_LOG` or falls back to "info".
    #[serde(default)]
    pub log_level: Option<String>,
    /// Output logs as JSON if true.
    #[serde(default)]
    pub json_logging: bool,
}

fn default_snapshot_path() -> String {
    "watchtower_snapshot.json".to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_user_agent() -> String {
    "watchtower/0.1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            snapshot_path: default_snapshot_path(),
            listen_addr: default_listen_addr(),
            services: Vec::new(),
            policy: IncidentPolicy::default(),
            user_agent: default_user_agent(),
            log_level: None,
            json_logging: false,
        }
    }
}

/// Loads `Config` from a JSON or YAML file, dispatching on the file
/// extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    let bytes =
        fs::read(path_ref).with_context(|| format!("failed to read config file {:?}", path_ref))?;
    let ext = path_ref
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "json".to_string());
    let cfg: Config = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_slice(&bytes).context("failed to parse YAML config")?,
        _ => serde_json::from_slice(&bytes).context("failed to parse JSON config")?,
    };
    Ok(cfg)
}

/// Builds the shared `reqwest::Client` used by every checker task.
pub fn build_client(cfg: &Config) -> Result<Client> {
    Client::builder()
        .user_agent(&cfg.user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// Initializes the global `tracing` subscriber: `cfg.log_level`, then
/// `RUST_LOG`, then "info". JSON formatting if `cfg.json_logging` is set.
pub fn init_logging(cfg: &Config) {
    let env_filter = if let Some(level) = &cfg.log_level {
        EnvFilter::new(level)
    } else if let Ok(level) = std::env::var("RUST_LOG") {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };
    if cfg.json_logging {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Boots a `Store`: loads the snapshot at `cfg.snapshot_path` if
/// present, restores every persisted service (starting its checker),
/// or, on first boot with no snapshot, bulk-registers `cfg.services`.
pub async fn boot_store(
    cfg: &Config,
    notifiers: Vec<Arc<dyn notify::Notifier>>,
) -> Result<Arc<Store>> {
    let client = build_client(cfg)?;
    let store = Store::new(client, notifiers);

    let snapshot_path = PathBuf::from(&cfg.snapshot_path);
    let data = snapshot::load(&snapshot_path).context("failed to load snapshot")?;
    let had_services = !data.services.is_empty();
    store.restore_from_snapshot(data);

    if !had_services {
        for service in &cfg.services {
            store.add_service(service.clone());
        }
    }
    if !cfg.policy.is_zero() {
        store.set_policy(cfg.policy);
    }

    Ok(store)
}

/// Saves the current store state to `path`, for use by the control
/// plane's mutating handlers and any periodic save loop the bin
/// chooses to run.
pub fn save_snapshot(store: &Store, path: &Path) -> StoreResult<()> {
    let data = store.snapshot_fields();
    snapshot::save(path, &data)
}
