//! pointcheck
//!
//! Batch login/check automation over credential-proxy pairs: validates
//! candidate proxies in parallel, assigns them to credentials, and drives
//! each pair through a bounded-retry login/check cycle with every outcome
//! recorded in an embedded task store.

pub mod assign;
pub mod browser;
pub mod orchestrator;
pub mod proxy;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod stats;
pub mod store;

use std::path::PathBuf;

use tracing::{error, info, warn};

use orchestrator::{OrchestratorConfig, MAX_LOGIN_RETRIES};
use proxy::{ProbeConfig, DEFAULT_CHUNK_SIZE, DEFAULT_PROBE_TIMEOUT_SECS};
use scheduler::DEFAULT_STAGGER_SECS;

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Service the batch runs against (registry key and probe tag).
    pub service: String,
    /// Path of the SQLite task store.
    pub db_path: String,
    /// Endpoint probed through each candidate proxy.
    pub probe_target: String,

    /// Proxies per validation worker chunk.
    #[serde(default = "default_chunk_size")]
    pub probe_chunk_size: usize,
    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Proxies bound to each credential.
    #[serde(default = "default_per_credential")]
    pub proxies_per_credential: usize,
    /// Delay between unit starts in seconds.
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
    /// Login attempts allowed per pair per run.
    #[serde(default = "default_max_login_retries")]
    pub max_login_retries: u32,
    /// Delete a pair's profile directory after an infrastructure crash.
    #[serde(default)]
    pub delete_profile_on_crash: bool,

    /// Base directory for per-pair browser profiles.
    #[serde(default)]
    pub profiles_dir: Option<String>,
    /// Failure log path.
    #[serde(default)]
    pub failure_log: Option<String>,
    /// Flagged-proxy report path.
    #[serde(default)]
    pub flagged_proxies: Option<String>,
    /// Unpacked login-helper extension directory, if the browser layer needs one.
    #[serde(default)]
    pub extension_dir: Option<String>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}
fn default_per_credential() -> usize {
    assign::DEFAULT_PROXIES_PER_CREDENTIAL
}
fn default_stagger() -> u64 {
    DEFAULT_STAGGER_SECS
}
fn default_max_login_retries() -> u32 {
    MAX_LOGIN_RETRIES
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: "portal".to_string(),
            db_path: "pointcheck.db".to_string(),
            probe_target: "https://api.ipify.org".to_string(),
            probe_chunk_size: default_chunk_size(),
            probe_timeout_secs: default_probe_timeout(),
            proxies_per_credential: default_per_credential(),
            stagger_secs: default_stagger(),
            max_login_retries: default_max_login_retries(),
            delete_profile_on_crash: false,
            profiles_dir: None,
            failure_log: None,
            flagged_proxies: None,
            extension_dir: None,
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pointcheck").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pointcheck").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    /// Probe configuration for the validator pool.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            target_url: self.probe_target.clone(),
            service_tag: self.service.clone(),
            chunk_size: self.probe_chunk_size,
            timeout_secs: self.probe_timeout_secs,
        }
    }

    /// Orchestrator configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_login_retries: self.max_login_retries,
            profiles_dir: self
                .profiles_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("pointcheck").join("profiles")),
            delete_profile_on_crash: self.delete_profile_on_crash,
        }
    }

    /// Failure log location.
    pub fn failure_log_path(&self) -> PathBuf {
        self.failure_log
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|p| p.join("pointcheck").join("failed_tasks.json")))
            .unwrap_or_else(|| PathBuf::from("failed_tasks.json"))
    }

    /// Flagged-proxy report location.
    pub fn flagged_proxies_path(&self) -> PathBuf {
        self.flagged_proxies
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|p| p.join("pointcheck").join("flagged_proxies.json")))
            .unwrap_or_else(|| PathBuf::from("flagged_proxies.json"))
    }
}

/// Initialize logging: console layer plus a daily-rolling file layer.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "pointcheck.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
