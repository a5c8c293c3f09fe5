//! Monitor configuration
//!
//! Loaded from a JSON or YAML file (by extension), with CLI overrides applied
//! on top by `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Env var naming an explicit config file
pub const CONFIG_ENV: &str = "DECK_MONITOR_CONFIG";

/// Searched in order when no path is given
pub const CONFIG_PATHS: &[&str] = &[
    "/etc/rigdeck/monitor.yaml",
    "/etc/rigdeck/monitor.json",
    "monitor.yaml",
];

/// Which consumer views to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ViewSelection {
    #[default]
    Both,
    Feed,
    Bar,
}

impl ViewSelection {
    pub fn feed(&self) -> bool {
        matches!(self, ViewSelection::Both | ViewSelection::Feed)
    }

    pub fn bar(&self) -> bool {
        matches!(self, ViewSelection::Both | ViewSelection::Bar)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Panel backend, e.g. `http://gpu-box:8188`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Server-push event endpoint, relative to `base_url`
    #[serde(default = "default_events_path")]
    pub events_path: String,

    /// Queue status endpoint, relative to `base_url`
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// Initial reconnection delay for the event stream
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,

    /// Timeout for queue requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub views: ViewSelection,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_events_path() -> String {
    "/api/events".to_string()
}

fn default_queue_path() -> String {
    "/queue".to_string()
}

fn default_retry_ms() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            events_path: default_events_path(),
            queue_path: default_queue_path(),
            retry_ms: default_retry_ms(),
            request_timeout_secs: default_request_timeout(),
            views: ViewSelection::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read monitor config {}", path.display()))?;

        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let config: Self = if yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in monitor config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in monitor config {}", path.display()))?
        };

        info!(path = %path.display(), views = ?config.views, "Monitor config loaded");
        Ok(config)
    }

    /// Load from `$DECK_MONITOR_CONFIG` or the default paths, else defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(path);
        }

        for path in CONFIG_PATHS {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        info!("No monitor config found, using defaults");
        Ok(Self::default())
    }

    pub fn events_url(&self) -> String {
        join_url(&self.base_url, &self.events_path)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
