use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::{RetryPolicy, SyncOptions};

/// Default API root of the hosted board service.
pub const DEFAULT_SERVER_URL: &str = "https://api.kanbin.app/api";

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "KANBIN_CONFIG";

/// Client configuration, loaded from `~/.config/kanbin/config.toml`.
///
/// Precedence, lowest first: built-in defaults, the config file, then
/// `KANBIN_URL` / `--server` (both arrive through the CLI layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the board API, without a trailing slash.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
            sync: SyncSettings::default(),
        }
    }
}

/// `[sync]` section: revalidation and retry timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Interval between background revalidations in `board watch`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_mutation_retries")]
    pub mutation_retries: u32,
    #[serde(default = "default_mutation_retry_delay_ms")]
    pub mutation_retry_delay_ms: u64,
}

fn default_stale_after_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_idle_eviction_secs() -> u64 {
    300
}

fn default_read_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_mutation_retries() -> u32 {
    1
}

fn default_mutation_retry_delay_ms() -> u64 {
    2_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_eviction_secs: default_idle_eviction_secs(),
            read_retries: default_read_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            mutation_retries: default_mutation_retries(),
            mutation_retry_delay_ms: default_mutation_retry_delay_ms(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_options(&self) -> SyncOptions {
        let mutation_delay = Duration::from_millis(self.mutation_retry_delay_ms);
        SyncOptions {
            stale_after: Duration::from_millis(self.stale_after_ms),
            idle_eviction: Duration::from_secs(self.idle_eviction_secs),
            read_retry: RetryPolicy::new(
                self.read_retries,
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
            ),
            write_retry: RetryPolicy::new(self.mutation_retries, mutation_delay, mutation_delay),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kanbin config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `$KANBIN_CONFIG`, or `<config dir>/kanbin/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("kanbin").join("config.toml"))
    }

    /// Load from the default location and apply the server override on top.
    pub fn resolve(server_override: Option<&str>) -> Result<Self> {
        let path = Self::default_path();
        let config = Self::load_or_default(path.as_deref())?;
        Ok(config.with_server_override(server_override))
    }

    pub fn with_server_override(mut self, server: Option<&str>) -> Self {
        if let Some(server) = server.map(str::trim).filter(|s| !s.is_empty()) {
            self.server_url = server.to_string();
        }
        self.server_url = self.server_url.trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize kanbin config")
    }

    /// Problems worth telling the user about. Empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            warnings.push(format!(
                "server_url '{}' should start with http:// or https://",
                self.server_url
            ));
        }
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs must be greater than 0".to_string());
        }
        if self.sync.poll_interval_ms == 0 {
            warnings.push("sync.poll_interval_ms must be greater than 0".to_string());
        }
        if self.sync.retry_base_delay_ms > self.sync.retry_max_delay_ms {
            warnings.push(format!(
                "sync.retry_base_delay_ms ({}) exceeds sync.retry_max_delay_ms ({})",
                self.sync.retry_base_delay_ms, self.sync.retry_max_delay_ms
            ));
        }
        warnings
    }
}
