use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE: &str = "config.toml";
pub const API_URL_ENV: &str = "MYBULKER_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls after which a watch gives up.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_url() -> String {
    "http://127.0.0.1:9092".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_failures() -> u32 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> u32 {
    20
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_failures: default_max_poll_failures(),
            request_timeout_secs: default_request_timeout_secs(),
            page_size: default_page_size(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Reads `config.toml` from the data directory, falling back to defaults
    /// when the file does not exist.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_from(&Self::path_in(data_dir))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No {} found, using default client config.", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<PathBuf> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)?;
            NativePlatform::restrict_dir_permissions(data_dir);
        }
        let path = Self::path_in(data_dir);
        std::fs::write(&path, toml::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Environment overrides; the command line is applied after this.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV)
            && !url.trim().is_empty()
        {
            self.api_url = url;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
