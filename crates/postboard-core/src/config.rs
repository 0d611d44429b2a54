//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! hosted service's URL and public key, the last email used to sign in,
//! and client behavior settings.
//!
//! Configuration is stored at `~/.config/postboard/config.json`. The
//! `POSTBOARD_BACKEND_URL` and `POSTBOARD_ANON_KEY` environment variables
//! override the file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "postboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BACKEND_URL: &str = "POSTBOARD_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "POSTBOARD_ANON_KEY";

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_persist() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub last_email: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_persist")]
    pub persist_session: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            last_email: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            persist_session: true,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override connection settings from the environment (non-empty values only).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_BACKEND_URL) {
            self.backend_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_ANON_KEY) {
            self.anon_key = Some(key);
        }
    }

    /// Check that the client can be built from this config.
    pub fn validate(&self) -> Result<()> {
        match self.backend_url.as_deref() {
            None | Some("") => bail!("Backend URL is not configured (set {})", ENV_BACKEND_URL),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                bail!("Backend URL must start with http:// or https://: {}", url)
            }
            Some(_) => {}
        }
        if self.anon_key.as_deref().map_or(true, str::is_empty) {
            bail!("Anon key is not configured (set {})", ENV_ANON_KEY);
        }
        if self.request_timeout_secs == 0 {
            bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
