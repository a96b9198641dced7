use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::relay::RelayIdentity;
use crate::transport::CurlOptions;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Pause in seconds before retrying an overloaded or rate-limited relay (e.g. 0.5 = 500ms).
    pub retry_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 0.5,
        }
    }
}

/// Physical transport timeouts (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            request_timeout_secs: 60,
        }
    }
}

/// Global configuration loaded from `~/.config/relayfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayfetchConfig {
    /// Relay endpoints, e.g. `http://relay1.example.net:8080`.
    #[serde(default)]
    pub relays: Vec<String>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// How long a suspect responder's IP stays blacklisted (default 8 hours).
    #[serde(default)]
    pub blacklist_ttl_secs: Option<u64>,
    /// How long an overloaded relay is skipped by selection (default 60s).
    #[serde(default)]
    pub overload_cooldown_secs: Option<u64>,
    /// Optional transport timeouts.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

impl Default for RelayfetchConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            retry: None,
            blacklist_ttl_secs: None,
            overload_cooldown_secs: None,
            transport: None,
        }
    }
}

impl RelayfetchConfig {
    /// Parse every configured relay endpoint.
    pub fn relay_identities(&self) -> Result<Vec<RelayIdentity>> {
        self.relays
            .iter()
            .map(|r| RelayIdentity::parse(r).with_context(|| format!("relay {r:?} in config")))
            .collect()
    }

    pub fn overload_cooldown(&self) -> Duration {
        Duration::from_secs(self.overload_cooldown_secs.unwrap_or(60))
    }

    pub fn curl_options(&self) -> CurlOptions {
        let t = self.transport.clone().unwrap_or_default();
        CurlOptions {
            connect_timeout: Duration::from_secs(t.connect_timeout_secs),
            request_timeout: Duration::from_secs(t.request_timeout_secs),
            ..CurlOptions::default()
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("relayfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RelayfetchConfig> {
    load_or_init_at(&config_path()?)
}

/// Like [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<RelayfetchConfig> {
    if !path.exists() {
        let default_cfg = RelayfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write config: {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: RelayfetchConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
