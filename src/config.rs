//! Configuration management for the slow-tunnel CLI.
//!
//! Handles loading and saving configuration from `<config dir>/slow-tunnel/config.toml`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9300";
pub const DEFAULT_URL: &str = "ws://127.0.0.1:9300";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LATENCY_MS: u64 = 200;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<String>,
    /// Artificial delay before each reply
    pub reply_delay_ms: Option<u64>,
    pub tunnel_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub tunnel_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DemoConfig {
    pub latency_ms: Option<u64>,
    pub reply_delay_ms: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "slow-tunnel")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Config with every default spelled out, written by `slow-tunnel config --init`
    pub fn with_defaults() -> Self {
        Config {
            server: ServerConfig {
                listen: Some(DEFAULT_LISTEN.to_string()),
                reply_delay_ms: Some(0),
                tunnel_id: None,
            },
            client: ClientConfig {
                url: Some(DEFAULT_URL.to_string()),
                timeout_ms: Some(DEFAULT_TIMEOUT_MS),
                tunnel_id: None,
            },
            demo: DemoConfig {
                latency_ms: Some(DEFAULT_LATENCY_MS),
                reply_delay_ms: Some(0),
            },
        }
    }
}
