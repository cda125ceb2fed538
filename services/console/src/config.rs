//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The management key is loaded from MANAGEMENT_KEY or key_file and is
//! never read from the TOML itself.

use common::Secret;
use copilot_auth::DEFAULT_BASE_PATH;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub management: ManagementConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Gateway management API settings
#[derive(Debug, Deserialize)]
pub struct ManagementConfig {
    pub base_url: String,
    #[serde(skip)]
    pub key: Option<Secret<String>>,
    /// Path to a file holding the management key (alternative to MANAGEMENT_KEY)
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Prefix of the Copilot device-flow endpoints
    #[serde(default = "default_copilot_path")]
    pub copilot_path: String,
}

/// Local HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_copilot_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8318))
}

fn default_max_connections() -> usize {
    256
}

fn default_ttl() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Management key resolution order:
    /// 1. MANAGEMENT_KEY env var
    /// 2. key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.management.base_url.starts_with("http://")
            && !config.management.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.management.base_url
            )));
        }

        if config.management.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if !config.management.copilot_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "copilot_path must start with /, got: {}",
                config.management.copilot_path
            )));
        }

        if config.console.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.cache.ttl_secs == 0 {
            return Err(common::Error::Config(
                "cache.ttl_secs must be greater than 0".into(),
            ));
        }

        if let Ok(key) = std::env::var("MANAGEMENT_KEY") {
            config.management.key = Some(Secret::new(key));
        } else if let Some(ref key_file) = config.management.key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                config.management.key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gateway-console.toml")
    }
}
