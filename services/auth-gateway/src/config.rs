//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The backend API key is loaded from the BACKEND_API_KEY env var or
//! api_key_file, never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Absent means no backend: sign-in fails with a configuration error
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Identity/session backend settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<Secret<String>>,
    /// Path to a file containing the API key (alternative to BACKEND_API_KEY env var)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Callback handling settings
#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            landing_path: default_landing_path(),
        }
    }
}

/// Verification token settings
#[derive(Debug, Deserialize)]
pub struct TokensConfig {
    /// JSON file for token records; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            path: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl TokensConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_landing_path() -> String {
    oauth_callback::DEFAULT_LANDING_PATH.to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. BACKEND_API_KEY env var
    /// 2. api_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !config.exchange.landing_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "landing_path must start with '/', got: {}",
                config.exchange.landing_path
            )));
        }

        if config.tokens.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        if let Some(backend) = config.backend.as_mut() {
            if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "base_url must start with http:// or https://, got: {}",
                    backend.base_url
                )));
            }

            if backend.timeout_secs == 0 {
                return Err(common::Error::Config(
                    "timeout_secs must be greater than 0".into(),
                ));
            }

            // Env var takes precedence over file
            if let Ok(key) = std::env::var("BACKEND_API_KEY") {
                backend.api_key = Some(Secret::new(key));
            } else if let Some(ref key_file) = backend.api_key_file {
                let key = std::fs::read_to_string(key_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read api_key_file {}: {e}",
                        key_file.display()
                    ))
                })?;
                let key = key.trim().to_owned();
                if !key.is_empty() {
                    backend.api_key = Some(Secret::new(key));
                }
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
        PathBuf::from("auth-gateway.toml")
    }
}
