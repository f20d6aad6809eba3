//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The account password is loaded from the FORTUM_PASSWORD env var or
//! password_file, never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use fortum_api::ApiConfig;
use fortum_auth::AuthConfig;
use serde::Deserialize;

pub const PASSWORD_ENV: &str = "FORTUM_PASSWORD";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub fortum: AccountConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Portal account
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to FORTUM_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

/// Polling and HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9105))
}

fn default_interval() -> u64 {
    900
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. FORTUM_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.fortum.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.fortum.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.fortum.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.fortum.username.trim().is_empty() {
            return Err(common::Error::Config("fortum.username must not be empty".into()));
        }
        if self.poller.interval_secs == 0 {
            return Err(common::Error::Config(
                "interval_secs must be greater than 0".into(),
            ));
        }
        if self.poller.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.poller.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        self.auth
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;
        self.api.validate().map_err(common::Error::Config)?;
        Ok(())
    }

    /// The resolved password, or an error naming where it was expected.
    pub fn password(&self) -> common::Result<&Secret<String>> {
        self.fortum
            .password
            .as_ref()
            .ok_or_else(|| common::Error::MissingCredential(format!("{PASSWORD_ENV} or password_file")))
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("fortum-poller.toml")
    }
}
