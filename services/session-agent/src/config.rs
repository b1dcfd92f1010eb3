//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The backend URL can be overridden with `EXPENSE_TRACKER_BACKEND_URL` so
//! one config file serves several deployments.

use serde::Deserialize;
use session_refresh::RefreshPolicy;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `backend.base_url`.
pub const BACKEND_URL_ENV: &str = "EXPENSE_TRACKER_BACKEND_URL";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Expense tracker backend
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Token persistence and refresh timing
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub store_path: PathBuf,
    #[serde(default = "default_lead_time")]
    pub lead_time_secs: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,
}

/// Local control API
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_lead_time() -> u64 {
    60
}

fn default_min_delay() -> u64 {
    10
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9091))
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            config.backend.base_url = url;
        }
        config.backend.base_url = config.backend.base_url.trim_end_matches('/').to_owned();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }

        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.store_path.as_os_str().is_empty() {
            return Err(common::Error::Config("store_path must not be empty".into()));
        }

        if self.session.min_delay_secs == 0 {
            return Err(common::Error::Config(
                "min_delay_secs must be greater than 0".into(),
            ));
        }

        if self.agent.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            lead_time: Duration::from_secs(self.session.lead_time_secs),
            min_delay: Duration::from_secs(self.session.min_delay_secs),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-agent.toml")
    }
}
