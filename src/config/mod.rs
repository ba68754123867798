use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::session::{PollConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RETRY_CEILING};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TrackerConfig {
    /// Base URL of the analysis service (e.g., "https://api.example.com/api")
    #[garde(length(min = 1))]
    pub analysis_api_url: String,

    /// Bearer token for the analysis service. Optional so that the host can
    /// supply a rotating credential instead.
    #[serde(default)]
    #[garde(skip)]
    pub analysis_api_token: Option<String>,

    /// Delay between status checks
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 100, max = 60_000))]
    pub poll_interval_ms: u64,

    /// Consecutive failed status checks tolerated before giving up
    #[serde(default = "default_retry_ceiling")]
    #[garde(range(max = 20))]
    pub status_retry_ceiling: u32,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_retry_ceiling() -> u32 {
    DEFAULT_RETRY_CEILING
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit key/value pairs (upper-case env names).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            retry_ceiling: self.status_retry_ceiling,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
