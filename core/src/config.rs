//! Environment-driven settings.
//!
//! | Variable                       | Meaning                          | Default |
//! |--------------------------------|----------------------------------|---------|
//! | `PLANNER_NET_MIN_DELAY_MS`     | lower bound of one leg's delay   | 1000    |
//! | `PLANNER_NET_MAX_DELAY_MS`     | upper bound of one leg's delay   | 3000    |
//! | `PLANNER_NET_DROP_RATE`        | per-leg loss probability         | 0.2     |
//! | `PLANNER_REQUEST_TIMEOUT_MS`   | client timeout, `0` for none     | 10000   |
//! | `PLANNER_SEED`                 | seed for reproducible runs       | unset   |

use std::time::Duration;

use crate::error::ConfigError;
use crate::network::NetworkConfig;

pub const MIN_DELAY_VAR: &str = "PLANNER_NET_MIN_DELAY_MS";
pub const MAX_DELAY_VAR: &str = "PLANNER_NET_MAX_DELAY_MS";
pub const DROP_RATE_VAR: &str = "PLANNER_NET_DROP_RATE";
pub const TIMEOUT_VAR: &str = "PLANNER_REQUEST_TIMEOUT_MS";
pub const SEED_VAR: &str = "PLANNER_SEED";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Applied to every request; `Duration::ZERO` disables the timeout.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Everything a planner process reads from its environment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Settings {
    pub network: NetworkConfig,
    pub client: ClientConfig,
    pub seed: Option<u64>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset keys keep their defaults;
    /// set but unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        if let Some(ms) = parse::<u64>(&lookup, MIN_DELAY_VAR)? {
            settings.network.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, MAX_DELAY_VAR)? {
            settings.network.max_delay = Duration::from_millis(ms);
        }
        if let Some(rate) = parse::<f64>(&lookup, DROP_RATE_VAR)? {
            settings.network.drop_rate = rate;
        }
        if let Some(ms) = parse::<u64>(&lookup, TIMEOUT_VAR)? {
            settings.client.request_timeout = Duration::from_millis(ms);
        }
        settings.seed = parse::<u64>(&lookup, SEED_VAR)?;
        settings.network.validate()?;
        Ok(settings)
    }
}

impl NetworkConfig {
    /// Network section of [`Settings::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Settings::from_env().map(|settings| settings.network)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw,
    })
}
