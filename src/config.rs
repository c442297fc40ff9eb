//! Clipboard configuration: backend selection and timing.
//!
//! The binary takes these from command-line flags (with the same
//! environment variables as fallbacks). Library and C callers go through
//! [`ClipboardConfig::from_env`].

use std::time::Duration;

use crate::backend::{BackendKind, RetryPolicy};

pub const ENV_BACKEND: &str = "CLIPD_BACKEND";
pub const ENV_ATTEMPTS: &str = "CLIPD_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "CLIPD_RETRY_DELAY_MS";
pub const ENV_READ_TIMEOUT_MS: &str = "CLIPD_READ_TIMEOUT_MS";

/// Default bound on waiting for another selection owner to answer.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardConfig {
    pub backend: BackendKind,
    pub retry: RetryPolicy,
    /// How long to wait for a selection owner on window-owned platforms.
    pub read_timeout: Duration,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            retry: RetryPolicy::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ClipboardConfig {
    /// Defaults overridden by `CLIPD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BACKEND) {
            config.backend = value.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_BACKEND,
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = lookup(ENV_ATTEMPTS) {
            config.retry.attempts = parse_number(ENV_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_RETRY_DELAY_MS) {
            config.retry.initial_delay =
                Duration::from_millis(parse_number(ENV_RETRY_DELAY_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_READ_TIMEOUT_MS) {
            config.read_timeout = Duration::from_millis(parse_number(ENV_READ_TIMEOUT_MS, &value)?);
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_owned(),
        reason: e.to_string(),
    })
}
