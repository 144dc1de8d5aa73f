use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::adapter::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub persist_path: Option<PathBuf>,
    pub admin_password: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            persist_path: None,
            admin_password: "changeme".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_retries = parse_or(&lookup, "SAVE_MAX_RETRIES", defaults.retry.max_retries)?;
        let base_delay_ms = parse_or(
            &lookup,
            "SAVE_BASE_DELAY_MS",
            defaults.retry.base_delay.as_millis() as u64,
        )?;

        Ok(Self {
            host: lookup("SANTA_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "SANTA_PORT", defaults.port)?,
            persist_path: lookup("PERSIST_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            admin_password: lookup("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError { key, value: raw }),
        None => Ok(default),
    }
}
