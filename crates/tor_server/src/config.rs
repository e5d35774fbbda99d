//! Environment-driven server configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tor_core::retry::RetryPolicy;

use crate::middleware::rate_limit::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub relay_url: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub app_url: String,
    pub db_max_connections: u32,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub mail: Option<MailConfig>,
    pub notifications_enabled: bool,
    pub seed_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("TOR_JWT_SECRET").ok_or(ConfigError::Missing("TOR_JWT_SECRET"))?;
        let database_url = get("TOR_DATABASE_URL").or_else(|| get("DATABASE_URL"));

        let retry = RetryPolicy {
            max_attempts: parse(&get, "TOR_RETRY_MAX_ATTEMPTS", 3)?,
            base_delay: Duration::from_millis(parse(&get, "TOR_RETRY_BASE_DELAY_MS", 50)?),
            max_delay: Duration::from_millis(parse(&get, "TOR_RETRY_MAX_DELAY_MS", 1000)?),
            attempt_timeout: Duration::from_millis(parse(&get, "TOR_STORE_TIMEOUT_MS", 5000)?),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "TOR_RETRY_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let rate_limit = RateLimitConfig {
            max_requests: parse(&get, "TOR_RATE_LIMIT_MAX", 60)?,
            window_secs: parse(&get, "TOR_RATE_LIMIT_WINDOW_SECS", 60)?,
        };
        if rate_limit.max_requests == 0 || rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "TOR_RATE_LIMIT_MAX",
                value: format!("{}/{}s", rate_limit.max_requests, rate_limit.window_secs),
                reason: "limit and window must both be positive".into(),
            });
        }

        let mail = get("TOR_MAIL_RELAY_URL").map(|relay_url| MailConfig {
            relay_url,
            from: get("TOR_MAIL_FROM").unwrap_or_else(|| "tor-approval@localhost".into()),
        });

        Ok(Self {
            jwt_secret,
            database_url,
            bind_addr: get("TOR_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:4200".into()),
            app_url: get("TOR_APP_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            db_max_connections: parse(&get, "TOR_DB_MAX_CONNECTIONS", 10)?,
            retry,
            rate_limit,
            mail,
            notifications_enabled: parse(&get, "TOR_NOTIFICATIONS_ENABLED", true)?,
            seed_file: get("TOR_SEED_FILE").map(PathBuf::from),
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
