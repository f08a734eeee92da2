use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Unset means presence is kept in process.
    pub redis_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub presence_timeout: Duration,
    pub subscriber_queue: usize,
    pub upload_dir: PathBuf,
    pub session_inactivity: time::Duration,
}

impl Config {
    /// Reads the environment, honoring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| dotenv::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Config {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://roomcast.db?mode=rwc".to_owned()),
            redis_url: get("REDIS_URL"),
            bind_addr: parse(&get, "BIND_ADDR", "0.0.0.0:8080")?,
            presence_timeout: Duration::from_millis(parse(&get, "PRESENCE_TIMEOUT_MS", "250")?),
            subscriber_queue: parse(&get, "SUBSCRIBER_QUEUE", "64")?,
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_owned()).into(),
            session_inactivity: time::Duration::minutes(parse(&get, "SESSION_INACTIVITY_MINUTES", "60")?),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = get(var).unwrap_or_else(|| default.to_owned());
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}
