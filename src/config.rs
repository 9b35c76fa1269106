//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Read model database URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Redis URL (cache and event stream)
    pub redis_url: String,

    /// Prefix of cache keys
    pub cache_key_prefix: String,

    /// Directory holding one `{account_id}.jsonl` blob per aggregate
    pub event_log_dir: String,

    /// Stream the command path publishes to
    pub event_stream_key: String,

    /// Stream undeliverable messages are parked on
    pub event_dlq_key: String,

    /// Consumer group of the projection
    pub projection_group: String,

    /// Member name of this projector process within the group
    pub projection_consumer: String,

    /// Apply attempts before a message is dead-lettered
    pub projection_max_attempts: u32,

    /// Lifetime of cached account snapshots
    pub cache_ttl: Duration,

    /// Deadline for every log, cache and transport call
    pub io_timeout: Duration,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    var_or(name, default)
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", "10")?;

        let redis_url = var_or("REDIS_URL", "redis://127.0.0.1:6379");
        let cache_key_prefix = var_or("CACHE_KEY_PREFIX", "account:");
        let event_log_dir = var_or("EVENT_LOG_DIR", "./data/events");
        let event_stream_key = var_or("EVENT_STREAM_KEY", "account-events");
        let event_dlq_key = var_or("EVENT_DLQ_KEY", "account-events:dlq");
        let projection_group = var_or("PROJECTION_GROUP", "projection-group");
        let projection_consumer = var_or("PROJECTION_CONSUMER", "projector-1");

        let projection_max_attempts: u32 = parse_or("PROJECTION_MAX_ATTEMPTS", "5")?;
        if projection_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PROJECTION_MAX_ATTEMPTS"));
        }

        let cache_ttl = Duration::from_secs(parse_or("CACHE_TTL_SECS", "600")?);
        let io_timeout = Duration::from_millis(parse_or("IO_TIMEOUT_MS", "5000")?);

        let host = var_or("HOST", "127.0.0.1");
        let port = parse_or("PORT", "8080")?;

        let environment = var_or("ENVIRONMENT", "development");

        Ok(Self {
            database_url,
            database_max_connections,
            redis_url,
            cache_key_prefix,
            event_log_dir,
            event_stream_key,
            event_dlq_key,
            projection_group,
            projection_consumer,
            projection_max_attempts,
            cache_ttl,
            io_timeout,
            host,
            port,
            environment,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_default_and_invalid() {
        let port: u16 = parse_or("EVENT_LEDGER_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);

        let err = parse_or::<u16>("EVENT_LEDGER_TEST_UNSET_PORT", "not-a-port").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("EVENT_LEDGER_TEST_UNSET_PORT")));
    }
}
