//! Configuration management for Floodgate.
//!
//! Configuration is layered: an optional file first, then environment
//! variables prefixed with `FLOODGATE__` (for example
//! `FLOODGATE__RATE_LIMITING__DEFAULT_LIMIT=10`). Every field has a default,
//! so an empty environment yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{FloodgateError, Result};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting defaults
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Process-wide limits applied when no override record matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per one-second window
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Block duration in seconds once the limit is exceeded
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RateLimitingConfig {
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_secs)
    }
}

fn default_limit() -> u64 {
    10
}

fn default_cooldown_secs() -> u64 {
    20
}

/// Which counter store realization to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance
    Redis,
    /// Process-local map, for development only
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL, including the database index
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command response timeout in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_response_timeout_ms() -> u64 {
    500
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration. The level comes from `RUST_LOG`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl FloodgateConfig {
    /// Load configuration from an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: FloodgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the decision engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.default_limit == 0 {
            return Err(FloodgateError::Config(
                "rate_limiting.default_limit must be positive".to_string(),
            ));
        }
        if self.rate_limiting.default_cooldown_secs == 0 {
            return Err(FloodgateError::Config(
                "rate_limiting.default_cooldown_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FloodgateConfig::default();
        assert_eq!(config.rate_limiting.default_limit, 10);
        assert_eq!(
            config.rate_limiting.default_cooldown(),
            Duration::from_secs(20)
        );
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = FloodgateConfig::default();
        config.rate_limiting.default_limit = 0;
        assert!(matches!(config.validate(), Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_zero_cooldown_rejected() {
        let mut config = FloodgateConfig::default();
        config.rate_limiting.default_cooldown_secs = 0;
        assert!(matches!(config.validate(), Err(FloodgateError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "floodgate-config-test-{}.toml",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
listen_addr = "127.0.0.1:9000"

[rate_limiting]
default_limit = 5
default_cooldown_secs = 15

[store]
backend = "memory"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = FloodgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.rate_limiting.default_limit, 5);
        assert_eq!(config.rate_limiting.default_cooldown_secs, 15);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
