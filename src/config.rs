//! Configuration management for the PataBima client
//!
//! Unified configuration with zero-config defaults, automatic first-run
//! initialization, and a TOML file under the platform config directory.
//! The TOML document is split into sections mirroring the runtime config
//! structs; durations are written in human-readable form ("30s", "5m").

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::client::ClientConfig;
use crate::app::retry::RetryPolicy;
use crate::constants::{auth, cache, hosts, http, limits, logging};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Backend API settings
    pub api: ApiConfigToml,
    /// HTTP transport settings
    pub client: ClientConfigToml,
    /// Opt-in retry settings
    pub retry: RetryConfigToml,
    /// Response cache TTL tiers
    pub cache: CacheConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfigToml {
    /// Backend base URL
    pub base_url: String,
    /// Alternate hosts probed after a connectivity failure
    pub fallback_hosts: Vec<String>,
    /// Default per-request timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Refresh tokens this long before they expire
    #[serde(with = "humantime_serde")]
    pub refresh_buffer: Duration,
    /// Verbose request/response logging
    pub debug_logging: bool,
}

impl Default for ApiConfigToml {
    fn default() -> Self {
        Self {
            base_url: hosts::DEFAULT_BASE_URL.to_string(),
            fallback_hosts: hosts::FALLBACK_HOSTS.iter().map(|h| h.to_string()).collect(),
            default_timeout: http::DEFAULT_TIMEOUT,
            refresh_buffer: auth::REFRESH_BUFFER,
            debug_logging: false,
        }
    }
}

/// TOML-friendly HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfigToml {
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// TCP keep-alive interval in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
        }
    }
}

/// TOML-friendly retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfigToml {
    /// Attempts made after the initial call
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Ceiling applied to every delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier applied between attempts
    pub backoff_factor: f64,
    /// Randomize delays to avoid thundering herds
    pub jitter: bool,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay: policy.initial_delay,
            max_delay: policy.max_delay,
            backoff_factor: policy.backoff_factor,
            jitter: policy.jitter,
        }
    }
}

/// TOML-friendly cache TTL tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfigToml {
    /// Fast-moving reference data
    #[serde(with = "humantime_serde")]
    pub ttl_short: Duration,
    /// Catalog data
    #[serde(with = "humantime_serde")]
    pub ttl_medium: Duration,
    /// Near-static schemas
    #[serde(with = "humantime_serde")]
    pub ttl_long: Duration,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            ttl_short: cache::TTL_SHORT,
            ttl_medium: cache::TTL_MEDIUM,
            ttl_long: cache::TTL_LONG,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter applied when RUST_LOG is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: logging::DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Default configuration file path:
    /// - macOS: ~/Library/Application Support/patabima/config.toml
    /// - Linux: ~/.config/patabima/config.toml
    /// - Windows: %APPDATA%/patabima/config.toml
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let path = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("patabima")
            .join("config.toml");
        Ok(path)
    }

    /// Load configuration from the given path, or the default location.
    ///
    /// A missing file yields the built-in defaults; a present but invalid
    /// file is an error rather than a silent fallback.
    pub fn load(path: Option<PathBuf>) -> ConfigResult<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_config_path()?,
        };

        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write this configuration to the given path, creating parent
    /// directories as needed
    pub fn save(&self, path: &std::path::Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// First-run initialization: write the default configuration file if
    /// none exists yet, then return the loaded configuration
    pub fn initialize() -> ConfigResult<Self> {
        let path = Self::default_config_path()?;
        if !path.exists() {
            info!("First run: writing default configuration");
            Self::default().save(&path)?;
        }
        Self::load(Some(path))
    }

    /// Build the runtime client configuration from the TOML document
    pub fn to_client_config(&self) -> ConfigResult<ClientConfig> {
        let base_url = parse_host(&self.api.base_url, "api.base_url")?;
        let fallback_hosts = self
            .api
            .fallback_hosts
            .iter()
            .map(|raw| parse_host(raw, "api.fallback_hosts"))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(ClientConfig {
            base_url,
            fallback_hosts,
            default_timeout: self.api.default_timeout,
            refresh_buffer: self.api.refresh_buffer,
            rate_limit_rps: self.client.rate_limit_rps,
            connect_timeout: self.client.connect_timeout,
            tcp_keepalive: self.client.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.client.tcp_nodelay,
            pool_idle_timeout: self.client.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.client.pool_max_per_host,
            debug_logging: self.api.debug_logging,
        })
    }

    /// Build the opt-in retry policy from the TOML document
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: self.retry.initial_delay,
            max_delay: self.retry.max_delay,
            backoff_factor: self.retry.backoff_factor,
            jitter: self.retry.jitter,
        }
    }
}

fn parse_host(raw: &str, field: &str) -> ConfigResult<Url> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("{raw}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_roundtrips_through_toml() {
        let config = AppConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();

        assert_eq!(parsed.api.base_url, config.api.base_url);
        assert_eq!(parsed.api.refresh_buffer, config.api.refresh_buffer);
        assert_eq!(parsed.cache.ttl_long, config.cache.ttl_long);
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.api.base_url = "http://192.168.1.50:8000".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.api.base_url, "http://192.168.1.50:8000");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.api.base_url, crate::constants::DEFAULT_BASE_URL);
    }

    #[test]
    fn durations_accept_human_readable_form() {
        let raw = r#"
            [api]
            base_url = "http://127.0.0.1:8000"
            fallback_hosts = []
            default_timeout = "40s"
            refresh_buffer = "5m"
            debug_logging = true

            [client]
            rate_limit_rps = 5
            connect_timeout = "10s"
            tcp_nodelay = true
            pool_max_per_host = 4

            [retry]
            max_retries = 2
            initial_delay = "500ms"
            max_delay = "5s"
            backoff_factor = 2.0
            jitter = false

            [cache]
            ttl_short = "5m"
            ttl_medium = "10m"
            ttl_long = "15m"

            [logging]
            filter = "patabima_client=debug"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.api.default_timeout, Duration::from_secs(40));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert!(config.api.debug_logging);
    }

    #[test]
    fn runtime_conversion_validates_urls() {
        let mut config = AppConfig::default();
        let client_config = config.to_client_config().unwrap();
        assert_eq!(client_config.base_url.as_str(), "http://127.0.0.1:8000/");

        config.api.base_url = "not a url".to_string();
        assert!(matches!(
            config.to_client_config(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
