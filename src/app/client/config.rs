//! HTTP client configuration and building logic
//!
//! This module handles the configuration and construction of the underlying
//! HTTP client shared by every component of the core.

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::Client;
use url::Url;

use crate::constants::{auth, env as env_constants, hosts, http, limits};
use crate::errors::{ApiError, ApiResult};

/// Configuration for the client core
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base host all relative paths are joined against
    pub base_url: Url,
    /// Alternate hosts probed once after a connectivity failure
    pub fallback_hosts: Vec<Url>,
    /// Per-request timeout unless a descriptor overrides it
    pub default_timeout: Duration,
    /// Token staleness buffer: a refresh is triggered this long before expiry
    pub refresh_buffer: Duration,
    /// Rate limit applied to outgoing requests (requests per second)
    pub rate_limit_rps: u32,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// TCP keep-alive interval
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Verbose request/response logging
    pub debug_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let base_url = std::env::var(env_constants::API_BASE_URL)
            .ok()
            .and_then(|raw| Url::parse(&raw).ok())
            .unwrap_or_else(|| {
                Url::parse(hosts::DEFAULT_BASE_URL).expect("default base URL is valid")
            });

        Self {
            base_url,
            fallback_hosts: hosts::FALLBACK_HOSTS
                .iter()
                .map(|h| Url::parse(h).expect("fallback host is valid"))
                .collect(),
            default_timeout: http::DEFAULT_TIMEOUT,
            refresh_buffer: auth::REFRESH_BUFFER,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            debug_logging: false,
        }
    }
}

impl ClientConfig {
    /// Builds the HTTP client with the specified configuration.
    ///
    /// Redirects are not followed: 3xx statuses must reach the endpoint
    /// resolver, which treats them as the not-found class during candidate
    /// probing. The per-request deadline is enforced by the executor, so no
    /// global timeout is set here.
    pub fn build_http_client(&self) -> ApiResult<Client> {
        let mut client_builder = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(|e| ApiError::Network {
            endpoint: self.base_url.to_string(),
            detail: format!("failed to build HTTP client: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_settings() {
        let config = ClientConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.refresh_buffer, Duration::from_secs(5 * 60));
        assert!(config.tcp_nodelay);
        assert!(!config.fallback_hosts.is_empty());
    }

    #[test]
    fn custom_config_inherits_defaults() {
        let config = ClientConfig {
            rate_limit_rps: 5,
            default_timeout: Duration::from_secs(40),
            ..Default::default()
        };
        assert_eq!(config.rate_limit_rps, 5);
        assert_eq!(config.default_timeout, Duration::from_secs(40));
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn http_client_creation() {
        let config = ClientConfig::default();
        assert!(config.build_http_client().is_ok());
    }
}
