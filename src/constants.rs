//! Application constants for the PataBima client
//!
//! This module centralizes all constants used throughout the client core,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Environment variable overriding the backend base URL
    pub const API_BASE_URL: &str = "PATABIMA_API_URL";

    /// Environment variable overriding the credential file location
    pub const CREDENTIAL_FILE: &str = "PATABIMA_CREDENTIAL_FILE";
}

/// Authentication and token lifecycle constants
pub mod auth {
    use super::Duration;

    /// Buffer before expiry at which a token counts as stale
    pub const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

    /// Fallback token lifetime when neither the response nor the JWT carries
    /// an expiry
    pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

    /// Interval between proactive expiry checks by the session monitor
    pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

    /// File permissions for the credential file (Unix only) - owner
    /// read/write only
    #[cfg(unix)]
    pub const CREDENTIAL_FILE_PERMISSIONS: u32 = 0o600;

    /// Credential file name under the platform config directory
    pub const CREDENTIAL_FILE_NAME: &str = "credentials.json";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "PataBima-Client/0.1.0";

    /// Default per-request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Extended timeout for endpoints known to be slow
    pub const SLOW_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(40);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;
}

/// Retry and recovery limits
pub mod limits {
    /// Maximum retry attempts for the opt-in backoff wrapper
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Ceiling on a single backoff delay (milliseconds)
    pub const MAX_BACKOFF_DELAY_MS: u64 = 10_000;

    /// Multiplier applied between backoff attempts
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// Host failover is attempted at most this many times per request
    pub const MAX_FAILOVER_RETRIES: u32 = 1;

    /// A 401 triggers at most this many refresh-and-retry cycles
    pub const MAX_AUTH_RETRIES: u32 = 1;

    /// Default rate limit applied to outgoing requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 15;
}

/// Backend hosts
pub mod hosts {
    /// Default backend base URL for local development
    pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

    /// Loopback aliases probed when the configured host is unreachable.
    /// `10.0.2.2` is the emulator alias for the development machine's
    /// loopback in certain mobile runtime environments.
    pub const FALLBACK_HOSTS: &[&str] = &["http://10.0.2.2:8000", "http://127.0.0.1:8000"];
}

/// Backend endpoint paths owned by the auth lifecycle
pub mod endpoints {
    /// Password step of the two-step login; issues an OTP
    pub const LOGIN: &str = "/api/v1/public_app/auth/login";

    /// OTP verification step; returns the token pair
    pub const VERIFY_OTP: &str = "/api/v1/public_app/auth/auth_login";

    /// Standard JWT refresh endpoint
    pub const REFRESH_TOKEN: &str = "/api/v1/public_app/auth/token/refresh";

    /// Authenticated profile fetch
    pub const CURRENT_USER: &str = "/api/v1/public_app/user/get_current_user";
}

/// Response cache TTL tiers
pub mod cache {
    use super::Duration;

    /// Short tier: fast-moving reference data (e.g. underwriter listings)
    pub const TTL_SHORT: Duration = Duration::from_secs(5 * 60);

    /// Medium tier: catalog data (e.g. category listings)
    pub const TTL_MEDIUM: Duration = Duration::from_secs(10 * 60);

    /// Long tier: near-static schemas (e.g. per-category field requirements)
    pub const TTL_LONG: Duration = Duration::from_secs(15 * 60);
}

/// Logging constants
pub mod logging {
    /// Default log filter when RUST_LOG is unset
    pub const DEFAULT_LOG_FILTER: &str = "patabima_client=info";
}

// Re-export commonly used constants for convenience
pub use auth::{DEFAULT_TOKEN_LIFETIME, REFRESH_BUFFER};
pub use hosts::DEFAULT_BASE_URL;
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use limits::{DEFAULT_RATE_LIMIT_RPS, MAX_AUTH_RETRIES, MAX_FAILOVER_RETRIES, MAX_RETRIES};
