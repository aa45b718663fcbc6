//! Error types for the PataBima client
//!
//! This module defines the error types for all components of the client core.
//! Failures are classified once, at the point of origin (the request
//! executor), and carried as structured variants so upstream layers can make
//! control-flow decisions without inspecting message text.

use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy exposed to callers.
///
/// Maps one-to-one onto the UX categories the embedding application renders:
/// silent-retry-then-fail, "check your connection", "please log in again".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local deadline exceeded
    Timeout,
    /// Caller-initiated abort
    Cancelled,
    /// Transport unreachable (candidate for host failover)
    Network,
    /// Server responded with a non-2xx status
    Http,
    /// The session is definitively over; a fresh login is required
    SessionExpired,
}

/// API request errors
///
/// `Clone` is load-bearing: a single settled outcome is delivered to every
/// coalesced caller, so transport sources are flattened into strings when the
/// error is classified.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Request exceeded its composed deadline
    #[error("request to {endpoint} timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },

    /// Request was aborted by the caller's cancellation signal
    #[error("request to {endpoint} was cancelled")]
    Cancelled { endpoint: String },

    /// Transport-level failure: the host could not be reached
    #[error("network failure reaching {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },

    /// Server responded with a non-2xx status
    #[error("HTTP {status} from {endpoint}: {message}")]
    Http {
        status: u16,
        endpoint: String,
        message: String,
        payload: Option<serde_json::Value>,
    },

    /// Token refresh was definitively rejected; the session is over
    #[error("session expired: token refresh was rejected. Please log in again")]
    SessionExpired,

    /// A previous refresh failure locked the session
    #[error("session locked after failed token refresh. Please log in again")]
    Locked,

    /// Refresh was requested but no refresh token is held
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// Candidate probing was invoked with an empty candidate list
    #[error("no endpoint candidates provided for {trace_key}")]
    NoCandidates { trace_key: String },
}

impl ApiError {
    /// Caller-facing failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Cancelled { .. } => ErrorKind::Cancelled,
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Http { .. } | ApiError::NoCandidates { .. } => ErrorKind::Http,
            ApiError::SessionExpired | ApiError::Locked | ApiError::MissingRefreshToken => {
                ErrorKind::SessionExpired
            }
        }
    }

    /// HTTP status code, when the server produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Logical endpoint the failure originated from, when known
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ApiError::Timeout { endpoint, .. }
            | ApiError::Cancelled { endpoint }
            | ApiError::Network { endpoint, .. }
            | ApiError::Http { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Authorization class: 401/403
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Not-found class for candidate probing: 404, or a redirect the client
    /// does not follow
    pub fn is_not_found_class(&self) -> bool {
        matches!(self.status(), Some(404) | Some(301..=308))
    }

    /// Connectivity-level failure eligible for host failover
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    /// Whether a retry wrapper may re-issue the request
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Credential storage errors
#[derive(Error, Debug)]
pub enum CredentialError {
    /// I/O failure reading or writing the credential file
    #[error("credential storage I/O failure")]
    Io(#[from] std::io::Error),

    /// Credential file contents could not be decoded
    #[error("credential file is corrupt")]
    Corrupt(#[from] serde_json::Error),

    /// No usable storage directory on this platform
    #[error("no credential storage directory available")]
    NoStorageDir,

    /// Permission error on the credential file
    #[error("permission denied accessing credential file: {path}")]
    PermissionDenied { path: PathBuf },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("configuration could not be serialized")]
    Serialize(#[from] toml::ser::Error),

    /// I/O error reading or writing configuration
    #[error("configuration I/O error")]
    Io(#[from] std::io::Error),

    /// No usable config directory on this platform
    #[error("no configuration directory available")]
    NoConfigDir,

    /// Invalid configuration value
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// API request error
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Credential storage error
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("application error: {message}")]
    Generic { message: String },
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::generic(format!("JSON error: {e}"))
    }
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Api(e) => e.is_retryable(),
            AppError::Credential(CredentialError::Io(_)) => true,
            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Api(e) => match e.kind() {
                ErrorKind::Timeout => "timeout",
                ErrorKind::Cancelled => "cancelled",
                ErrorKind::Network => "network",
                ErrorKind::Http => "http",
                ErrorKind::SessionExpired => "session",
            },
            AppError::Credential(_) => "credentials",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// API result type alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Credential result type alias
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
