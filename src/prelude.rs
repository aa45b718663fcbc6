//! Prelude module for the PataBima client library
//!
//! Re-exports the most commonly used items, providing a convenient way to
//! import everything needed for typical usage with a single
//! `use patabima_client::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use patabima_client::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(FileCredentialStore::new().map_err(AppError::from)?);
//!     let client = ApiClient::new(ClientConfig::default(), store)?;
//!
//!     let quotes = client.get("/api/v1/public_app/insurance/get_quotations").await?;
//!     println!("{}", quotes.body);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{ApiError, AppError, ErrorKind, Result};

// Essential client components
pub use crate::app::{
    ApiClient,
    ApiResponse,
    AuthManager,
    AuthState,
    ClientConfig,
    EndpointCandidates,
    ProbeMode,
    ProbePolicy,
    RequestDescriptor,
    ResponseCache,
    RetryPolicy,
    retry_with_backoff,
};

// Credential storage
pub use crate::auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore, TokenPair};

// Commonly used constants
pub use crate::constants::{DEFAULT_BASE_URL, HTTP_TIMEOUT, REFRESH_BUFFER, USER_AGENT};

// Standard library re-exports that are commonly needed
pub use std::sync::Arc;
pub use std::time::Duration;
