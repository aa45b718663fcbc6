//! Single-request execution with composed cancellation
//!
//! The executor performs exactly one HTTP call: it applies rate limiting,
//! injects uniform headers, races the transport future against the caller's
//! cancellation signal and the per-call deadline, and classifies every
//! failure into a structured [`ApiError`] at the point of origin. Upstream
//! layers (resolver, auth manager, failover) branch on those variants and
//! never re-parse anything.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::constants::http;
use crate::errors::{ApiError, ApiResult, ConfigError};

/// One logical request, immutable once dispatched
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Path relative to the active base host
    pub path: String,
    /// JSON request body
    pub body: Option<Value>,
    /// Per-call deadline; `None` uses the configured default
    pub timeout: Option<Duration>,
    /// Caller-supplied cancellation, composed with the deadline
    pub cancel: Option<CancellationToken>,
    /// Skip the Authorization header even when a token is held
    pub anonymous: bool,
    /// Bypass the locked-session gate (login and OTP verification)
    pub allow_when_locked: bool,
}

impl RequestDescriptor {
    /// GET request for `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None)
    }

    /// POST request with a JSON body
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path, Some(body))
    }

    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            timeout: None,
            cancel: None,
            anonymous: false,
            allow_when_locked: false,
        }
    }

    /// Override the per-call deadline (some endpoints are known to be slow)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a caller-side cancellation signal
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Issue without an Authorization header
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Allow through the locked-session gate
    pub fn allow_when_locked(mut self) -> Self {
        self.allow_when_locked = true;
        self
    }

    /// Coalescing key: method, full URL and serialized body
    pub fn coalescing_key(&self, url: &Url) -> String {
        let body = self
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        format!("{} {} {}", self.method, url, body)
    }
}

/// Successful response: status plus decoded JSON body.
///
/// Coalesced callers each receive a clone, so post-processing by one caller
/// can never leak into another's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Performs individual HTTP calls with rate limiting and uniform
/// classification
pub struct RequestExecutor {
    client: Client,
    rate_limiter: RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor").finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates a new executor over the given client with the given rate
    /// limit
    pub fn new(client: Client, rate_limit_rps: u32) -> Result<Self, ConfigError> {
        let quota = NonZeroU32::new(rate_limit_rps).ok_or(ConfigError::InvalidValue {
            field: "rate_limit_rps".into(),
            reason: "rate limit must be non-zero".into(),
        })?;
        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(Quota::per_second(quota)),
        })
    }

    /// Issue one request against `url`.
    ///
    /// `bearer` is attached as an Authorization header unless the descriptor
    /// is anonymous. The call is raced against the caller's cancellation
    /// token and the per-call deadline; cancellation wins ties so an
    /// abandoned call is never misreported as slow.
    pub async fn execute(
        &self,
        url: &Url,
        descriptor: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> ApiResult<ApiResponse> {
        // Jitter spreads bursts of coalesced misses
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let timeout = descriptor.timeout.unwrap_or(http::DEFAULT_TIMEOUT);
        let endpoint = descriptor.path.clone();

        let mut request = self
            .client
            .request(descriptor.method.clone(), url.clone())
            .header(reqwest::header::ACCEPT, "application/json");

        if let (Some(token), false) = (bearer, descriptor.anonymous) {
            request = request.bearer_auth(token);
        }

        if let Some(body) = &descriptor.body {
            request = request.json(body);
        }

        tracing::debug!("{} {}", descriptor.method, url);

        let send = self.send_classified(request, &endpoint, timeout);
        match &descriptor.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ApiError::Cancelled { endpoint }),
                    outcome = send => outcome,
                }
            }
            None => send.await,
        }
    }

    /// Drive the transport call under the deadline and classify the outcome
    async fn send_classified(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
        timeout: Duration,
    ) -> ApiResult<ApiResponse> {
        let response = match tokio::time::timeout(timeout, request.send()).await {
            Err(_elapsed) => {
                return Err(ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Err(classify_transport_error(endpoint, timeout, e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        // Tolerate empty and non-JSON bodies; the status drives control flow
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            tracing::debug!("{endpoint} -> {status}");
            return Ok(ApiResponse {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("{endpoint} -> {status}");
        Err(http_error(status, endpoint, body))
    }
}

/// Map a transport-level reqwest failure onto the error taxonomy
fn classify_transport_error(endpoint: &str, timeout: Duration, e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout {
            endpoint: endpoint.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        ApiError::Network {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        }
    }
}

/// Build the structured HTTP error, assembling the message from the common
/// backend body shapes
fn http_error(status: StatusCode, endpoint: &str, body: Value) -> ApiError {
    let mut message = format!("HTTP {}", status.as_u16());
    if let Some(msg) = body.get("message").and_then(Value::as_str) {
        message.push_str(": ");
        message.push_str(msg);
    }
    if let Some(detail) = body.get("detail").and_then(Value::as_str) {
        message.push_str(": ");
        message.push_str(detail);
    }
    if let Some(errors) = body.get("errors") {
        message.push_str(&format!(" (validation errors: {errors})"));
    }

    let payload = if body.is_null() { None } else { Some(body) };
    ApiError::Http {
        status: status.as_u16(),
        endpoint: endpoint.to_string(),
        message,
        payload,
    }
}
