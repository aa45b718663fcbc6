//! Resilient API client for the PataBima backend
//!
//! This module composes the client core: auth lifecycle management,
//! in-flight request coalescing, endpoint candidate probing, response
//! caching and host failover, behind the single entry point callers use.
//!
//! The module is organized into specialized components:
//! - `config`: client configuration and HTTP client building
//! - `auth`: token lifecycle with single-flight refresh
//! - `executor`: single-request execution with composed cancellation
//! - `inflight`: deduplication of concurrent identical requests
//! - `resolver`: ordered endpoint candidate probing
//! - `failover`: base-host rotation on connectivity failure

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;
use url::Url;

use crate::app::cache::ResponseCache;
use crate::auth::CredentialStore;
use crate::constants::{endpoints, limits};
use crate::errors::{ApiError, ApiResult, Result};

// Module declarations
pub mod auth;
pub mod config;
pub mod executor;
pub mod failover;
pub mod inflight;
pub mod resolver;

pub use auth::{AuthManager, AuthState, SessionCallback};
pub use config::ClientConfig;
pub use executor::{ApiResponse, RequestDescriptor, RequestExecutor};
pub use failover::HostFailover;
pub use inflight::InFlightRegistry;
pub use resolver::{EndpointCandidates, EndpointResolver, ProbeMode, ProbePolicy};

use auth::join_url;

/// API client facade.
///
/// One instance owns all shared client state for a session: the token pair,
/// the in-flight registry and the response cache each have exactly one
/// writer, and every caller goes through this facade. Construct once per
/// session; `reset()` tears the session down on logout.
#[derive(Debug)]
pub struct ApiClient {
    config: ClientConfig,
    executor: Arc<RequestExecutor>,
    auth: Arc<AuthManager>,
    failover: Arc<HostFailover>,
    inflight: InFlightRegistry,
    resolver: EndpointResolver,
    cache: ResponseCache,
}

impl ApiClient {
    /// Create a client over the given configuration and credential store.
    ///
    /// Any session persisted in the store is resumed.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = config.build_http_client()?;
        let executor = Arc::new(RequestExecutor::new(client, config.rate_limit_rps)?);
        let failover = Arc::new(HostFailover::new(
            config.base_url.clone(),
            config.fallback_hosts.clone(),
        ));
        let auth = Arc::new(AuthManager::new(
            store,
            Arc::clone(&executor),
            Arc::clone(&failover),
            config.refresh_buffer,
        ));

        info!("API client initialized with base host {}", config.base_url);

        Ok(Self {
            config,
            executor,
            auth,
            failover,
            inflight: InFlightRegistry::new(),
            resolver: EndpointResolver::new(),
            cache: ResponseCache::new(),
        })
    }

    /// Issue one logical request through the full pipeline.
    ///
    /// Locked-session gate, proactive token validation, coalescing,
    /// execution, then local recovery: a 401 is retried once after a
    /// refresh, a connectivity failure is retried once after a host
    /// rotation. Nothing is retried more than once per failure class.
    pub async fn request(&self, descriptor: RequestDescriptor) -> ApiResult<ApiResponse> {
        if !descriptor.allow_when_locked && self.auth.is_locked().await {
            return Err(ApiError::Locked);
        }
        if !descriptor.anonymous {
            self.auth.ensure_valid(self.config.refresh_buffer).await?;
        }

        let mut auth_retries = 0;
        let mut failover_retries = 0;
        loop {
            let base = self.failover.active_host().await;
            let url = join_url(&base, &descriptor.path)?;
            let bearer = if descriptor.anonymous {
                None
            } else {
                self.auth.access_token().await
            };

            let key = descriptor.coalescing_key(&url);
            let outcome = self
                .inflight
                .dispatch(key, || {
                    let executor = Arc::clone(&self.executor);
                    let descriptor = descriptor.clone();
                    let url = url.clone();
                    async move {
                        executor
                            .execute(&url, &descriptor, bearer.as_deref())
                            .await
                    }
                })
                .await;

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.status() == Some(401) && !descriptor.anonymous => {
                    if auth_retries >= limits::MAX_AUTH_RETRIES {
                        return Err(self.auth.on_repeated_unauthorized().await);
                    }
                    if self.auth.on_unauthorized().await? {
                        auth_retries += 1;
                        continue;
                    }
                    // No refresh token held: surface the 401 untouched
                    return Err(e);
                }
                Err(e) if e.is_connectivity() => {
                    if failover_retries >= limits::MAX_FAILOVER_RETRIES {
                        return Err(e);
                    }
                    match self.failover.on_transport_failure().await {
                        Some(_) => {
                            failover_retries += 1;
                            continue;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET `path`
    pub async fn get(&self, path: impl Into<String>) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::get(path)).await
    }

    /// POST a JSON body to `path`
    pub async fn post(&self, path: impl Into<String>, body: Value) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::post(path, body)).await
    }

    /// Probe `candidates` in order with `template` (its path is replaced per
    /// candidate) until one succeeds
    pub async fn resolve(
        &self,
        candidates: &EndpointCandidates,
        policy: &ProbePolicy,
        template: RequestDescriptor,
    ) -> ApiResult<ApiResponse> {
        self.resolver
            .resolve(candidates, policy, |path| {
                let mut descriptor = template.clone();
                descriptor.path = path;
                self.request(descriptor)
            })
            .await
    }

    /// Read-through cache for idempotent, slowly-changing reads
    pub async fn get_cached(
        &self,
        cache_key: &str,
        ttl: Duration,
        descriptor: RequestDescriptor,
    ) -> ApiResult<Value> {
        if let Some(value) = self.cache.get(cache_key).await {
            return Ok(value);
        }
        let response = self.request(descriptor).await?;
        self.cache
            .set(cache_key, response.body.clone(), ttl)
            .await;
        Ok(response.body)
    }

    /// Read-through cache over candidate probing
    pub async fn resolve_cached(
        &self,
        cache_key: &str,
        ttl: Duration,
        candidates: &EndpointCandidates,
        policy: &ProbePolicy,
        template: RequestDescriptor,
    ) -> ApiResult<Value> {
        if let Some(value) = self.cache.get(cache_key).await {
            return Ok(value);
        }
        let response = self.resolve(candidates, policy, template).await?;
        self.cache
            .set(cache_key, response.body.clone(), ttl)
            .await;
        Ok(response.body)
    }

    /// Password step of the two-step login; the backend responds with an
    /// OTP challenge. Permitted while locked so a locked session can
    /// recover.
    pub async fn login(&self, phonenumber: &str, password: &str) -> ApiResult<Value> {
        let descriptor = RequestDescriptor::post(
            endpoints::LOGIN,
            json!({ "phonenumber": phonenumber, "password": password }),
        )
        .anonymous()
        .allow_when_locked();
        Ok(self.request(descriptor).await?.body)
    }

    /// OTP verification step. On success the returned token pair is adopted
    /// as the active session, any lock is cleared, and the proactive session
    /// monitor is started.
    pub async fn verify_otp(
        &self,
        phonenumber: &str,
        password: &str,
        code: &str,
    ) -> ApiResult<Value> {
        let descriptor = RequestDescriptor::post(
            endpoints::VERIFY_OTP,
            json!({ "phonenumber": phonenumber, "password": password, "code": code }),
        )
        .anonymous()
        .allow_when_locked();
        let body = self.request(descriptor).await?.body;

        if let Some(access) = body.get("access").and_then(Value::as_str) {
            let refresh = body
                .get("refresh")
                .and_then(Value::as_str)
                .map(str::to_string);
            let expires_at = body
                .get("expires_at")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));
            self.auth.adopt_session(access, refresh, expires_at).await;
            AuthManager::start_monitor(&self.auth);
        }
        Ok(body)
    }

    /// Authenticated profile fetch; permitted while locked since the
    /// original login flow reads it mid-recovery
    pub async fn current_user(&self) -> ApiResult<Value> {
        let descriptor = RequestDescriptor::get(endpoints::CURRENT_USER).allow_when_locked();
        Ok(self.request(descriptor).await?.body)
    }

    /// Tear the session down: clear tokens from memory and store, drop every
    /// cached response, return to the anonymous state
    pub async fn reset(&self) {
        self.auth.clear_session().await;
        self.cache.invalidate_all().await;
    }

    /// Orderly logout
    pub async fn logout(&self) {
        self.reset().await;
    }

    /// Register the session-expired observer; `None` detaches
    pub fn on_session_expired(&self, callback: Option<SessionCallback>) {
        self.auth.set_on_session_expired(callback);
    }

    /// Register the token-refreshed observer; `None` detaches
    pub fn on_token_refreshed(&self, callback: Option<SessionCallback>) {
        self.auth.set_on_token_refreshed(callback);
    }

    /// Start the proactive session monitor
    pub fn start_session_monitoring(&self) {
        AuthManager::start_monitor(&self.auth);
    }

    /// Stop the proactive session monitor
    pub fn stop_session_monitoring(&self) {
        self.auth.stop_monitor();
    }

    /// Current auth lifecycle state
    pub async fn auth_state(&self) -> AuthState {
        self.auth.state().await
    }

    /// Base host requests are currently issued against (may differ from the
    /// configured host after a failover)
    pub async fn active_host(&self) -> Url {
        self.failover.active_host().await
    }

    /// Which path last served a probed operation, for diagnostics
    pub fn last_used_endpoint(&self, trace_key: &str) -> Option<String> {
        self.resolver.last_used_endpoint(trace_key)
    }

    /// The response cache, for explicit invalidation after mutations
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The auth lifecycle manager
    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// The client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
