//! Auth lifecycle management
//!
//! Owns the access/refresh token pair in memory, detects expiry, performs
//! single-flight refresh, and parks concurrent callers while a refresh is
//! pending so every one of them observes the single outcome. The session
//! moves to `Locked` only on a definitive refresh rejection from the
//! backend, never on a transient connectivity blip.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::client::executor::{RequestDescriptor, RequestExecutor};
use crate::app::client::failover::HostFailover;
use crate::auth::{load_token_pair, CredentialStore, TokenPair};
use crate::constants::{auth as auth_constants, endpoints};
use crate::errors::{ApiError, ApiResult};

/// Session states of the auth lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No token held
    Anonymous,
    /// Valid token present
    Authenticated,
    /// A single in-flight refresh owns the token
    Refreshing,
    /// A refresh hard-failed; non-exempt operations are rejected until a
    /// fresh login
    Locked,
}

/// Observer callback for session events
pub type SessionCallback = Arc<dyn Fn() + Send + Sync>;

/// Bookkeeping for the single-flight refresh
#[derive(Default)]
struct RefreshFlight {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<ApiResult<()>>>,
}

/// Resets the flight if the leading refresher is dropped mid-call, waking
/// parked callers with a cancellation
struct RefreshGuard<'a> {
    flight: &'a StdMutex<RefreshFlight>,
    settled: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut flight = self.flight.lock().expect("refresh lock poisoned");
            flight.in_progress = false;
            for tx in flight.waiters.drain(..) {
                let _ = tx.send(Err(ApiError::Cancelled {
                    endpoint: endpoints::REFRESH_TOKEN.to_string(),
                }));
            }
        }
    }
}

/// Owns the token pair and its lifecycle
pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
    executor: Arc<RequestExecutor>,
    failover: Arc<HostFailover>,
    tokens: RwLock<Option<TokenPair>>,
    state: RwLock<AuthState>,
    flight: StdMutex<RefreshFlight>,
    on_session_expired: StdMutex<Option<SessionCallback>>,
    on_token_refreshed: StdMutex<Option<SessionCallback>>,
    monitor: StdMutex<Option<JoinHandle<()>>>,
    refresh_buffer: Duration,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager").finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Create a manager, resuming any session persisted in the credential
    /// store. An unreadable store degrades to an anonymous session.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        executor: Arc<RequestExecutor>,
        failover: Arc<HostFailover>,
        refresh_buffer: Duration,
    ) -> Self {
        let tokens = match load_token_pair(store.as_ref()) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to load stored session, starting anonymous: {e}");
                None
            }
        };
        let state = if tokens.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        };

        Self {
            store,
            executor,
            failover,
            tokens: RwLock::new(tokens),
            state: RwLock::new(state),
            flight: StdMutex::new(RefreshFlight::default()),
            on_session_expired: StdMutex::new(None),
            on_token_refreshed: StdMutex::new(None),
            monitor: StdMutex::new(None),
            refresh_buffer,
        }
    }

    /// Current session state
    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    pub async fn is_locked(&self) -> bool {
        self.state().await == AuthState::Locked
    }

    /// Bearer token for outgoing requests, if a session is held
    pub async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.as_ref().map(|t| t.access.clone())
    }

    /// Guarantee a usable token before a request goes out.
    ///
    /// Returns immediately while the token is fresh (expiry further away
    /// than `buffer`). A stale token with a refresh token triggers a
    /// refresh; anonymous sessions and sessions without a refresh token
    /// pass through untouched and surface whatever the backend says.
    pub async fn ensure_valid(&self, buffer: Duration) -> ApiResult<()> {
        let needs_refresh = {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                None => return Ok(()),
                Some(pair) => pair.is_expiring_within(buffer) && pair.refresh.is_some(),
            }
        };
        if !needs_refresh {
            return Ok(());
        }
        debug!("Access token stale, refreshing proactively");
        self.refresh().await
    }

    /// Single-flight token refresh.
    ///
    /// Concurrent callers arriving while a refresh is pending are parked and
    /// receive the same outcome as the caller that started it; no second
    /// network call is made. Without a refresh token this fails without
    /// contacting the network.
    pub async fn refresh(&self) -> ApiResult<()> {
        let waiter = {
            let mut flight = self.flight.lock().expect("refresh lock poisoned");
            if flight.in_progress {
                let (tx, rx) = oneshot::channel();
                flight.waiters.push(tx);
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("Refresh already in progress, waiting for its outcome");
            return rx.await.unwrap_or_else(|_| {
                Err(ApiError::Cancelled {
                    endpoint: endpoints::REFRESH_TOKEN.to_string(),
                })
            });
        }

        let refresh_token = {
            let tokens = self.tokens.read().await;
            tokens.as_ref().and_then(|t| t.refresh.clone())
        };
        let Some(refresh_token) = refresh_token else {
            debug!("No refresh token held, refusing to refresh");
            return Err(ApiError::MissingRefreshToken);
        };

        // Claim the flight; joiners from here on park until the outcome
        let joined = {
            let mut flight = self.flight.lock().expect("refresh lock poisoned");
            if flight.in_progress {
                // Lost a race between the check above and the claim; join
                // the winner instead
                let (tx, rx) = oneshot::channel();
                flight.waiters.push(tx);
                Some(rx)
            } else {
                flight.in_progress = true;
                None
            }
        };
        if let Some(rx) = joined {
            return rx.await.unwrap_or_else(|_| {
                Err(ApiError::Cancelled {
                    endpoint: endpoints::REFRESH_TOKEN.to_string(),
                })
            });
        }

        let mut guard = RefreshGuard {
            flight: &self.flight,
            settled: false,
        };
        let outcome = self.perform_refresh(refresh_token).await;

        let waiters = {
            let mut flight = self.flight.lock().expect("refresh lock poisoned");
            flight.in_progress = false;
            std::mem::take(&mut flight.waiters)
        };
        guard.settled = true;
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    /// Issue the refresh call and apply its outcome
    async fn perform_refresh(&self, refresh_token: String) -> ApiResult<()> {
        *self.state.write().await = AuthState::Refreshing;
        info!("Refreshing access token");

        let descriptor =
            RequestDescriptor::post(endpoints::REFRESH_TOKEN, json!({ "refresh": refresh_token }))
                .anonymous()
                .allow_when_locked();
        let base = self.failover.active_host().await;
        let url = join_url(&base, endpoints::REFRESH_TOKEN)?;

        match self.executor.execute(&url, &descriptor, None).await {
            Ok(response) => match token_pair_from_response(&response.body, &refresh_token) {
                Some(pair) => {
                    self.adopt_pair(pair).await;
                    info!("Access token refreshed");
                    self.notify(&self.on_token_refreshed);
                    Ok(())
                }
                None => {
                    // 2xx without an access token is a broken refresh
                    // endpoint; the session cannot continue
                    warn!("Refresh response carried no access token");
                    self.lock_session().await;
                    Err(ApiError::SessionExpired)
                }
            },
            Err(ApiError::Http { status, .. }) => {
                warn!("Token refresh rejected with HTTP {status}");
                self.lock_session().await;
                Err(ApiError::SessionExpired)
            }
            Err(e) => {
                // Transient transport failure: the refresh token may still
                // be good, so the session survives
                warn!("Token refresh attempt failed to reach the backend: {e}");
                *self.state.write().await = AuthState::Authenticated;
                Err(e)
            }
        }
    }

    /// React to a 401 observed on a response.
    ///
    /// Returns `Ok(true)` when a refresh succeeded and the caller should
    /// retry the original request exactly once. Returns `Ok(false)` for
    /// anonymous sessions: a 401 on an unauthenticated probe must not alter
    /// global state.
    pub async fn on_unauthorized(&self) -> ApiResult<bool> {
        let has_refresh = {
            let tokens = self.tokens.read().await;
            tokens.as_ref().is_some_and(|t| t.refresh.is_some())
        };
        if !has_refresh {
            return Ok(false);
        }
        info!("Received 401, attempting token refresh");
        self.refresh().await?;
        Ok(true)
    }

    /// A retried request failed authorization again: the session is over
    pub(crate) async fn on_repeated_unauthorized(&self) -> ApiError {
        warn!("Request still unauthorized after refresh, locking session");
        self.lock_session().await;
        ApiError::SessionExpired
    }

    /// Install a fresh session after login/OTP verification.
    ///
    /// Clears any lock, persists the pair and starts tracking its expiry.
    pub async fn adopt_session(
        &self,
        access: impl Into<String>,
        refresh: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let pair = TokenPair::new(access, refresh, expires_at);
        self.adopt_pair(pair).await;
        info!("Session established");
    }

    async fn adopt_pair(&self, pair: TokenPair) {
        if let Err(e) = self.store.store_tokens(&pair) {
            warn!("Failed to persist tokens: {e}");
        }
        *self.tokens.write().await = Some(pair);
        *self.state.write().await = AuthState::Authenticated;
    }

    /// Orderly logout: clear memory and store, return to `Anonymous`
    pub async fn clear_session(&self) {
        self.stop_monitor();
        if let Err(e) = self.store.clear_all() {
            warn!("Failed to clear stored tokens: {e}");
        }
        *self.tokens.write().await = None;
        *self.state.write().await = AuthState::Anonymous;
        info!("Session cleared");
    }

    /// Terminal failure path: clear everything and reject non-exempt
    /// operations until a fresh login
    pub(crate) async fn lock_session(&self) {
        self.stop_monitor();
        if let Err(e) = self.store.clear_all() {
            warn!("Failed to clear stored tokens: {e}");
        }
        *self.tokens.write().await = None;
        *self.state.write().await = AuthState::Locked;
        self.notify(&self.on_session_expired);
    }

    /// Register the session-expired observer; `None` detaches. At most one
    /// callback is active, last registration wins.
    pub fn set_on_session_expired(&self, callback: Option<SessionCallback>) {
        *self
            .on_session_expired
            .lock()
            .expect("observer lock poisoned") = callback;
    }

    /// Register the token-refreshed observer; `None` detaches
    pub fn set_on_token_refreshed(&self, callback: Option<SessionCallback>) {
        *self
            .on_token_refreshed
            .lock()
            .expect("observer lock poisoned") = callback;
    }

    fn notify(&self, slot: &StdMutex<Option<SessionCallback>>) {
        let callback = slot.lock().expect("observer lock poisoned").clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Start the proactive session monitor: a background task that checks
    /// every thirty seconds whether the token is about to expire and
    /// refreshes it ahead of demand. Idempotent while running.
    ///
    /// The task holds only a weak handle, so dropping the manager ends the
    /// monitor rather than the other way round.
    pub fn start_monitor(manager: &Arc<Self>) {
        let mut slot = manager.monitor.lock().expect("monitor lock poisoned");
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        info!("Starting session monitor");
        let weak = Arc::downgrade(manager);
        *slot = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(auth_constants::MONITOR_INTERVAL);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                match manager.state().await {
                    AuthState::Locked | AuthState::Anonymous => break,
                    _ => {}
                }
                if let Err(e) = manager.ensure_valid(manager.refresh_buffer).await {
                    warn!("Proactive refresh failed: {e}");
                    if matches!(e, ApiError::SessionExpired) {
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the session monitor if it is running
    pub fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().expect("monitor lock poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for AuthManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Build the new pair from a refresh response, keeping the old refresh
/// token when the backend does not rotate it
fn token_pair_from_response(body: &Value, previous_refresh: &str) -> Option<TokenPair> {
    let access = body.get("access")?.as_str()?;
    let refresh = body
        .get("refresh")
        .and_then(Value::as_str)
        .unwrap_or(previous_refresh);
    let expires_at = body
        .get("expires_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(TokenPair::new(access, Some(refresh.to_string()), expires_at))
}

/// Join a path onto a base host, tolerating bases with trailing slashes
pub(crate) fn join_url(base: &url::Url, path: &str) -> ApiResult<url::Url> {
    base.join(path).map_err(|e| ApiError::Network {
        endpoint: path.to_string(),
        detail: format!("invalid request URL: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::config::ClientConfig;
    use crate::auth::MemoryCredentialStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_with(
        server_url: &str,
        tokens: Option<TokenPair>,
    ) -> (Arc<AuthManager>, Arc<MemoryCredentialStore>) {
        let store = Arc::new(match tokens {
            Some(pair) => MemoryCredentialStore::with_tokens(pair),
            None => MemoryCredentialStore::new(),
        });
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        };
        let client = config.build_http_client().unwrap();
        let executor = Arc::new(RequestExecutor::new(client, 100).unwrap());
        let failover = Arc::new(HostFailover::new(
            Url::parse(server_url).unwrap(),
            Vec::new(),
        ));
        let store_dyn: Arc<dyn CredentialStore> = store.clone();
        let manager = Arc::new(AuthManager::new(
            store_dyn,
            executor,
            failover,
            Duration::from_secs(300),
        ));
        (manager, store)
    }

    fn expired_pair() -> TokenPair {
        TokenPair::new(
            "stale-access",
            Some("refresh-1".into()),
            Some(Utc::now() - chrono::Duration::minutes(1)),
        )
    }

    fn fresh_pair() -> TokenPair {
        TokenPair::new(
            "fresh-access",
            Some("refresh-1".into()),
            Some(Utc::now() + chrono::Duration::hours(1)),
        )
    }

    #[tokio::test]
    async fn refresh_without_token_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (manager, _) = manager_with(&server.uri(), None);
        let result = manager.refresh().await;
        assert!(matches!(result, Err(ApiError::MissingRefreshToken)));
        assert_eq!(manager.state().await, AuthState::Anonymous);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::REFRESH_TOKEN))
            .and(body_json(json!({ "refresh": "refresh-1" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(json!({ "access": "new-access" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (manager, store) = manager_with(&server.uri(), Some(expired_pair()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.refresh().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(manager.state().await, AuthState::Authenticated);
        assert_eq!(
            manager.access_token().await.as_deref(),
            Some("new-access")
        );
        // Persisted through the credential store, refresh token kept
        assert_eq!(
            store.get_refresh_token().unwrap().as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn definitive_rejection_locks_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::REFRESH_TOKEN))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "detail": "Token is invalid or expired"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (manager, store) = manager_with(&server.uri(), Some(expired_pair()));
        let expired_events = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&expired_events);
        manager.set_on_session_expired(Some(Arc::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        })));

        let result = manager.refresh().await;
        assert!(matches!(result, Err(ApiError::SessionExpired)));
        assert_eq!(manager.state().await, AuthState::Locked);
        assert_eq!(expired_events.load(Ordering::SeqCst), 1);
        assert!(store.get_access_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_network_failure_does_not_lock() {
        // Reserved TEST-NET address: refresh cannot reach the backend
        let (manager, store) = manager_with("http://192.0.2.1:9", Some(fresh_pair()));

        let result = manager.refresh().await;
        match result {
            Err(ApiError::Network { .. }) | Err(ApiError::Timeout { .. }) => {}
            other => panic!("expected connectivity failure, got {other:?}"),
        }
        assert_eq!(manager.state().await, AuthState::Authenticated);
        assert!(store.get_access_token().unwrap().is_some());
    }

    #[tokio::test]
    async fn ensure_valid_is_a_noop_while_fresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (manager, _) = manager_with(&server.uri(), Some(fresh_pair()));
        assert!(manager.ensure_valid(Duration::from_secs(300)).await.is_ok());
    }

    #[tokio::test]
    async fn ensure_valid_refreshes_a_stale_token_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::REFRESH_TOKEN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access": "renewed" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (manager, _) = manager_with(&server.uri(), Some(expired_pair()));
        assert!(manager.ensure_valid(Duration::from_secs(300)).await.is_ok());
        assert_eq!(manager.access_token().await.as_deref(), Some("renewed"));
    }

    #[tokio::test]
    async fn anonymous_unauthorized_leaves_state_alone() {
        let server = MockServer::start().await;
        let (manager, _) = manager_with(&server.uri(), None);

        let retry = manager.on_unauthorized().await.unwrap();
        assert!(!retry);
        assert_eq!(manager.state().await, AuthState::Anonymous);
    }

    #[tokio::test]
    async fn observer_registration_is_last_write_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let (manager, _) = manager_with(&server.uri(), Some(expired_pair()));
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let observed = Arc::clone(&first);
        manager.set_on_session_expired(Some(Arc::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        })));
        let observed = Arc::clone(&second);
        manager.set_on_session_expired(Some(Arc::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        })));

        let _ = manager.refresh().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_returns_to_anonymous() {
        let server = MockServer::start().await;
        let (manager, store) = manager_with(&server.uri(), Some(fresh_pair()));

        manager.clear_session().await;
        assert_eq!(manager.state().await, AuthState::Anonymous);
        assert!(store.get_access_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn adopt_session_clears_a_lock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (manager, _) = manager_with(&server.uri(), Some(expired_pair()));
        let _ = manager.refresh().await;
        assert_eq!(manager.state().await, AuthState::Locked);

        manager
            .adopt_session("post-login-access", Some("post-login-refresh".into()), None)
            .await;
        assert_eq!(manager.state().await, AuthState::Authenticated);
    }
}
