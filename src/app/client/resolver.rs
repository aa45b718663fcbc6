//! Endpoint candidate probing
//!
//! Backend routes drift: paths get renamed, moved between apps, or exposed
//! under both a trailing-slash and a bare variant. The resolver tries an
//! ordered list of equivalent paths for one logical operation until one
//! succeeds, with an explicit per-failure-class policy instead of inferring
//! anything from error text. It never masks an authorization problem as
//! "endpoint not found".

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tracing::debug;

use crate::app::client::executor::ApiResponse;
use crate::errors::{ApiError, ApiResult};

/// Ordered list of equivalent paths for one logical operation
#[derive(Debug, Clone)]
pub struct EndpointCandidates {
    /// Diagnostic key the successful path is recorded under
    pub trace_key: String,
    /// Paths tried in order
    pub paths: Vec<String>,
}

impl EndpointCandidates {
    pub fn new<I, S>(trace_key: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trace_key: trace_key.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// What to do when a candidate fails with a non-404-class error.
///
/// `Discovery` keeps probing past validation and server errors, which keeps
/// partially broken environments usable at the cost of potentially masking a
/// caller bug as a missing route. `Strict` surfaces the first such error.
/// The choice is an explicit per-call configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    #[default]
    Discovery,
    Strict,
}

/// Failure-classification policy for one resolution
#[derive(Debug, Clone, Default)]
pub struct ProbePolicy {
    /// Abort on 401/403 instead of falling through to a possibly public
    /// variant that would return different data for an authenticated user
    pub break_on_unauthorized: bool,
    pub mode: ProbeMode,
}

impl ProbePolicy {
    pub fn discovery() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            mode: ProbeMode::Strict,
            ..Self::default()
        }
    }

    pub fn break_on_unauthorized(mut self) -> Self {
        self.break_on_unauthorized = true;
        self
    }
}

/// Probes candidate endpoints and remembers which one served each logical
/// operation.
///
/// The trace map is purely diagnostic: every resolution starts again from
/// the first candidate.
#[derive(Debug, Default)]
pub struct EndpointResolver {
    last_used: Mutex<HashMap<String, String>>,
}

impl EndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try each candidate in order through `issue` until one succeeds.
    ///
    /// Continue/abort rules per failure class:
    /// - not-found class (404, unfollowed 3xx): continue;
    /// - authorization class (401/403): continue unless the policy breaks
    ///   on it;
    /// - session-terminal and cancellation errors: abort, more candidates
    ///   cannot help;
    /// - everything else: continue in `Discovery`, abort in `Strict`.
    ///
    /// The last observed error surfaces when all candidates exhaust.
    pub async fn resolve<F, Fut>(
        &self,
        candidates: &EndpointCandidates,
        policy: &ProbePolicy,
        mut issue: F,
    ) -> ApiResult<ApiResponse>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ApiResult<ApiResponse>>,
    {
        if candidates.paths.is_empty() {
            return Err(ApiError::NoCandidates {
                trace_key: candidates.trace_key.clone(),
            });
        }

        debug!(
            "Probing {} candidates for {}",
            candidates.paths.len(),
            candidates.trace_key
        );

        let mut last_error: Option<ApiError> = None;
        for path in &candidates.paths {
            match issue(path.clone()).await {
                Ok(response) => {
                    self.record_endpoint(&candidates.trace_key, path);
                    return Ok(response);
                }
                Err(e) if e.is_not_found_class() => {
                    debug!("Candidate {path} not found, trying next");
                    last_error = Some(e);
                }
                Err(e) if e.is_unauthorized() => {
                    if policy.break_on_unauthorized {
                        return Err(e);
                    }
                    debug!("Candidate {path} unauthorized, trying next");
                    last_error = Some(e);
                }
                Err(
                    e @ (ApiError::Cancelled { .. }
                    | ApiError::SessionExpired
                    | ApiError::Locked
                    | ApiError::MissingRefreshToken),
                ) => return Err(e),
                Err(e) => match policy.mode {
                    ProbeMode::Strict => return Err(e),
                    ProbeMode::Discovery => {
                        debug!("Candidate {path} failed ({e}), continuing in discovery mode");
                        last_error = Some(e);
                    }
                },
            }
        }

        Err(last_error.expect("at least one candidate was tried"))
    }

    /// Which path last served a logical operation, if any succeeded
    pub fn last_used_endpoint(&self, trace_key: &str) -> Option<String> {
        self.last_used
            .lock()
            .expect("resolver lock poisoned")
            .get(trace_key)
            .cloned()
    }

    fn record_endpoint(&self, trace_key: &str, path: &str) {
        debug!("Using endpoint for {trace_key}: {path}");
        self.last_used
            .lock()
            .expect("resolver lock poisoned")
            .insert(trace_key.to_string(), path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok() -> ApiResult<ApiResponse> {
        Ok(ApiResponse {
            status: 200,
            body: serde_json::json!({"ok": true}),
        })
    }

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            endpoint: "/candidate".into(),
            message: format!("HTTP {status}"),
            payload: None,
        }
    }

    fn candidates(paths: &[&str]) -> EndpointCandidates {
        EndpointCandidates::new("motor_categories", paths.to_vec())
    }

    #[tokio::test]
    async fn advances_past_not_found_to_success() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/api/v1/motor2/categories/", "/api/v1/motor/categories/"]);

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |path| async move {
                if path.contains("motor2") {
                    Err(http(404))
                } else {
                    ok()
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            resolver.last_used_endpoint("motor_categories").as_deref(),
            Some("/api/v1/motor/categories/")
        );
    }

    #[tokio::test]
    async fn break_on_unauthorized_aborts_immediately() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/private", "/public"]);
        let tried = AtomicUsize::new(0);

        let result = resolver
            .resolve(
                &set,
                &ProbePolicy::discovery().break_on_unauthorized(),
                |_path| {
                    tried.fetch_add(1, Ordering::SeqCst);
                    async { Err(http(401)) }
                },
            )
            .await;

        assert!(matches!(result, Err(ApiError::Http { status: 401, .. })));
        assert_eq!(tried.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unauthorized_continues_by_default() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/private", "/public"]);

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |path| async move {
                if path == "/private" {
                    Err(http(401))
                } else {
                    ok()
                }
            })
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn discovery_mode_probes_past_server_errors() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/broken", "/healthy"]);

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |path| async move {
                if path == "/broken" {
                    Err(http(500))
                } else {
                    ok()
                }
            })
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn strict_mode_stops_at_first_server_error() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/broken", "/healthy"]);
        let tried = AtomicUsize::new(0);

        let result = resolver
            .resolve(&set, &ProbePolicy::strict(), |_path| {
                tried.fetch_add(1, Ordering::SeqCst);
                async { Err(http(500)) }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Http { status: 500, .. })));
        assert_eq!(tried.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/a", "/b"]);

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |path| async move {
                if path == "/a" {
                    Err(http(404))
                } else {
                    Err(http(422))
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Http { status: 422, .. })));
    }

    #[tokio::test]
    async fn empty_candidate_list_is_an_error() {
        let resolver = EndpointResolver::new();
        let set = EndpointCandidates::new("empty_op", Vec::<String>::new());

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |_path| async { ok() })
            .await;

        assert!(matches!(result, Err(ApiError::NoCandidates { .. })));
    }

    #[tokio::test]
    async fn session_errors_abort_probing() {
        let resolver = EndpointResolver::new();
        let set = candidates(&["/a", "/b"]);
        let tried = AtomicUsize::new(0);

        let result = resolver
            .resolve(&set, &ProbePolicy::discovery(), |_path| {
                tried.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::SessionExpired) }
            })
            .await;

        assert!(matches!(result, Err(ApiError::SessionExpired)));
        assert_eq!(tried.load(Ordering::SeqCst), 1);
    }
}
