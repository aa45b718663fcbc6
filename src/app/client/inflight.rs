//! In-flight request coalescing
//!
//! Collapses N simultaneous identical requests (same method, URL and body)
//! into exactly one transport call. The first dispatcher of a key becomes
//! the leader and runs the call; identical dispatches arriving while it is
//! pending park on oneshot channels and receive a clone of the one settled
//! outcome. The registration is removed the instant the call settles, so a
//! later dispatch of the same key always starts a fresh transport call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::app::client::executor::ApiResponse;
use crate::errors::{ApiError, ApiResult};

type Outcome = ApiResult<ApiResponse>;
type WaiterMap = HashMap<String, Vec<oneshot::Sender<Outcome>>>;

/// Registry of pending requests keyed by `method + url + body`.
///
/// The map is guarded by a std mutex: every critical section is a short,
/// non-suspending insert or remove, and the drop guard for an abandoned
/// leader must run without an async context.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    pending: Mutex<WaiterMap>,
}

/// Removes the registration if the leading caller is dropped mid-flight,
/// waking parked followers with a cancellation instead of leaving them
/// waiting on an outcome that will never settle
struct FlightGuard<'a> {
    registry: &'a InFlightRegistry,
    key: &'a str,
    settled: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            // Dropping the senders delivers a RecvError to every follower
            self.registry
                .pending
                .lock()
                .expect("in-flight lock poisoned")
                .remove(self.key);
        }
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `perform` under single-flight semantics for `key`.
    ///
    /// The outcome every caller receives is a clone; treating it as shared
    /// read-only data falls out of that, since no caller can reach another's
    /// copy.
    pub async fn dispatch<F, Fut>(&self, key: String, perform: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let waiter = {
            let mut pending = self.pending.lock().expect("in-flight lock poisoned");
            match pending.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let (tx, rx) = oneshot::channel();
                    occupied.get_mut().push(tx);
                    Some(rx)
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!("Joining in-flight request: {key}");
            return match rx.await {
                Ok(outcome) => outcome,
                // Leader abandoned mid-flight
                Err(_) => Err(ApiError::Cancelled { endpoint: key }),
            };
        }

        let mut guard = FlightGuard {
            registry: self,
            key: &key,
            settled: false,
        };
        let outcome = perform().await;

        let waiters = {
            let mut pending = self.pending.lock().expect("in-flight lock poisoned");
            pending.remove(&key).unwrap_or_default()
        };
        guard.settled = true;

        if !waiters.is_empty() {
            debug!("Sharing settled outcome of {key} with {} waiters", waiters.len());
        }
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    /// Number of keys currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("in-flight lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ok_response(n: u32) -> Outcome {
        Ok(ApiResponse {
            status: 200,
            body: serde_json::json!({ "call": n }),
        })
    }

    #[tokio::test]
    async fn concurrent_identical_dispatches_share_one_call() {
        let registry = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                registry
                    .dispatch("GET http://h/quotes ".to_string(), || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        ok_response(n)
                    })
                    .await
            }));
        }

        let outcomes: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap().unwrap())
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| *o == outcomes[0]));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn registration_is_removed_on_settle() {
        let registry = InFlightRegistry::new();

        let first = registry
            .dispatch("GET http://h/x ".to_string(), || async { ok_response(1) })
            .await
            .unwrap();
        let second = registry
            .dispatch("GET http://h/x ".to_string(), || async { ok_response(2) })
            .await
            .unwrap();

        // Sequential dispatches each perform their own call
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn failures_are_shared_then_forgotten() {
        let registry = Arc::new(InFlightRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));

        let leader = {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                registry
                    .dispatch("POST http://h/y {}".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(ApiError::Http {
                            status: 500,
                            endpoint: "/y".into(),
                            message: "HTTP 500".into(),
                            payload: None,
                        })
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = registry
            .dispatch("POST http://h/y {}".to_string(), || async {
                panic!("follower must not perform its own call")
            })
            .await;

        assert!(matches!(follower, Err(ApiError::Http { status: 500, .. })));
        assert!(leader.await.unwrap().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // A fresh failure is not replayed
        let retry = registry
            .dispatch("POST http://h/y {}".to_string(), || async { ok_response(2) })
            .await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn abandoned_leader_wakes_followers_with_cancelled() {
        let registry = Arc::new(InFlightRegistry::new());

        let leader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .dispatch("GET http://h/slow ".to_string(), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        ok_response(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .dispatch("GET http://h/slow ".to_string(), || async {
                        panic!("follower must not perform its own call")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        let outcome = follower.await.unwrap();
        assert!(matches!(outcome, Err(ApiError::Cancelled { .. })));
        assert_eq!(registry.pending_count(), 0);
    }
}
