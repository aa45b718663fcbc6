//! Base-host failover
//!
//! Recovers from total connectivity failure to the configured host by
//! switching to an alternate known-good host (a loopback alias used by
//! certain runtime environments, or a discovered LAN address). The facade
//! re-issues the failed request exactly once after a switch; this module
//! only owns the active host and the rotation choice, so a never-reachable
//! set of hosts can not produce a retry loop.

use tokio::sync::RwLock;
use tracing::warn;
use url::Url;

/// Owns the active base host and the alternates eligible for rotation
#[derive(Debug)]
pub struct HostFailover {
    active: RwLock<Url>,
    alternates: Vec<Url>,
}

impl HostFailover {
    pub fn new(initial: Url, alternates: Vec<Url>) -> Self {
        Self {
            active: RwLock::new(initial),
            alternates,
        }
    }

    /// The base host requests are currently issued against
    pub async fn active_host(&self) -> Url {
        self.active.read().await.clone()
    }

    /// Point the client at a different base host
    pub async fn set_active_host(&self, url: Url) {
        *self.active.write().await = url;
    }

    /// React to a connectivity-level failure: rotate to the first alternate
    /// that differs from the current host and report it, or `None` when no
    /// alternate remains.
    ///
    /// Only called for failures classified as `Network`; timeouts and valid
    /// HTTP error responses never rotate the host.
    pub async fn on_transport_failure(&self) -> Option<Url> {
        let mut active = self.active.write().await;
        let next = self
            .alternates
            .iter()
            .find(|candidate| **candidate != *active)?
            .clone();
        warn!("Network failure on {}. Retrying via {}", *active, next);
        *active = next.clone();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn failover() -> HostFailover {
        HostFailover::new(
            url("http://192.168.1.50:8000"),
            vec![url("http://10.0.2.2:8000"), url("http://127.0.0.1:8000")],
        )
    }

    #[tokio::test]
    async fn rotates_to_first_differing_alternate() {
        let failover = failover();

        let next = failover.on_transport_failure().await;
        assert_eq!(next, Some(url("http://10.0.2.2:8000")));
        assert_eq!(failover.active_host().await, url("http://10.0.2.2:8000"));
    }

    #[tokio::test]
    async fn skips_the_alternate_matching_the_active_host() {
        let failover = HostFailover::new(
            url("http://10.0.2.2:8000"),
            vec![url("http://10.0.2.2:8000"), url("http://127.0.0.1:8000")],
        );

        let next = failover.on_transport_failure().await;
        assert_eq!(next, Some(url("http://127.0.0.1:8000")));
    }

    #[tokio::test]
    async fn exhausts_when_no_alternate_differs() {
        let failover = HostFailover::new(url("http://127.0.0.1:8000"), vec![url("http://127.0.0.1:8000")]);
        assert_eq!(failover.on_transport_failure().await, None);

        let empty = HostFailover::new(url("http://127.0.0.1:8000"), Vec::new());
        assert_eq!(empty.on_transport_failure().await, None);
    }

    #[tokio::test]
    async fn manual_host_update() {
        let failover = failover();
        failover.set_active_host(url("http://10.0.0.9:8000")).await;
        assert_eq!(failover.active_host().await, url("http://10.0.0.9:8000"));
    }
}
