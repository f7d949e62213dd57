//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use catalog_sync_protocol::{
    HealthResponse, Origin, PullQuery, PullResponse, PushResponse, SyncRequest,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles communication with the peer replica.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Pushes a batch of changes to the peer.
    async fn push(&self, request: &SyncRequest) -> SyncResult<PushResponse>;

    /// Pulls the peer's changes after `query.since_rev`.
    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse>;

    /// Checks that the peer is up.
    async fn health(&self) -> SyncResult<HealthResponse>;
}

#[async_trait]
impl<T: PeerTransport + ?Sized> PeerTransport for std::sync::Arc<T> {
    async fn push(&self, request: &SyncRequest) -> SyncResult<PushResponse> {
        (**self).push(request).await
    }

    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        (**self).pull(query).await
    }

    async fn health(&self) -> SyncResult<HealthResponse> {
        (**self).health().await
    }
}

/// A mock transport for testing.
///
/// Records every push. Unless a response is set, pushes report every change
/// as applied and pulls return nothing.
#[derive(Debug)]
pub struct MockTransport {
    reachable: AtomicBool,
    pushes: Mutex<Vec<SyncRequest>>,
    pulls: Mutex<Vec<PullQuery>>,
    push_response: Mutex<Option<PushResponse>>,
    pull_response: Mutex<Option<PullResponse>>,
}

impl MockTransport {
    /// Creates a new, reachable mock transport.
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            pushes: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            push_response: Mutex::new(None),
            pull_response: Mutex::new(None),
        }
    }

    /// Sets whether the peer can be reached.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = Some(response);
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock() = Some(response);
    }

    /// Returns every push received so far.
    pub fn pushes(&self) -> Vec<SyncRequest> {
        self.pushes.lock().clone()
    }

    /// Returns every pull query received so far.
    pub fn pulls(&self) -> Vec<PullQuery> {
        self.pulls.lock().clone()
    }

    fn check_reachable(&self) -> SyncResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("peer unreachable"))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn push(&self, request: &SyncRequest) -> SyncResult<PushResponse> {
        self.check_reachable()?;
        self.pushes.lock().push(request.clone());
        Ok(self.push_response.lock().clone().unwrap_or(PushResponse {
            success: true,
            applied_count: request.changes.len() as u64,
            ..Default::default()
        }))
    }

    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        self.check_reachable()?;
        self.pulls.lock().push(*query);
        Ok(self.pull_response.lock().clone().unwrap_or_default())
    }

    async fn health(&self) -> SyncResult<HealthResponse> {
        self.check_reachable()?;
        Ok(HealthResponse {
            status: "ok".into(),
            origin: Origin::Cloud,
            current_rev: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_records_pushes() {
        let transport = MockTransport::new();
        let request = SyncRequest::new("local-1", 0, Vec::new());

        let response = transport.push(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.applied_count, 0);
        assert_eq!(transport.pushes(), vec![request]);
    }

    #[tokio::test]
    async fn mock_transport_unreachable_error() {
        let transport = MockTransport::new();
        transport.set_reachable(false);

        let result = transport.pull(&PullQuery::new(0)).await;
        assert!(matches!(
            result,
            Err(SyncError::Transport {
                retryable: true,
                ..
            })
        ));
        assert!(transport.health().await.is_err());
        assert!(transport.pulls().is_empty());
    }

    #[tokio::test]
    async fn mock_transport_canned_pull() {
        let transport = MockTransport::new();
        transport.set_pull_response(PullResponse {
            current_rev: 9,
            ..Default::default()
        });

        let response = transport.pull(&PullQuery::new(3)).await.unwrap();
        assert_eq!(response.current_rev, 9);
        assert_eq!(transport.pulls(), vec![PullQuery::new(3)]);
    }
}
