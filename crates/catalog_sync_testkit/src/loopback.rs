//! In-process transport to a peer's server.
//!
//! Requests take the same path as over HTTP minus the socket: the body is
//! serialized, signed and handed to the server's signed entry points, which
//! verify it and decode it exactly as the axum routes do.

use async_trait::async_trait;
use catalog_sync_engine::{
    Clock, EntityStore, PeerTransport, RequestStamp, SyncError, SyncResult, SystemClock,
};
use catalog_sync_protocol::{
    sign, HealthResponse, PullQuery, PullResponse, PushResponse, SharedSecret, SyncRequest,
};
use catalog_sync_server::{ServerError, SyncServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transport that calls a [`SyncServer`] directly.
pub struct LoopbackTransport<S: EntityStore + 'static> {
    server: Arc<SyncServer<S>>,
    secret: SharedSecret,
    clock: Arc<dyn Clock>,
    stamp: RequestStamp,
    reachable: AtomicBool,
}

impl<S: EntityStore + 'static> LoopbackTransport<S> {
    /// Creates a transport signing with `secret`.
    pub fn new(server: Arc<SyncServer<S>>, secret: SharedSecret) -> Self {
        Self {
            server,
            secret,
            clock: Arc::new(SystemClock),
            stamp: RequestStamp::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Replaces the clock used to stamp requests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Simulates the link going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the server requests are delivered to.
    pub fn server(&self) -> &Arc<SyncServer<S>> {
        &self.server
    }

    fn check_link(&self) -> SyncResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("peer unreachable"))
        }
    }

    fn signed(&self, bytes: &[u8]) -> (String, String) {
        let timestamp = self.stamp.next(&*self.clock);
        (timestamp.to_string(), sign(&self.secret, bytes, timestamp))
    }
}

/// Maps a server-side refusal to what an HTTP client would report.
fn client_error(e: ServerError) -> SyncError {
    match e {
        ServerError::Unauthorized(message) => SyncError::AuthenticationFailed(message),
        other => SyncError::PeerError {
            status: other.status().as_u16(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl<S: EntityStore + 'static> PeerTransport for LoopbackTransport<S> {
    async fn push(&self, request: &SyncRequest) -> SyncResult<PushResponse> {
        self.check_link()?;
        let body = serde_json::to_vec(request)?;
        let (timestamp, signature) = self.signed(&body);
        self.server
            .handle_signed_push(
                Some(&timestamp),
                Some(&signature),
                &body,
                self.server.now_millis(),
            )
            .map_err(client_error)
    }

    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        self.check_link()?;
        let query_string = query.to_query_string();
        let (timestamp, signature) = self.signed(query_string.as_bytes());
        self.server
            .handle_signed_pull(
                Some(&timestamp),
                Some(&signature),
                &query_string,
                self.server.now_millis(),
            )
            .map_err(client_error)
    }

    async fn health(&self) -> SyncResult<HealthResponse> {
        self.check_link()?;
        self.server.handler().health().map_err(client_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{product_entity, push_request, t0, test_secret};
    use catalog_sync_engine::{ApplyEngine, MemoryEntityStore};
    use catalog_sync_protocol::Origin;
    use catalog_sync_server::ServerConfig;

    fn server() -> Arc<SyncServer<MemoryEntityStore>> {
        let engine = Arc::new(ApplyEngine::new(
            Arc::new(MemoryEntityStore::new()),
            "product",
        ));
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), test_secret());
        Arc::new(SyncServer::new(config, engine).unwrap())
    }

    #[tokio::test]
    async fn push_and_pull_through_server() {
        let transport = LoopbackTransport::new(server(), test_secret());
        let request = push_request([product_entity("p1", "Lamp", 25.0, 1, Origin::Local, t0())]);

        let pushed = transport.push(&request).await.unwrap();
        assert_eq!(pushed.applied_count, 1);

        let pulled = transport.pull(&PullQuery::new(0)).await.unwrap();
        assert_eq!(pulled.changes.len(), 1);
        let again = transport.pull(&PullQuery::new(0)).await.unwrap();
        assert_eq!(again, pulled);
    }

    #[tokio::test]
    async fn wrong_secret_is_an_auth_failure() {
        let transport = LoopbackTransport::new(server(), SharedSecret::from("nope"));
        let err = transport.pull(&PullQuery::new(0)).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn unreachable_link_is_retryable() {
        let transport = LoopbackTransport::new(server(), test_secret());
        transport.set_reachable(false);
        assert!(transport.health().await.unwrap_err().is_retryable());

        transport.set_reachable(true);
        assert_eq!(transport.health().await.unwrap().origin, Origin::Cloud);
    }

    #[tokio::test]
    async fn oversized_batch_is_a_peer_error() {
        let engine = Arc::new(ApplyEngine::new(
            Arc::new(MemoryEntityStore::new()),
            "product",
        ));
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), test_secret())
            .with_max_push_batch(1);
        let server = Arc::new(SyncServer::new(config, engine).unwrap());
        let transport = LoopbackTransport::new(server, test_secret());

        let request = push_request([
            product_entity("p1", "Lamp", 25.0, 1, Origin::Local, t0()),
            product_entity("p2", "Desk", 90.0, 2, Origin::Local, t0()),
        ]);
        let err = transport.push(&request).await.unwrap_err();
        assert!(matches!(err, SyncError::PeerError { status: 400, .. }));
        assert!(!err.is_retryable());
    }
}
