//! Main sync server.

use crate::auth::RequestVerifier;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use catalog_sync_engine::{ApplyEngine, Clock, EntityStore, SystemClock};
use catalog_sync_protocol::{
    HealthResponse, PullQuery, PullResponse, PushResponse, SyncRequest, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// The sync server.
///
/// Serves `POST /sync/push`, `GET /sync/pull` and `GET /health` over the
/// same [`ApplyEngine`] the local agent commits through, so inbound pushes
/// and local writes to one entity are serialized by the same keyed lock.
///
/// # Example
///
/// ```
/// use catalog_sync_engine::{ApplyEngine, MemoryEntityStore};
/// use catalog_sync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let engine = Arc::new(ApplyEngine::new(Arc::new(MemoryEntityStore::new()), "product"));
/// let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "secret".into());
/// let server = SyncServer::new(config, engine).unwrap();
///
/// let router = Arc::new(server).router();
/// # let _ = router;
/// ```
pub struct SyncServer<S: EntityStore> {
    handler: RequestHandler<S>,
    verifier: RequestVerifier,
    clock: Arc<dyn Clock>,
}

impl<S: EntityStore + 'static> SyncServer<S> {
    /// Creates a new sync server over `engine`.
    ///
    /// The engine's kind must match `config.entity_kind`.
    pub fn new(config: ServerConfig, engine: Arc<ApplyEngine<S>>) -> ServerResult<Self> {
        config.validate()?;
        if config.entity_kind != engine.kind() {
            return Err(ServerError::InvalidConfig(format!(
                "server accepts `{}` but its engine holds `{}`",
                config.entity_kind,
                engine.kind()
            )));
        }
        let verifier = RequestVerifier::new(config.secret.clone(), config.skew_window_ms());
        let context = Arc::new(HandlerContext::new(config, engine));
        Ok(Self {
            handler: RequestHandler::new(context),
            verifier,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used to check request timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.handler.context().config
    }

    /// Returns the engine requests are applied through.
    pub fn engine(&self) -> &Arc<ApplyEngine<S>> {
        &self.handler.context().engine
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler<S> {
        &self.handler
    }

    /// Returns the request verifier.
    pub fn verifier(&self) -> &RequestVerifier {
        &self.verifier
    }

    /// Returns the current server time in unix milliseconds.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Verifies and handles a raw push body.
    pub fn handle_signed_push(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_ms: i64,
    ) -> ServerResult<PushResponse> {
        self.verifier.verify(timestamp, signature, body, now_ms)?;
        let request: SyncRequest = serde_json::from_slice(body)
            .map_err(|e| ServerError::InvalidRequest(format!("malformed push body: {e}")))?;
        self.handler.handle_push(request)
    }

    /// Verifies and handles a raw pull query string.
    pub fn handle_signed_pull(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        raw_query: &str,
        now_ms: i64,
    ) -> ServerResult<PullResponse> {
        self.verifier
            .verify(timestamp, signature, raw_query.as_bytes(), now_ms)?;
        let query = parse_pull_query(raw_query)?;
        self.handler.handle_pull(query)
    }

    /// Builds the axum router for this server.
    pub fn router(self: Arc<Self>) -> Router {
        let body_limit = self.config().max_body_bytes;
        Router::new()
            .route("/sync/push", post(push_route::<S>))
            .route("/sync/pull", get(pull_route::<S>))
            .route("/health", get(health_route::<S>))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(self)
    }

    /// Serves requests on `listener` until `shutdown` turns true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, origin = %self.config().origin, "sync server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        info!(%addr, "sync server stopped");
        Ok(())
    }
}

/// Parses `sinceRev=<n>[&limit=<n>]`; a missing `sinceRev` means 0.
fn parse_pull_query(raw: &str) -> ServerResult<PullQuery> {
    let mut query = PullQuery::default();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "sinceRev" => {
                query.since_rev = value
                    .parse()
                    .map_err(|_| ServerError::InvalidRequest(format!("bad sinceRev: {value}")))?;
            }
            "limit" => {
                let limit = value
                    .parse()
                    .map_err(|_| ServerError::InvalidRequest(format!("bad limit: {value}")))?;
                query.limit = Some(limit);
            }
            _ => {}
        }
    }
    Ok(query)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn owned_headers(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    (
        header(headers, TIMESTAMP_HEADER).map(str::to_owned),
        header(headers, SIGNATURE_HEADER).map(str::to_owned),
    )
}

async fn push_route<S: EntityStore + 'static>(
    State(server): State<Arc<SyncServer<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PushResponse>, ServerError> {
    let (timestamp, signature) = owned_headers(&headers);
    let now = server.now_millis();
    let response = tokio::task::spawn_blocking(move || {
        server.handle_signed_push(timestamp.as_deref(), signature.as_deref(), &body, now)
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(Json(response))
}

async fn pull_route<S: EntityStore + 'static>(
    State(server): State<Arc<SyncServer<S>>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<PullResponse>, ServerError> {
    let (timestamp, signature) = owned_headers(&headers);
    let now = server.now_millis();
    let query = query.unwrap_or_default();
    let response = tokio::task::spawn_blocking(move || {
        server.handle_signed_pull(timestamp.as_deref(), signature.as_deref(), &query, now)
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(Json(response))
}

async fn health_route<S: EntityStore + 'static>(
    State(server): State<Arc<SyncServer<S>>>,
) -> Result<Json<HealthResponse>, ServerError> {
    Ok(Json(server.handler().health()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_sync_engine::{ManualClock, MemoryEntityStore};
    use catalog_sync_protocol::{sign, Change, Entity, Origin, Product, SharedSecret};
    use chrono::{TimeZone, Utc};

    fn server() -> SyncServer<MemoryEntityStore> {
        let engine = Arc::new(ApplyEngine::new(
            Arc::new(MemoryEntityStore::new()),
            "product",
        ));
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "secret".into());
        SyncServer::new(config, engine).unwrap()
    }

    fn body() -> Vec<u8> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let entity =
            Entity::from_payload("p1", &Product::new("Lamp", 25.0), 1, Origin::Local, at).unwrap();
        serde_json::to_vec(&SyncRequest::new(
            "store-1",
            0,
            vec![Change::new("product", entity)],
        ))
        .unwrap()
    }

    #[test]
    fn empty_secret_is_refused() {
        let engine = Arc::new(ApplyEngine::new(
            Arc::new(MemoryEntityStore::new()),
            "product",
        ));
        let result = SyncServer::new(ServerConfig::default(), engine);
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn kind_mismatch_is_refused() {
        let engine = Arc::new(ApplyEngine::new(
            Arc::new(MemoryEntityStore::new()),
            "category",
        ));
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "secret".into());
        let result = SyncServer::new(config, engine);
        assert!(matches!(result, Err(ServerError::InvalidConfig(m)) if m.contains("category")));
    }

    #[test]
    fn signed_push_is_applied() {
        let server = server();
        let now = 1_700_000_000_000;
        let body = body();
        let sig = sign(&SharedSecret::from("secret"), &body, now);

        let response = server
            .handle_signed_push(Some(&now.to_string()), Some(&sig), &body, now)
            .unwrap();
        assert_eq!(response.applied_count, 1);
        assert_eq!(server.engine().store().len(), 1);
    }

    #[test]
    fn bad_signature_leaves_store_untouched() {
        let server = server();
        let now = 1_700_000_000_000;
        let body = body();
        let sig = sign(&SharedSecret::from("wrong"), &body, now);

        let result = server.handle_signed_push(Some(&now.to_string()), Some(&sig), &body, now);
        assert!(matches!(result, Err(ServerError::Unauthorized(_))));
        assert!(server.engine().store().is_empty());
    }

    #[test]
    fn malformed_body_is_invalid_request() {
        let server = server();
        let now = 1_700_000_000_000;
        let body = b"{not json";
        let sig = sign(&SharedSecret::from("secret"), body, now);

        let result = server.handle_signed_push(Some(&now.to_string()), Some(&sig), body, now);
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn signed_pull_uses_query_string() {
        let server = server();
        let now = 1_700_000_000_000;
        let qs = PullQuery::new(0).with_limit(5).to_query_string();
        let sig = sign(&SharedSecret::from("secret"), qs.as_bytes(), now);

        let response = server
            .handle_signed_pull(Some(&now.to_string()), Some(&sig), &qs, now)
            .unwrap();
        assert!(response.changes.is_empty());
        assert_eq!(response.current_rev, 0);

        let tampered = PullQuery::new(0).with_limit(6).to_query_string();
        assert!(server
            .handle_signed_pull(Some(&(now + 1).to_string()), Some(&sig), &tampered, now)
            .is_err());
    }

    #[test]
    fn clock_drives_timestamp_window() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let server = server().with_clock(clock.clone());
        assert_eq!(server.now_millis(), clock.now_millis());
    }

    #[test]
    fn pull_query_parsing() {
        assert_eq!(parse_pull_query("sinceRev=7").unwrap(), PullQuery::new(7));
        assert_eq!(
            parse_pull_query("sinceRev=3&limit=10").unwrap(),
            PullQuery::new(3).with_limit(10)
        );
        assert_eq!(parse_pull_query("").unwrap(), PullQuery::new(0));
        assert!(matches!(
            parse_pull_query("sinceRev=-1"),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(parse_pull_query("sinceRev=1&limit=lots").is_err());
    }
}
