//! HTTP transport implementation.
//!
//! Talks to the peer's `/sync/push`, `/sync/pull` and `/health` endpoints
//! with `reqwest`. Push requests sign the JSON body; pull requests sign the
//! canonical query string.

use crate::clock::{Clock, RequestStamp, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::PeerTransport;
use async_trait::async_trait;
use catalog_sync_protocol::{
    HealthResponse, PullQuery, PullResponse, PushResponse, SharedSecret, SignedHeaders,
    SyncRequest,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP-based peer transport.
pub struct HttpTransport {
    /// Base URL of the peer, without a trailing slash.
    base_url: String,
    client: Client,
    secret: SharedSecret,
    clock: Arc<dyn Clock>,
    stamp: RequestStamp,
}

impl HttpTransport {
    /// Creates a transport for the peer named in `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.peer_url.trim_end_matches('/').to_string(),
            client,
            secret: config.secret.clone(),
            clock: Arc::new(SystemClock),
            stamp: RequestStamp::new(),
        })
    }

    /// Replaces the clock used to stamp requests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    fn signed(&self, builder: RequestBuilder, signed_bytes: &[u8]) -> RequestBuilder {
        let timestamp = self.stamp.next(&*self.clock);
        let headers = SignedHeaders::new(&self.secret, signed_bytes, timestamp);
        headers
            .pairs()
            .into_iter()
            .fold(builder, |builder, (name, value)| builder.header(name, value))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
        let response = builder.send().await.map_err(map_send_error)?;
        read_response(response).await
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn push(&self, request: &SyncRequest) -> SyncResult<PushResponse> {
        let body = serde_json::to_vec(request)?;
        debug!(changes = request.changes.len(), bytes = body.len(), "pushing to peer");

        let builder = self
            .client
            .post(self.url("/sync/push"))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        let builder = self.signed(builder, &body).body(body);
        self.send(builder).await
    }

    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        let query_string = query.to_query_string();
        debug!(since_rev = query.since_rev, "pulling from peer");

        let builder = self
            .client
            .get(self.url(&format!("/sync/pull?{query_string}")));
        let builder = self.signed(builder, query_string.as_bytes());
        self.send(builder).await
    }

    async fn health(&self) -> SyncResult<HealthResponse> {
        self.send(self.client.get(self.url("/health"))).await
    }
}

fn map_send_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else if e.is_builder() {
        SyncError::transport_fatal(e.to_string())
    } else {
        SyncError::transport_retryable(e.to_string())
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(map_send_error)?;

    if status.is_success() {
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let message = error_message(&bytes);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(status = status.as_u16(), %message, "peer rejected request signature");
            Err(SyncError::AuthenticationFailed(message))
        }
        _ => Err(SyncError::PeerError {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Extracts `{"error": ...}` from an error body, falling back to the raw text.
fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use catalog_sync_protocol::{sign, Origin, SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response and returns the raw request it received.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    fn transport(url: &str) -> HttpTransport {
        let config = SyncConfig::new(Origin::Local, url, SharedSecret::from("shared-secret"))
            .with_timeout(Duration::from_secs(5));
        let clock = ManualClock::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        HttpTransport::new(&config)
            .unwrap()
            .with_clock(Arc::new(clock))
    }

    #[test]
    fn base_url_is_trimmed() {
        let transport = transport("https://cloud.example.com/");
        assert_eq!(transport.base_url(), "https://cloud.example.com");
    }

    #[tokio::test]
    async fn push_signs_body() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success":true,"appliedCount":0,"conflicts":[],"serverRev":4}"#,
        )
        .await;

        let request = SyncRequest::new("local-1", 0, Vec::new());
        let response = transport(&url).push(&request).await.unwrap();
        assert_eq!(response.server_rev, 4);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /sync/push "));
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        assert_eq!(header(&raw, TIMESTAMP_HEADER), Some("1700000000000"));
        assert_eq!(
            header(&raw, SIGNATURE_HEADER).unwrap(),
            sign(
                &SharedSecret::from("shared-secret"),
                body.as_bytes(),
                1_700_000_000_000
            )
        );
    }

    #[tokio::test]
    async fn pull_signs_query_string() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"changes":[],"currentRev":12,"hasMore":false}"#,
        )
        .await;

        let query = PullQuery::new(7).with_limit(50);
        let response = transport(&url).pull(&query).await.unwrap();
        assert_eq!(response.current_rev, 12);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /sync/pull?sinceRev=7&limit=50 "));
        assert_eq!(
            header(&raw, SIGNATURE_HEADER).unwrap(),
            sign(
                &SharedSecret::from("shared-secret"),
                b"sinceRev=7&limit=50",
                1_700_000_000_000
            )
        );
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failure() {
        let (url, _server) =
            serve_once("401 Unauthorized", r#"{"error":"invalid signature"}"#).await;

        let err = transport(&url).pull(&PullQuery::new(0)).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("invalid signature"));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let (url, _server) =
            serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;

        let err = transport(&url).health().await.unwrap_err();
        assert!(matches!(err, SyncError::PeerError { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn connection_refused_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = transport(&url).health().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
