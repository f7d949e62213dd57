//! Health command implementation.

use catalog_sync_engine::{HttpTransport, PeerTransport, SyncConfig, SyncResult};
use catalog_sync_protocol::{HealthResponse, Origin, SharedSecret};
use std::error::Error;
use std::time::Duration;

/// Runs the health command.
pub fn run(peer: &str, timeout: Duration, format: &str) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let health = runtime.block_on(fetch_health(peer, timeout))?;
    println!("{}", render(peer, &health, format)?);
    Ok(())
}

/// Calls the peer's unsigned `/health` endpoint.
pub async fn fetch_health(peer: &str, timeout: Duration) -> SyncResult<HealthResponse> {
    let config = SyncConfig::new(Origin::Local, peer, SharedSecret::new(Vec::new()))
        .with_timeout(timeout);
    HttpTransport::new(&config)?.health().await
}

/// Formats a health response as `text` or `json`.
pub fn render(
    peer: &str,
    health: &HealthResponse,
    format: &str,
) -> Result<String, serde_json::Error> {
    match format {
        "json" => serde_json::to_string_pretty(health),
        _ => Ok(format!(
            "{peer}: {}\n  origin:      {}\n  current rev: {}",
            health.status, health.origin, health.current_rev
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_sync_engine::{ApplyEngine, MemoryEntityStore};
    use catalog_sync_server::{ServerConfig, SyncServer};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    fn sample() -> HealthResponse {
        HealthResponse {
            status: "ok".into(),
            origin: Origin::Cloud,
            current_rev: 42,
        }
    }

    #[test]
    fn text_output() {
        let text = render("http://cloud", &sample(), "text").unwrap();
        assert!(text.starts_with("http://cloud: ok"));
        assert!(text.contains("origin:      cloud"));
        assert!(text.contains("current rev: 42"));
    }

    #[test]
    fn json_output() {
        let json = render("http://cloud", &sample(), "json").unwrap();
        let back: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[tokio::test]
    async fn reports_a_running_replica() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = Arc::new(ApplyEngine::new(Arc::new(MemoryEntityStore::new()), "product"));
        let config = ServerConfig::new(addr, SharedSecret::from("s3cret"));
        let server = Arc::new(SyncServer::new(config, engine).unwrap());
        let (_stop, stopped) = watch::channel(false);
        tokio::spawn(server.serve(listener, stopped));

        let health = fetch_health(&format!("http://{addr}"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(health.status, "ok");
        assert_eq!(health.origin, Origin::Cloud);
        assert_eq!(health.current_rev, 0);
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetch_health(&format!("http://{addr}"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
