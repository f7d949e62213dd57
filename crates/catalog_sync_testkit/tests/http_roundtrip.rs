//! Two replicas replicating over real HTTP with running agents.

use catalog_sync_engine::{
    ApplyEngine, EntityStore, HttpTransport, LocalWrite, MemoryEntityStore, MemoryJournal,
    PeerTransport, SyncAgent, SyncConfig,
};
use catalog_sync_protocol::{EntityPayload, Origin, Product};
use catalog_sync_server::{ServerConfig, SyncServer};
use catalog_sync_testkit::prelude::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

struct Node {
    store: Arc<MemoryEntityStore>,
    engine: Arc<ApplyEngine<MemoryEntityStore>>,
    url: String,
}

async fn start_node(origin: Origin, shutdown: watch::Receiver<bool>) -> Node {
    let store = Arc::new(MemoryEntityStore::new());
    let engine = Arc::new(ApplyEngine::new(Arc::clone(&store), "product"));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig::new(addr, test_secret()).with_origin(origin);
    let server = Arc::new(SyncServer::new(config, Arc::clone(&engine)).unwrap());
    tokio::spawn(server.serve(listener, shutdown));

    Node {
        store,
        engine,
        url: format!("http://{addr}"),
    }
}

fn agent_config(origin: Origin, peer_url: &str) -> SyncConfig {
    SyncConfig::new(origin, peer_url, test_secret())
        .with_timeout(Duration::from_secs(5))
        .with_pull_interval(Duration::from_millis(50))
        .with_drain_poll_interval(Duration::from_millis(20))
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn agents_replicate_both_ways() {
    let (stop, stopped) = watch::channel(false);
    let local = start_node(Origin::Local, stopped.clone()).await;
    let cloud = start_node(Origin::Cloud, stopped.clone()).await;

    let config = agent_config(Origin::Local, &cloud.url);
    let transport = HttpTransport::new(&config).unwrap();
    let health = transport.health().await.unwrap();
    assert_eq!(health.origin, Origin::Cloud);

    let agent = Arc::new(
        SyncAgent::new(config, Arc::clone(&local.engine), MemoryJournal::new(), transport).unwrap(),
    );
    let runner = {
        let agent = Arc::clone(&agent);
        let stopped = stopped.clone();
        tokio::spawn(async move { agent.run(stopped).await })
    };

    agent.record("p1", &Product::new("Lamp", 25.0)).unwrap();
    agent.record("p2", &Product::new("Desk", 120.0)).unwrap();
    assert!(
        eventually(|| cloud.store.get("p1").unwrap().is_some()
            && cloud.store.get("p2").unwrap().is_some())
        .await
    );

    // A write made on the cloud side reaches the local replica by pull.
    let fields = Product::new("Chair", 45.0).to_fields().unwrap();
    cloud
        .engine
        .commit_local("p3", LocalWrite::Upsert(fields), Origin::Cloud, Utc::now())
        .unwrap();
    assert!(eventually(|| local.store.get("p3").unwrap().is_some()).await);

    agent.record_delete("p1").unwrap();
    assert!(eventually(|| cloud
        .store
        .get("p1")
        .unwrap()
        .is_some_and(|e| e.is_tombstone()))
    .await);

    stop.send(true).unwrap();
    runner.await.unwrap().unwrap();
    assert!(agent.outbox().is_empty());
    assert!(agent.stats().changes_pushed >= 3);
}

#[tokio::test]
async fn agent_with_wrong_secret_keeps_its_outbox() {
    let (_stop, stopped) = watch::channel(false);
    let cloud = start_node(Origin::Cloud, stopped).await;

    let config = SyncConfig::new(
        Origin::Local,
        &cloud.url,
        catalog_sync_protocol::SharedSecret::from("stale-secret"),
    );
    let transport = HttpTransport::new(&config).unwrap();
    let engine = Arc::new(ApplyEngine::new(Arc::new(MemoryEntityStore::new()), "product"));
    let agent = SyncAgent::new(config, engine, MemoryJournal::new(), transport).unwrap();

    agent.record("p1", &Product::new("Lamp", 25.0)).unwrap();
    let err = agent.drain_with_retry().await.unwrap_err();

    assert!(err.is_auth_failure());
    assert_eq!(agent.outbox().len(), 1);
    assert!(cloud.store.is_empty());
}
