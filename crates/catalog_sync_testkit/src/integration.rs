//! Cross-crate integration test helpers.
//!
//! A [`Replica`] bundles a store, the apply engine over it and the sync
//! server in front of it. A [`ReplicaPair`] wires a local and a cloud replica
//! together with one agent in each direction, talking through
//! [`LoopbackTransport`].

use crate::fixtures::{t0, test_secret};
use crate::loopback::LoopbackTransport;
use catalog_sync_engine::{
    ApplyEngine, BackoffPolicy, DrainOutcome, EntityStore, ManualClock, MemoryEntityStore,
    MemoryJournal, OutboxJournal, RecordingSleeper, SyncAgent, SyncConfig, SyncResult,
};
use catalog_sync_protocol::{Entity, Origin, Product};
use catalog_sync_server::{ServerConfig, SyncServer};
use std::sync::Arc;
use std::time::Duration;

/// Store type used by test replicas.
pub type TestStore = MemoryEntityStore;

/// Link from one replica to the other's server.
pub type Link = Arc<LoopbackTransport<TestStore>>;

/// Agent driving one direction of a replica pair.
pub type TestAgent<J = MemoryJournal> = SyncAgent<TestStore, J, Link>;

/// One replica: store, engine and server.
pub struct Replica {
    /// Which side this replica is.
    pub origin: Origin,
    /// Entity store.
    pub store: Arc<TestStore>,
    /// Engine shared by the server and any agent of this replica.
    pub engine: Arc<ApplyEngine<TestStore>>,
    /// Server peers push to and pull from.
    pub server: Arc<SyncServer<TestStore>>,
}

impl Replica {
    /// Creates an empty replica.
    pub fn new(origin: Origin) -> Self {
        Self::with_store(origin, Arc::new(TestStore::new()))
    }

    /// Creates a replica over an existing store.
    pub fn with_store(origin: Origin, store: Arc<TestStore>) -> Self {
        Self::with_server_config(origin, store, |config| config)
    }

    /// Creates a replica whose server configuration is adjusted by `configure`.
    pub fn with_server_config(
        origin: Origin,
        store: Arc<TestStore>,
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Self {
        let engine = Arc::new(ApplyEngine::new(Arc::clone(&store), "product"));
        let config = configure(
            ServerConfig::new(
                "127.0.0.1:0".parse().expect("valid socket address"),
                test_secret(),
            )
            .with_origin(origin),
        );
        let server = Arc::new(SyncServer::new(config, Arc::clone(&engine)).expect("valid config"));
        Self {
            origin,
            store,
            engine,
            server,
        }
    }

    /// Returns the stored value of `id`.
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.store.get(id).expect("memory store never fails reads")
    }

    /// Returns the stored product `id`, if present and live.
    pub fn product(&self, id: &str) -> Option<Product> {
        self.get(id)
            .filter(|e| !e.is_tombstone())
            .map(|e| e.payload().expect("stored products decode"))
    }

    /// Returns every stored value ordered by ID.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.store.snapshot()
    }

    /// Returns a link to this replica's server.
    pub fn link(&self) -> Link {
        Arc::new(LoopbackTransport::new(Arc::clone(&self.server), test_secret()))
    }

    /// Builds an agent that replicates this replica with `peer`.
    pub fn agent_to<J: OutboxJournal>(
        &self,
        peer: &Replica,
        journal: J,
        clock: Arc<ManualClock>,
    ) -> (TestAgent<J>, Link) {
        let link = peer.link();
        let config = test_sync_config(self.origin, peer.origin);
        let agent = SyncAgent::new(config, Arc::clone(&self.engine), journal, Arc::clone(&link))
            .expect("journal opens")
            .with_clock(clock)
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        (agent, link)
    }
}

/// Agent configuration used by the harness: small pages, quick backoff.
pub fn test_sync_config(origin: Origin, peer: Origin) -> SyncConfig {
    SyncConfig::new(origin, format!("loopback://{peer}"), test_secret())
        .with_client_id(format!("{origin}-test"))
        .with_push_batch_size(10)
        .with_pull_page_size(10)
        .with_backoff(
            BackoffPolicy::new()
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(80))
                .with_jitter(0.0),
        )
}

/// Drains an agent's outbox until it is empty.
pub async fn drain_all<J: OutboxJournal>(agent: &TestAgent<J>) -> SyncResult<u64> {
    let mut applied = 0;
    while let DrainOutcome::Delivered { response, .. } = agent.drain_once().await? {
        applied += response.applied_count;
    }
    Ok(applied)
}

/// A local and a cloud replica replicating with each other.
pub struct ReplicaPair {
    /// The on-premises replica.
    pub local: Replica,
    /// The cloud replica.
    pub cloud: Replica,
    /// Clock both agents stamp local writes with.
    pub clock: Arc<ManualClock>,
    /// Pushes local writes to the cloud and pulls cloud writes.
    pub local_agent: TestAgent,
    /// Pushes cloud writes to the local replica and pulls local writes.
    pub cloud_agent: TestAgent,
    /// Link the local agent uses to reach the cloud.
    pub to_cloud: Link,
    /// Link the cloud agent uses to reach the local replica.
    pub to_local: Link,
}

impl ReplicaPair {
    /// Creates two empty replicas.
    pub fn new() -> Self {
        let local = Replica::new(Origin::Local);
        let cloud = Replica::new(Origin::Cloud);
        let clock = Arc::new(ManualClock::new(t0()));
        let (local_agent, to_cloud) =
            local.agent_to(&cloud, MemoryJournal::new(), Arc::clone(&clock));
        let (cloud_agent, to_local) =
            cloud.agent_to(&local, MemoryJournal::new(), Arc::clone(&clock));
        Self {
            local,
            cloud,
            clock,
            local_agent,
            cloud_agent,
            to_cloud,
            to_local,
        }
    }

    /// Advances the shared clock.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Runs one full round: both outboxes drained, then both sides pulled.
    pub async fn sync(&self) -> SyncResult<()> {
        drain_all(&self.local_agent).await?;
        drain_all(&self.cloud_agent).await?;
        self.local_agent.pull_once().await?;
        self.cloud_agent.pull_once().await?;
        Ok(())
    }

    /// Returns true when both stores hold the same values.
    ///
    /// Revisions are per replica and excluded from the comparison.
    pub fn converged(&self) -> bool {
        let strip = |entities: Vec<Entity>| {
            entities
                .into_iter()
                .map(|e| (e.id, e.checksum, e.updated_at, e.updated_by, e.deleted_at))
                .collect::<Vec<_>>()
        };
        strip(self.local.snapshot()) == strip(self.cloud.snapshot())
    }
}

impl Default for ReplicaPair {
    fn default() -> Self {
        Self::new()
    }
}
