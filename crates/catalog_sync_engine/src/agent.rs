//! Sync agent: one replica's side of the replication loop.
//!
//! The agent commits local writes and queues them, drains the outbox to the
//! peer, and pulls the peer's changes through the same `ApplyEngine` that
//! serves inbound pushes.

use crate::apply::{ApplyEngine, ApplyOutcome, LocalWrite};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::journal::OutboxJournal;
use crate::outbox::{ChangeSender, DrainOutcome, Outbox};
use crate::store::EntityStore;
use crate::transport::PeerTransport;
use async_trait::async_trait;
use catalog_sync_protocol::{
    Change, Entity, EntityPayload, Payload, PullQuery, PushResponse, SyncRequest,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What the agent is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for work.
    Idle,
    /// Sending an outbox batch.
    Pushing,
    /// Importing the peer's changes.
    Pulling,
    /// Last cycle completed.
    Synced,
    /// Waiting before retrying after a failure.
    RetryWait,
}

impl AgentState {
    /// Returns true while talking to the peer.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Pushing | AgentState::Pulling)
    }
}

/// Counters about sync activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Batches delivered to the peer.
    pub batches_pushed: u64,
    /// Changes sent to the peer, after coalescing.
    pub changes_pushed: u64,
    /// Changes received from the peer.
    pub changes_pulled: u64,
    /// Conflicts reported by the peer or found while pulling.
    pub conflicts: u64,
    /// Changes refused by either side.
    pub rejected: u64,
    /// Waits after failures.
    pub retries: u64,
    /// Last successful push or pull.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Summary of one `pull_once`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Changes received.
    pub received: usize,
    /// Changes stored or already present.
    pub applied: usize,
    /// Changes that lost to the local value.
    pub conflicts: usize,
    /// Changes refused.
    pub rejected: usize,
    /// Peer watermark after the pull.
    pub watermark: u64,
}

/// Sends outbox batches as signed push requests.
struct PeerSender<'a, T> {
    transport: &'a T,
    client_id: &'a str,
    client_rev: u64,
}

#[async_trait]
impl<T: PeerTransport> ChangeSender for PeerSender<'_, T> {
    async fn send(&self, changes: Vec<Change>) -> SyncResult<PushResponse> {
        let request = SyncRequest::new(self.client_id, self.client_rev, changes);
        self.transport.push(&request).await
    }
}

/// Replicates one replica's entities with its peer.
pub struct SyncAgent<S: EntityStore, J: OutboxJournal, T: PeerTransport> {
    config: SyncConfig,
    engine: Arc<ApplyEngine<S>>,
    outbox: Outbox<J>,
    transport: T,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    peer_watermark: AtomicU64,
    state: RwLock<AgentState>,
    stats: RwLock<SyncStats>,
}

impl<S: EntityStore, J: OutboxJournal, T: PeerTransport> SyncAgent<S, J, T> {
    /// Creates an agent.
    ///
    /// `engine` should be the same engine the replica's push/pull handlers
    /// use, so local commits and inbound changes share per-entity locks.
    /// Its kind must match `config.entity_kind`.
    pub fn new(
        config: SyncConfig,
        engine: Arc<ApplyEngine<S>>,
        journal: J,
        transport: T,
    ) -> SyncResult<Self> {
        if config.entity_kind != engine.kind() {
            return Err(SyncError::InvalidConfig(format!(
                "agent replicates `{}` but its engine holds `{}`",
                config.entity_kind,
                engine.kind()
            )));
        }
        let outbox = Outbox::open(journal, config.push_batch_size)?;
        Ok(Self {
            config,
            engine,
            outbox,
            transport,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            peer_watermark: AtomicU64::new(0),
            state: RwLock::new(AgentState::Idle),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Replaces the clock used to stamp local writes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the apply engine.
    pub fn engine(&self) -> &Arc<ApplyEngine<S>> {
        &self.engine
    }

    /// Returns the outbox.
    pub fn outbox(&self) -> &Outbox<J> {
        &self.outbox
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the highest peer revision already pulled.
    pub fn peer_watermark(&self) -> u64 {
        self.peer_watermark.load(Ordering::SeqCst)
    }

    /// Sets the peer watermark, e.g. from a persisted value.
    pub fn set_peer_watermark(&self, rev: u64) {
        self.peer_watermark.store(rev, Ordering::SeqCst);
    }

    fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    /// Commits a local mutation and queues it for the peer.
    ///
    /// Called by whatever watches the local catalog. The revision is minted
    /// from the store, `updatedAt` comes from the agent clock and
    /// `updatedBy` from the configured origin.
    pub fn record_local_change(
        &self,
        id: &str,
        payload: Payload,
        deleted: bool,
    ) -> SyncResult<Entity> {
        let write = if deleted {
            LocalWrite::Delete
        } else {
            LocalWrite::Upsert(payload)
        };
        let entity = self
            .engine
            .commit_local(id, write, self.config.origin, self.clock.now())?;
        self.outbox
            .enqueue(Change::new(self.engine.kind(), entity.clone()))?;
        Ok(entity)
    }

    /// Records a local upsert.
    pub fn record_upsert(&self, id: &str, payload: Payload) -> SyncResult<Entity> {
        self.record_local_change(id, payload, false)
    }

    /// Records a local upsert of a typed payload.
    pub fn record<P: EntityPayload>(&self, id: &str, payload: &P) -> SyncResult<Entity> {
        let fields = payload.to_fields()?;
        self.record_local_change(id, fields, false)
    }

    /// Records a local delete.
    pub fn record_delete(&self, id: &str) -> SyncResult<Entity> {
        self.record_local_change(id, Payload::new(), true)
    }

    /// Sends one outbox batch to the peer.
    ///
    /// Conflicts in the response carry the peer's retained value, which is
    /// applied locally so both replicas converge on it.
    pub async fn drain_once(&self) -> SyncResult<DrainOutcome> {
        let sender = PeerSender {
            transport: &self.transport,
            client_id: &self.config.client_id,
            client_rev: self.peer_watermark(),
        };

        self.set_state(AgentState::Pushing);
        let outcome = self.outbox.drain(&sender).await;
        self.set_state(AgentState::Idle);

        let outcome = outcome.inspect_err(|e| self.note_error(e))?;
        if let DrainOutcome::Delivered { sent, response, .. } = &outcome {
            for conflict in &response.conflicts {
                debug!(id = %conflict.id, reason = ?conflict.reason, "peer kept its value");
                if let Some(current) = conflict.current.clone() {
                    let result = self.engine.apply_entity(current)?;
                    if let ApplyOutcome::Rejected(reason) = result.outcome {
                        warn!(id = %result.id, ?reason, "could not adopt peer value");
                    }
                }
            }
            for rejected in &response.rejected {
                warn!(id = %rejected.id, reason = ?rejected.reason, "peer rejected change");
            }

            let mut stats = self.stats.write();
            stats.batches_pushed += 1;
            stats.changes_pushed += *sent as u64;
            stats.conflicts += response.conflicts.len() as u64;
            stats.rejected += response.rejected.len() as u64;
            stats.last_sync_at = Some(self.clock.now());
            stats.last_error = None;
        }
        Ok(outcome)
    }

    /// Drains one batch, retrying failures per the backoff policy.
    ///
    /// Authentication failures are returned at once.
    pub async fn drain_with_retry(&self) -> SyncResult<DrainOutcome> {
        let backoff = &self.config.backoff;
        let mut attempts = 0u32;

        loop {
            match self.drain_once().await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempts += 1;
                    if !backoff.allows_attempt(attempts) {
                        return Err(SyncError::RetriesExhausted {
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    let delay = backoff.delay_for_attempt(attempts);
                    debug!(attempts, ?delay, error = %e, "retrying drain");
                    self.wait_retry(delay).await;
                }
            }
        }
    }

    /// Pulls everything the peer changed since the watermark.
    ///
    /// Follows `hasMore` pages and advances the watermark after each page.
    pub async fn pull_once(&self) -> SyncResult<PullSummary> {
        self.set_state(AgentState::Pulling);
        let result = self.pull_pages().await;
        self.set_state(AgentState::Idle);

        let summary = result.inspect_err(|e| self.note_error(e))?;
        if summary.received > 0 {
            info!(
                received = summary.received,
                applied = summary.applied,
                conflicts = summary.conflicts,
                watermark = summary.watermark,
                "pulled changes from peer"
            );
        }

        let mut stats = self.stats.write();
        stats.changes_pulled += summary.received as u64;
        stats.conflicts += summary.conflicts as u64;
        stats.rejected += summary.rejected as u64;
        stats.last_sync_at = Some(self.clock.now());
        stats.last_error = None;
        Ok(summary)
    }

    async fn pull_pages(&self) -> SyncResult<PullSummary> {
        let mut summary = PullSummary::default();
        let mut since = self.peer_watermark();

        loop {
            let query = PullQuery::new(since).with_limit(self.config.pull_page_size);
            let response = self.transport.pull(&query).await?;

            for change in response.changes.iter().cloned() {
                summary.received += 1;
                let result = self.engine.apply_change(change)?;
                match result.outcome {
                    ApplyOutcome::Applied | ApplyOutcome::Unchanged => summary.applied += 1,
                    ApplyOutcome::Conflict(_) => summary.conflicts += 1,
                    ApplyOutcome::Rejected(reason) => {
                        warn!(id = %result.id, ?reason, "rejected pulled change");
                        summary.rejected += 1;
                    }
                }
            }

            since = response.next_since_rev(since);
            self.peer_watermark.fetch_max(since, Ordering::SeqCst);

            if !response.has_more || response.changes.is_empty() {
                break;
            }
        }

        summary.watermark = self.peer_watermark();
        Ok(summary)
    }

    /// Runs the replication loop until `shutdown` turns true or its sender
    /// is dropped.
    ///
    /// The outbox is drained whenever a change is enqueued or the drain poll
    /// interval passes; the peer is pulled every `pull_interval`. Failures
    /// back off exponentially without giving up; a peer refusing our
    /// signature is retried at the backoff ceiling.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        let backoff = self.config.backoff.clone();
        let idle_wait = self.config.drain_poll_interval.min(self.config.pull_interval);
        let mut failures = 0u32;
        let mut last_pull: Option<DateTime<Utc>> = None;

        info!(origin = %self.config.origin, peer = %self.config.peer_url, "sync agent started");

        while !*shutdown.borrow() {
            let pull_due = last_pull.map_or(true, |at| {
                (self.clock.now() - at)
                    .to_std()
                    .map_or(false, |elapsed| elapsed >= self.config.pull_interval)
            });

            let wait = match self.cycle(pull_due).await {
                Ok(()) => {
                    failures = 0;
                    if pull_due {
                        last_pull = Some(self.clock.now());
                    }
                    self.set_state(AgentState::Synced);
                    None
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = if e.is_auth_failure() {
                        warn!(error = %e, "peer refused credentials");
                        backoff.max_delay
                    } else if e.is_retryable() {
                        warn!(error = %e, failures, "sync cycle failed");
                        backoff.delay_for_attempt(failures)
                    } else {
                        error!(error = %e, "sync cycle failed");
                        backoff.max_delay
                    };
                    Some(delay)
                }
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = self.wait_retry(delay) => {}
                        changed = shutdown.changed() => if changed.is_err() { break },
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.outbox.changed() => {}
                        _ = self.sleeper.sleep(idle_wait) => {}
                        changed = shutdown.changed() => if changed.is_err() { break },
                    }
                }
            }
        }

        self.set_state(AgentState::Idle);
        info!(pending = self.outbox.len(), "sync agent stopped");
        Ok(())
    }

    async fn cycle(&self, pull: bool) -> SyncResult<()> {
        while let DrainOutcome::Delivered { .. } = self.drain_once().await? {}
        if pull {
            self.pull_once().await?;
        }
        Ok(())
    }

    async fn wait_retry(&self, delay: Duration) {
        self.set_state(AgentState::RetryWait);
        self.stats.write().retries += 1;
        self.sleeper.sleep(delay).await;
    }

    fn note_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }
}
