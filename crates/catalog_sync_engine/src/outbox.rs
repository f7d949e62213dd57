//! Durable, ordered queue of outbound changes.
//!
//! Entries are sent in batches from the head of the queue. Entries for the
//! same entity inside one batch collapse into the latest one, and nothing is
//! removed until the peer has accepted the batch, so delivery is
//! at-least-once.

use crate::error::SyncResult;
use crate::journal::OutboxJournal;
use async_trait::async_trait;
use catalog_sync_protocol::{Change, PushResponse};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// One queued change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Position in the queue, assigned on enqueue.
    pub seq: u64,
    /// The change to deliver.
    pub change: Change,
    /// When the change was queued.
    pub enqueued_at: DateTime<Utc>,
}

/// Delivers a batch of changes to the peer.
#[async_trait]
pub trait ChangeSender: Send + Sync {
    /// Sends `changes` and returns the peer's verdict.
    async fn send(&self, changes: Vec<Change>) -> SyncResult<PushResponse>;
}

/// Changes taken from the head of the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxBatch {
    /// Every queue entry covered by the batch, coalesced ones included.
    pub seqs: Vec<u64>,
    /// Changes to send, one per entity.
    pub changes: Vec<Change>,
}

/// Result of one drain.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// The queue was empty.
    Idle,
    /// A batch was delivered and acknowledged.
    Delivered {
        /// Queue entries acknowledged.
        acknowledged: usize,
        /// Changes sent after coalescing.
        sent: usize,
        /// The peer's response.
        response: PushResponse,
    },
}

struct QueueState {
    entries: VecDeque<OutboxEntry>,
    next_seq: u64,
}

/// A durable FIFO of changes waiting for the peer.
pub struct Outbox<J: OutboxJournal> {
    journal: J,
    state: Mutex<QueueState>,
    max_batch: usize,
    drain_lock: tokio::sync::Mutex<()>,
    notify: Notify,
}

impl<J: OutboxJournal> Outbox<J> {
    /// Opens an outbox over `journal`, restoring anything still pending.
    pub fn open(journal: J, max_batch: usize) -> SyncResult<Self> {
        let mut pending = journal.load()?;
        pending.sort_by_key(|e| e.seq);
        let next_seq = pending.last().map_or(1, |e| e.seq + 1);

        if !pending.is_empty() {
            info!(pending = pending.len(), "restored outbox entries");
        }

        Ok(Self {
            journal,
            state: Mutex::new(QueueState {
                entries: pending.into(),
                next_seq,
            }),
            max_batch: max_batch.max(1),
            drain_lock: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
        })
    }

    /// Returns the journal.
    pub fn journal(&self) -> &J {
        &self.journal
    }

    /// Appends a change and returns its sequence number.
    ///
    /// The entry is journaled before it becomes visible to `drain`; if the
    /// journal write fails nothing is queued.
    pub fn enqueue(&self, change: Change) -> SyncResult<u64> {
        let seq = {
            let mut state = self.state.lock();
            let entry = OutboxEntry {
                seq: state.next_seq,
                change,
                enqueued_at: Utc::now(),
            };
            self.journal.append(&entry)?;
            debug!(seq = entry.seq, id = %entry.change.id(), "enqueued change");
            state.next_seq += 1;
            state.entries.push_back(entry);
            state.next_seq - 1
        };
        self.notify.notify_one();
        Ok(seq)
    }

    /// Takes the next batch from the head without removing it.
    ///
    /// Entries for one entity collapse into the latest; the batch is ordered
    /// by each entity's last occurrence.
    pub fn next_batch(&self) -> Option<OutboxBatch> {
        let state = self.state.lock();
        if state.entries.is_empty() {
            return None;
        }

        let head: Vec<&OutboxEntry> = state.entries.iter().take(self.max_batch).collect();
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (i, entry) in head.iter().enumerate() {
            last.insert(entry.change.id(), i);
        }

        let changes = head
            .iter()
            .enumerate()
            .filter(|(i, entry)| last.get(entry.change.id()) == Some(i))
            .map(|(_, entry)| entry.change.clone())
            .collect();

        Some(OutboxBatch {
            seqs: head.iter().map(|e| e.seq).collect(),
            changes,
        })
    }

    /// Removes `seqs` after the peer accepted them.
    pub fn acknowledge(&self, seqs: &[u64]) -> SyncResult<()> {
        self.journal.acknowledge(seqs)?;
        let acked: HashSet<u64> = seqs.iter().copied().collect();
        self.state.lock().entries.retain(|e| !acked.contains(&e.seq));
        Ok(())
    }

    /// Sends one batch through `sender`.
    ///
    /// On failure nothing is acknowledged and the batch stays at the head.
    /// Concurrent drains of one outbox run one after the other.
    pub async fn drain<S: ChangeSender + ?Sized>(&self, sender: &S) -> SyncResult<DrainOutcome> {
        let _drain = self.drain_lock.lock().await;

        let Some(batch) = self.next_batch() else {
            return Ok(DrainOutcome::Idle);
        };
        let sent = batch.changes.len();

        match sender.send(batch.changes).await {
            Ok(response) => {
                self.acknowledge(&batch.seqs)?;
                info!(
                    sent,
                    acknowledged = batch.seqs.len(),
                    applied = response.applied_count,
                    conflicts = response.conflicts.len(),
                    rejected = response.rejected.len(),
                    "outbox batch delivered"
                );
                Ok(DrainOutcome::Delivered {
                    acknowledged: batch.seqs.len(),
                    sent,
                    response,
                })
            }
            Err(e) => {
                warn!(error = %e, pending = self.len(), "outbox batch not delivered");
                Err(e)
            }
        }
    }

    /// Waits until a change is enqueued.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Returns the number of queued entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns a copy of the queued entries, head first.
    pub fn pending(&self) -> Vec<OutboxEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }
}

impl<J: OutboxJournal> std::fmt::Debug for Outbox<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("pending", &self.len())
            .field("max_batch", &self.max_batch)
            .finish()
    }
}
