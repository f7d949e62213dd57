//! # Catalog Sync Engine
//!
//! Replication engine for one catalog replica.
//!
//! This crate provides:
//! - `EntityStore`, the persistence seam, with an in-memory store
//! - `ApplyEngine`: last-write-wins resolution under per-entity locks
//! - `Outbox`: a durable FIFO of outbound changes with coalescing, backed by
//!   an `OutboxJournal` (in memory or a JSON-lines file)
//! - `BackoffPolicy`: exponential backoff with jitter and a ceiling
//! - `PeerTransport` with a signed HTTP implementation
//! - `SyncAgent`, which ties the above into a long-running loop
//!
//! ## Architecture
//!
//! Local writes are committed through the apply engine and queued in the
//! outbox. The agent drains the outbox to the peer's push endpoint and polls
//! the peer's pull endpoint; pulled changes go through the same apply engine
//! as pushes received by this replica's server.
//!
//! ## Key Invariants
//!
//! - A stored entity's `rev` never decreases
//! - Checksums are recomputed on apply, never trusted from the wire
//! - A queued change is durable before it is visible to the drain
//! - Nothing leaves the outbox until the peer accepted it
//! - Applying the same value twice changes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod apply;
mod clock;
mod config;
mod error;
mod http;
mod journal;
mod locks;
mod outbox;
mod store;
mod transport;

pub use agent::{AgentState, PullSummary, SyncAgent, SyncStats};
pub use apply::{resolve, ApplyEngine, ApplyOutcome, ApplyResult, LocalWrite, Resolution};
pub use clock::{
    Clock, ManualClock, RecordingSleeper, RequestStamp, Sleeper, SystemClock, TokioSleeper,
};
pub use config::{BackoffPolicy, SyncConfig};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use http::HttpTransport;
pub use journal::{FileJournal, MemoryJournal, OutboxJournal};
pub use locks::{KeyGuard, KeyedLocks};
pub use outbox::{ChangeSender, DrainOutcome, Outbox, OutboxBatch, OutboxEntry};
pub use store::{EntityStore, MemoryEntityStore};
pub use transport::{MockTransport, PeerTransport};
