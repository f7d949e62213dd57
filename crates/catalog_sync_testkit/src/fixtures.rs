//! Test fixtures.
//!
//! Fixed timestamps, ready-made entities and a scratch directory for file
//! journals.

use catalog_sync_engine::{FileJournal, SyncResult};
use catalog_sync_protocol::{Change, Entity, Origin, Product, SharedSecret, SyncRequest};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;
use tempfile::TempDir;

/// Secret shared by every fixture replica.
pub const TEST_SECRET: &str = "testkit-shared-secret";

/// Returns the fixture secret.
pub fn test_secret() -> SharedSecret {
    SharedSecret::from(TEST_SECRET)
}

/// Reference instant all fixture timestamps are relative to.
pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_709_294_400, 0)
        .single()
        .expect("valid fixture instant")
}

/// Returns `t0()` plus `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

/// Builds an entity holding `product`.
pub fn entity_of(
    id: &str,
    product: &Product,
    rev: u64,
    origin: Origin,
    updated_at: DateTime<Utc>,
) -> Entity {
    Entity::from_payload(id, product, rev, origin, updated_at)
        .expect("products serialize to objects")
}

/// Builds a product entity.
pub fn product_entity(
    id: &str,
    name: &str,
    price: f64,
    rev: u64,
    origin: Origin,
    updated_at: DateTime<Utc>,
) -> Entity {
    entity_of(id, &Product::new(name, price), rev, origin, updated_at)
}

/// Builds a tombstone of a product entity.
pub fn product_tombstone(
    id: &str,
    name: &str,
    rev: u64,
    origin: Origin,
    deleted_at: DateTime<Utc>,
) -> Entity {
    product_entity(id, name, 0.0, rev, origin, deleted_at).into_tombstone(deleted_at)
}

/// Wraps entities as product changes.
pub fn product_changes(entities: impl IntoIterator<Item = Entity>) -> Vec<Change> {
    entities
        .into_iter()
        .map(|e| Change::new("product", e))
        .collect()
}

/// Builds a push request carrying `entities`.
pub fn push_request(entities: impl IntoIterator<Item = Entity>) -> SyncRequest {
    SyncRequest::new("testkit", 0, product_changes(entities))
}

/// A scratch directory for outbox journals, removed on drop.
pub struct JournalDir {
    dir: TempDir,
}

impl JournalDir {
    /// Creates a fresh directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    /// Returns the path of the journal named `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.jsonl"))
    }

    /// Opens the journal named `name`.
    pub fn open(&self, name: &str) -> SyncResult<FileJournal> {
        FileJournal::open(self.path(name))
    }
}
