//! Entity store abstraction.
//!
//! The persistence technology behind a replica is external; the engine only
//! needs keyed reads and writes, a "changed since" scan, and a revision
//! counter that never hands out the same number twice.

use crate::error::{StoreError, StoreResult};
use catalog_sync_protocol::Entity;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Storage for one entity kind on one replica.
///
/// Implementations must be safe to share across threads. Per-entity write
/// serialization is the caller's job (see `ApplyEngine`); the store only has
/// to make each individual call atomic.
pub trait EntityStore: Send + Sync {
    /// Returns the stored value for `id`, tombstones included.
    fn get(&self, id: &str) -> StoreResult<Option<Entity>>;

    /// Stores `entity`, replacing any previous value with the same ID.
    ///
    /// The store must raise its revision counter to at least `entity.rev`.
    fn put(&self, entity: Entity) -> StoreResult<()>;

    /// Returns every entity with `rev > since`, ordered by `rev` then `id`.
    fn list_since(&self, since: u64) -> StoreResult<Vec<Entity>>;

    /// Mints a revision strictly greater than any revision this store has
    /// issued or stored.
    ///
    /// Fails closed: when the counter cannot be advanced no number is
    /// returned.
    fn next_revision(&self) -> StoreResult<u64>;

    /// Returns the highest revision issued or stored.
    fn current_revision(&self) -> StoreResult<u64>;
}

impl<S: EntityStore + ?Sized> EntityStore for std::sync::Arc<S> {
    fn get(&self, id: &str) -> StoreResult<Option<Entity>> {
        (**self).get(id)
    }

    fn put(&self, entity: Entity) -> StoreResult<()> {
        (**self).put(entity)
    }

    fn list_since(&self, since: u64) -> StoreResult<Vec<Entity>> {
        (**self).list_since(since)
    }

    fn next_revision(&self) -> StoreResult<u64> {
        (**self).next_revision()
    }

    fn current_revision(&self) -> StoreResult<u64> {
        (**self).current_revision()
    }
}

/// An in-memory entity store.
///
/// Used in tests and as the default store of the `serve` command.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: RwLock<HashMap<String, Entity>>,
    counter: Mutex<u64>,
    counter_offline: AtomicBool,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::new();
        for entity in entities {
            // The in-memory put cannot fail.
            let _ = store.put(entity);
        }
        store
    }

    /// Returns the number of stored entities, tombstones included.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Returns all stored values ordered by ID.
    pub fn snapshot(&self) -> Vec<Entity> {
        let mut all: Vec<_> = self.entities.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Simulates losing (or regaining) the revision counter.
    pub fn set_counter_offline(&self, offline: bool) {
        self.counter_offline.store(offline, Ordering::SeqCst);
    }
}

impl EntityStore for MemoryEntityStore {
    fn get(&self, id: &str) -> StoreResult<Option<Entity>> {
        Ok(self.entities.read().get(id).cloned())
    }

    fn put(&self, entity: Entity) -> StoreResult<()> {
        {
            let mut counter = self.counter.lock();
            *counter = (*counter).max(entity.rev);
        }
        self.entities.write().insert(entity.id.clone(), entity);
        Ok(())
    }

    fn list_since(&self, since: u64) -> StoreResult<Vec<Entity>> {
        let mut changed: Vec<_> = self
            .entities
            .read()
            .values()
            .filter(|e| e.rev > since)
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.rev.cmp(&b.rev).then_with(|| a.id.cmp(&b.id)));
        Ok(changed)
    }

    fn next_revision(&self) -> StoreResult<u64> {
        if self.counter_offline.load(Ordering::SeqCst) {
            return Err(StoreError::RevisionUnavailable(
                "revision counter is offline".into(),
            ));
        }
        let mut counter = self.counter.lock();
        let next = counter
            .checked_add(1)
            .ok_or_else(|| StoreError::RevisionUnavailable("revision counter exhausted".into()))?;
        *counter = next;
        Ok(next)
    }

    fn current_revision(&self) -> StoreResult<u64> {
        Ok(*self.counter.lock())
    }
}
