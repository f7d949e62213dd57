//! Conflict resolution and commit.
//!
//! Resolution is last-write-wins over whole entities. Both replicas run the
//! same `resolve` on the same inputs and therefore keep the same winner
//! without talking to each other.
//!
//! ## Ordering
//!
//! Two values of one entity are compared by, in turn:
//! 1. `updatedAt`
//! 2. `updatedBy` (`cloud` > `local`)
//! 3. `deletedAt` (absent < present, then earlier < later)
//! 4. `checksum`, bytewise
//!
//! The incoming value replaces the stored one only when it is strictly
//! greater, so the stored value is always the greatest value seen whatever
//! the delivery order. Values that agree on all four keys carry the same
//! data. An incoming value that loses but carries the stored data is not a
//! conflict.
//!
//! `rev` takes no part: a receiver may raise the stored revision (see
//! [`ApplyEngine::apply_entity`]), and ordering must not depend on that.

use crate::error::SyncResult;
use crate::locks::KeyedLocks;
use crate::store::EntityStore;
use catalog_sync_protocol::{
    check_fields, Change, ConflictReason, Entity, Origin, Payload, RejectReason,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error};

/// What `resolve` decided for an incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Store the incoming value.
    Accept,
    /// Incoming is the same data as the stored value; nothing to do.
    Unchanged,
    /// Keep the stored value.
    Keep(ConflictReason),
}

/// Decides between an incoming value and the stored one.
///
/// Both checksums are expected to be verified already.
pub fn resolve(incoming: &Entity, current: Option<&Entity>) -> Resolution {
    let Some(current) = current else {
        return Resolution::Accept;
    };

    match lww_order(incoming, current) {
        Ordering::Greater => Resolution::Accept,
        Ordering::Equal => Resolution::Unchanged,
        Ordering::Less if same_data(incoming, current) => Resolution::Unchanged,
        Ordering::Less if incoming.updated_at < current.updated_at => {
            Resolution::Keep(ConflictReason::StaleWrite)
        }
        Ordering::Less => Resolution::Keep(ConflictReason::LostTieBreak),
    }
}

fn lww_order(a: &Entity, b: &Entity) -> Ordering {
    a.updated_at
        .cmp(&b.updated_at)
        .then_with(|| a.updated_by.cmp(&b.updated_by))
        .then_with(|| a.deleted_at.cmp(&b.deleted_at))
        .then_with(|| a.checksum.as_bytes().cmp(b.checksum.as_bytes()))
}

fn same_data(a: &Entity, b: &Entity) -> bool {
    a.checksum == b.checksum && a.deleted_at == b.deleted_at
}

/// Outcome of applying one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Incoming value was stored.
    Applied,
    /// Incoming value matched the stored one; reported as applied.
    Unchanged,
    /// Stored value kept; incoming discarded.
    Conflict(ConflictReason),
    /// Incoming value refused before resolution.
    Rejected(RejectReason),
}

impl ApplyOutcome {
    /// Returns true for outcomes reported to the sender as `applied`.
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied | ApplyOutcome::Unchanged)
    }
}

/// Result of applying one value.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    /// Entity ID.
    pub id: String,
    /// What happened.
    pub outcome: ApplyOutcome,
    /// The value stored after the call. `None` only when rejected.
    pub winner: Option<Entity>,
}

impl ApplyResult {
    fn rejected(id: String, reason: RejectReason) -> Self {
        Self {
            id,
            outcome: ApplyOutcome::Rejected(reason),
            winner: None,
        }
    }
}

/// A locally authored mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalWrite {
    /// Create or replace the domain fields.
    Upsert(Payload),
    /// Tombstone the entity, keeping its last fields.
    Delete,
}

/// Applies incoming and local writes to an entity store.
///
/// Every write to one ID goes through the same keyed lock, so an inbound
/// push, a pulled change and a local edit of the same entity never
/// interleave. Writes to different IDs run in parallel.
///
/// Writes also hold the revision gate shared while they mint and store a
/// revision; `changes_since` holds it exclusively so a pull never reports a
/// watermark past a revision that is minted but not yet stored.
pub struct ApplyEngine<S: EntityStore> {
    store: Arc<S>,
    kind: String,
    locks: KeyedLocks,
    revision_gate: RwLock<()>,
}

impl<S: EntityStore> ApplyEngine<S> {
    /// Creates an engine for entities of `kind` kept in `store`.
    pub fn new(store: Arc<S>, kind: impl Into<String>) -> Self {
        Self {
            store,
            kind: kind.into(),
            locks: KeyedLocks::new(),
            revision_gate: RwLock::new(()),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the entity kind this engine replicates.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Applies a change received from the peer.
    pub fn apply_change(&self, change: Change) -> SyncResult<ApplyResult> {
        if change.entity != self.kind {
            debug!(id = %change.id(), entity = %change.entity, "rejecting change of unknown kind");
            return Ok(ApplyResult::rejected(
                change.data.id,
                RejectReason::UnknownEntity,
            ));
        }
        self.apply_entity(change.into_entity())
    }

    /// Applies an entity value received from the peer.
    pub fn apply_entity(&self, mut incoming: Entity) -> SyncResult<ApplyResult> {
        if incoming.id.is_empty() {
            return Ok(ApplyResult::rejected(String::new(), RejectReason::MissingId));
        }

        if let Err(e) = incoming.verify_checksum() {
            error!(id = %incoming.id, error = %e, "checksum mismatch, change rejected");
            return Ok(ApplyResult::rejected(
                incoming.id,
                RejectReason::ChecksumMismatch,
            ));
        }

        let _guard = self.locks.lock(&incoming.id);
        let current = self.store.get(&incoming.id)?;

        let result = match resolve(&incoming, current.as_ref()) {
            Resolution::Accept => {
                // The stored revision never goes backwards, even when the
                // winning write was minted on a replica with a lower counter.
                if let Some(current) = &current {
                    incoming.rev = incoming.rev.max(current.rev);
                }
                {
                    let _gate = self.revision_gate.read();
                    self.store.put(incoming.clone())?;
                }
                debug!(id = %incoming.id, rev = incoming.rev, "applied");
                ApplyResult {
                    id: incoming.id.clone(),
                    outcome: ApplyOutcome::Applied,
                    winner: Some(incoming),
                }
            }
            Resolution::Unchanged => {
                debug!(id = %incoming.id, "unchanged");
                ApplyResult {
                    id: incoming.id,
                    outcome: ApplyOutcome::Unchanged,
                    winner: current,
                }
            }
            Resolution::Keep(reason) => {
                debug!(id = %incoming.id, ?reason, "conflict, keeping stored value");
                ApplyResult {
                    id: incoming.id,
                    outcome: ApplyOutcome::Conflict(reason),
                    winner: current,
                }
            }
        };

        Ok(result)
    }

    /// Commits a write authored on this replica.
    ///
    /// Mints the revision from the store and stamps `updatedAt` no earlier
    /// than just after the stored value, so the new write always wins
    /// locally and is non-decreasing at its origin.
    ///
    /// Fields named like an envelope key are refused with
    /// `ProtocolError::InvalidPayload`; the entity could not be encoded.
    pub fn commit_local(
        &self,
        id: &str,
        write: LocalWrite,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> SyncResult<Entity> {
        if let LocalWrite::Upsert(fields) = &write {
            check_fields(fields)?;
        }

        let _guard = self.locks.lock(id);
        let current = self.store.get(id)?;

        let updated_at = match &current {
            Some(current) if current.updated_at >= now => {
                current.updated_at + ChronoDuration::milliseconds(1)
            }
            _ => now,
        };

        let fields = match (&write, &current) {
            (LocalWrite::Upsert(fields), _) => fields.clone(),
            (LocalWrite::Delete, Some(current)) => current.fields.clone(),
            (LocalWrite::Delete, None) => Payload::new(),
        };

        let _gate = self.revision_gate.read();
        let rev = self.store.next_revision()?;
        let mut entity = Entity::new(id, rev, origin, updated_at, fields);
        if write == LocalWrite::Delete {
            entity.deleted_at = Some(updated_at);
        }

        self.store.put(entity.clone())?;
        debug!(id, rev, tombstone = entity.is_tombstone(), "committed local write");
        Ok(entity)
    }

    /// Returns every stored value with `rev > since` and the current
    /// revision, as one consistent snapshot.
    pub fn changes_since(&self, since: u64) -> SyncResult<(Vec<Entity>, u64)> {
        let _gate = self.revision_gate.write();
        let changed = self.store.list_since(since)?;
        let current = self.store.current_revision()?;
        Ok((changed, current))
    }
}
