//! Change envelopes.

use crate::entity::{Entity, EntityPayload};
use serde::{Deserialize, Serialize};

/// Kind of mutation carried by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// Entity was created or updated.
    Upsert,
    /// Entity was soft-deleted.
    Delete,
}

/// A mutation of one entity, as queued and transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Entity kind name (e.g. `"product"`).
    pub entity: String,
    /// Operation.
    pub op: ChangeOp,
    /// The new value.
    pub data: Entity,
}

impl Change {
    /// Wraps an entity value, choosing the op from its tombstone state.
    pub fn new(entity: impl Into<String>, data: Entity) -> Self {
        let op = if data.is_tombstone() {
            ChangeOp::Delete
        } else {
            ChangeOp::Upsert
        };
        Self {
            entity: entity.into(),
            op,
            data,
        }
    }

    /// Wraps an entity value of a typed kind.
    pub fn of<P: EntityPayload>(data: Entity) -> Self {
        Self::new(P::KIND, data)
    }

    /// Returns the ID of the changed entity.
    pub fn id(&self) -> &str {
        &self.data.id
    }

    /// Converts the change into the entity value to apply.
    ///
    /// A delete is an upsert of a tombstone; a delete that arrives without
    /// `deletedAt` is stamped with its own `updatedAt`.
    pub fn into_entity(self) -> Entity {
        let mut data = self.data;
        if self.op == ChangeOp::Delete && data.deleted_at.is_none() {
            data.deleted_at = Some(data.updated_at);
        }
        data
    }
}
