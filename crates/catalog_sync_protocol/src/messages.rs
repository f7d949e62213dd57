//! Protocol messages for push and pull.
//!
//! All messages are JSON with camelCase field names.

use crate::change::Change;
use crate::entity::{Entity, Origin};
use serde::{Deserialize, Serialize};

/// Body of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Highest receiver revision the sender has already pulled.
    #[serde(default)]
    pub client_rev: u64,
    /// Changes to apply, in send order.
    #[serde(default)]
    pub changes: Vec<Change>,
    /// Identifies the sending replica, for logging only.
    #[serde(default)]
    pub client_id: String,
}

impl SyncRequest {
    /// Creates a new push request.
    pub fn new(client_id: impl Into<String>, client_rev: u64, changes: Vec<Change>) -> Self {
        Self {
            client_rev,
            changes,
            client_id: client_id.into(),
        }
    }
}

/// Why an incoming change lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The stored value has a later `updatedAt`.
    StaleWrite,
    /// Timestamps were equal and the tie-break kept the stored value.
    LostTieBreak,
}

/// A change that was discarded in favor of the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// Entity ID.
    pub id: String,
    /// Why the incoming value lost.
    pub reason: ConflictReason,
    /// The retained value, so the sender can reconcile its own copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Entity>,
}

/// Why an incoming change was refused outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The carried checksum does not match the payload.
    ChecksumMismatch,
    /// The receiver does not replicate this entity kind.
    UnknownEntity,
    /// The entity has no ID.
    MissingId,
}

/// A change that was neither applied nor resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedChange {
    /// Entity ID.
    pub id: String,
    /// Why it was refused.
    pub reason: RejectReason,
}

/// Response of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Whether the batch was processed.
    pub success: bool,
    /// Number of changes whose outcome was `applied` (no-ops included).
    pub applied_count: u64,
    /// Changes that lost conflict resolution.
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
    /// Changes refused as corrupt or unsupported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedChange>,
    /// Receiver's current revision after the batch.
    #[serde(default)]
    pub server_rev: u64,
}

/// Query of `GET /sync/pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Return entities with `rev` strictly greater than this.
    #[serde(default)]
    pub since_rev: u64,
    /// Maximum number of changes to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl PullQuery {
    /// Creates a new pull query.
    pub fn new(since_rev: u64) -> Self {
        Self {
            since_rev,
            limit: None,
        }
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Renders the query string that is both sent and signed.
    pub fn to_query_string(&self) -> String {
        match self.limit {
            Some(limit) => format!("sinceRev={}&limit={}", self.since_rev, limit),
            None => format!("sinceRev={}", self.since_rev),
        }
    }
}

/// Response of `GET /sync/pull`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Changes ordered by ascending `rev`.
    pub changes: Vec<Change>,
    /// Sender's current revision.
    pub current_rev: u64,
    /// True when `limit` truncated the result.
    #[serde(default)]
    pub has_more: bool,
}

impl PullResponse {
    /// Returns the watermark a consumer should continue from.
    pub fn next_since_rev(&self, since_rev: u64) -> u64 {
        if self.has_more {
            self.changes
                .iter()
                .map(|c| c.data.rev)
                .max()
                .unwrap_or(since_rev)
        } else {
            self.current_rev.max(since_rev)
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when served.
    pub status: String,
    /// Which replica answered.
    pub origin: Origin,
    /// Replica's current revision.
    pub current_rev: u64,
}
