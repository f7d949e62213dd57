//! # Catalog Sync Protocol
//!
//! Wire types, checksums and request signing shared by both replicas.
//!
//! This crate provides:
//! - `Entity` with its replication envelope (`rev`, `updatedAt`, `updatedBy`,
//!   `checksum`, `deletedAt`) around an opaque JSON payload
//! - `EntityPayload` for schema'd entity kinds such as `Product`
//! - Content checksums over the domain fields
//! - Push/pull request and response messages
//! - HMAC-SHA256 request signatures with a bounded timestamp window
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod checksum;
mod entity;
mod error;
mod messages;
mod signature;

pub use change::{Change, ChangeOp};
pub use checksum::{canonical_json, checksum, entity_checksum};
pub use entity::{check_fields, Entity, EntityPayload, Origin, Payload, Product, ENVELOPE_FIELDS};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ConflictReason, ConflictReport, HealthResponse, PullQuery, PullResponse, PushResponse,
    RejectReason, RejectedChange, SyncRequest,
};
pub use signature::{
    check_skew, sign, verify, SharedSecret, SignedHeaders, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
