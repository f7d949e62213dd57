//! # Catalog Sync Server
//!
//! HTTP endpoints through which a peer replica pushes and pulls catalog
//! changes.
//!
//! This crate provides:
//! - `POST /sync/push`: apply a batch of changes through the apply engine
//! - `GET /sync/pull?sinceRev=`: export every change above a revision
//! - `GET /health`: liveness with the replica's origin and revision
//! - Request authentication (HMAC-SHA256 signature, timestamp window,
//!   replay guard)
//!
//! # Authentication
//!
//! Authentication is mandatory. A server refuses to start with an empty
//! shared secret, and every push or pull must carry valid signature headers:
//!
//! ```rust,ignore
//! use catalog_sync_protocol::{SignedHeaders, SharedSecret};
//!
//! let secret = SharedSecret::from("provisioned-secret");
//! let headers = SignedHeaders::new(&secret, body, now_millis);
//! for (name, value) in headers.pairs() {
//!     request = request.header(name, value);
//! }
//! ```
//!
//! A refused request has no side effects and answers 401.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{ReplayGuard, RequestVerifier};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
