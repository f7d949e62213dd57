//! # Catalog Sync Testkit
//!
//! Test utilities for catalog sync.
//!
//! This crate provides:
//! - Fixtures (timestamps, product entities, journal directories)
//! - Property-based test generators using proptest
//! - An in-process transport that goes through a replica's server
//! - Replica and replica-pair harnesses for cross-crate tests
//! - Known-answer vectors for checksums and signatures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catalog_sync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replicas_converge() {
//!     let pair = ReplicaPair::new();
//!     pair.local_agent.record("p1", &Product::new("Lamp", 25.0)).unwrap();
//!     pair.sync().await.unwrap();
//!     assert!(pair.converged());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod loopback;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::loopback::*;
    pub use crate::vectors::*;
    pub use catalog_sync_protocol::Product;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use loopback::*;
pub use vectors::*;
