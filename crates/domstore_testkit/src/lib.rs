//! # domstore testkit
//!
//! Test utilities for domstore.
//!
//! This crate provides:
//! - A sample order-management mapping and a seeded in-memory store
//! - A recording transaction listener for asserting hook order
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use domstore_testkit::prelude::*;
//!
//! let fixture = TestStore::seeded();
//! let tx = fixture.store.create_root_transaction();
//! let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
//! assert_eq!(tx.get_related_objects(&ada, "orders").unwrap().len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod listeners;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listeners::*;
}

pub use fixtures::*;
pub use generators::*;
pub use listeners::*;
