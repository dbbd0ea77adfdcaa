//! # domstore storage
//!
//! Persistence collaborator interface for the domstore transaction engine.
//!
//! This crate is the lowest layer of domstore. It defines the values the
//! engine and a backend exchange and nothing about transactions:
//!
//! - [`ObjectKey`] - stable identity of one persistent object
//! - [`Value`] / [`PropertyMap`] - property values of a record
//! - [`PersistentRecord`] / [`RecordChange`] - what is loaded and saved
//! - [`PersistenceBackend`] - the trait a concrete store implements
//!
//! ## Design Principles
//!
//! - Backends never see transactions, only records and keys
//! - Saves are all-or-nothing and guarded by optimistic lock tokens
//! - Backends must be `Send + Sync` so one backend serves many transactions
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use domstore_storage::{ClassId, InMemoryBackend, PersistenceBackend, PropertyMap, Value};
//!
//! let backend = InMemoryBackend::new();
//! let mut props = PropertyMap::new();
//! props.insert("name".into(), Value::from("Ada"));
//! let key = backend.seed(&ClassId::new("Customer"), props);
//!
//! let record = backend.load_one(&key).unwrap().unwrap();
//! assert_eq!(record.properties["name"], Value::from("Ada"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod key;
mod memory;
mod record;
mod stats;
mod value;

pub use backend::PersistenceBackend;
pub use error::{StorageError, StorageResult};
pub use key::{ClassId, KeyValue, ObjectKey, StoreId};
pub use memory::InMemoryBackend;
pub use record::{
    LockToken, PersistentRecord, PropertyMap, RecordChange, RelationQuery, SortDirection, SortKey,
    SortSpec,
};
pub use stats::{BackendStats, StatsSnapshot};
pub use value::{Value, ValueKind};
