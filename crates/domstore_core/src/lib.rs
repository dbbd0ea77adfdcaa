//! # domstore core
//!
//! In-process transaction engine for persistent domain objects.
//!
//! This crate provides:
//! - An identity map per transaction: one handle per key
//! - Lazy loading of objects and relation end-points
//! - Bidirectional relations kept consistent on both sides
//! - Nested transactions that commit into their parent
//! - Multi-phase commit and rollback with cancellable listener hooks
//! - Thread-local transaction scopes
//!
//! Persistence is delegated to a [`domstore_storage::PersistenceBackend`].
//!
//! ## Example
//!
//! ```rust
//! use domstore_core::{MappingConfiguration, ObjectState, ObjectStore};
//! use domstore_storage::ValueKind;
//!
//! let mut mapping = MappingConfiguration::builder();
//! mapping.add_class("Customer").property("name", ValueKind::Text).done()?;
//! mapping.add_class("Order").property("number", ValueKind::Int).done()?;
//! mapping.add_one_to_many("Customer", "orders", "Order", "customer").done();
//! let store = ObjectStore::open_in_memory(mapping.build()?);
//!
//! let tx = store.create_root_transaction();
//! let customer = tx.new_object("Customer")?;
//! let order = tx.new_object("Order")?;
//! tx.set_related_object(&order, "customer", Some(&customer))?;
//! assert_eq!(tx.get_related_objects(&customer, "orders")?, vec![order.clone()]);
//!
//! tx.commit()?;
//! assert_eq!(tx.state_of(&order)?, ObjectState::Unchanged);
//! # Ok::<(), domstore_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod data;
mod error;
mod extension;
mod identity;
mod mapping;
mod object;
mod query;
mod relations;
mod store;
mod transaction;
mod types;

pub use config::Config;
pub use data::{DataContainer, DataContainerStore, Lifecycle};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use extension::{ClientTransactionListener, ExtensionBroadcaster, ListenerFactory};
pub use identity::IdentityRegistry;
pub use mapping::{
    Cardinality, ClassBuilder, ClassDefinition, MappingBuilder, MappingConfiguration,
    PropertyDefinition, RelationBuilder, RelationEndPointDefinition,
};
pub use object::{DefaultObjectFactory, DomainObject, DomainObjectFactory, DomainObjectListener};
pub use query::{Query, QueryResult};
pub use relations::{EndPointChange, EndPointValue, RelationEndPoint, RelationEndPointRegistry};
pub use store::{ObjectStore, ObjectStoreBuilder};
pub use transaction::{
    AutoRollbackBehavior, ClientTransaction, DefaultSubTransactionFactory, SubTransactionFactory,
    TransactionKind, TransactionScope,
};
pub use types::{EndPointId, ObjectState, TransactionId, ValueAccess};
