//! Object store facade.

use crate::config::Config;
use crate::error::CoreResult;
use crate::extension::ListenerFactory;
use crate::mapping::MappingConfiguration;
use crate::object::{DefaultObjectFactory, DomainObjectFactory};
use crate::transaction::{ClientTransaction, TransactionKind};
use crate::types::TransactionId;
use domstore_storage::{InMemoryBackend, PersistenceBackend, StoreId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Everything the transactions of one store share.
pub(crate) struct StoreContext {
    pub(crate) config: Config,
    pub(crate) mapping: Arc<MappingConfiguration>,
    pub(crate) backend: Arc<dyn PersistenceBackend>,
    pub(crate) factory: Arc<dyn DomainObjectFactory>,
    pub(crate) listener_factories: Vec<Arc<dyn ListenerFactory>>,
    next_tx_id: AtomicU64,
}

impl StoreContext {
    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.next_tx_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// The main store handle.
///
/// `ObjectStore` binds a mapping to a persistence backend and creates the
/// root transactions that work on it.
///
/// # Example
///
/// ```rust
/// use domstore_core::{MappingConfiguration, ObjectStore};
/// use domstore_storage::ValueKind;
///
/// let mut builder = MappingConfiguration::builder();
/// builder.add_class("Customer").property("name", ValueKind::Text).done()?;
/// let store = ObjectStore::open_in_memory(builder.build()?);
///
/// let key = store.transaction(|tx| {
///     let customer = tx.new_object("Customer")?;
///     tx.set_value(&customer, "name", "Ada")?;
///     Ok(customer.key().clone())
/// })?;
///
/// let tx = store.create_root_transaction();
/// let customer = tx.get_object(&key, false)?;
/// assert_eq!(tx.get_value(&customer, "name")?.as_text(), Some("Ada"));
/// # Ok::<(), domstore_core::CoreError>(())
/// ```
pub struct ObjectStore {
    context: Arc<StoreContext>,
}

impl ObjectStore {
    /// Returns a builder for a store over `mapping`.
    #[must_use]
    pub fn builder(mapping: MappingConfiguration) -> ObjectStoreBuilder {
        ObjectStoreBuilder::new(mapping)
    }

    /// Opens a store backed by a fresh [`InMemoryBackend`].
    #[must_use]
    pub fn open_in_memory(mapping: MappingConfiguration) -> Self {
        Self::builder(mapping).build()
    }

    /// Opens a store over an existing backend.
    #[must_use]
    pub fn open_with_backend(
        mapping: MappingConfiguration,
        backend: Arc<dyn PersistenceBackend>,
        config: Config,
    ) -> Self {
        Self::builder(mapping).backend(backend).config(config).build()
    }

    /// Creates a root transaction.
    #[must_use]
    pub fn create_root_transaction(&self) -> ClientTransaction {
        ClientTransaction::new_transaction(Arc::clone(&self.context), TransactionKind::Root, None)
    }

    /// Creates a binding transaction. Objects it loads or creates are
    /// permanently bound to it and cannot be used elsewhere.
    #[must_use]
    pub fn create_binding_transaction(&self) -> ClientTransaction {
        ClientTransaction::new_transaction(Arc::clone(&self.context), TransactionKind::Binding, None)
    }

    /// Executes a function within a new root transaction.
    ///
    /// The transaction is current while `f` runs. If `f` returns `Ok`, the
    /// transaction is committed. It is discarded afterwards in every case.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ClientTransaction) -> CoreResult<T>,
    {
        let tx = self.create_root_transaction();
        let scope = tx.enter_discarding_scope();
        let value = f(&tx)?;
        tx.commit()?;
        scope.leave()?;
        Ok(value)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Returns the mapping.
    #[must_use]
    pub fn mapping(&self) -> &MappingConfiguration {
        &self.context.mapping
    }

    /// Returns the persistence backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.context.backend
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("config", &self.context.config)
            .field("listener_factories", &self.context.listener_factories.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObjectStore`].
pub struct ObjectStoreBuilder {
    mapping: MappingConfiguration,
    config: Config,
    backend: Option<Arc<dyn PersistenceBackend>>,
    factory: Arc<dyn DomainObjectFactory>,
    listener_factories: Vec<Arc<dyn ListenerFactory>>,
}

impl ObjectStoreBuilder {
    fn new(mapping: MappingConfiguration) -> Self {
        Self {
            mapping,
            config: Config::default(),
            backend: None,
            factory: Arc::new(DefaultObjectFactory),
            listener_factories: Vec::new(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the persistence backend. Defaults to an [`InMemoryBackend`]
    /// with the configured store id.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the factory creating object handles.
    #[must_use]
    pub fn object_factory(mut self, factory: Arc<dyn DomainObjectFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Adds a factory whose listeners are attached to every new transaction.
    #[must_use]
    pub fn listener_factory(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.listener_factories.push(factory);
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> ObjectStore {
        let backend: Arc<dyn PersistenceBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(InMemoryBackend::with_store(StoreId::new(&self.config.store_id))),
        };
        debug!(
            classes = self.mapping.class_count(),
            listener_factories = self.listener_factories.len(),
            "object store opened"
        );
        ObjectStore {
            context: Arc::new(StoreContext {
                config: self.config,
                mapping: Arc::new(self.mapping),
                backend,
                factory: self.factory,
                listener_factories: self.listener_factories,
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domstore_storage::{ClassId, ValueKind};

    fn mapping() -> MappingConfiguration {
        let mut builder = MappingConfiguration::builder();
        builder
            .add_class("Customer")
            .property("name", ValueKind::Text)
            .done()
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn transaction_ids_are_unique() {
        let store = ObjectStore::open_in_memory(mapping());
        let a = store.create_root_transaction();
        let b = store.create_root_transaction();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), TransactionKind::Root);
        assert!(store.create_binding_transaction().is_binding());
    }

    #[test]
    fn transaction_helper_commits_and_discards() {
        let store = ObjectStore::open_in_memory(mapping());
        let key = store
            .transaction(|tx| {
                let customer = tx.new_object("Customer")?;
                tx.set_value(&customer, "name", "Ada")?;
                Ok(customer.key().clone())
            })
            .unwrap();

        assert!(ClientTransaction::current().is_none());
        let tx = store.create_root_transaction();
        let customer = tx.get_object(&key, false).unwrap();
        assert_eq!(tx.get_value(&customer, "name").unwrap().as_text(), Some("Ada"));
    }

    #[test]
    fn failed_closure_leaves_backend_untouched() {
        let store = ObjectStore::open_in_memory(mapping());
        let result: CoreResult<()> = store.transaction(|tx| {
            tx.new_object("Customer")?;
            Err(crate::CoreError::cancelled("stop"))
        });
        assert!(result.is_err());
        assert!(ClientTransaction::current().is_none());
        assert!(store.backend().load_class(&ClassId::new("Customer")).unwrap().is_empty());
    }

    #[test]
    fn in_memory_store_uses_configured_store_id() {
        let store = ObjectStore::builder(mapping())
            .config(Config::new().store_id("crm"))
            .build();
        let tx = store.create_root_transaction();
        let customer = tx.new_object("Customer").unwrap();
        assert_eq!(customer.key().store().as_str(), "crm");
    }
}
