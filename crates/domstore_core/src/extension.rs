//! Transaction listeners and their dispatcher.
//!
//! Every [`ClientTransaction`] owns an [`ExtensionBroadcaster`], an ordered
//! list of [`ClientTransactionListener`]s. Hooks come in two flavours:
//!
//! - **Cancellable** hooks return [`CoreResult`]. They run before the
//!   operation mutates anything; the first listener returning an error stops
//!   dispatch and aborts the operation with that error.
//! - **Terminal** hooks return `()`. They run after the operation completed
//!   and every listener is called.
//!
//! [`ClientTransactionListener::filter_query_result`] is the one filtering
//! hook: each listener receives the previous listener's output.
//!
//! Dispatch works on a snapshot of the list, so listeners may add or remove
//! listeners (or call back into the transaction) while being notified.

use crate::error::{CoreError, CoreResult};
use crate::object::DomainObject;
use crate::query::QueryResult;
use crate::transaction::ClientTransaction;
use crate::types::ValueAccess;
use domstore_storage::{ClassId, ObjectKey, Value};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Lifecycle hooks of a transaction.
///
/// All methods have no-op defaults; implement the ones you need.
/// [`ClientTransactionListener::name`] identifies the listener within a
/// broadcaster and must be unique there.
#[allow(unused_variables)]
pub trait ClientTransactionListener: Send + Sync {
    /// Unique name within one broadcaster.
    fn name(&self) -> &str;

    /// The transaction was created.
    fn transaction_initialize(&self, tx: &ClientTransaction) {}

    /// The transaction is being discarded.
    fn transaction_discard(&self, tx: &ClientTransaction) {}

    /// A subtransaction is about to be created.
    fn subtransaction_creating(&self, tx: &ClientTransaction) -> CoreResult<()> {
        Ok(())
    }

    /// A subtransaction was constructed but is not yet linked.
    fn subtransaction_initialize(&self, parent: &ClientTransaction, sub: &ClientTransaction) -> CoreResult<()> {
        Ok(())
    }

    /// A subtransaction was created and linked.
    fn subtransaction_created(&self, parent: &ClientTransaction, sub: &ClientTransaction) {}

    /// A new object of `class` is about to be created.
    fn new_object_creating(&self, tx: &ClientTransaction, class: &ClassId) -> CoreResult<()> {
        Ok(())
    }

    /// Objects are about to be loaded.
    fn objects_loading(&self, tx: &ClientTransaction, keys: &[ObjectKey]) -> CoreResult<()> {
        Ok(())
    }

    /// Objects were loaded.
    fn objects_loaded(&self, tx: &ClientTransaction, objects: &[DomainObject]) {}

    /// A load found no data for these keys; they are now invalid.
    fn objects_not_found(&self, tx: &ClientTransaction, keys: &[ObjectKey]) {}

    /// Objects are about to be unloaded.
    fn objects_unloading(&self, tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        Ok(())
    }

    /// Objects were unloaded.
    fn objects_unloaded(&self, tx: &ClientTransaction, objects: &[DomainObject]) {}

    /// An object is about to be deleted.
    fn object_deleting(&self, tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        Ok(())
    }

    /// An object was deleted.
    fn object_deleted(&self, tx: &ClientTransaction, object: &DomainObject) {}

    /// A property value is about to be read.
    fn property_value_reading(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        access: ValueAccess,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A property value was read.
    fn property_value_read(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        value: &Value,
        access: ValueAccess,
    ) {
    }

    /// A property value is about to change.
    fn property_value_changing(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        old: &Value,
        new: &Value,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A property value changed.
    fn property_value_changed(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        old: &Value,
        new: &Value,
    ) {
    }

    /// A relation is about to be read.
    fn relation_reading(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        access: ValueAccess,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A relation was read. `related` holds zero or one object for
    /// single-object end-points.
    fn relation_read(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        related: &[DomainObject],
        access: ValueAccess,
    ) {
    }

    /// A relation end-point is about to change.
    fn relation_changing(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        old: Option<&DomainObject>,
        new: Option<&DomainObject>,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A relation end-point changed.
    fn relation_changed(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        old: Option<&DomainObject>,
        new: Option<&DomainObject>,
    ) {
    }

    /// Adjusts a query result. The returned result is passed to the next listener.
    fn filter_query_result(&self, tx: &ClientTransaction, result: QueryResult) -> CoreResult<QueryResult> {
        Ok(result)
    }

    /// Objects are about to be committed. Called once per notification round
    /// with the objects that joined the commit set during the previous round.
    fn committing(&self, tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        Ok(())
    }

    /// The final commit set is about to be persisted. The transaction is
    /// read-only during this hook.
    fn commit_validate(&self, tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        Ok(())
    }

    /// Objects were committed.
    fn committed(&self, tx: &ClientTransaction, objects: &[DomainObject]) {}

    /// Objects are about to be rolled back. Called once per notification round.
    fn rolling_back(&self, tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        Ok(())
    }

    /// Objects were rolled back.
    fn rolled_back(&self, tx: &ClientTransaction, objects: &[DomainObject]) {}

    /// Persisting the commit set failed; the transaction is unchanged.
    fn commit_failed(&self, tx: &ClientTransaction, objects: &[DomainObject], error: &CoreError) {}
}

/// Creates the listeners installed on every new transaction of a store.
pub trait ListenerFactory: Send + Sync {
    /// Returns the listeners for `tx`.
    fn create_listeners(&self, tx: &ClientTransaction) -> Vec<Arc<dyn ClientTransactionListener>>;
}

/// Ordered collection of transaction listeners.
#[derive(Default)]
pub struct ExtensionBroadcaster {
    listeners: RwLock<Vec<Arc<dyn ClientTransactionListener>>>,
}

impl ExtensionBroadcaster {
    /// Creates an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a listener with the same
    /// name is already registered.
    pub fn add(&self, listener: Arc<dyn ClientTransactionListener>) -> CoreResult<()> {
        let mut listeners = self.listeners.write();
        Self::ensure_unique(&listeners, listener.name())?;
        listeners.push(listener);
        Ok(())
    }

    /// Inserts a listener at `index` (clamped to the list length).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a listener with the same
    /// name is already registered.
    pub fn insert(&self, index: usize, listener: Arc<dyn ClientTransactionListener>) -> CoreResult<()> {
        let mut listeners = self.listeners.write();
        Self::ensure_unique(&listeners, listener.name())?;
        let index = index.min(listeners.len());
        listeners.insert(index, listener);
        Ok(())
    }

    fn ensure_unique(listeners: &[Arc<dyn ClientTransactionListener>], name: &str) -> CoreResult<()> {
        if listeners.iter().any(|l| l.name() == name) {
            return Err(CoreError::invalid_operation(format!(
                "listener '{name}' is already registered"
            )));
        }
        Ok(())
    }

    /// Removes the listener with `name`. Returns false if there was none.
    pub fn remove(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    /// Returns the listener with `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ClientTransactionListener>> {
        self.listeners
            .read()
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    /// Returns the listener names in dispatch order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .map(|l| l.name().to_owned())
            .collect()
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ClientTransactionListener>> {
        self.listeners.read().clone()
    }

    /// Calls a terminal hook on every listener.
    pub(crate) fn notify(&self, mut hook: impl FnMut(&dyn ClientTransactionListener)) {
        for listener in self.snapshot() {
            hook(listener.as_ref());
        }
    }

    /// Calls a cancellable hook, stopping at the first error.
    pub(crate) fn try_notify(
        &self,
        mut hook: impl FnMut(&dyn ClientTransactionListener) -> CoreResult<()>,
    ) -> CoreResult<()> {
        for listener in self.snapshot() {
            hook(listener.as_ref())?;
        }
        Ok(())
    }

    /// Runs the query-result filter chain.
    pub(crate) fn filter_query_result(&self, tx: &ClientTransaction, result: QueryResult) -> CoreResult<QueryResult> {
        self.snapshot()
            .into_iter()
            .try_fold(result, |acc, listener| listener.filter_query_result(tx, acc))
    }
}

impl fmt::Debug for ExtensionBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionBroadcaster")
            .field("listeners", &self.names())
            .finish()
    }
}
