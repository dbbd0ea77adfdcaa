//! Domain object handles.
//!
//! A [`DomainObject`] is a lightweight, cloneable handle made of an
//! [`ObjectKey`] and a link to the transaction hierarchy it was created in.
//! It carries no property data; all data lives in the data container of
//! whichever transaction the handle is used with. Within one transaction a
//! key maps to at most one handle, so handle equality is pointer equality.

use crate::error::{CoreError, CoreResult};
use crate::mapping::ClassDefinition;
use crate::transaction::{ClientTransaction, TxInner};
use crate::types::{ObjectState, TransactionId};
use domstore_storage::{ClassId, ObjectKey, Value};
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};

/// Per-object lifecycle callbacks.
///
/// Listeners are attached to individual objects (usually by a
/// [`DomainObjectFactory`]). Methods returning [`CoreResult`] run before the
/// change and may cancel it by returning an error; the others run after the
/// change and must not fail.
#[allow(unused_variables)]
pub trait DomainObjectListener: Send + Sync {
    /// The object is about to be committed.
    fn committing(&self, tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        Ok(())
    }

    /// The object was committed.
    fn committed(&self, tx: &ClientTransaction, object: &DomainObject) {}

    /// The object is about to be rolled back.
    fn rolling_back(&self, tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        Ok(())
    }

    /// The object was rolled back.
    fn rolled_back(&self, tx: &ClientTransaction, object: &DomainObject) {}

    /// The object is about to be deleted.
    fn deleting(&self, tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        Ok(())
    }

    /// The object was deleted.
    fn deleted(&self, tx: &ClientTransaction, object: &DomainObject) {}

    /// A property value is about to change.
    fn property_changing(
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
    fn property_changed(
        &self,
        tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        old: &Value,
        new: &Value,
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
}

/// Creates the handles for objects of a class.
///
/// The engine calls the factory whenever it needs a handle for a key it has
/// not seen before in a transaction hierarchy: for new objects, for loaded
/// objects and for bare references.
pub trait DomainObjectFactory: Send + Sync {
    /// Creates an uninitialized handle for `key`.
    fn create(&self, class: &ClassDefinition, key: ObjectKey) -> DomainObject;
}

/// Factory creating plain handles without listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultObjectFactory;

impl DomainObjectFactory for DefaultObjectFactory {
    fn create(&self, _class: &ClassDefinition, key: ObjectKey) -> DomainObject {
        DomainObject::new(key)
    }
}

#[derive(Debug)]
struct ObjectBinding {
    transaction: TransactionId,
    owner: Weak<TxInner>,
    bound: bool,
}

struct ObjectCore {
    key: ObjectKey,
    binding: OnceLock<ObjectBinding>,
    listeners: RwLock<Vec<Arc<dyn DomainObjectListener>>>,
}

/// Handle to one persistent object.
#[derive(Clone)]
pub struct DomainObject(Arc<ObjectCore>);

impl DomainObject {
    /// Creates an uninitialized handle.
    ///
    /// Handles become usable once a transaction initializes and enlists
    /// them; factories return uninitialized handles.
    #[must_use]
    pub fn new(key: ObjectKey) -> Self {
        Self(Arc::new(ObjectCore {
            key,
            binding: OnceLock::new(),
            listeners: RwLock::new(Vec::new()),
        }))
    }

    /// Returns the object's key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.0.key
    }

    /// Returns the object's class id.
    #[must_use]
    pub fn class_id(&self) -> &ClassId {
        self.0.key.class()
    }

    /// Returns true once a transaction has initialized the handle.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.0.binding.get().is_some()
    }

    /// Returns true if the object is permanently bound to a binding
    /// transaction.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.0.binding.get().is_some_and(|b| b.bound)
    }

    /// Returns the binding transaction's id, if the object is bound.
    #[must_use]
    pub fn bound_transaction_id(&self) -> Option<TransactionId> {
        self.0
            .binding
            .get()
            .filter(|b| b.bound)
            .map(|b| b.transaction)
    }

    /// Initializes the handle for the hierarchy rooted at `root`.
    pub(crate) fn initialize(&self, root: &ClientTransaction, bound: bool) -> CoreResult<()> {
        self.0
            .binding
            .set(ObjectBinding {
                transaction: root.id(),
                owner: root.downgrade(),
                bound,
            })
            .map_err(|_| CoreError::AlreadyInitialized {
                key: self.key().clone(),
            })
    }

    /// Returns the transaction that initialized the handle, if it is still alive.
    #[must_use]
    pub fn root_transaction(&self) -> Option<ClientTransaction> {
        self.0
            .binding
            .get()
            .and_then(|b| ClientTransaction::upgrade(&b.owner))
    }

    /// Attaches a per-object listener.
    pub fn add_listener(&self, listener: Arc<dyn DomainObjectListener>) {
        self.0.listeners.write().push(listener);
    }

    /// Returns the number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.0.listeners.read().len()
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn DomainObjectListener>> {
        self.0.listeners.read().clone()
    }

    /// Returns true if both handles are the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Resolves the transaction convenience accessors operate in.
    ///
    /// Bound objects always use their binding transaction. Otherwise the
    /// current scope's transaction is used, falling back to the innermost
    /// active transaction of the hierarchy that created the handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no transaction is available.
    pub fn default_transaction(&self) -> CoreResult<ClientTransaction> {
        if self.is_bound() {
            return self
                .root_transaction()
                .ok_or_else(|| CoreError::invalid_operation("binding transaction was dropped"));
        }
        if let Some(current) = ClientTransaction::current() {
            return Ok(current);
        }
        self.root_transaction()
            .map(|root| root.leaf())
            .ok_or_else(|| CoreError::invalid_operation("no transaction available for object"))
    }

    /// Returns the object's state in its default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::state_of`].
    pub fn state(&self) -> CoreResult<ObjectState> {
        self.default_transaction()?.state_of(self)
    }

    /// Reads a property in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_value`].
    pub fn value(&self, property: &str) -> CoreResult<Value> {
        self.default_transaction()?.get_value(self, property)
    }

    /// Writes a property in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::set_value`].
    pub fn set_value(&self, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.default_transaction()?.set_value(self, property, value)
    }

    /// Reads a single-object relation in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_related_object`].
    pub fn related_object(&self, property: &str) -> CoreResult<Option<DomainObject>> {
        self.default_transaction()?.get_related_object(self, property)
    }

    /// Reads a collection relation in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_related_objects`].
    pub fn related_objects(&self, property: &str) -> CoreResult<Vec<DomainObject>> {
        self.default_transaction()?.get_related_objects(self, property)
    }

    /// Sets a single-object relation in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::set_related_object`].
    pub fn set_related_object(&self, property: &str, related: Option<&DomainObject>) -> CoreResult<()> {
        self.default_transaction()?
            .set_related_object(self, property, related)
    }

    /// Deletes the object in the default transaction.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::delete`].
    pub fn delete(&self) -> CoreResult<()> {
        self.default_transaction()?.delete(self)
    }
}

impl PartialEq for DomainObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DomainObject {}

impl Hash for DomainObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for DomainObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainObject")
            .field("key", &self.0.key)
            .field("binding", &self.0.binding.get())
            .finish()
    }
}

impl fmt::Display for DomainObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.key, f)
    }
}
