//! Per-transaction identity map.

use crate::error::{CoreError, CoreResult};
use crate::object::DomainObject;
use crate::types::TransactionId;
use domstore_storage::ObjectKey;
use std::collections::{HashMap, HashSet};

/// Maps object keys to their unique handle within one transaction and
/// remembers keys known not to exist.
///
/// Invalid keys keep their handle, so a lookup after invalidation returns
/// the same object and reports it as invalid instead of creating a new one.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    objects: HashMap<ObjectKey, DomainObject>,
    invalid: HashSet<ObjectKey>,
}

impl IdentityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object` under its key.
    ///
    /// Returns true if the object was newly enlisted and false if the
    /// identical handle was already enlisted.
    ///
    /// # Errors
    ///
    /// See [`IdentityRegistry::check_enlist`].
    pub fn enlist(&mut self, object: &DomainObject, transaction: TransactionId) -> CoreResult<bool> {
        self.check_enlist(object, transaction)?;
        Ok(self.insert_checked(object))
    }

    /// Checks that `object` can be enlisted for `transaction` without
    /// changing the registry.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EnlistConflict`] if another handle is enlisted under the key
    /// - [`CoreError::CrossTransaction`] if the object is bound to another transaction
    pub fn check_enlist(&self, object: &DomainObject, transaction: TransactionId) -> CoreResult<()> {
        if let Some(bound) = object.bound_transaction_id() {
            if bound != transaction {
                return Err(CoreError::cross_transaction(
                    object.key().clone(),
                    transaction,
                    format!("object is bound to {bound}"),
                ));
            }
        }
        match self.objects.get(object.key()) {
            Some(existing) if !existing.ptr_eq(object) => Err(CoreError::EnlistConflict {
                key: object.key().clone(),
                transaction,
            }),
            _ => Ok(()),
        }
    }

    /// Enlists `object` once [`IdentityRegistry::check_enlist`] has accepted
    /// it. Returns false if the key already had a handle.
    pub fn insert_checked(&mut self, object: &DomainObject) -> bool {
        if self.objects.contains_key(object.key()) {
            return false;
        }
        self.objects.insert(object.key().clone(), object.clone());
        true
    }

    /// Returns the handle enlisted under `key`.
    #[must_use]
    pub fn lookup(&self, key: &ObjectKey) -> Option<&DomainObject> {
        self.objects.get(key)
    }

    /// Returns true if `object` is the handle enlisted under its key.
    #[must_use]
    pub fn is_enlisted(&self, object: &DomainObject) -> bool {
        self.objects
            .get(object.key())
            .is_some_and(|existing| existing.ptr_eq(object))
    }

    /// Permanently marks `key` as invalid.
    pub fn mark_invalid(&mut self, key: ObjectKey) {
        self.invalid.insert(key);
    }

    /// Returns true if `key` is invalid.
    #[must_use]
    pub fn is_invalid(&self, key: &ObjectKey) -> bool {
        self.invalid.contains(key)
    }

    /// Returns all enlisted handles.
    pub fn objects(&self) -> impl Iterator<Item = &DomainObject> {
        self.objects.values()
    }

    /// Number of enlisted handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is enlisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of invalid keys.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }
}
