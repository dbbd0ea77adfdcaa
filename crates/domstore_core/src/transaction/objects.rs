//! Object lifecycle: identity, creation, lookup, deletion, unloading and
//! queries.

use super::ClientTransaction;
use crate::data::DataContainer;
use crate::error::{CoreError, CoreResult};
use crate::object::DomainObject;
use crate::query::{Query, QueryResult};
use crate::relations::{EndPointValue, RelationEndPoint, RelationPlanner};
use crate::types::{EndPointId, ObjectState};
use domstore_storage::{ClassId, ObjectKey};
use std::collections::HashSet;
use tracing::{debug, trace};

impl ClientTransaction {
    /// Returns the object enlisted under `key` without loading anything.
    #[must_use]
    pub fn lookup(&self, key: &ObjectKey) -> Option<DomainObject> {
        self.lock().identity.lookup(key).cloned()
    }

    /// Returns true if `object` is the handle enlisted in this transaction
    /// under its key.
    #[must_use]
    pub fn is_enlisted(&self, object: &DomainObject) -> bool {
        self.lock().identity.is_enlisted(object)
    }

    /// Returns all enlisted objects.
    #[must_use]
    pub fn enlisted_objects(&self) -> Vec<DomainObject> {
        self.lock().identity.objects().cloned().collect()
    }

    /// Enlists an object handle in this transaction.
    ///
    /// Uninitialized handles are initialized for this transaction's
    /// hierarchy. Enlisting the same handle twice is a no-op returning
    /// false.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EnlistConflict`] if a different handle is enlisted under the key
    /// - [`CoreError::CrossTransaction`] if the object is bound to another transaction
    pub fn enlist(&self, object: &DomainObject) -> CoreResult<bool> {
        self.ensure_readable()?;
        self.mapping().class(object.class_id())?;
        if !object.is_initialized() {
            object.initialize(&self.root(), self.is_binding())?;
        }
        let enlisted = self.lock().identity.enlist(object, self.id())?;
        if enlisted {
            trace!(transaction = %self.id(), key = %object.key(), "object enlisted");
        }
        Ok(enlisted)
    }

    /// Returns the handle for `key` without loading its data.
    ///
    /// The handle is taken from this transaction, then from its ancestors;
    /// only if no transaction of the hierarchy knows the key is a new handle
    /// created with the store's object factory.
    ///
    /// # Errors
    ///
    /// Fails for unmapped classes or on a discarded transaction.
    pub fn get_object_reference(&self, key: &ObjectKey) -> CoreResult<DomainObject> {
        self.ensure_readable()?;
        if let Some(object) = self.lookup(key) {
            return Ok(object);
        }
        let class = self.mapping().class(key.class())?;

        for ancestor in self.ancestors() {
            let found = ancestor.lookup(key);
            if let Some(object) = found {
                self.lock().identity.enlist(&object, self.id())?;
                return Ok(object);
            }
        }

        let object = self.context().factory.create(class, key.clone());
        object.initialize(&self.root(), self.is_binding())?;
        let mut chain = self.ancestors();
        chain.reverse();
        chain.push(self.clone());
        for tx in &chain {
            tx.lock().identity.enlist(&object, tx.id())?;
        }
        trace!(transaction = %self.id(), key = %key, "object reference created");
        Ok(object)
    }

    pub(super) fn get_or_create_reference(&self, key: &ObjectKey) -> CoreResult<DomainObject> {
        self.get_object_reference(key)
    }

    /// Checks that `object` may be used with this transaction, enlisting
    /// handles that belong to an ancestor.
    pub(crate) fn resolve(&self, object: &DomainObject) -> CoreResult<()> {
        self.ensure_readable()?;
        match self.lookup(object.key()) {
            Some(existing) if existing.ptr_eq(object) => Ok(()),
            Some(_) => Err(CoreError::cross_transaction(
                object.key().clone(),
                self.id(),
                "a different object is enlisted for this key",
            )),
            None => {
                if self.ancestors().iter().any(|a| a.is_enlisted(object)) {
                    self.lock().identity.enlist(object, self.id())?;
                    Ok(())
                } else {
                    Err(CoreError::cross_transaction(
                        object.key().clone(),
                        self.id(),
                        "object is not enlisted in this transaction",
                    ))
                }
            }
        }
    }

    /// Returns the object's state in this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the object does not belong to this transaction.
    pub fn state_of(&self, object: &DomainObject) -> CoreResult<ObjectState> {
        self.resolve(object)?;
        Ok(self.key_state(object.key()))
    }

    /// Creates a new object of `class`.
    ///
    /// The object starts with the mapped default values and empty relation
    /// end-points.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, the class is not mapped,
    /// or a `new_object_creating` listener cancels.
    pub fn new_object(&self, class: impl Into<ClassId>) -> CoreResult<DomainObject> {
        self.ensure_writable()?;
        let class_id = class.into();
        let definition = self.mapping().class(&class_id)?;
        self.extensions()
            .try_notify(|l| l.new_object_creating(self, &class_id))?;

        let key = self.backend().new_object_key(&class_id)?;
        let object = self.context().factory.create(definition, key.clone());
        object.initialize(&self.root(), self.is_binding())?;
        {
            let mut state = self.lock();
            state.identity.enlist(&object, self.id())?;
            state
                .data
                .insert(DataContainer::new_object(key.clone(), definition.default_values()));
            for relation in definition.relations() {
                state.relations.register(RelationEndPoint::new(
                    EndPointId::new(key.clone(), relation.property()),
                    relation.is_real(),
                    EndPointValue::empty(relation.cardinality()),
                ));
            }
        }
        debug!(transaction = %self.id(), key = %key, "object created");
        Ok(object)
    }

    /// Returns the object for `key`, loading it if necessary.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ObjectNotFound`] / [`CoreError::ObjectInvalid`] if it does not exist
    /// - [`CoreError::ObjectDeleted`] if it is deleted and `include_deleted` is false
    pub fn get_object(&self, key: &ObjectKey, include_deleted: bool) -> CoreResult<DomainObject> {
        let object = self
            .get_with_lazy_load(key, true)?
            .ok_or_else(|| CoreError::ObjectNotFound { key: key.clone() })?;
        if !include_deleted && self.key_state(key) == ObjectState::Deleted {
            return Err(CoreError::ObjectDeleted { key: key.clone() });
        }
        Ok(object)
    }

    /// Returns the object for `key`, or `None` if it does not exist.
    /// Deleted objects are returned.
    ///
    /// # Errors
    ///
    /// Fails for unmapped classes, cancelled loads and backend errors.
    pub fn try_get_object(&self, key: &ObjectKey) -> CoreResult<Option<DomainObject>> {
        self.get_with_lazy_load(key, false)
    }

    /// Returns the objects for `keys` in input order, loading the missing
    /// ones in one request.
    ///
    /// # Errors
    ///
    /// Fails on the first key that does not exist or is deleted.
    pub fn get_objects(&self, keys: &[ObjectKey]) -> CoreResult<Vec<DomainObject>> {
        let objects = self.get_many_with_lazy_load(keys, true)?;
        keys.iter()
            .zip(objects)
            .map(|(key, object)| {
                let object = object.ok_or_else(|| CoreError::ObjectNotFound { key: key.clone() })?;
                if self.key_state(key) == ObjectState::Deleted {
                    return Err(CoreError::ObjectDeleted { key: key.clone() });
                }
                Ok(object)
            })
            .collect()
    }

    /// Like [`ClientTransaction::get_objects`], yielding `None` for keys
    /// that do not exist.
    ///
    /// # Errors
    ///
    /// Fails for unmapped classes, cancelled loads and backend errors.
    pub fn try_get_objects(&self, keys: &[ObjectKey]) -> CoreResult<Vec<Option<DomainObject>>> {
        self.get_many_with_lazy_load(keys, false)
    }

    /// Deletes `object`.
    ///
    /// The object is removed from every relation it takes part in, and
    /// unidirectional references to it are cleared. A new object is
    /// discarded outright and becomes invalid; an existing one becomes
    /// deleted until commit. Deleting a deleted object does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, the object cannot be
    /// loaded, or a deleting listener cancels.
    pub fn delete(&self, object: &DomainObject) -> CoreResult<()> {
        self.ensure_writable()?;
        self.resolve(object)?;
        let key = object.key().clone();
        self.get_with_lazy_load(&key, true)?;
        if self.key_state(&key) == ObjectState::Deleted {
            return Ok(());
        }

        self.extensions()
            .try_notify(|l| l.object_deleting(self, object))?;
        for listener in object.listeners() {
            listener.deleting(self, object)?;
        }

        let class = self.mapping().class(key.class())?;
        let mut planner = RelationPlanner::new(self, self.mapping());
        planner.detach_all(&key, class)?;
        for referrer in self.mapping().unidirectional_referrers(key.class()) {
            let holders: Vec<ObjectKey> = self
                .lock()
                .relations
                .referencing(referrer.property(), &key)
                .filter(|e| e.id().key.class() == referrer.class())
                .map(|e| e.id().key.clone())
                .collect();
            for holder in holders {
                planner.set_real(&holder, referrer, None)?;
            }
        }
        let changes = planner.finish();
        self.apply_relation_changes(&changes, false)?;

        {
            let mut state = self.lock();
            let is_new = state.data.get(&key).is_some_and(DataContainer::is_new);
            if is_new {
                state.data.remove(&key);
                state.relations.remove_owned_by(&key);
                state.identity.mark_invalid(key.clone());
            } else if let Some(container) = state.data.get_mut(&key) {
                container.mark_deleted();
            }
        }

        for listener in object.listeners() {
            listener.deleted(self, object);
        }
        self.extensions().notify(|l| l.object_deleted(self, object));
        debug!(transaction = %self.id(), key = %key, "object deleted");
        Ok(())
    }

    /// Drops the loaded data of an unchanged object, so the next access
    /// reloads it. Returns false if nothing was loaded.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] if the object or one of its
    /// relations has uncommitted changes.
    pub fn unload_data(&self, object: &DomainObject) -> CoreResult<bool> {
        self.ensure_writable()?;
        self.resolve(object)?;
        match self.key_state(object.key()) {
            ObjectState::NotLoadedYet => return Ok(false),
            ObjectState::Unchanged => {}
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot unload {} in state {state:?}",
                    object.key()
                )))
            }
        }

        let objects = [object.clone()];
        self.extensions()
            .try_notify(|l| l.objects_unloading(self, &objects))?;
        {
            let mut state = self.lock();
            state.data.remove(object.key());
            state.relations.remove_owned_by(object.key());
        }
        self.extensions()
            .notify(|l| l.objects_unloaded(self, &objects));
        trace!(transaction = %self.id(), key = %object.key(), "object unloaded");
        Ok(true)
    }

    /// Runs a query against the persisted records of a class.
    ///
    /// Matching objects already loaded keep their identity and in-memory
    /// data; deleted and invalid objects are omitted. The result passes
    /// through every listener's `filter_query_result`.
    ///
    /// # Errors
    ///
    /// Fails for unmapped classes, backend errors, and listener errors.
    pub fn query(&self, query: &Query) -> CoreResult<QueryResult> {
        self.ensure_readable()?;
        self.mapping().class(query.class())?;

        let mut records = self.source_records(query.class())?;
        records.retain(|r| query.matches(&r.properties));
        if let Some(sort) = query.sort_spec() {
            records.sort_by(|a, b| sort.compare(&a.properties, &b.properties));
        }
        let keys: Vec<ObjectKey> = records.iter().map(|r| r.key.clone()).collect();

        let objects = self.get_many_with_lazy_load(&keys, false)?;
        let mut seen = HashSet::new();
        let objects: Vec<DomainObject> = keys
            .iter()
            .zip(objects)
            .filter_map(|(key, object)| object.filter(|_| seen.insert(key.clone())))
            .filter(|object| self.key_state(object.key()) != ObjectState::Deleted)
            .collect();

        debug!(transaction = %self.id(), class = %query.class(), count = objects.len(), "query executed");
        self.extensions()
            .filter_query_result(self, QueryResult::new(query.clone(), objects))
    }

    /// Returns true if any object or relation has uncommitted changes.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        !self.lock().commit_set().is_empty()
    }
}
