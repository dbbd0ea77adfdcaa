//! Relation access and modification.

use super::ClientTransaction;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::mapping::{Cardinality, RelationEndPointDefinition};
use crate::object::DomainObject;
use crate::relations::{EndPointChange, EndPointLookup, EndPointValue, RelationEndPoint, RelationPlanner};
use crate::types::{EndPointId, ObjectState, ValueAccess};
use domstore_storage::{ObjectKey, Value};
use std::sync::Arc;
use tracing::trace;

impl EndPointLookup for ClientTransaction {
    fn complete_value(&self, id: &EndPointId) -> CoreResult<Option<EndPointValue>> {
        match self.ensure_end_point_complete(id) {
            Ok(()) => {}
            Err(error) if matches!(error.kind(), ErrorKind::NotFound | ErrorKind::InvalidObject) => {
                return Ok(None)
            }
            Err(error) => return Err(error),
        }
        Ok(self.lock().relations.get(id).map(|e| e.current().clone()))
    }

    fn check_live(&self, key: &ObjectKey) -> CoreResult<()> {
        self.get_with_lazy_load(key, true)?;
        match self.key_state(key) {
            ObjectState::Deleted => Err(CoreError::ObjectDeleted { key: key.clone() }),
            ObjectState::Invalid => Err(CoreError::ObjectInvalid { key: key.clone() }),
            _ => Ok(()),
        }
    }
}

/// A relation event with resolved handles.
struct RelationEvent {
    owner: DomainObject,
    property: Arc<str>,
    old: Option<DomainObject>,
    new: Option<DomainObject>,
}

impl ClientTransaction {
    fn relation_definition(
        &self,
        object: &DomainObject,
        property: &str,
        expected: Cardinality,
    ) -> CoreResult<&RelationEndPointDefinition> {
        let definition = self.mapping().end_point(object.class_id(), property)?;
        if definition.cardinality() != expected {
            let hint = match expected {
                Cardinality::One => "it is a collection",
                Cardinality::Many => "it is a single-object relation",
            };
            return Err(CoreError::invalid_operation(format!(
                "{}.{property}: {hint}",
                object.class_id()
            )));
        }
        Ok(definition)
    }

    fn read_relation(
        &self,
        object: &DomainObject,
        property: &str,
        access: ValueAccess,
        expected: Cardinality,
    ) -> CoreResult<Vec<DomainObject>> {
        self.resolve(object)?;
        self.relation_definition(object, property, expected)?;
        self.get_with_lazy_load(object.key(), true)?;
        if access == ValueAccess::Current && self.key_state(object.key()) == ObjectState::Deleted {
            return Err(CoreError::ObjectDeleted {
                key: object.key().clone(),
            });
        }
        self.extensions()
            .try_notify(|l| l.relation_reading(self, object, property, access))?;

        let id = EndPointId::new(object.key().clone(), property);
        self.ensure_end_point_complete(&id)?;
        let keys = self
            .lock()
            .relations
            .get(&id)
            .map(|e| match access {
                ValueAccess::Current => e.current().keys(),
                ValueAccess::Original => e.original().keys(),
            })
            .unwrap_or_default();
        let related = self.references(&keys)?;

        self.extensions()
            .notify(|l| l.relation_read(self, object, property, &related, access));
        Ok(related)
    }

    /// Returns the object related through a single-object end-point.
    ///
    /// # Errors
    ///
    /// Fails for deleted objects, collection properties, and unmapped
    /// properties.
    pub fn get_related_object(&self, object: &DomainObject, property: &str) -> CoreResult<Option<DomainObject>> {
        Ok(self
            .read_relation(object, property, ValueAccess::Current, Cardinality::One)?
            .into_iter()
            .next())
    }

    /// Returns the members of a collection end-point in collection order.
    ///
    /// # Errors
    ///
    /// Fails for deleted objects, single-object properties, and unmapped
    /// properties.
    pub fn get_related_objects(&self, object: &DomainObject, property: &str) -> CoreResult<Vec<DomainObject>> {
        self.read_relation(object, property, ValueAccess::Current, Cardinality::Many)
    }

    /// Like [`ClientTransaction::get_related_object`], returning the value
    /// as loaded or last committed. Deleted objects may be read.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_related_object`].
    pub fn get_original_related_object(
        &self,
        object: &DomainObject,
        property: &str,
    ) -> CoreResult<Option<DomainObject>> {
        Ok(self
            .read_relation(object, property, ValueAccess::Original, Cardinality::One)?
            .into_iter()
            .next())
    }

    /// Like [`ClientTransaction::get_related_objects`], returning the
    /// collection as loaded or last committed.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_related_objects`].
    pub fn get_original_related_objects(&self, object: &DomainObject, property: &str) -> CoreResult<Vec<DomainObject>> {
        self.read_relation(object, property, ValueAccess::Original, Cardinality::Many)
    }

    /// Checks that `object` and `related` are live and may take part in a
    /// relation change.
    fn prepare_relation_change(&self, object: &DomainObject, related: Option<&DomainObject>) -> CoreResult<()> {
        self.ensure_writable()?;
        self.resolve(object)?;
        self.check_live(object.key())?;
        if let Some(related) = related {
            self.resolve(related)?;
            self.check_live(related.key())?;
        }
        Ok(())
    }

    /// Sets a single-object relation. The opposite end-points of the old
    /// and new related objects are updated in the same step.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not writable, either object is deleted
    /// or invalid, the related object has the wrong class, or a listener
    /// cancels. Nothing changes on failure.
    pub fn set_related_object(
        &self,
        object: &DomainObject,
        property: &str,
        related: Option<&DomainObject>,
    ) -> CoreResult<()> {
        self.prepare_relation_change(object, related)?;
        let definition = self.relation_definition(object, property, Cardinality::One)?;
        let new = related.map(|r| r.key().clone());

        let mut planner = RelationPlanner::new(self, self.mapping());
        if definition.is_real() {
            planner.set_real(object.key(), definition, new)?;
        } else {
            planner.set_virtual(object.key(), definition, new)?;
        }
        self.apply_relation_changes(&planner.finish(), true)
    }

    /// Inserts `item` into a collection at `index`, moving it out of its
    /// previous owner's collection.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidOperation`] if `item` is already a member or
    /// `index` is out of range; otherwise as for
    /// [`ClientTransaction::set_related_object`].
    pub fn insert_related_object(
        &self,
        object: &DomainObject,
        property: &str,
        index: usize,
        item: &DomainObject,
    ) -> CoreResult<()> {
        self.prepare_relation_change(object, Some(item))?;
        let definition = self.relation_definition(object, property, Cardinality::Many)?;
        let mut planner = RelationPlanner::new(self, self.mapping());
        planner.insert(object.key(), definition, index, item.key())?;
        self.apply_relation_changes(&planner.finish(), true)
    }

    /// Appends `item` to a collection.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::insert_related_object`].
    pub fn add_related_object(&self, object: &DomainObject, property: &str, item: &DomainObject) -> CoreResult<()> {
        self.resolve(object)?;
        self.relation_definition(object, property, Cardinality::Many)?;
        let id = EndPointId::new(object.key().clone(), property);
        let index = self.complete_value(&id)?.map_or(0, |v| v.keys().len());
        self.insert_related_object(object, property, index, item)
    }

    /// Removes `item` from a collection. Returns false if it was not a
    /// member.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::set_related_object`].
    pub fn remove_related_object(&self, object: &DomainObject, property: &str, item: &DomainObject) -> CoreResult<bool> {
        self.prepare_relation_change(object, Some(item))?;
        let definition = self.relation_definition(object, property, Cardinality::Many)?;
        let mut planner = RelationPlanner::new(self, self.mapping());
        let removed = planner.remove(object.key(), definition, item.key())?;
        self.apply_relation_changes(&planner.finish(), true)?;
        Ok(removed)
    }

    /// Replaces the collection member at `index` with `item`.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::insert_related_object`].
    pub fn replace_related_object(
        &self,
        object: &DomainObject,
        property: &str,
        index: usize,
        item: &DomainObject,
    ) -> CoreResult<()> {
        self.prepare_relation_change(object, Some(item))?;
        let definition = self.relation_definition(object, property, Cardinality::Many)?;
        let mut planner = RelationPlanner::new(self, self.mapping());
        planner.replace(object.key(), definition, index, item.key())?;
        self.apply_relation_changes(&planner.finish(), true)
    }

    fn relation_events(&self, changes: &[EndPointChange]) -> CoreResult<Vec<RelationEvent>> {
        let mut events = Vec::new();
        for change in changes {
            let owner = self.get_object_reference(&change.id.key)?;
            for (old, new) in change.events() {
                events.push(RelationEvent {
                    owner: owner.clone(),
                    property: Arc::clone(&change.id.property),
                    old: old.map(|k| self.get_object_reference(&k)).transpose()?,
                    new: new.map(|k| self.get_object_reference(&k)).transpose()?,
                });
            }
        }
        Ok(events)
    }

    /// Applies planned end-point changes as one unit, keeping the foreign
    /// key of every real end-point in its owner's data container.
    pub(super) fn apply_relation_changes(&self, changes: &[EndPointChange], notify: bool) -> CoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let events = if notify {
            self.relation_events(changes)?
        } else {
            Vec::new()
        };

        for event in &events {
            self.extensions().try_notify(|l| {
                l.relation_changing(
                    self,
                    &event.owner,
                    &event.property,
                    event.old.as_ref(),
                    event.new.as_ref(),
                )
            })?;
            for listener in event.owner.listeners() {
                listener.relation_changing(
                    self,
                    &event.owner,
                    &event.property,
                    event.old.as_ref(),
                    event.new.as_ref(),
                )?;
            }
        }

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            for change in changes {
                match state.relations.get_mut(&change.id) {
                    Some(end_point) => end_point.set_current(change.new.clone()),
                    None => state.relations.replace(RelationEndPoint::with_original(
                        change.id.clone(),
                        change.is_real,
                        change.old.clone(),
                        change.new.clone(),
                    )),
                }
                if change.is_real {
                    if let Some(container) = state.data.get_mut(&change.id.key) {
                        container.set_value(
                            &change.id.property,
                            Value::from(change.new.as_object().cloned()),
                        );
                    }
                }
                trace!(transaction = %self.id(), end_point = %change.id, "end-point changed");
            }
        }

        for event in &events {
            for listener in event.owner.listeners() {
                listener.relation_changed(
                    self,
                    &event.owner,
                    &event.property,
                    event.old.as_ref(),
                    event.new.as_ref(),
                );
            }
            self.extensions().notify(|l| {
                l.relation_changed(
                    self,
                    &event.owner,
                    &event.property,
                    event.old.as_ref(),
                    event.new.as_ref(),
                )
            });
        }
        Ok(())
    }
}
