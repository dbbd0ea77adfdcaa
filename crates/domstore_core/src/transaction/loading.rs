//! Lazy loading of objects and relation end-points.

use super::source::{Fetched, LoadedData};
use super::ClientTransaction;
use crate::error::{CoreError, CoreResult};
use crate::mapping::Cardinality;
use crate::object::DomainObject;
use crate::relations::{EndPointValue, RelationEndPoint};
use crate::types::{EndPointId, ValueAccess};
use domstore_storage::ObjectKey;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Known,
    Invalid,
    Load,
}

/// Why a key could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Miss {
    /// The source has no data for the key.
    NotFound,
    /// An ancestor transaction has deleted or invalidated the key.
    Unavailable,
}

impl ClientTransaction {
    /// Returns the object for `key`, loading its data if it is not yet
    /// loaded in this transaction.
    ///
    /// A key whose data cannot be found is marked invalid; later calls fail
    /// with [`CoreError::ObjectInvalid`] (or return `None`) without going to
    /// the source again.
    ///
    /// # Errors
    ///
    /// With `throw_on_not_found`, a missing object is
    /// [`CoreError::ObjectNotFound`] and an invalid one
    /// [`CoreError::ObjectInvalid`]. A cancelling `objects_loading` listener
    /// aborts the load.
    pub fn get_with_lazy_load(&self, key: &ObjectKey, throw_on_not_found: bool) -> CoreResult<Option<DomainObject>> {
        Ok(self
            .load_keys(std::slice::from_ref(key), throw_on_not_found, true)?
            .pop()
            .flatten())
    }

    /// Returns the objects for `keys` in input order, loading all missing
    /// ones with a single source request.
    ///
    /// # Errors
    ///
    /// See [`ClientTransaction::get_with_lazy_load`].
    pub fn get_many_with_lazy_load(
        &self,
        keys: &[ObjectKey],
        throw_on_not_found: bool,
    ) -> CoreResult<Vec<Option<DomainObject>>> {
        self.load_keys(keys, throw_on_not_found, true)
    }

    /// Loads the keys not yet known to this transaction.
    ///
    /// With `guard_sub_new`, keys of objects created in an active
    /// subtransaction are refused; they do not exist at this level yet.
    pub(super) fn load_keys(
        &self,
        keys: &[ObjectKey],
        throw_on_not_found: bool,
        guard_sub_new: bool,
    ) -> CoreResult<Vec<Option<DomainObject>>> {
        Ok(self
            .load_keys_reporting(keys, throw_on_not_found, guard_sub_new)?
            .0)
    }

    /// Like [`ClientTransaction::load_keys`], also returning the keys this
    /// call failed to load and why.
    pub(super) fn load_keys_reporting(
        &self,
        keys: &[ObjectKey],
        throw_on_not_found: bool,
        guard_sub_new: bool,
    ) -> CoreResult<(Vec<Option<DomainObject>>, Vec<(ObjectKey, Miss)>)> {
        self.ensure_readable()?;
        for key in keys {
            self.mapping().class(key.class())?;
        }

        let mut slots = Vec::with_capacity(keys.len());
        let mut to_load: Vec<ObjectKey> = Vec::new();
        {
            let state = self.lock();
            for key in keys {
                if state.identity.is_invalid(key) {
                    slots.push(Slot::Invalid);
                } else if state.data.contains(key) {
                    slots.push(Slot::Known);
                } else {
                    if !to_load.contains(key) {
                        to_load.push(key.clone());
                    }
                    slots.push(Slot::Load);
                }
            }
        }

        if guard_sub_new && !to_load.is_empty() {
            let refused = self.keys_new_in_sub_chain(&to_load);
            if !refused.is_empty() {
                to_load.retain(|k| !refused.contains(k));
                for (slot, key) in slots.iter_mut().zip(keys) {
                    if refused.contains(key) {
                        *slot = Slot::Invalid;
                    }
                }
            }
        }

        if throw_on_not_found {
            if let Some(position) = slots.iter().position(|s| *s == Slot::Invalid) {
                return Err(CoreError::ObjectInvalid {
                    key: keys[position].clone(),
                });
            }
        }

        let misses = if to_load.is_empty() {
            Vec::new()
        } else {
            self.load_from_source(&to_load)?
        };
        if throw_on_not_found {
            if let Some((key, miss)) = misses.first() {
                return Err(match miss {
                    Miss::NotFound => CoreError::ObjectNotFound { key: key.clone() },
                    Miss::Unavailable => CoreError::ObjectInvalid { key: key.clone() },
                });
            }
        }

        let state = self.lock();
        let objects = keys
            .iter()
            .zip(slots)
            .map(|(key, slot)| match slot {
                Slot::Invalid => None,
                Slot::Known | Slot::Load => state
                    .data
                    .contains(key)
                    .then(|| state.identity.lookup(key).cloned())
                    .flatten(),
            })
            .collect();
        Ok((objects, misses))
    }

    /// Loads `keys` from the source and registers their containers.
    /// Returns the keys that could not be loaded, in input order.
    fn load_from_source(&self, keys: &[ObjectKey]) -> CoreResult<Vec<(ObjectKey, Miss)>> {
        for key in keys {
            self.get_or_create_reference(key)?;
        }
        self.extensions()
            .try_notify(|l| l.objects_loading(self, keys))?;

        let loaded = if let [key] = keys {
            vec![self.source_load_one(key)?]
        } else {
            self.source_load_many(keys)?
        };

        let mut found = Vec::new();
        let mut misses = Vec::new();
        {
            let mut state = self.lock();
            let mut loaded = loaded.into_iter();
            for key in keys {
                let miss = match loaded.next().unwrap_or(Fetched::NotFound) {
                    Fetched::Found(data) if &data.key == key => {
                        if !state.data.contains(key) {
                            state.data.insert(data.into_container());
                        }
                        if let Some(object) = state.identity.lookup(key) {
                            found.push(object.clone());
                        }
                        continue;
                    }
                    Fetched::Found(_) | Fetched::NotFound => Miss::NotFound,
                    Fetched::Unavailable => Miss::Unavailable,
                };
                state.identity.mark_invalid(key.clone());
                misses.push((key.clone(), miss));
            }
        }

        let missing: Vec<ObjectKey> = misses
            .iter()
            .filter(|(_, miss)| *miss == Miss::NotFound)
            .map(|(key, _)| key.clone())
            .collect();
        trace!(transaction = %self.id(), loaded = found.len(), missing = misses.len(), "objects loaded");
        if !found.is_empty() {
            self.extensions().notify(|l| l.objects_loaded(self, &found));
        }
        if missing.len() < misses.len() {
            debug!(transaction = %self.id(), count = misses.len() - missing.len(), "objects unavailable in parent");
        }
        if !missing.is_empty() {
            debug!(transaction = %self.id(), keys = ?missing, "objects not found");
            self.extensions()
                .notify(|l| l.objects_not_found(self, &missing));
        }
        Ok(misses)
    }

    /// Keys among `keys` that are new objects of an active subtransaction.
    fn keys_new_in_sub_chain(&self, keys: &[ObjectKey]) -> Vec<ObjectKey> {
        let mut refused = Vec::new();
        let mut next = self.sub_transaction();
        while let Some(sub) = next {
            {
                let state = sub.lock();
                refused.extend(
                    keys.iter()
                        .filter(|k| state.data.get(k).is_some_and(|c| c.is_new()))
                        .cloned(),
                );
            }
            next = sub.sub_transaction();
        }
        refused
    }

    /// Registers containers for related data loaded with a virtual
    /// end-point and returns the keys that are live in this transaction.
    fn register_related(&self, loaded: Vec<LoadedData>) -> CoreResult<Vec<ObjectKey>> {
        let keys: Vec<ObjectKey> = loaded.iter().map(|d| d.key.clone()).collect();
        let fresh: Vec<LoadedData> = {
            let state = self.lock();
            loaded
                .into_iter()
                .filter(|d| !state.data.contains(&d.key) && !state.identity.is_invalid(&d.key))
                .collect()
        };

        if !fresh.is_empty() {
            let fresh_keys: Vec<ObjectKey> = fresh.iter().map(|d| d.key.clone()).collect();
            for key in &fresh_keys {
                self.get_or_create_reference(key)?;
            }
            self.extensions()
                .try_notify(|l| l.objects_loading(self, &fresh_keys))?;
            let objects: Vec<DomainObject> = {
                let mut state = self.lock();
                let mut objects = Vec::with_capacity(fresh.len());
                for data in fresh {
                    let key = data.key.clone();
                    if !state.data.contains(&key) {
                        state.data.insert(data.into_container());
                    }
                    if let Some(object) = state.identity.lookup(&key) {
                        objects.push(object.clone());
                    }
                }
                objects
            };
            self.extensions()
                .notify(|l| l.objects_loaded(self, &objects));
        }

        let state = self.lock();
        Ok(keys
            .into_iter()
            .filter(|k| {
                !state.identity.is_invalid(k) && state.data.get(k).is_some_and(|c| !c.is_deleted())
            })
            .collect())
    }

    /// Makes the end-point `id` complete, loading its owner and, for
    /// virtual end-points, the related objects.
    ///
    /// A complete end-point is never reloaded.
    ///
    /// # Errors
    ///
    /// Fails if the owner cannot be loaded or the property is not a
    /// relation of the owner's class.
    pub fn ensure_end_point_complete(&self, id: &EndPointId) -> CoreResult<()> {
        self.ensure_readable()?;
        if self.lock().relations.is_complete(id) {
            return Ok(());
        }
        let definition = self.mapping().end_point(id.key.class(), &id.property)?;
        self.get_with_lazy_load(&id.key, true)?;
        if self.lock().relations.is_complete(id) {
            return Ok(());
        }

        let end_point = if definition.is_real() {
            let state = self.lock();
            let container = state
                .data
                .get(&id.key)
                .ok_or_else(|| CoreError::ObjectInvalid { key: id.key.clone() })?;
            let original = container.value(&id.property, ValueAccess::Original);
            let current = container.value(&id.property, ValueAccess::Current);
            RelationEndPoint::with_original(
                id.clone(),
                true,
                EndPointValue::Object(original.as_reference().cloned()),
                EndPointValue::Object(current.as_reference().cloned()),
            )
        } else {
            let loaded = self.source_load_related(definition, &id.key)?;
            let keys = self.register_related(loaded)?;
            let value = match definition.cardinality() {
                Cardinality::One => {
                    if keys.len() > 1 {
                        warn!(end_point = %id, count = keys.len(), "single-object end-point has several related objects");
                    }
                    EndPointValue::Object(keys.into_iter().next())
                }
                Cardinality::Many => EndPointValue::Collection(keys),
            };
            RelationEndPoint::new(id.clone(), false, value)
        };

        self.lock().relations.register(end_point);
        trace!(transaction = %self.id(), end_point = %id, "end-point completed");
        Ok(())
    }
}
