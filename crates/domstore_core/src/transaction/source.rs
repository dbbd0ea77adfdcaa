//! Where a transaction's data comes from.
//!
//! A root transaction loads from the persistence backend. A subtransaction
//! loads from its parent, which serves the current values of its own data
//! containers (loading them from its own source first if needed).

use super::loading::Miss;
use super::ClientTransaction;
use crate::data::DataContainer;
use crate::error::CoreResult;
use crate::mapping::RelationEndPointDefinition;
use crate::types::EndPointId;
use domstore_storage::{ClassId, LockToken, ObjectKey, PersistenceBackend, PersistentRecord, PropertyMap};
use std::sync::Arc;

/// Data of one object as delivered by a transaction's source.
#[derive(Debug, Clone)]
pub(crate) struct LoadedData {
    pub(crate) key: ObjectKey,
    pub(crate) properties: PropertyMap,
    pub(crate) lock_token: Option<LockToken>,
}

impl From<PersistentRecord> for LoadedData {
    fn from(record: PersistentRecord) -> Self {
        Self {
            key: record.key,
            properties: record.properties,
            lock_token: Some(record.lock_token),
        }
    }
}

impl LoadedData {
    pub(crate) fn into_container(self) -> DataContainer {
        DataContainer::existing(self.key, self.properties, self.lock_token)
    }
}

/// Outcome of loading one key from a transaction's source.
#[derive(Debug, Clone)]
pub(crate) enum Fetched {
    Found(LoadedData),
    /// The source has no data for the key.
    NotFound,
    /// The parent knows the key but has deleted or invalidated it.
    Unavailable,
}

impl Fetched {
    fn from_record(record: Option<PersistentRecord>) -> Self {
        record.map_or(Self::NotFound, |r| Self::Found(r.into()))
    }

    pub(crate) fn found(self) -> Option<LoadedData> {
        match self {
            Self::Found(data) => Some(data),
            Self::NotFound | Self::Unavailable => None,
        }
    }
}

impl ClientTransaction {
    pub(crate) fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.context().backend
    }

    pub(super) fn source_load_one(&self, key: &ObjectKey) -> CoreResult<Fetched> {
        match self.parent() {
            None => Ok(Fetched::from_record(self.backend().load_one(key)?)),
            Some(parent) => Ok(parent
                .data_for_sub(std::slice::from_ref(key))?
                .pop()
                .unwrap_or(Fetched::NotFound)),
        }
    }

    pub(super) fn source_load_many(&self, keys: &[ObjectKey]) -> CoreResult<Vec<Fetched>> {
        match self.parent() {
            None => Ok(self
                .backend()
                .load_many(keys)?
                .into_iter()
                .map(Fetched::from_record)
                .collect()),
            Some(parent) => parent.data_for_sub(keys),
        }
    }

    /// Loads the objects on the other side of the virtual end-point
    /// `definition` of `owner`.
    pub(super) fn source_load_related(
        &self,
        definition: &RelationEndPointDefinition,
        owner: &ObjectKey,
    ) -> CoreResult<Vec<LoadedData>> {
        match self.parent() {
            None => {
                let Some(query) = definition.relation_query(owner) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .backend()
                    .load_related(&query)?
                    .into_iter()
                    .map(LoadedData::from)
                    .collect())
            }
            Some(parent) => {
                let id = EndPointId::new(owner.clone(), definition.property());
                parent.ensure_end_point_complete(&id)?;
                let keys = parent
                    .lock()
                    .relations
                    .get(&id)
                    .map(|e| e.current().keys())
                    .unwrap_or_default();
                Ok(parent
                    .data_for_sub(&keys)?
                    .into_iter()
                    .filter_map(Fetched::found)
                    .collect())
            }
        }
    }

    /// Persisted records of a class, read from the root's backend.
    pub(super) fn source_records(&self, class: &ClassId) -> CoreResult<Vec<PersistentRecord>> {
        Ok(self.backend().load_class(class)?)
    }

    /// Serves a subtransaction's load request from this transaction's
    /// containers.
    ///
    /// Keys this transaction had already deleted or invalidated are
    /// [`Fetched::Unavailable`]; keys its own source lacks are
    /// [`Fetched::NotFound`].
    fn data_for_sub(&self, keys: &[ObjectKey]) -> CoreResult<Vec<Fetched>> {
        self.ensure_readable()?;
        let known_invalid: Vec<bool> = {
            let state = self.lock();
            keys.iter().map(|k| state.identity.is_invalid(k)).collect()
        };
        let (_, misses) = self.load_keys_reporting(keys, false, false)?;
        let state = self.lock();
        Ok(keys
            .iter()
            .zip(known_invalid)
            .map(|(key, was_invalid)| match state.data.get(key) {
                Some(container) if container.is_deleted() => Fetched::Unavailable,
                Some(container) => Fetched::Found(LoadedData {
                    key: key.clone(),
                    properties: container.current_values().clone(),
                    lock_token: None,
                }),
                None if was_invalid => Fetched::Unavailable,
                None => match misses.iter().find(|(k, _)| k == key) {
                    Some((_, Miss::Unavailable)) => Fetched::Unavailable,
                    _ => Fetched::NotFound,
                },
            })
            .collect())
    }
}
