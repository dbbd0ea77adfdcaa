//! In-memory persistence backend.

use crate::backend::PersistenceBackend;
use crate::error::{StorageError, StorageResult};
use crate::key::{ClassId, ObjectKey, StoreId};
use crate::record::{LockToken, PersistentRecord, PropertyMap, RecordChange, RelationQuery};
use crate::stats::{BackendStats, StatsSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct StoredRecord {
    properties: PropertyMap,
    token: LockToken,
}

/// An in-memory persistence backend.
///
/// This backend keeps all records in a map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need durability
///
/// It enforces the same contract a real backend must: atomic saves,
/// optimistic lock tokens, duplicate-key detection and sorted relation
/// queries. Test helpers simulate concurrent writers
/// ([`InMemoryBackend::touch`]) and backend failures
/// ([`InMemoryBackend::fail_next_save`]).
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use domstore_storage::{ClassId, InMemoryBackend, PersistenceBackend, PropertyMap};
///
/// let backend = InMemoryBackend::new();
/// let key = backend.seed(&ClassId::new("Order"), PropertyMap::new());
/// assert!(backend.load_one(&key).unwrap().is_some());
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryBackend {
    store: StoreId,
    records: RwLock<HashMap<ObjectKey, StoredRecord>>,
    next_token: AtomicU64,
    stats: BackendStats,
    fail_next_save: Mutex<Option<StorageError>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::with_store(StoreId::new("memory"))
    }
}

impl InMemoryBackend {
    /// Creates a new empty backend with the store id `memory`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty backend issuing keys for `store`.
    #[must_use]
    pub fn with_store(store: StoreId) -> Self {
        Self {
            store,
            records: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            stats: BackendStats::new(),
            fail_next_save: Mutex::new(None),
        }
    }

    /// Returns the store id stamped on issued keys.
    #[must_use]
    pub fn store_id(&self) -> &StoreId {
        &self.store
    }

    fn next_token(&self) -> LockToken {
        LockToken::new(self.next_token.fetch_add(1, Ordering::SeqCst))
    }

    /// Stores a record under a fresh key, bypassing statistics.
    ///
    /// Useful for seeding test data.
    pub fn seed(&self, class: &ClassId, properties: PropertyMap) -> ObjectKey {
        let key = ObjectKey::new_uuid(self.store.clone(), class.clone());
        self.seed_with_key(key.clone(), properties);
        key
    }

    /// Stores (or replaces) a record under `key`, bypassing statistics.
    pub fn seed_with_key(&self, key: ObjectKey, properties: PropertyMap) {
        let token = self.next_token();
        self.records
            .write()
            .insert(key, StoredRecord { properties, token });
    }

    /// Returns the stored record for `key`, bypassing statistics.
    #[must_use]
    pub fn record(&self, key: &ObjectKey) -> Option<PersistentRecord> {
        self.records.read().get(key).map(|stored| PersistentRecord {
            key: key.clone(),
            properties: stored.properties.clone(),
            lock_token: stored.token,
        })
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Simulates a concurrent writer by issuing a new lock token for `key`.
    ///
    /// Returns false if the record does not exist.
    pub fn touch(&self, key: &ObjectKey) -> bool {
        let token = self.next_token();
        match self.records.write().get_mut(key) {
            Some(stored) => {
                stored.token = token;
                true
            }
            None => false,
        }
    }

    /// Simulates a concurrent delete of `key`.
    pub fn remove(&self, key: &ObjectKey) -> bool {
        self.records.write().remove(key).is_some()
    }

    /// Makes the next call to `save` fail with `error` without applying anything.
    pub fn fail_next_save(&self, error: StorageError) {
        *self.fail_next_save.lock() = Some(error);
    }

    /// Returns a snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resets the call counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn to_record(key: &ObjectKey, stored: &StoredRecord) -> PersistentRecord {
        PersistentRecord {
            key: key.clone(),
            properties: stored.properties.clone(),
            lock_token: stored.token,
        }
    }

    fn validate(
        &self,
        records: &HashMap<ObjectKey, StoredRecord>,
        changes: &[RecordChange],
    ) -> StorageResult<()> {
        let mut stale = Vec::new();
        let mut inserted = HashSet::new();
        for change in changes {
            let key = change.key();
            if key.store() != &self.store {
                return Err(StorageError::ForeignStore {
                    key: key.clone(),
                    store: self.store.to_string(),
                });
            }
            match change {
                RecordChange::Insert { key, .. } => {
                    if records.contains_key(key) || !inserted.insert(key.clone()) {
                        return Err(StorageError::DuplicateKey(key.clone()));
                    }
                }
                RecordChange::Update { key, expected, .. }
                | RecordChange::Delete { key, expected } => match records.get(key) {
                    Some(stored) if stored.token == *expected => {}
                    _ => stale.push(key.clone()),
                },
            }
        }
        if stale.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Concurrency { keys: stale })
        }
    }
}

impl PersistenceBackend for InMemoryBackend {
    fn new_object_key(&self, class: &ClassId) -> StorageResult<ObjectKey> {
        self.stats.record_new_key();
        Ok(ObjectKey::new_uuid(self.store.clone(), class.clone()))
    }

    fn load_one(&self, key: &ObjectKey) -> StorageResult<Option<PersistentRecord>> {
        let record = self
            .records
            .read()
            .get(key)
            .map(|stored| Self::to_record(key, stored));
        self.stats.record_load_one(u64::from(record.is_some()));
        Ok(record)
    }

    fn load_many(&self, keys: &[ObjectKey]) -> StorageResult<Vec<Option<PersistentRecord>>> {
        let records = self.records.read();
        let result: Vec<_> = keys
            .iter()
            .map(|key| records.get(key).map(|stored| Self::to_record(key, stored)))
            .collect();
        let loaded = result.iter().filter(|r| r.is_some()).count() as u64;
        self.stats.record_load_many(loaded);
        Ok(result)
    }

    fn load_related(&self, query: &RelationQuery) -> StorageResult<Vec<PersistentRecord>> {
        let mut result: Vec<_> = self
            .records
            .read()
            .iter()
            .map(|(key, stored)| Self::to_record(key, stored))
            .filter(|record| query.matches(record))
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(sort) = &query.sort {
            result.sort_by(|a, b| sort.compare(&a.properties, &b.properties));
        }
        self.stats.record_load_related(result.len() as u64);
        Ok(result)
    }

    fn load_class(&self, class: &ClassId) -> StorageResult<Vec<PersistentRecord>> {
        let mut result: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|(key, _)| key.class() == class)
            .map(|(key, stored)| Self::to_record(key, stored))
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        self.stats.record_load_class(result.len() as u64);
        Ok(result)
    }

    fn save(&self, changes: &[RecordChange]) -> StorageResult<()> {
        self.stats.record_save_attempt();
        if let Some(error) = self.fail_next_save.lock().take() {
            return Err(error);
        }

        let mut records = self.records.write();
        self.validate(&records, changes)?;

        for change in changes {
            match change {
                RecordChange::Insert { key, properties }
                | RecordChange::Update {
                    key, properties, ..
                } => {
                    let token = self.next_token();
                    records.insert(
                        key.clone(),
                        StoredRecord {
                            properties: properties.clone(),
                            token,
                        },
                    );
                }
                RecordChange::Delete { key, .. } => {
                    records.remove(key);
                }
            }
        }
        self.stats.record_saved(changes.len() as u64);
        Ok(())
    }

    fn refresh_lock_tokens(&self, keys: &[ObjectKey]) -> StorageResult<Vec<(ObjectKey, LockToken)>> {
        self.stats.record_refresh();
        let records = self.records.read();
        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).map(|stored| (key.clone(), stored.token)))
            .collect())
    }
}
