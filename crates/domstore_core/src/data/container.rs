//! Data containers.

use crate::types::{ObjectState, ValueAccess};
use domstore_storage::{LockToken, ObjectKey, PersistentRecord, PropertyMap, RecordChange, Value};

/// Persistence lifecycle of a container, independent of value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created in this transaction; not yet known to the data source.
    New,
    /// Loaded from the data source.
    Existing,
    /// Loaded, then deleted in this transaction.
    Deleted,
}

/// Property values of one object in one transaction.
///
/// A container keeps the values as loaded (`original`) and as modified
/// (`current`). The object is changed iff the two differ, so writing a value
/// back to its original makes the object unchanged again.
#[derive(Debug, Clone, PartialEq)]
pub struct DataContainer {
    key: ObjectKey,
    lifecycle: Lifecycle,
    original: PropertyMap,
    current: PropertyMap,
    lock_token: Option<LockToken>,
}

impl DataContainer {
    /// Creates the container of a new object.
    #[must_use]
    pub fn new_object(key: ObjectKey, values: PropertyMap) -> Self {
        Self {
            key,
            lifecycle: Lifecycle::New,
            original: values.clone(),
            current: values,
            lock_token: None,
        }
    }

    /// Creates the container of a loaded object.
    #[must_use]
    pub fn existing(key: ObjectKey, values: PropertyMap, lock_token: Option<LockToken>) -> Self {
        Self {
            key,
            lifecycle: Lifecycle::Existing,
            original: values.clone(),
            current: values,
            lock_token,
        }
    }

    /// Creates a container from a backend record.
    #[must_use]
    pub fn from_record(record: PersistentRecord) -> Self {
        Self::existing(record.key, record.properties, Some(record.lock_token))
    }

    /// The object's key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// The persistence lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns true if the object was created in this transaction.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.lifecycle == Lifecycle::New
    }

    /// Returns true if the object is deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.lifecycle == Lifecycle::Deleted
    }

    /// Returns true if any value differs from its original.
    #[must_use]
    pub fn has_value_changes(&self) -> bool {
        self.current != self.original
    }

    /// State derived from lifecycle and values.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        match self.lifecycle {
            Lifecycle::New => ObjectState::New,
            Lifecycle::Deleted => ObjectState::Deleted,
            Lifecycle::Existing if self.has_value_changes() => ObjectState::Changed,
            Lifecycle::Existing => ObjectState::Unchanged,
        }
    }

    /// The optimistic-lock token the object was loaded with.
    #[must_use]
    pub fn lock_token(&self) -> Option<LockToken> {
        self.lock_token
    }

    /// Replaces the lock token after a successful save.
    pub fn set_lock_token(&mut self, token: LockToken) {
        self.lock_token = Some(token);
    }

    /// Reads a value. Missing properties read as `Null`.
    #[must_use]
    pub fn value(&self, property: &str, access: ValueAccess) -> Value {
        let values = match access {
            ValueAccess::Current => &self.current,
            ValueAccess::Original => &self.original,
        };
        values.get(property).cloned().unwrap_or(Value::Null)
    }

    /// Writes a current value.
    pub fn set_value(&mut self, property: &str, value: Value) {
        self.current.insert(property.to_owned(), value);
    }

    /// The current values.
    #[must_use]
    pub fn current_values(&self) -> &PropertyMap {
        &self.current
    }

    /// The original values.
    #[must_use]
    pub fn original_values(&self) -> &PropertyMap {
        &self.original
    }

    /// Marks the container deleted.
    pub fn mark_deleted(&mut self) {
        self.lifecycle = Lifecycle::Deleted;
    }

    /// Replaces the current values, keeping the lifecycle.
    pub fn replace_current(&mut self, values: PropertyMap) {
        self.current = values;
    }

    /// Makes the current values the new originals.
    pub fn commit(&mut self) {
        self.original = self.current.clone();
        if self.lifecycle == Lifecycle::New {
            self.lifecycle = Lifecycle::Existing;
        }
    }

    /// Restores the original values and undoes a delete.
    pub fn rollback(&mut self) {
        self.current = self.original.clone();
        if self.lifecycle == Lifecycle::Deleted {
            self.lifecycle = Lifecycle::Existing;
        }
    }

    /// Returns the backend change persisting this container, if any.
    ///
    /// Unchanged containers and containers without a lock token (data that
    /// did not come from the backend) produce no update or delete.
    #[must_use]
    pub fn record_change(&self) -> Option<RecordChange> {
        match (self.lifecycle, self.lock_token) {
            (Lifecycle::New, _) => Some(RecordChange::Insert {
                key: self.key.clone(),
                properties: self.current.clone(),
            }),
            (Lifecycle::Deleted, Some(expected)) => Some(RecordChange::Delete {
                key: self.key.clone(),
                expected,
            }),
            (Lifecycle::Existing, Some(expected)) if self.has_value_changes() => {
                Some(RecordChange::Update {
                    key: self.key.clone(),
                    properties: self.current.clone(),
                    expected,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domstore_storage::{ClassId, StoreId};

    fn key() -> ObjectKey {
        ObjectKey::new(StoreId::new("s"), ClassId::new("Order"), 1_i64)
    }

    fn values(number: i64) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("number".into(), Value::Int(number));
        map
    }

    #[test]
    fn writing_back_original_is_unchanged() {
        let mut container = DataContainer::existing(key(), values(1), Some(LockToken::new(1)));
        container.set_value("number", Value::Int(2));
        assert_eq!(container.state(), ObjectState::Changed);

        container.set_value("number", Value::Int(1));
        assert_eq!(container.state(), ObjectState::Unchanged);
        assert!(container.record_change().is_none());
    }

    #[test]
    fn rollback_restores_values_and_undeletes() {
        let mut container = DataContainer::existing(key(), values(1), Some(LockToken::new(1)));
        container.set_value("number", Value::Int(5));
        container.mark_deleted();
        container.rollback();

        assert_eq!(container.state(), ObjectState::Unchanged);
        assert_eq!(container.value("number", ValueAccess::Current), Value::Int(1));
    }

    #[test]
    fn commit_turns_new_into_existing() {
        let mut container = DataContainer::new_object(key(), values(0));
        assert!(matches!(container.record_change(), Some(RecordChange::Insert { .. })));

        container.set_value("number", Value::Int(3));
        container.commit();
        assert_eq!(container.state(), ObjectState::Unchanged);
        assert_eq!(container.value("number", ValueAccess::Original), Value::Int(3));
    }

    #[test]
    fn record_change_variants() {
        let mut container = DataContainer::existing(key(), values(1), Some(LockToken::new(7)));
        container.set_value("number", Value::Int(2));
        match container.record_change() {
            Some(RecordChange::Update { expected, .. }) => assert_eq!(expected, LockToken::new(7)),
            other => panic!("unexpected {other:?}"),
        }

        container.mark_deleted();
        assert!(matches!(container.record_change(), Some(RecordChange::Delete { .. })));
    }

    #[test]
    fn missing_property_reads_null() {
        let container = DataContainer::new_object(key(), PropertyMap::new());
        assert_eq!(container.value("nope", ValueAccess::Current), Value::Null);
    }
}
