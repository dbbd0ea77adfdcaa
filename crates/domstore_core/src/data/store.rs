//! Data container store.

use super::container::DataContainer;
use crate::types::ObjectState;
use domstore_storage::ObjectKey;
use std::collections::HashMap;

/// All data containers of one transaction.
///
/// Containers are kept in registration order, which is the order of the
/// commit set handed to listeners and to the backend.
#[derive(Debug, Default)]
pub struct DataContainerStore {
    containers: HashMap<ObjectKey, (u64, DataContainer)>,
    next_seq: u64,
}

impl DataContainerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container. An existing container for the key keeps its
    /// position.
    pub fn insert(&mut self, container: DataContainer) {
        let seq = match self.containers.get(container.key()) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.containers
            .insert(container.key().clone(), (seq, container));
    }

    /// Returns the container for `key`.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<&DataContainer> {
        self.containers.get(key).map(|(_, c)| c)
    }

    /// Returns the container for `key` mutably.
    pub fn get_mut(&mut self, key: &ObjectKey) -> Option<&mut DataContainer> {
        self.containers.get_mut(key).map(|(_, c)| c)
    }

    /// Returns true if a container exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.containers.contains_key(key)
    }

    /// Removes and returns the container for `key`.
    pub fn remove(&mut self, key: &ObjectKey) -> Option<DataContainer> {
        self.containers.remove(key).map(|(_, c)| c)
    }

    /// All containers in registration order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&DataContainer> {
        let mut entries: Vec<_> = self.containers.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, c)| c).collect()
    }

    /// Keys of containers whose state is not `Unchanged`, in registration order.
    #[must_use]
    pub fn changed_keys(&self) -> Vec<ObjectKey> {
        self.ordered()
            .into_iter()
            .filter(|c| c.state() != ObjectState::Unchanged)
            .map(|c| c.key().clone())
            .collect()
    }

    /// Applies `f` to every container.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut DataContainer)) {
        for (_, container) in self.containers.values_mut() {
            f(container);
        }
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domstore_storage::{ClassId, PropertyMap, StoreId, Value};

    fn key(v: i64) -> ObjectKey {
        ObjectKey::new(StoreId::new("s"), ClassId::new("Order"), v)
    }

    #[test]
    fn ordered_follows_registration() {
        let mut store = DataContainerStore::new();
        for v in [3, 1, 2] {
            store.insert(DataContainer::existing(key(v), PropertyMap::new(), None));
        }
        let keys: Vec<_> = store.ordered().iter().map(|c| c.key().clone()).collect();
        assert_eq!(keys, vec![key(3), key(1), key(2)]);
    }

    #[test]
    fn reinsert_keeps_position() {
        let mut store = DataContainerStore::new();
        store.insert(DataContainer::existing(key(1), PropertyMap::new(), None));
        store.insert(DataContainer::existing(key(2), PropertyMap::new(), None));
        store.insert(DataContainer::new_object(key(1), PropertyMap::new()));

        assert_eq!(store.ordered()[0].key(), &key(1));
        assert_eq!(store.changed_keys(), vec![key(1)]);
    }

    #[test]
    fn changed_keys_skip_unchanged() {
        let mut store = DataContainerStore::new();
        store.insert(DataContainer::existing(key(1), PropertyMap::new(), None));
        store.insert(DataContainer::existing(key(2), PropertyMap::new(), None));
        store
            .get_mut(&key(2))
            .unwrap()
            .set_value("number", Value::Int(1));

        assert_eq!(store.changed_keys(), vec![key(2)]);
        assert!(store.remove(&key(2)).is_some());
        assert!(store.changed_keys().is_empty());
    }
}
