//! Relation end-point registry.

use super::endpoint::RelationEndPoint;
use crate::types::EndPointId;
use domstore_storage::ObjectKey;
use std::collections::HashMap;

/// All complete relation end-points of one transaction.
#[derive(Debug, Default)]
pub struct RelationEndPointRegistry {
    end_points: HashMap<EndPointId, RelationEndPoint>,
}

impl RelationEndPointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a complete end-point. An already registered end-point is
    /// kept and false is returned.
    pub fn register(&mut self, end_point: RelationEndPoint) -> bool {
        if self.end_points.contains_key(end_point.id()) {
            return false;
        }
        self.end_points.insert(end_point.id().clone(), end_point);
        true
    }

    /// Registers an end-point, replacing any existing one.
    pub fn replace(&mut self, end_point: RelationEndPoint) {
        self.end_points.insert(end_point.id().clone(), end_point);
    }

    /// Returns true if the end-point is registered and therefore complete.
    #[must_use]
    pub fn is_complete(&self, id: &EndPointId) -> bool {
        self.end_points.contains_key(id)
    }

    /// Returns the end-point.
    #[must_use]
    pub fn get(&self, id: &EndPointId) -> Option<&RelationEndPoint> {
        self.end_points.get(id)
    }

    /// Returns the end-point mutably.
    pub fn get_mut(&mut self, id: &EndPointId) -> Option<&mut RelationEndPoint> {
        self.end_points.get_mut(id)
    }

    /// Removes all end-points owned by `key`.
    pub fn remove_owned_by(&mut self, key: &ObjectKey) -> Vec<RelationEndPoint> {
        let ids: Vec<_> = self
            .end_points
            .keys()
            .filter(|id| &id.key == key)
            .cloned()
            .collect();
        ids.iter()
            .filter_map(|id| self.end_points.remove(id))
            .collect()
    }

    /// Returns the end-points owned by `key`.
    pub fn owned_by<'a>(&'a self, key: &'a ObjectKey) -> impl Iterator<Item = &'a RelationEndPoint> + 'a {
        self.end_points.values().filter(move |e| &e.id().key == key)
    }

    /// Returns true if any end-point owned by `key` has changed.
    #[must_use]
    pub fn has_changes_for(&self, key: &ObjectKey) -> bool {
        self.owned_by(key).any(RelationEndPoint::has_changed)
    }

    /// Returns all changed end-points.
    pub fn changed(&self) -> impl Iterator<Item = &RelationEndPoint> {
        self.end_points.values().filter(|e| e.has_changed())
    }

    /// Returns the end-points with `property` whose current contents
    /// include `key`.
    pub fn referencing<'a>(
        &'a self,
        property: &'a str,
        key: &'a ObjectKey,
    ) -> impl Iterator<Item = &'a RelationEndPoint> + 'a {
        self.end_points
            .values()
            .filter(move |e| &*e.id().property == property && e.current().contains(key))
    }

    /// Commits every end-point.
    pub fn commit_all(&mut self) {
        for end_point in self.end_points.values_mut() {
            end_point.commit();
        }
    }

    /// Rolls back every end-point.
    pub fn rollback_all(&mut self) {
        for end_point in self.end_points.values_mut() {
            end_point.rollback();
        }
    }

    /// Number of registered end-points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end_points.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::EndPointValue;
    use domstore_storage::{ClassId, StoreId};

    fn key(class: &str, v: i64) -> ObjectKey {
        ObjectKey::new(StoreId::new("s"), ClassId::new(class), v)
    }

    #[test]
    fn register_does_not_overwrite() {
        let mut registry = RelationEndPointRegistry::new();
        let id = EndPointId::new(key("Customer", 1), "orders");
        assert!(registry.register(RelationEndPoint::new(
            id.clone(),
            false,
            EndPointValue::Collection(vec![key("Order", 1)]),
        )));
        assert!(!registry.register(RelationEndPoint::new(
            id.clone(),
            false,
            EndPointValue::Collection(vec![]),
        )));
        assert_eq!(registry.get(&id).unwrap().current().keys().len(), 1);
    }

    #[test]
    fn remove_owned_by_only_touches_owner() {
        let mut registry = RelationEndPointRegistry::new();
        let order = key("Order", 1);
        registry.register(RelationEndPoint::new(
            EndPointId::new(order.clone(), "customer"),
            true,
            EndPointValue::Object(None),
        ));
        registry.register(RelationEndPoint::new(
            EndPointId::new(order.clone(), "items"),
            false,
            EndPointValue::Collection(vec![]),
        ));
        registry.register(RelationEndPoint::new(
            EndPointId::new(key("Customer", 1), "orders"),
            false,
            EndPointValue::Collection(vec![order.clone()]),
        ));

        assert_eq!(registry.remove_owned_by(&order).len(), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.referencing("orders", &order).count(), 1);
    }

    #[test]
    fn changes_tracked_per_owner() {
        let mut registry = RelationEndPointRegistry::new();
        let customer = key("Customer", 1);
        let id = EndPointId::new(customer.clone(), "orders");
        registry.register(RelationEndPoint::new(
            id.clone(),
            false,
            EndPointValue::Collection(vec![]),
        ));
        registry
            .get_mut(&id)
            .unwrap()
            .set_current(EndPointValue::Collection(vec![key("Order", 2)]));

        assert!(registry.has_changes_for(&customer));
        assert_eq!(registry.changed().count(), 1);
        registry.rollback_all();
        assert!(!registry.has_changes_for(&customer));
    }
}
