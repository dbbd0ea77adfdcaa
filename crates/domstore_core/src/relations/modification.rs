//! Planning of bidirectional relation changes.
//!
//! A relation change touches up to four end-points (the owner, the old and
//! new related objects, and an object displaced from a one-to-one relation).
//! [`RelationPlanner`] works on a scratch copy of every end-point it touches,
//! validating each step, and only yields the resulting
//! [`EndPointChange`]s once the whole operation is known to be valid. The
//! caller applies them as one unit, so a failure never leaves one side of a
//! relation updated without the other.

use super::endpoint::EndPointValue;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{Cardinality, ClassDefinition, MappingConfiguration, RelationEndPointDefinition};
use crate::types::EndPointId;
use domstore_storage::ObjectKey;
use std::collections::HashMap;

/// Access to the end-points of the transaction a plan is made for.
pub(crate) trait EndPointLookup {
    /// Completes the end-point and returns its current contents, or `None`
    /// if its owner does not exist in the transaction.
    fn complete_value(&self, id: &EndPointId) -> CoreResult<Option<EndPointValue>>;

    /// Fails unless `key` is a live (loadable, not deleted) object.
    fn check_live(&self, key: &ObjectKey) -> CoreResult<()>;
}

/// The net change of one end-point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndPointChange {
    /// The end-point.
    pub id: EndPointId,
    /// Whether the end-point stores a foreign key.
    pub is_real: bool,
    /// Contents before the operation.
    pub old: EndPointValue,
    /// Contents after the operation.
    pub new: EndPointValue,
}

impl EndPointChange {
    /// The (old, new) pairs reported to relation listeners.
    ///
    /// Single-object end-points report one pair. Collections report a
    /// replacement as one pair and otherwise one pair per removed and per
    /// added member; order-only changes report nothing.
    #[must_use]
    pub fn events(&self) -> Vec<(Option<ObjectKey>, Option<ObjectKey>)> {
        match (&self.old, &self.new) {
            (EndPointValue::Object(old), EndPointValue::Object(new)) => {
                vec![(old.clone(), new.clone())]
            }
            (EndPointValue::Collection(old), EndPointValue::Collection(new)) => {
                let removed: Vec<_> = old.iter().filter(|k| !new.contains(k)).cloned().collect();
                let added: Vec<_> = new.iter().filter(|k| !old.contains(k)).cloned().collect();
                if removed.len() == 1 && added.len() == 1 {
                    return vec![(Some(removed[0].clone()), Some(added[0].clone()))];
                }
                removed
                    .into_iter()
                    .map(|k| (Some(k), None))
                    .chain(added.into_iter().map(|k| (None, Some(k))))
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Computes the end-point changes of a relation operation.
pub(crate) struct RelationPlanner<'a, L: EndPointLookup> {
    lookup: &'a L,
    mapping: &'a MappingConfiguration,
    order: Vec<EndPointId>,
    start: HashMap<EndPointId, (bool, EndPointValue)>,
    overlay: HashMap<EndPointId, EndPointValue>,
}

impl<'a, L: EndPointLookup> RelationPlanner<'a, L> {
    pub(crate) fn new(lookup: &'a L, mapping: &'a MappingConfiguration) -> Self {
        Self {
            lookup,
            mapping,
            order: Vec::new(),
            start: HashMap::new(),
            overlay: HashMap::new(),
        }
    }

    fn view(&mut self, id: &EndPointId, definition: &RelationEndPointDefinition) -> CoreResult<Option<EndPointValue>> {
        if let Some(value) = self.overlay.get(id) {
            return Ok(Some(value.clone()));
        }
        let Some(value) = self.lookup.complete_value(id)? else {
            return Ok(None);
        };
        self.order.push(id.clone());
        self.start
            .insert(id.clone(), (definition.is_real(), value.clone()));
        self.overlay.insert(id.clone(), value.clone());
        Ok(Some(value))
    }

    fn write(&mut self, id: EndPointId, value: EndPointValue) {
        self.overlay.insert(id, value);
    }

    fn opposite(&self, definition: &RelationEndPointDefinition) -> CoreResult<&'a RelationEndPointDefinition> {
        self.mapping.opposite(definition).ok_or_else(|| {
            CoreError::invalid_mapping(format!(
                "{}.{} has no opposite end-point",
                definition.class(),
                definition.property()
            ))
        })
    }

    fn check_class(definition: &RelationEndPointDefinition, key: &ObjectKey) -> CoreResult<()> {
        if key.class() != definition.opposite_class() {
            return Err(CoreError::invalid_value(
                definition.class(),
                definition.property(),
                format!("expected {}, got {}", definition.opposite_class(), key.class()),
            ));
        }
        Ok(())
    }

    /// Points the real end-point `owner.definition` at `new`, updating the
    /// opposite end-points of the old and new related objects.
    pub(crate) fn set_real(
        &mut self,
        owner: &ObjectKey,
        definition: &'a RelationEndPointDefinition,
        new: Option<ObjectKey>,
    ) -> CoreResult<()> {
        let id = EndPointId::new(owner.clone(), definition.property());
        let old = match self.view(&id, definition)? {
            Some(value) => value.as_object().cloned(),
            None => return Err(CoreError::ObjectInvalid { key: owner.clone() }),
        };
        if old == new {
            return Ok(());
        }
        if let Some(target) = &new {
            Self::check_class(definition, target)?;
            self.lookup.check_live(target)?;
        }
        self.write(id, EndPointValue::Object(new.clone()));

        let Some(opposite) = self.mapping.opposite(definition) else {
            return Ok(());
        };

        if let Some(old_owner) = old {
            let old_id = EndPointId::new(old_owner, opposite.property());
            if let Some(mut value) = self.view(&old_id, opposite)? {
                value.remove(owner);
                self.write(old_id, value);
            }
        }

        if let Some(new_owner) = new {
            let new_id = EndPointId::new(new_owner, opposite.property());
            match self.view(&new_id, opposite)? {
                Some(EndPointValue::Collection(mut keys)) => {
                    if !keys.contains(owner) {
                        keys.push(owner.clone());
                    }
                    self.write(new_id, EndPointValue::Collection(keys));
                }
                Some(EndPointValue::Object(displaced)) => {
                    if let Some(displaced) = displaced.filter(|d| d != owner) {
                        self.set_real(&displaced, definition, None)?;
                    }
                    self.write(new_id, EndPointValue::Object(Some(owner.clone())));
                }
                None => {
                    return Err(CoreError::ObjectInvalid {
                        key: new_id.key.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Sets the virtual single-object end-point `owner.definition` to `new`.
    pub(crate) fn set_virtual(
        &mut self,
        owner: &ObjectKey,
        definition: &'a RelationEndPointDefinition,
        new: Option<ObjectKey>,
    ) -> CoreResult<()> {
        let id = EndPointId::new(owner.clone(), definition.property());
        let old = self
            .view(&id, definition)?
            .ok_or_else(|| CoreError::ObjectInvalid { key: owner.clone() })?
            .as_object()
            .cloned();
        if old == new {
            return Ok(());
        }
        if let Some(target) = &new {
            Self::check_class(definition, target)?;
        }
        let opposite = self.opposite(definition)?;
        if let Some(old) = old {
            self.set_real(&old, opposite, None)?;
        }
        if let Some(new) = new {
            self.set_real(&new, opposite, Some(owner.clone()))?;
        }
        Ok(())
    }

    fn collection(&mut self, owner: &ObjectKey, definition: &'a RelationEndPointDefinition) -> CoreResult<Vec<ObjectKey>> {
        let id = EndPointId::new(owner.clone(), definition.property());
        match self.view(&id, definition)? {
            Some(EndPointValue::Collection(keys)) => Ok(keys),
            Some(EndPointValue::Object(_)) => Err(CoreError::invalid_operation(format!(
                "{}.{} is not a collection",
                definition.class(),
                definition.property()
            ))),
            None => Err(CoreError::ObjectInvalid { key: owner.clone() }),
        }
    }

    /// Inserts `item` into the collection `owner.definition` at `index`.
    pub(crate) fn insert(
        &mut self,
        owner: &ObjectKey,
        definition: &'a RelationEndPointDefinition,
        index: usize,
        item: &ObjectKey,
    ) -> CoreResult<()> {
        Self::check_class(definition, item)?;
        let keys = self.collection(owner, definition)?;
        if keys.contains(item) {
            return Err(CoreError::invalid_operation(format!(
                "{item} is already in {}.{}",
                owner,
                definition.property()
            )));
        }
        if index > keys.len() {
            return Err(CoreError::invalid_operation(format!(
                "index {index} out of range for collection of {}",
                keys.len()
            )));
        }
        let opposite = self.opposite(definition)?;
        self.set_real(item, opposite, Some(owner.clone()))?;

        let mut keys = self.collection(owner, definition)?;
        keys.retain(|k| k != item);
        keys.insert(index.min(keys.len()), item.clone());
        self.write(
            EndPointId::new(owner.clone(), definition.property()),
            EndPointValue::Collection(keys),
        );
        Ok(())
    }

    /// Removes `item` from the collection `owner.definition`. Returns false
    /// if it was not a member.
    pub(crate) fn remove(
        &mut self,
        owner: &ObjectKey,
        definition: &'a RelationEndPointDefinition,
        item: &ObjectKey,
    ) -> CoreResult<bool> {
        let keys = self.collection(owner, definition)?;
        if !keys.contains(item) {
            return Ok(false);
        }
        let opposite = self.opposite(definition)?;
        self.set_real(item, opposite, None)?;
        Ok(true)
    }

    /// Replaces the member at `index` of the collection `owner.definition`.
    pub(crate) fn replace(
        &mut self,
        owner: &ObjectKey,
        definition: &'a RelationEndPointDefinition,
        index: usize,
        item: &ObjectKey,
    ) -> CoreResult<()> {
        let keys = self.collection(owner, definition)?;
        let Some(old) = keys.get(index).cloned() else {
            return Err(CoreError::invalid_operation(format!(
                "index {index} out of range for collection of {}",
                keys.len()
            )));
        };
        if &old == item {
            return Ok(());
        }
        let opposite = self.opposite(definition)?;
        Self::check_class(definition, item)?;
        if keys.contains(item) {
            return Err(CoreError::invalid_operation(format!(
                "{item} is already in {}.{}",
                owner,
                definition.property()
            )));
        }
        self.set_real(&old, opposite, None)?;
        self.insert(owner, definition, index, item)
    }

    /// Detaches `owner` from every relation of its class.
    pub(crate) fn detach_all(&mut self, owner: &ObjectKey, class: &'a ClassDefinition) -> CoreResult<()> {
        for definition in class.relations() {
            if definition.is_real() {
                self.set_real(owner, definition, None)?;
                continue;
            }
            let opposite = self.opposite(definition)?;
            let id = EndPointId::new(owner.clone(), definition.property());
            let related = self
                .view(&id, definition)?
                .map(|v| v.keys())
                .unwrap_or_default();
            for key in related {
                self.set_real(&key, opposite, None)?;
            }
            if definition.cardinality() == Cardinality::Many {
                self.write(id, EndPointValue::Collection(Vec::new()));
            }
        }
        Ok(())
    }

    /// Returns the net changes in the order end-points were first touched.
    pub(crate) fn finish(mut self) -> Vec<EndPointChange> {
        self.order
            .into_iter()
            .filter_map(|id| {
                let (is_real, old) = self.start.remove(&id)?;
                let new = self.overlay.remove(&id)?;
                (old != new).then_some(EndPointChange {
                    id,
                    is_real,
                    old,
                    new,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingBuilder;
    use domstore_storage::{ClassId, StoreId, ValueKind};
    use parking_lot::Mutex;

    /// End-points held in a plain map; every key is live.
    struct MapLookup {
        values: Mutex<HashMap<EndPointId, EndPointValue>>,
    }

    impl EndPointLookup for MapLookup {
        fn complete_value(&self, id: &EndPointId) -> CoreResult<Option<EndPointValue>> {
            Ok(self.values.lock().get(id).cloned())
        }

        fn check_live(&self, _key: &ObjectKey) -> CoreResult<()> {
            Ok(())
        }
    }

    fn mapping() -> MappingConfiguration {
        let mut builder = MappingBuilder::new();
        builder.add_class("Customer").property("name", ValueKind::Text).done().unwrap();
        builder.add_class("Order").done().unwrap();
        builder.add_class("Invoice").done().unwrap();
        builder
            .add_one_to_many("Customer", "orders", "Order", "customer")
            .done();
        builder
            .add_one_to_one("Order", "invoice", "Invoice", "order")
            .done();
        builder.build().unwrap()
    }

    fn key(class: &str, v: i64) -> ObjectKey {
        ObjectKey::new(StoreId::new("s"), ClassId::new(class), v)
    }

    fn ep(class: &str, v: i64, property: &str) -> EndPointId {
        EndPointId::new(key(class, v), property)
    }

    fn lookup(entries: Vec<(EndPointId, EndPointValue)>) -> MapLookup {
        MapLookup {
            values: Mutex::new(entries.into_iter().collect()),
        }
    }

    #[test]
    fn moving_order_between_customers_touches_three_end_points() {
        let mapping = mapping();
        let lookup = lookup(vec![
            (ep("Order", 1, "customer"), EndPointValue::Object(Some(key("Customer", 1)))),
            (ep("Customer", 1, "orders"), EndPointValue::Collection(vec![key("Order", 1)])),
            (ep("Customer", 2, "orders"), EndPointValue::Collection(vec![])),
        ]);
        let definition = mapping.end_point(&ClassId::new("Order"), "customer").unwrap();

        let mut planner = RelationPlanner::new(&lookup, &mapping);
        planner
            .set_real(&key("Order", 1), definition, Some(key("Customer", 2)))
            .unwrap();
        let changes = planner.finish();

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].id, ep("Order", 1, "customer"));
        assert!(changes[0].is_real);
        assert_eq!(changes[1].new, EndPointValue::Collection(vec![]));
        assert_eq!(changes[2].new, EndPointValue::Collection(vec![key("Order", 1)]));
    }

    #[test]
    fn one_to_one_displaces_previous_holder() {
        let mapping = mapping();
        let lookup = lookup(vec![
            (ep("Order", 1, "invoice"), EndPointValue::Object(Some(key("Invoice", 1)))),
            (ep("Invoice", 1, "order"), EndPointValue::Object(Some(key("Order", 1)))),
            (ep("Invoice", 2, "order"), EndPointValue::Object(None)),
        ]);
        let definition = mapping.end_point(&ClassId::new("Order"), "invoice").unwrap();

        let mut planner = RelationPlanner::new(&lookup, &mapping);
        planner
            .set_virtual(&key("Order", 1), definition, Some(key("Invoice", 2)))
            .unwrap();
        let changes = planner.finish();

        let find = |id: &EndPointId| changes.iter().find(|c| &c.id == id).unwrap().new.clone();
        assert_eq!(find(&ep("Invoice", 1, "order")), EndPointValue::Object(None));
        assert_eq!(
            find(&ep("Invoice", 2, "order")),
            EndPointValue::Object(Some(key("Order", 1)))
        );
        assert_eq!(
            find(&ep("Order", 1, "invoice")),
            EndPointValue::Object(Some(key("Invoice", 2)))
        );
        // The virtual end-point changed once in net terms.
        assert_eq!(
            changes
                .iter()
                .filter(|c| c.id == ep("Order", 1, "invoice"))
                .count(),
            1
        );
    }

    #[test]
    fn insert_duplicate_is_rejected_before_any_change() {
        let mapping = mapping();
        let lookup = lookup(vec![
            (ep("Customer", 1, "orders"), EndPointValue::Collection(vec![key("Order", 1)])),
            (ep("Order", 1, "customer"), EndPointValue::Object(Some(key("Customer", 1)))),
        ]);
        let definition = mapping.end_point(&ClassId::new("Customer"), "orders").unwrap();

        let mut planner = RelationPlanner::new(&lookup, &mapping);
        let err = planner
            .insert(&key("Customer", 1), definition, 0, &key("Order", 1))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(planner.finish().is_empty());
    }

    #[test]
    fn insert_at_index_positions_member() {
        let mapping = mapping();
        let lookup = lookup(vec![
            (
                ep("Customer", 1, "orders"),
                EndPointValue::Collection(vec![key("Order", 1), key("Order", 2)]),
            ),
            (ep("Order", 3, "customer"), EndPointValue::Object(None)),
        ]);
        let definition = mapping.end_point(&ClassId::new("Customer"), "orders").unwrap();

        let mut planner = RelationPlanner::new(&lookup, &mapping);
        planner
            .insert(&key("Customer", 1), definition, 1, &key("Order", 3))
            .unwrap();
        let changes = planner.finish();
        let orders = changes
            .iter()
            .find(|c| c.id == ep("Customer", 1, "orders"))
            .unwrap();
        assert_eq!(
            orders.new.keys(),
            vec![key("Order", 1), key("Order", 3), key("Order", 2)]
        );
        assert_eq!(orders.events(), vec![(None, Some(key("Order", 3)))]);
    }

    #[test]
    fn wrong_class_rejected() {
        let mapping = mapping();
        let lookup = lookup(vec![(
            ep("Order", 1, "customer"),
            EndPointValue::Object(None),
        )]);
        let definition = mapping.end_point(&ClassId::new("Order"), "customer").unwrap();

        let mut planner = RelationPlanner::new(&lookup, &mapping);
        let err = planner
            .set_real(&key("Order", 1), definition, Some(key("Invoice", 1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
    }

    #[test]
    fn replacement_reports_one_pair() {
        let change = EndPointChange {
            id: ep("Customer", 1, "orders"),
            is_real: false,
            old: EndPointValue::Collection(vec![key("Order", 1), key("Order", 2)]),
            new: EndPointValue::Collection(vec![key("Order", 3), key("Order", 2)]),
        };
        assert_eq!(
            change.events(),
            vec![(Some(key("Order", 1)), Some(key("Order", 3)))]
        );

        let reorder = EndPointChange {
            id: ep("Customer", 1, "orders"),
            is_real: false,
            old: EndPointValue::Collection(vec![key("Order", 1), key("Order", 2)]),
            new: EndPointValue::Collection(vec![key("Order", 2), key("Order", 1)]),
        };
        assert!(reorder.events().is_empty());
    }
}
