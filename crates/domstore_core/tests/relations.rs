//! Bidirectional relation handling.

use domstore_core::{ClientTransaction, DomainObject, ErrorKind, ObjectState, ObjectStore};
use domstore_storage::Value;
use domstore_testkit::prelude::*;
use proptest::prelude::*;

fn keys_of(objects: &[DomainObject]) -> Vec<domstore_storage::ObjectKey> {
    objects.iter().map(|o| o.key().clone()).collect()
}

#[test]
fn collection_is_loaded_once_in_sort_order() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();

    let items = tx.get_related_objects(&order1, "items").unwrap();
    assert_eq!(
        keys_of(&items),
        vec![fixture.keys.item1.clone(), fixture.keys.item2.clone()]
    );
    assert_eq!(fixture.backend.stats().load_related_calls, 1);

    tx.get_related_objects(&order1, "items").unwrap();
    assert_eq!(fixture.backend.stats().load_related_calls, 1);

    // The related objects were registered with their data.
    assert_eq!(tx.state_of(&items[0]).unwrap(), ObjectState::Unchanged);
    assert_eq!(tx.get_value(&items[0], "product").unwrap(), Value::from("desk"));
}

#[test]
fn real_end_point_reads_foreign_key() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order3 = tx.get_object(&fixture.keys.order3, false).unwrap();

    let customer = tx.get_related_object(&order3, "customer").unwrap().unwrap();
    assert_eq!(customer.key(), &fixture.keys.grace);
    let referrer = tx.get_related_object(&order3, "referred_by").unwrap().unwrap();
    assert_eq!(referrer.key(), &fixture.keys.ada);
    assert_eq!(fixture.backend.stats().load_related_calls, 0);
}

#[test]
fn cardinality_mismatch_is_rejected() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();

    let err = tx.get_related_object(&ada, "orders").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn setting_foreign_key_updates_both_collections() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order3 = tx.get_object(&fixture.keys.order3, false).unwrap();

    tx.set_related_object(&order3, "customer", Some(&ada)).unwrap();

    assert_eq!(
        keys_of(&tx.get_related_objects(&ada, "orders").unwrap()),
        vec![
            fixture.keys.order1.clone(),
            fixture.keys.order2.clone(),
            fixture.keys.order3.clone()
        ]
    );
    assert!(tx.get_related_objects(&grace, "orders").unwrap().is_empty());
    assert_eq!(
        keys_of(&tx.get_original_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone()]
    );
    assert!(tx
        .get_related_object(&order3, "customer")
        .unwrap()
        .unwrap()
        .ptr_eq(&ada));

    assert_eq!(tx.state_of(&order3).unwrap(), ObjectState::Changed);
    assert_eq!(tx.state_of(&ada).unwrap(), ObjectState::Changed);
    assert_eq!(tx.state_of(&grace).unwrap(), ObjectState::Changed);
}

#[test]
fn adding_to_collection_moves_member() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();

    tx.add_related_object(&grace, "orders", &order1).unwrap();

    assert_eq!(
        keys_of(&tx.get_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone(), fixture.keys.order1.clone()]
    );
    assert_eq!(
        keys_of(&tx.get_related_objects(&ada, "orders").unwrap()),
        vec![fixture.keys.order2.clone()]
    );
    assert!(tx
        .get_related_object(&order1, "customer")
        .unwrap()
        .unwrap()
        .ptr_eq(&grace));
}

#[test]
fn adding_a_member_twice_is_rejected_without_changes() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();

    let err = tx.add_related_object(&ada, "orders", &order1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(!tx.has_changed());
}

#[test]
fn insert_and_replace_keep_positions() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let item1 = tx.get_object(&fixture.keys.item1, false).unwrap();

    let extra = tx.new_object("OrderItem").unwrap();
    tx.insert_related_object(&order1, "items", 1, &extra).unwrap();
    assert_eq!(
        keys_of(&tx.get_related_objects(&order1, "items").unwrap()),
        vec![
            fixture.keys.item1.clone(),
            extra.key().clone(),
            fixture.keys.item2.clone()
        ]
    );

    let replacement = tx.new_object("OrderItem").unwrap();
    tx.replace_related_object(&order1, "items", 0, &replacement)
        .unwrap();
    assert_eq!(
        tx.get_related_objects(&order1, "items").unwrap()[0].key(),
        replacement.key()
    );
    assert!(tx.get_related_object(&item1, "order").unwrap().is_none());

    let err = tx
        .insert_related_object(&order1, "items", 9, &item1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn removing_from_collection_clears_foreign_key() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let item2 = tx.get_object(&fixture.keys.item2, false).unwrap();

    assert!(tx.remove_related_object(&order1, "items", &item2).unwrap());
    assert!(!tx.remove_related_object(&order1, "items", &item2).unwrap());
    assert!(tx.get_related_object(&item2, "order").unwrap().is_none());
    assert_eq!(tx.get_related_objects(&order1, "items").unwrap().len(), 1);

    tx.commit().unwrap();
    let record = fixture.backend.record(&fixture.keys.item2).unwrap();
    assert_eq!(record.properties["order"], Value::Null);
}

#[test]
fn one_to_one_displaces_previous_partner() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let invoice1 = tx.get_object(&fixture.keys.invoice1, false).unwrap();
    let invoice2 = tx.get_object(&fixture.keys.invoice2, false).unwrap();

    tx.set_related_object(&invoice2, "order", Some(&order1))
        .unwrap();

    assert!(tx
        .get_related_object(&order1, "invoice")
        .unwrap()
        .unwrap()
        .ptr_eq(&invoice2));
    assert!(tx.get_related_object(&invoice1, "order").unwrap().is_none());
    assert_eq!(
        tx.get_original_related_object(&order1, "invoice")
            .unwrap()
            .unwrap()
            .key(),
        &fixture.keys.invoice1
    );
}

#[test]
fn virtual_side_assignment_updates_real_side() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    let invoice2 = tx.get_object(&fixture.keys.invoice2, false).unwrap();

    tx.set_related_object(&order2, "invoice", Some(&invoice2))
        .unwrap();
    assert!(tx
        .get_related_object(&invoice2, "order")
        .unwrap()
        .unwrap()
        .ptr_eq(&order2));

    tx.commit().unwrap();
    let record = fixture.backend.record(&fixture.keys.invoice2).unwrap();
    assert_eq!(record.properties["order"], Value::from(fixture.keys.order2.clone()));
}

#[test]
fn wrong_class_is_rejected() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let invoice1 = tx.get_object(&fixture.keys.invoice1, false).unwrap();

    let err = tx
        .set_related_object(&order1, "customer", Some(&invoice1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
    assert!(!tx.has_changed());
}

#[test]
fn deleted_object_cannot_be_related() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    tx.delete(&grace).unwrap();

    let err = tx
        .set_related_object(&order2, "customer", Some(&grace))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeletedObject);
}

#[test]
fn deleted_member_cannot_join_a_collection() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    let item2 = tx.get_object(&fixture.keys.item2, false).unwrap();
    tx.delete(&order2).unwrap();
    tx.delete(&item2).unwrap();

    let err = tx.add_related_object(&grace, "orders", &order2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeletedObject);
    let err = tx
        .insert_related_object(&grace, "orders", 0, &order2)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeletedObject);
    let err = tx
        .replace_related_object(&order1, "items", 0, &item2)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeletedObject);

    assert_eq!(
        keys_of(&tx.get_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone()]
    );
    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Deleted);
    assert_eq!(
        keys_of(&tx.get_related_objects(&order1, "items").unwrap()),
        vec![fixture.keys.item1.clone()]
    );

    tx.commit().unwrap();
    assert_eq!(
        keys_of(&tx.get_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone()]
    );
}

#[test]
fn deleted_target_cannot_fill_a_virtual_end_point() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    let invoice1 = tx.get_object(&fixture.keys.invoice1, false).unwrap();
    tx.delete(&invoice1).unwrap();

    let err = tx
        .set_related_object(&order2, "invoice", Some(&invoice1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeletedObject);
    assert!(tx.get_related_object(&order2, "invoice").unwrap().is_none());
    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Unchanged);
    assert_eq!(tx.state_of(&invoice1).unwrap(), ObjectState::Deleted);
}

#[test]
fn delete_detaches_every_relation() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let log = EventLog::new();
    tx.extensions()
        .add(RecordingListener::new("rec", log.clone()))
        .unwrap();

    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let order1 = tx.get_object(&fixture.keys.order1, false).unwrap();
    let item1 = tx.get_object(&fixture.keys.item1, false).unwrap();
    let invoice1 = tx.get_object(&fixture.keys.invoice1, false).unwrap();
    ada.add_listener(RecordingObjectListener::new(log.clone()));
    tx.get_related_objects(&ada, "orders").unwrap();
    log.clear();

    tx.delete(&order1).unwrap();

    let entries = log.entries();
    assert_eq!(entries.first().map(String::as_str), Some("rec:object_deleting:Order"));
    assert_eq!(entries.last().map(String::as_str), Some("rec:object_deleted:Order"));
    assert!(!entries.iter().any(|e| e.contains("relation_chang")));
    assert_eq!(log.count("object:"), 0);
    assert_eq!(tx.state_of(&order1).unwrap(), ObjectState::Deleted);
    assert_eq!(
        keys_of(&tx.get_related_objects(&ada, "orders").unwrap()),
        vec![fixture.keys.order2.clone()]
    );
    assert!(tx.get_related_object(&item1, "order").unwrap().is_none());
    assert!(tx.get_related_object(&invoice1, "order").unwrap().is_none());

    tx.commit().unwrap();
    assert!(fixture.backend.record(&fixture.keys.order1).is_none());
    assert_eq!(
        fixture.backend.record(&fixture.keys.item1).unwrap().properties["order"],
        Value::Null
    );
    assert_eq!(tx.state_of(&order1).unwrap(), ObjectState::Invalid);
}

#[test]
fn delete_clears_loaded_unidirectional_references() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order3 = tx.get_object(&fixture.keys.order3, false).unwrap();
    assert!(tx.get_related_object(&order3, "referred_by").unwrap().is_some());

    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    tx.delete(&ada).unwrap();

    assert!(tx.get_related_object(&order3, "referred_by").unwrap().is_none());
    assert_eq!(tx.state_of(&order3).unwrap(), ObjectState::Changed);
}

#[test]
fn deleting_a_new_object_invalidates_it() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order = tx.new_object("Order").unwrap();
    tx.set_related_object(&order, "customer", Some(&grace)).unwrap();

    tx.delete(&order).unwrap();

    assert_eq!(tx.state_of(&order).unwrap(), ObjectState::Invalid);
    assert_eq!(
        keys_of(&tx.get_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone()]
    );
    let err = tx.get_value(&order, "number").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidObject);
    assert!(!tx.has_changed());
}

#[test]
fn relation_events_fire_for_every_touched_end_point() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let log = EventLog::new();
    tx.extensions()
        .add(RecordingListener::new("rec", log.clone()))
        .unwrap();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let order3 = tx.get_object(&fixture.keys.order3, false).unwrap();
    order3.add_listener(RecordingObjectListener::new(log.clone()));
    log.clear();

    tx.set_related_object(&order3, "customer", Some(&ada)).unwrap();

    assert_eq!(log.count("rec:relation_changing"), 3);
    assert_eq!(log.count("rec:relation_changed"), 3);
    let entries = log.entries();
    let changing = entries
        .iter()
        .position(|e| e == "rec:relation_changing:Order.customer")
        .unwrap();
    let object_changing = entries
        .iter()
        .position(|e| e == "object:relation_changing:Order.customer")
        .unwrap();
    let object_changed = entries
        .iter()
        .position(|e| e == "object:relation_changed:Order.customer")
        .unwrap();
    let changed = entries
        .iter()
        .position(|e| e == "rec:relation_changed:Order.customer")
        .unwrap();
    assert!(changing < object_changing);
    assert!(object_changing < object_changed);
    assert!(object_changed < changed);
}

#[test]
fn cancelled_relation_change_leaves_both_sides() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let listener = RecordingListener::new("guard", EventLog::new());
    listener.cancel_on("relation_changing");
    tx.extensions().add(listener).unwrap();

    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let order3 = tx.get_object(&fixture.keys.order3, false).unwrap();
    let err = tx
        .set_related_object(&order3, "customer", Some(&ada))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert_eq!(
        tx.get_related_object(&order3, "customer").unwrap().unwrap().key(),
        &fixture.keys.grace
    );
    assert_eq!(tx.get_related_objects(&ada, "orders").unwrap().len(), 2);
    assert!(!tx.has_changed());
}

#[test]
fn relation_changes_survive_commit() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let grace = tx.get_object(&fixture.keys.grace, false).unwrap();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    tx.set_related_object(&order2, "customer", Some(&grace)).unwrap();
    tx.commit().unwrap();

    assert_eq!(
        fixture.backend.record(&fixture.keys.order2).unwrap().properties["customer"],
        Value::from(fixture.keys.grace.clone())
    );
    assert_eq!(tx.state_of(&grace).unwrap(), ObjectState::Unchanged);
    assert_eq!(
        keys_of(&tx.get_original_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order3.clone(), fixture.keys.order2.clone()]
    );

    let fresh = fixture.store.create_root_transaction();
    let grace = fresh.get_object(&fixture.keys.grace, false).unwrap();
    assert_eq!(
        keys_of(&fresh.get_related_objects(&grace, "orders").unwrap()),
        vec![fixture.keys.order2.clone(), fixture.keys.order3.clone()]
    );
}

fn assert_symmetric(tx: &ClientTransaction, customers: &[DomainObject], orders: &[DomainObject]) {
    for order in orders {
        let owner = tx.get_related_object(order, "customer").unwrap();
        for customer in customers {
            let members = tx.get_related_objects(customer, "orders").unwrap();
            let is_member = members.iter().any(|m| m.ptr_eq(order));
            let is_owner = owner.as_ref().is_some_and(|o| o.ptr_eq(customer));
            assert_eq!(is_member, is_owner, "{order:?} / {customer:?}");
        }
    }
    for customer in customers {
        let members = tx.get_related_objects(customer, "orders").unwrap();
        let mut unique = members.clone();
        unique.dedup();
        assert_eq!(unique.len(), members.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn relations_stay_symmetric(ops in relation_ops_strategy(24)) {
        let store = ObjectStore::open_in_memory(order_mapping());
        let tx = store.create_root_transaction();
        let customers: Vec<DomainObject> =
            (0..3).map(|_| tx.new_object("Customer").unwrap()).collect();
        let orders: Vec<DomainObject> =
            (0..4).map(|_| tx.new_object("Order").unwrap()).collect();

        for op in ops {
            // Rejected operations must leave the relation untouched, so
            // their errors are ignored here.
            let _ = match op {
                RelationOp::SetCustomer { order, customer } => tx.set_related_object(
                    &orders[order % orders.len()],
                    "customer",
                    Some(&customers[customer % customers.len()]),
                ),
                RelationOp::ClearCustomer { order } => {
                    tx.set_related_object(&orders[order % orders.len()], "customer", None)
                }
                RelationOp::AddOrder { customer, order } => tx.add_related_object(
                    &customers[customer % customers.len()],
                    "orders",
                    &orders[order % orders.len()],
                ),
                RelationOp::RemoveOrder { customer, order } => tx
                    .remove_related_object(
                        &customers[customer % customers.len()],
                        "orders",
                        &orders[order % orders.len()],
                    )
                    .map(|_| ()),
            };
        }

        assert_symmetric(&tx, &customers, &orders);
        tx.commit().unwrap();
        assert_symmetric(&tx, &customers, &orders);
    }
}
