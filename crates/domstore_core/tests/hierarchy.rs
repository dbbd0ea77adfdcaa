//! Subtransactions and transaction scopes.

use domstore_core::{
    AutoRollbackBehavior, ClientTransaction, CoreError, CoreResult, ErrorKind, ObjectState,
    SubTransactionFactory, TransactionKind,
};
use domstore_storage::{ObjectKey, Value};
use domstore_testkit::prelude::*;

#[test]
fn parent_is_read_only_while_sub_is_open() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    assert_eq!(sub.kind(), TransactionKind::Sub);
    assert!(sub.parent().unwrap().ptr_eq(&tx));
    assert!(tx.sub_transaction().unwrap().ptr_eq(&sub));
    assert!(!tx.is_active());
    assert!(tx.leaf().ptr_eq(&sub));
    assert!(sub.root().ptr_eq(&tx));

    let err = tx.set_value(&ada, "name", "Countess").unwrap_err();
    assert!(matches!(err, CoreError::TransactionInactive(_)));
    assert_eq!(tx.new_object("Customer").unwrap_err().kind(), ErrorKind::Protocol);
    assert_eq!(tx.commit().unwrap_err().kind(), ErrorKind::Protocol);
    assert!(tx.create_sub_transaction().is_err());

    // Reading is still allowed.
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Ada"));

    sub.discard();
    assert!(tx.is_active());
    assert!(tx.sub_transaction().is_none());
    tx.set_value(&ada, "name", "Countess").unwrap();
}

#[test]
fn sub_shares_handles_with_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let sub = tx.create_sub_transaction().unwrap();

    let in_sub = sub.get_object(&fixture.keys.ada, false).unwrap();
    assert!(in_sub.ptr_eq(&ada));

    // A handle first seen in the sub is enlisted up the whole chain.
    let grace = sub.get_object(&fixture.keys.grace, false).unwrap();
    assert!(tx.lookup(&fixture.keys.grace).unwrap().ptr_eq(&grace));
    assert_eq!(tx.state_of(&grace).unwrap(), ObjectState::Unchanged);
}

#[test]
fn sub_reads_parent_values_without_backend() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    tx.set_value(&ada, "name", "Countess").unwrap();
    fixture.backend.reset_stats();

    let sub = tx.create_sub_transaction().unwrap();
    assert_eq!(sub.get_value(&ada, "name").unwrap(), Value::from("Countess"));
    assert_eq!(
        sub.get_original_value(&ada, "name").unwrap(),
        Value::from("Countess")
    );
    assert_eq!(sub.state_of(&ada).unwrap(), ObjectState::Unchanged);
    assert_eq!(fixture.backend.stats().load_calls(), 0);
}

#[test]
fn sub_commit_pushes_changes_into_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let sub = tx.create_sub_transaction().unwrap();

    sub.set_value(&ada, "name", "Countess").unwrap();
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Ada"));
    fixture.backend.reset_stats();

    sub.commit().unwrap();
    assert_eq!(fixture.backend.stats().total_calls(), 0);
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Countess"));
    assert_eq!(tx.state_of(&ada).unwrap(), ObjectState::Changed);
    assert_eq!(sub.state_of(&ada).unwrap(), ObjectState::Unchanged);

    sub.discard();
    tx.commit().unwrap();
    assert_eq!(
        fixture.backend.record(&fixture.keys.ada).unwrap().properties["name"],
        Value::from("Countess")
    );
}

#[test]
fn new_object_in_sub_is_hidden_from_parent_until_commit() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let sub = tx.create_sub_transaction().unwrap();

    let linus = sub.new_object("Customer").unwrap();
    sub.set_value(&linus, "name", "Linus").unwrap();
    let key = linus.key().clone();

    assert!(tx.try_get_object(&key).unwrap().is_none());
    assert_eq!(tx.get_object(&key, false).unwrap_err().kind(), ErrorKind::InvalidObject);
    assert_eq!(fixture.backend.stats().load_calls(), 0);

    sub.commit().unwrap();
    let in_parent = tx.get_object(&key, false).unwrap();
    assert!(in_parent.ptr_eq(&linus));
    assert_eq!(tx.state_of(&linus).unwrap(), ObjectState::New);
    assert_eq!(tx.get_value(&linus, "name").unwrap(), Value::from("Linus"));

    sub.discard();
    tx.commit().unwrap();
    assert!(fixture.backend.record(&key).is_some());
}

#[test]
fn sub_relation_changes_reach_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let sub = tx.create_sub_transaction().unwrap();

    let ada = sub.get_object(&fixture.keys.ada, false).unwrap();
    let grace = sub.get_object(&fixture.keys.grace, false).unwrap();
    let order3 = sub.get_object(&fixture.keys.order3, false).unwrap();
    sub.set_related_object(&order3, "customer", Some(&ada)).unwrap();
    sub.commit().unwrap();
    sub.discard();

    assert!(tx
        .get_related_object(&order3, "customer")
        .unwrap()
        .unwrap()
        .ptr_eq(&ada));
    assert_eq!(tx.get_related_objects(&ada, "orders").unwrap().len(), 3);
    assert!(tx.get_related_objects(&grace, "orders").unwrap().is_empty());

    tx.commit().unwrap();
    assert_eq!(
        fixture.backend.record(&fixture.keys.order3).unwrap().properties["customer"],
        Value::from(fixture.keys.ada.clone())
    );
}

#[test]
fn delete_in_sub_reaches_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    let sub = tx.create_sub_transaction().unwrap();

    sub.delete(&order2).unwrap();
    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Unchanged);
    sub.commit().unwrap();
    sub.discard();

    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Deleted);
    tx.commit().unwrap();
    assert!(fixture.backend.record(&fixture.keys.order2).is_none());
}

#[test]
fn sub_commit_applies_new_changed_and_deleted_objects_together() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    assert_eq!(tx.get_related_objects(&ada, "orders").unwrap().len(), 2);
    let sub = tx.create_sub_transaction().unwrap();

    let linus = sub.new_object("Customer").unwrap();
    sub.set_value(&linus, "name", "Linus").unwrap();
    sub.set_value(&ada, "name", "Countess").unwrap();
    sub.delete(&order2).unwrap();
    sub.commit().unwrap();
    sub.discard();

    assert_eq!(tx.state_of(&linus).unwrap(), ObjectState::New);
    assert!(tx.lookup(linus.key()).unwrap().ptr_eq(&linus));
    assert!(tx.get_related_objects(&linus, "orders").unwrap().is_empty());
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Countess"));
    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Deleted);
    let orders = tx.get_related_objects(&ada, "orders").unwrap();
    assert_eq!(orders.len(), 1);
    assert!(!orders[0].ptr_eq(&order2));
}

#[test]
fn object_deleted_in_parent_is_invalid_in_sub() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    tx.delete(&order2).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    let log = EventLog::new();
    sub.extensions()
        .add(RecordingListener::new("rec", log.clone()))
        .unwrap();

    let err = sub.get_object(&fixture.keys.order2, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidObject);
    assert!(sub.try_get_object(&fixture.keys.order2).unwrap().is_none());
    assert_eq!(sub.state_of(&order2).unwrap(), ObjectState::Invalid);
    assert_eq!(log.count("rec:objects_not_found"), 0);
    assert_eq!(tx.state_of(&order2).unwrap(), ObjectState::Deleted);

    // A key the store never had is still reported as not found.
    let missing = ObjectKey::new(
        fixture.keys.ada.store().clone(),
        fixture.keys.ada.class().clone(),
        999_i64,
    );
    assert_eq!(sub.get_object(&missing, false).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(log.count("rec:objects_not_found"), 1);
}

#[test]
fn object_deleted_in_root_is_invalid_two_levels_down() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let order2 = tx.get_object(&fixture.keys.order2, false).unwrap();
    tx.delete(&order2).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    let nested = sub.create_sub_transaction().unwrap();
    let err = nested.get_object(&fixture.keys.order2, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidObject);
    assert_eq!(nested.state_of(&order2).unwrap(), ObjectState::Invalid);
}

#[test]
fn discarding_sub_drops_its_changes() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let sub = tx.create_sub_transaction().unwrap();
    sub.set_value(&ada, "name", "Countess").unwrap();

    sub.discard();
    sub.discard();

    assert!(sub.is_discarded());
    assert!(tx.is_active());
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Ada"));
    assert!(!tx.has_changed());
    assert_eq!(
        sub.get_value(&ada, "name").unwrap_err().kind(),
        ErrorKind::Protocol
    );
}

#[test]
fn discarding_parent_discards_sub() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let sub = tx.create_sub_transaction().unwrap();
    let nested = sub.create_sub_transaction().unwrap();

    tx.discard();
    assert!(tx.is_discarded());
    assert!(sub.is_discarded());
    assert!(nested.is_discarded());
    assert!(matches!(
        tx.get_object(&fixture.keys.ada, false).unwrap_err(),
        CoreError::TransactionDiscarded(_)
    ));
}

#[test]
fn dropped_sub_reactivates_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    {
        let _sub = tx.create_sub_transaction().unwrap();
        assert!(!tx.is_active());
    }
    assert!(tx.is_active());
    assert!(tx.new_object("Customer").is_ok());
}

#[test]
fn binding_transaction_has_no_subtransactions() {
    let fixture = TestStore::seeded();
    let binding = fixture.store.create_binding_transaction();
    let err = binding.create_sub_transaction().unwrap_err();
    assert!(matches!(err, CoreError::BindingSubtransaction(_)));
    assert!(binding.is_active());
}

#[test]
fn cancelled_sub_creation_reactivates_parent() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let log = EventLog::new();
    let listener = RecordingListener::new("rec", log.clone());
    listener.cancel_on("subtransaction_initialize");
    tx.extensions().add(listener.clone()).unwrap();

    let err = tx.create_sub_transaction().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(tx.is_active());
    assert!(tx.sub_transaction().is_none());
    assert_eq!(log.count("rec:subtransaction_created"), 0);

    listener.stop_cancelling();
    log.clear();
    tx.create_sub_transaction().unwrap();
    assert_eq!(
        log.entries(),
        vec![
            "rec:subtransaction_creating",
            "rec:subtransaction_initialize",
            "rec:subtransaction_created",
        ]
    );
}

/// A factory that wires the new transaction to the wrong parent.
struct Misparenting(ClientTransaction);

impl SubTransactionFactory for Misparenting {
    fn create_sub(&self, _parent: &ClientTransaction) -> CoreResult<ClientTransaction> {
        self.0.create_sub_transaction()
    }
}

#[test]
fn factory_must_return_a_child_of_the_caller() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let other = fixture.store.create_root_transaction();

    let err = tx
        .create_sub_transaction_with(&Misparenting(other.clone()))
        .unwrap_err();
    assert!(matches!(err, CoreError::ParentMismatch { .. }));
    assert!(tx.is_active());
}

#[test]
fn scopes_nest_and_restore() {
    let fixture = TestStore::seeded();
    let first = fixture.store.create_root_transaction();
    let second = fixture.store.create_root_transaction();
    assert!(ClientTransaction::current().is_none());

    let outer = first.enter_non_discarding_scope();
    assert!(first.is_current());
    let inner = second.enter_non_discarding_scope();
    assert!(ClientTransaction::current().unwrap().ptr_eq(&second));

    inner.leave().unwrap();
    assert!(first.is_current());
    outer.leave().unwrap();
    assert!(ClientTransaction::current().is_none());
    assert!(!first.is_discarded());
}

#[test]
fn leaving_an_outer_scope_first_is_reported() {
    let fixture = TestStore::seeded();
    let first = fixture.store.create_root_transaction();
    let second = fixture.store.create_root_transaction();

    let outer = first.enter_non_discarding_scope();
    let inner = second.enter_non_discarding_scope();

    let err = outer.leave().unwrap_err();
    assert!(matches!(err, CoreError::ScopeMismatch(_)));
    assert!(second.is_current());

    inner.leave().unwrap();
    assert!(ClientTransaction::current().is_none());
}

#[test]
fn discarding_scope_discards_on_drop() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    {
        let scope = tx.enter_discarding_scope();
        assert_eq!(scope.behavior(), AutoRollbackBehavior::Discard);
        assert!(tx.is_current());
    }
    assert!(tx.is_discarded());
    assert!(ClientTransaction::current().is_none());
}

#[test]
fn rollback_scope_undoes_changes() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    {
        let _scope = tx.enter_scope(AutoRollbackBehavior::Rollback);
        ada.set_value("name", "Countess").unwrap();
        assert_eq!(ada.value("name").unwrap(), Value::from("Countess"));
    }
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Ada"));
    assert!(!tx.is_discarded());
}

#[test]
fn commit_restores_the_current_transaction() {
    let fixture = TestStore::seeded();
    let outer = fixture.store.create_root_transaction();
    let tx = fixture.store.create_root_transaction();
    let _scope = outer.enter_non_discarding_scope();

    tx.commit().unwrap();
    tx.rollback().unwrap();
    assert!(outer.is_current());
}

#[test]
fn object_accessors_follow_the_current_scope() {
    let fixture = TestStore::seeded();
    let tx = fixture.store.create_root_transaction();
    let ada = tx.get_object(&fixture.keys.ada, false).unwrap();
    let sub = tx.create_sub_transaction().unwrap();

    // Without a scope the innermost transaction is used.
    ada.set_value("name", "Countess").unwrap();
    assert_eq!(sub.get_value(&ada, "name").unwrap(), Value::from("Countess"));
    assert_eq!(tx.get_value(&ada, "name").unwrap(), Value::from("Ada"));

    let _scope = tx.enter_non_discarding_scope();
    assert_eq!(ada.value("name").unwrap(), Value::from("Ada"));
    assert_eq!(ada.state().unwrap(), ObjectState::Unchanged);
}

#[test]
fn store_transaction_helper_runs_in_scope() {
    let fixture = TestStore::seeded();
    let key: ObjectKey = fixture.keys.grace.clone();

    fixture
        .store
        .transaction(|tx| {
            assert!(tx.is_current());
            let grace = tx.get_object(&key, false)?;
            grace.set_value("name", "Hopper")
        })
        .unwrap();

    assert!(ClientTransaction::current().is_none());
    assert_eq!(
        fixture.backend.record(&key).unwrap().properties["name"],
        Value::from("Hopper")
    );
}
