//! Recording listeners for asserting hook order.

use domstore_core::{
    ClientTransaction, ClientTransactionListener, CoreError, CoreResult, DomainObject,
    DomainObjectListener,
};
use domstore_storage::{ClassId, ObjectKey, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, ordered log of hook invocations.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    /// Returns all entries.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Returns the entries starting with `prefix`.
    #[must_use]
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns how many entries start with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

fn classes(objects: &[DomainObject]) -> String {
    objects
        .iter()
        .map(|o| o.class_id().as_str().to_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Transaction listener that logs every hook as `"<name>:<hook>"`, with
/// the class names of the objects involved where there are any.
///
/// A hook can be made to cancel by naming it with [`RecordingListener::cancel_on`].
pub struct RecordingListener {
    name: String,
    log: EventLog,
    cancel_on: Mutex<Option<String>>,
}

impl RecordingListener {
    /// Creates a listener logging into `log`.
    pub fn new(name: impl Into<String>, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            log,
            cancel_on: Mutex::new(None),
        })
    }

    /// Makes the cancellable hook named `hook` fail with a cancellation.
    pub fn cancel_on(&self, hook: impl Into<String>) {
        *self.cancel_on.lock() = Some(hook.into());
    }

    /// Stops cancelling.
    pub fn stop_cancelling(&self) {
        *self.cancel_on.lock() = None;
    }

    fn record(&self, hook: &str, detail: &str) {
        if detail.is_empty() {
            self.log.push(format!("{}:{hook}", self.name));
        } else {
            self.log.push(format!("{}:{hook}:{detail}", self.name));
        }
    }

    fn check(&self, hook: &str, detail: &str) -> CoreResult<()> {
        self.record(hook, detail);
        if self.cancel_on.lock().as_deref() == Some(hook) {
            return Err(CoreError::cancelled(format!("{} cancelled {hook}", self.name)));
        }
        Ok(())
    }
}

impl ClientTransactionListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction_initialize(&self, _tx: &ClientTransaction) {
        self.record("transaction_initialize", "");
    }

    fn transaction_discard(&self, _tx: &ClientTransaction) {
        self.record("transaction_discard", "");
    }

    fn subtransaction_creating(&self, _tx: &ClientTransaction) -> CoreResult<()> {
        self.check("subtransaction_creating", "")
    }

    fn subtransaction_initialize(&self, _parent: &ClientTransaction, _sub: &ClientTransaction) -> CoreResult<()> {
        self.check("subtransaction_initialize", "")
    }

    fn subtransaction_created(&self, _parent: &ClientTransaction, _sub: &ClientTransaction) {
        self.record("subtransaction_created", "");
    }

    fn new_object_creating(&self, _tx: &ClientTransaction, class: &ClassId) -> CoreResult<()> {
        self.check("new_object_creating", class.as_str())
    }

    fn objects_loading(&self, _tx: &ClientTransaction, keys: &[ObjectKey]) -> CoreResult<()> {
        self.check("objects_loading", &keys.len().to_string())
    }

    fn objects_loaded(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.record("objects_loaded", &classes(objects));
    }

    fn objects_not_found(&self, _tx: &ClientTransaction, keys: &[ObjectKey]) {
        self.record("objects_not_found", &keys.len().to_string());
    }

    fn objects_unloading(&self, _tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        self.check("objects_unloading", &classes(objects))
    }

    fn objects_unloaded(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.record("objects_unloaded", &classes(objects));
    }

    fn object_deleting(&self, _tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        self.check("object_deleting", object.class_id().as_str())
    }

    fn object_deleted(&self, _tx: &ClientTransaction, object: &DomainObject) {
        self.record("object_deleted", object.class_id().as_str());
    }

    fn property_value_changing(
        &self,
        _tx: &ClientTransaction,
        _object: &DomainObject,
        property: &str,
        _old: &Value,
        _new: &Value,
    ) -> CoreResult<()> {
        self.check("property_value_changing", property)
    }

    fn property_value_changed(
        &self,
        _tx: &ClientTransaction,
        _object: &DomainObject,
        property: &str,
        _old: &Value,
        _new: &Value,
    ) {
        self.record("property_value_changed", property);
    }

    fn relation_changing(
        &self,
        _tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        _old: Option<&DomainObject>,
        _new: Option<&DomainObject>,
    ) -> CoreResult<()> {
        self.check(
            "relation_changing",
            &format!("{}.{property}", object.class_id().as_str()),
        )
    }

    fn relation_changed(
        &self,
        _tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        _old: Option<&DomainObject>,
        _new: Option<&DomainObject>,
    ) {
        self.record(
            "relation_changed",
            &format!("{}.{property}", object.class_id().as_str()),
        );
    }

    fn committing(&self, _tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        self.check("committing", &classes(objects))
    }

    fn commit_validate(&self, _tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        self.check("commit_validate", &classes(objects))
    }

    fn committed(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.record("committed", &classes(objects));
    }

    fn rolling_back(&self, _tx: &ClientTransaction, objects: &[DomainObject]) -> CoreResult<()> {
        self.check("rolling_back", &classes(objects))
    }

    fn rolled_back(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.record("rolled_back", &classes(objects));
    }

    fn commit_failed(&self, _tx: &ClientTransaction, objects: &[DomainObject], _error: &CoreError) {
        self.record("commit_failed", &classes(objects));
    }
}

/// Object listener logging as `"object:<hook>:<class>"`.
pub struct RecordingObjectListener {
    log: EventLog,
}

impl RecordingObjectListener {
    /// Creates a listener logging into `log`.
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self { log })
    }

    fn record(&self, hook: &str, object: &DomainObject) {
        self.log
            .push(format!("object:{hook}:{}", object.class_id().as_str()));
    }
}

impl DomainObjectListener for RecordingObjectListener {
    fn committing(&self, _tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        self.record("committing", object);
        Ok(())
    }

    fn committed(&self, _tx: &ClientTransaction, object: &DomainObject) {
        self.record("committed", object);
    }

    fn rolling_back(&self, _tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        self.record("rolling_back", object);
        Ok(())
    }

    fn rolled_back(&self, _tx: &ClientTransaction, object: &DomainObject) {
        self.record("rolled_back", object);
    }

    fn deleting(&self, _tx: &ClientTransaction, object: &DomainObject) -> CoreResult<()> {
        self.record("deleting", object);
        Ok(())
    }

    fn deleted(&self, _tx: &ClientTransaction, object: &DomainObject) {
        self.record("deleted", object);
    }

    fn relation_changing(
        &self,
        _tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        _old: Option<&DomainObject>,
        _new: Option<&DomainObject>,
    ) -> CoreResult<()> {
        self.log.push(format!(
            "object:relation_changing:{}.{property}",
            object.class_id().as_str()
        ));
        Ok(())
    }

    fn relation_changed(
        &self,
        _tx: &ClientTransaction,
        object: &DomainObject,
        property: &str,
        _old: Option<&DomainObject>,
        _new: Option<&DomainObject>,
    ) {
        self.log.push(format!(
            "object:relation_changed:{}.{property}",
            object.class_id().as_str()
        ));
    }
}
