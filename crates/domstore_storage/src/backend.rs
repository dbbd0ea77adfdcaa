//! Persistence backend trait definition.

use crate::error::StorageResult;
use crate::key::{ClassId, ObjectKey};
use crate::record::{LockToken, PersistentRecord, RecordChange, RelationQuery};

/// The persistence collaborator of the transaction engine.
///
/// A backend loads and saves whole records. It knows nothing about
/// transactions, identity maps or relation end-points; the engine owns all
/// of that and calls the backend synchronously on the calling thread.
///
/// # Invariants
///
/// - `load_many` returns exactly one entry per requested key, in request order
/// - `save` is all-or-nothing: on error no change has been applied
/// - `save` fails with [`crate::StorageError::Concurrency`] if any update or
///   delete presents a stale [`LockToken`]
/// - Backends must be `Send + Sync`; one backend serves many transactions
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For tests and ephemeral stores
pub trait PersistenceBackend: Send + Sync {
    /// Issues a fresh key for a new object of `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot allocate a key.
    fn new_object_key(&self, class: &ClassId) -> StorageResult<ObjectKey>;

    /// Loads one record, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn load_one(&self, key: &ObjectKey) -> StorageResult<Option<PersistentRecord>>;

    /// Loads many records in one round trip.
    ///
    /// The result has one entry per key, in the order of `keys`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn load_many(&self, keys: &[ObjectKey]) -> StorageResult<Vec<Option<PersistentRecord>>>;

    /// Loads all records related to an owner through a foreign key,
    /// sorted by the query's sort specification if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn load_related(&self, query: &RelationQuery) -> StorageResult<Vec<PersistentRecord>>;

    /// Loads all records of a class.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn load_class(&self, class: &ClassId) -> StorageResult<Vec<PersistentRecord>>;

    /// Applies a set of changes atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Concurrency`] on a stale lock token,
    /// [`crate::StorageError::DuplicateKey`] on a conflicting insert, or
    /// another error if the backend fails. Nothing is applied on error.
    fn save(&self, changes: &[RecordChange]) -> StorageResult<()>;

    /// Returns the current lock tokens of the given records.
    ///
    /// Keys that no longer exist are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn refresh_lock_tokens(&self, keys: &[ObjectKey]) -> StorageResult<Vec<(ObjectKey, LockToken)>>;
}
