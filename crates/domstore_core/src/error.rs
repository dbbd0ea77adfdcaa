//! Error types for the transaction engine.

use crate::types::TransactionId;
use domstore_storage::{ClassId, ObjectKey, StorageError};
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable classification of a [`CoreError`].
///
/// Calling code matches on the kind (retry on `Concurrency`, re-query after
/// `NotFound`) instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A load found no data; the key is now invalid in that transaction.
    NotFound,
    /// The object is invalid in this transaction.
    InvalidObject,
    /// The object is deleted and the operation did not opt in to deleted objects.
    DeletedObject,
    /// An object belonging to another transaction was used.
    CrossTransaction,
    /// Optimistic-lock mismatch reported while saving.
    Concurrency,
    /// The transaction protocol was violated.
    Protocol,
    /// A listener cancelled the operation.
    Cancelled,
    /// Unknown class or property, or a value that does not fit its property.
    Mapping,
    /// The arguments are not valid for the operation.
    InvalidOperation,
    /// A commit or rollback notification did not reach a fixed point.
    NotificationLimit,
    /// The persistence backend failed.
    Storage,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A load failed to find data for the key.
    #[error("object not found: {key}")]
    ObjectNotFound {
        /// The key that was not found.
        key: ObjectKey,
    },

    /// The object is invalid in this transaction.
    #[error("object is invalid in this transaction: {key}")]
    ObjectInvalid {
        /// The invalid key.
        key: ObjectKey,
    },

    /// The object is deleted.
    #[error("object is deleted: {key}")]
    ObjectDeleted {
        /// The deleted key.
        key: ObjectKey,
    },

    /// The object cannot be used in this transaction.
    #[error("object {key} cannot be used in transaction {transaction}: {message}")]
    CrossTransaction {
        /// The offending key.
        key: ObjectKey,
        /// The transaction the object was used with.
        transaction: TransactionId,
        /// Why it belongs elsewhere.
        message: String,
    },

    /// The backend rejected the save because of stale lock tokens.
    #[error("concurrency violation on {} object(s)", keys.len())]
    ConcurrencyViolation {
        /// Keys with stale lock tokens.
        keys: Vec<ObjectKey>,
    },

    /// A mutating operation was attempted while a subtransaction is active.
    #[error("transaction {0} is read-only while its subtransaction is active")]
    TransactionInactive(TransactionId),

    /// The transaction has been discarded.
    #[error("transaction {0} has been discarded")]
    TransactionDiscarded(TransactionId),

    /// A different object is already enlisted under the key.
    #[error("a different object is already enlisted for {key} in transaction {transaction}")]
    EnlistConflict {
        /// The conflicting key.
        key: ObjectKey,
        /// The transaction.
        transaction: TransactionId,
    },

    /// A subtransaction factory produced a transaction with the wrong parent.
    #[error("subtransaction reports parent {actual:?}, expected {expected}")]
    ParentMismatch {
        /// The transaction creating the subtransaction.
        expected: TransactionId,
        /// The parent the new transaction reports.
        actual: Option<TransactionId>,
    },

    /// The object has already been initialized.
    #[error("object {key} has already been initialized")]
    AlreadyInitialized {
        /// The object's key.
        key: ObjectKey,
    },

    /// A scope was left while it was not the innermost active scope.
    #[error("scope of transaction {0} is not the active scope")]
    ScopeMismatch(TransactionId),

    /// A mutation was attempted while commit listeners validate.
    #[error("transaction {0} is read-only during commit validation")]
    ReadOnlyPhase(TransactionId),

    /// Binding transactions cannot have subtransactions.
    #[error("binding transaction {0} cannot create subtransactions")]
    BindingSubtransaction(TransactionId),

    /// A listener cancelled the operation.
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// Reason given by the listener.
        reason: String,
    },

    /// Class not found in the mapping.
    #[error("unknown class: {0}")]
    UnknownClass(ClassId),

    /// Property not found on a class.
    #[error("unknown property {property} on class {class}")]
    UnknownProperty {
        /// The class.
        class: ClassId,
        /// The missing property.
        property: String,
    },

    /// A value does not fit the mapped property.
    #[error("invalid value for {class}.{property}: {message}")]
    InvalidValue {
        /// The class.
        class: ClassId,
        /// The property.
        property: String,
        /// What is wrong.
        message: String,
    },

    /// The mapping being built is inconsistent.
    #[error("invalid mapping: {message}")]
    InvalidMapping {
        /// What is wrong.
        message: String,
    },

    /// Operation not permitted with the given arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Committing or rolling-back listeners kept adding objects.
    #[error("{phase} notification did not reach a fixed point after {rounds} rounds")]
    NotificationLimitExceeded {
        /// The phase (`committing` or `rolling back`).
        phase: &'static str,
        /// Rounds executed.
        rounds: usize,
    },

    /// Persistence backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for CoreError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Concurrency { keys } => Self::ConcurrencyViolation { keys },
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectNotFound { .. } => ErrorKind::NotFound,
            Self::ObjectInvalid { .. } => ErrorKind::InvalidObject,
            Self::ObjectDeleted { .. } => ErrorKind::DeletedObject,
            Self::CrossTransaction { .. } => ErrorKind::CrossTransaction,
            Self::ConcurrencyViolation { .. } => ErrorKind::Concurrency,
            Self::TransactionInactive(_)
            | Self::TransactionDiscarded(_)
            | Self::EnlistConflict { .. }
            | Self::ParentMismatch { .. }
            | Self::AlreadyInitialized { .. }
            | Self::ScopeMismatch(_)
            | Self::ReadOnlyPhase(_)
            | Self::BindingSubtransaction(_) => ErrorKind::Protocol,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::UnknownClass(_)
            | Self::UnknownProperty { .. }
            | Self::InvalidValue { .. }
            | Self::InvalidMapping { .. } => ErrorKind::Mapping,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::NotificationLimitExceeded { .. } => ErrorKind::NotificationLimit,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Creates a cancellation error, the conventional way for a listener
    /// to abort a cancellable operation.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a cross-transaction error.
    pub fn cross_transaction(
        key: ObjectKey,
        transaction: TransactionId,
        message: impl Into<String>,
    ) -> Self {
        Self::CrossTransaction {
            key,
            transaction,
            message: message.into(),
        }
    }

    /// Creates an invalid mapping error.
    pub fn invalid_mapping(message: impl Into<String>) -> Self {
        Self::InvalidMapping {
            message: message.into(),
        }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(class: &ClassId, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            class: class.clone(),
            property: property.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        class: &ClassId,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            class: class.clone(),
            property: property.into(),
            message: message.into(),
        }
    }
}
