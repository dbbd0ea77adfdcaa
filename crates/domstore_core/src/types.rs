//! Core type definitions.

use domstore_storage::ObjectKey;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing within an
/// [`crate::ObjectStore`] and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Lifecycle state of an object in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// A reference exists but its data has not been loaded.
    NotLoadedYet,
    /// Created in this transaction.
    New,
    /// Loaded and not modified.
    Unchanged,
    /// Loaded and modified (property values or relations).
    Changed,
    /// Deleted in this transaction.
    Deleted,
    /// Known not to exist in this transaction.
    Invalid,
}

/// Which version of a value an access refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueAccess {
    /// The value as modified in this transaction.
    #[default]
    Current,
    /// The value as loaded (or as of the last commit).
    Original,
}

/// Identifies one relation end-point: an object and one of its relation
/// properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndPointId {
    /// Owning object.
    pub key: ObjectKey,
    /// Relation property on the owning object's class.
    pub property: Arc<str>,
}

impl EndPointId {
    /// Creates an end-point id.
    #[must_use]
    pub fn new(key: ObjectKey, property: impl AsRef<str>) -> Self {
        Self {
            key,
            property: Arc::from(property.as_ref()),
        }
    }
}

impl fmt::Display for EndPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.key, self.property)
    }
}
