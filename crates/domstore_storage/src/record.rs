//! Records exchanged between the engine and a backend.

use crate::key::{ClassId, ObjectKey};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Property name to value map of one record.
pub type PropertyMap = BTreeMap<String, Value>;

/// Optimistic-lock token of a stored record.
///
/// Tokens change on every successful save of the record. A save that
/// presents a token other than the stored one is a concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockToken(pub u64);

impl LockToken {
    /// Creates a lock token.
    #[must_use]
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock:{}", self.0)
    }
}

/// A record as loaded from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentRecord {
    /// Identity of the record.
    pub key: ObjectKey,
    /// Stored property values.
    pub properties: PropertyMap,
    /// Lock token current at load time.
    pub lock_token: LockToken,
}

/// One change handed to [`crate::PersistenceBackend::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    /// Store a record that did not exist before.
    Insert {
        /// Key of the new record.
        key: ObjectKey,
        /// Property values.
        properties: PropertyMap,
    },
    /// Replace the property values of an existing record.
    Update {
        /// Key of the record.
        key: ObjectKey,
        /// New property values.
        properties: PropertyMap,
        /// Token the record was loaded with.
        expected: LockToken,
    },
    /// Remove an existing record.
    Delete {
        /// Key of the record.
        key: ObjectKey,
        /// Token the record was loaded with.
        expected: LockToken,
    },
}

impl RecordChange {
    /// Returns the key the change applies to.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Insert { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One property of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Property to sort by.
    pub property: String,
    /// Direction.
    pub direction: SortDirection,
}

/// Declared sort order of a collection relation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    /// Creates an empty sort specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an ascending sort key.
    #[must_use]
    pub fn ascending(mut self, property: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            property: property.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    /// Appends a descending sort key.
    #[must_use]
    pub fn descending(mut self, property: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            property: property.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Returns the sort keys in priority order.
    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Compares two property maps under this specification.
    ///
    /// Missing properties compare as `Null`.
    #[must_use]
    pub fn compare(&self, a: &PropertyMap, b: &PropertyMap) -> Ordering {
        for key in &self.keys {
            let left = a.get(&key.property).unwrap_or(&Value::Null);
            let right = b.get(&key.property).unwrap_or(&Value::Null);
            let ordering = match key.direction {
                SortDirection::Ascending => left.sort_cmp(right),
                SortDirection::Descending => right.sort_cmp(left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Describes the records related to one owner through a foreign key.
///
/// This is how a backend resolves the virtual side of a relation: all
/// records of `class` whose `foreign_key` property references `owner`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationQuery {
    /// Class holding the foreign key.
    pub class: ClassId,
    /// Foreign-key property name on that class.
    pub foreign_key: String,
    /// The referenced owner.
    pub owner: ObjectKey,
    /// Declared sort order, if any.
    pub sort: Option<SortSpec>,
}

impl RelationQuery {
    /// Returns true if `record` belongs to the result of this query.
    #[must_use]
    pub fn matches(&self, record: &PersistentRecord) -> bool {
        record.key.class() == &self.class
            && record
                .properties
                .get(&self.foreign_key)
                .and_then(Value::as_reference)
                == Some(&self.owner)
    }
}
