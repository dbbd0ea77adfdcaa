//! Relation end-points.

use crate::mapping::Cardinality;
use crate::types::EndPointId;
use domstore_storage::ObjectKey;

/// Contents of an end-point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndPointValue {
    /// Single-object end-point.
    Object(Option<ObjectKey>),
    /// Collection end-point, in collection order, without duplicates.
    Collection(Vec<ObjectKey>),
}

impl EndPointValue {
    /// The empty value for an end-point of `cardinality`.
    #[must_use]
    pub fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::One => Self::Object(None),
            Cardinality::Many => Self::Collection(Vec::new()),
        }
    }

    /// Related keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<ObjectKey> {
        match self {
            Self::Object(key) => key.iter().cloned().collect(),
            Self::Collection(keys) => keys.clone(),
        }
    }

    /// The related key of a single-object end-point.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectKey> {
        match self {
            Self::Object(key) => key.as_ref(),
            Self::Collection(_) => None,
        }
    }

    /// Returns true if `key` is related.
    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        match self {
            Self::Object(related) => related.as_ref() == Some(key),
            Self::Collection(keys) => keys.contains(key),
        }
    }

    /// Removes `key`; returns true if it was related.
    pub fn remove(&mut self, key: &ObjectKey) -> bool {
        match self {
            Self::Object(related) if related.as_ref() == Some(key) => {
                *related = None;
                true
            }
            Self::Object(_) => false,
            Self::Collection(keys) => {
                let before = keys.len();
                keys.retain(|k| k != key);
                keys.len() != before
            }
        }
    }

    /// Returns true if both values relate the same objects, ignoring order.
    #[must_use]
    pub fn same_members(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Collection(a), Self::Collection(b)) => {
                a.len() == b.len() && a.iter().all(|k| b.contains(k))
            }
            _ => self == other,
        }
    }
}

/// One end-point of a relation, owned by one object in one transaction.
///
/// Registration means the end-point is complete: its contents are known
/// and it is never silently reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEndPoint {
    id: EndPointId,
    is_real: bool,
    original: EndPointValue,
    current: EndPointValue,
}

impl RelationEndPoint {
    /// Creates a loaded end-point.
    #[must_use]
    pub fn new(id: EndPointId, is_real: bool, value: EndPointValue) -> Self {
        Self {
            id,
            is_real,
            original: value.clone(),
            current: value,
        }
    }

    /// Creates an end-point whose original and current contents differ.
    #[must_use]
    pub fn with_original(id: EndPointId, is_real: bool, original: EndPointValue, current: EndPointValue) -> Self {
        Self {
            id,
            is_real,
            original,
            current,
        }
    }

    /// End-point id.
    #[must_use]
    pub fn id(&self) -> &EndPointId {
        &self.id
    }

    /// Whether the end-point stores a foreign key.
    #[must_use]
    pub fn is_real(&self) -> bool {
        self.is_real
    }

    /// Current contents.
    #[must_use]
    pub fn current(&self) -> &EndPointValue {
        &self.current
    }

    /// Contents as loaded or last committed.
    #[must_use]
    pub fn original(&self) -> &EndPointValue {
        &self.original
    }

    /// Replaces the current contents.
    pub fn set_current(&mut self, value: EndPointValue) {
        self.current = value;
    }

    /// Returns true if the current contents differ from the original,
    /// including order-only changes of a collection.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.current != self.original
    }

    /// Returns true if membership differs from the original.
    #[must_use]
    pub fn has_membership_changes(&self) -> bool {
        !self.current.same_members(&self.original)
    }

    /// Makes the current contents the original.
    pub fn commit(&mut self) {
        self.original = self.current.clone();
    }

    /// Restores the original contents.
    pub fn rollback(&mut self) {
        self.current = self.original.clone();
    }
}
