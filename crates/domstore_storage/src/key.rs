//! Object keys.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of the store a key was issued by.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(Arc<str>);

impl StoreId {
    /// Creates a store id.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({})", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a mapped class.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(Arc<str>);

impl ClassId {
    /// Creates a class id.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The raw identity value of a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Integer identity.
    Int(i64),
    /// UUID identity.
    Uuid(Uuid),
    /// Text identity.
    Text(Arc<str>),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Uuid> for KeyValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::Text(Arc::from(v))
    }
}

/// Stable identity of one persistent object.
///
/// Keys are immutable values compared structurally:
/// - Two keys are equal iff store, class and raw value are equal
/// - A key never changes once issued
/// - Cloning is cheap (ids are reference counted)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    store: StoreId,
    class: ClassId,
    value: KeyValue,
}

impl ObjectKey {
    /// Creates a key.
    #[must_use]
    pub fn new(store: StoreId, class: ClassId, value: impl Into<KeyValue>) -> Self {
        Self {
            store,
            class,
            value: value.into(),
        }
    }

    /// Creates a key with a fresh random UUID value.
    #[must_use]
    pub fn new_uuid(store: StoreId, class: ClassId) -> Self {
        Self::new(store, class, Uuid::new_v4())
    }

    /// Returns the store id.
    #[must_use]
    pub fn store(&self) -> &StoreId {
        &self.store
    }

    /// Returns the class id.
    #[must_use]
    pub fn class(&self) -> &ClassId {
        &self.class
    }

    /// Returns the raw identity value.
    #[must_use]
    pub fn value(&self) -> &KeyValue {
        &self.value
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({self})")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.class, self.value, self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i64) -> ObjectKey {
        ObjectKey::new(StoreId::new("s"), ClassId::new("Order"), v)
    }

    #[test]
    fn structural_equality() {
        assert_eq!(key(1), key(1));
        assert_ne!(key(1), key(2));
        let other_class = ObjectKey::new(StoreId::new("s"), ClassId::new("Customer"), 1_i64);
        assert_ne!(key(1), other_class);
    }

    #[test]
    fn new_uuid_is_unique() {
        let a = ObjectKey::new_uuid(StoreId::new("s"), ClassId::new("Order"));
        let b = ObjectKey::new_uuid(StoreId::new("s"), ClassId::new("Order"));
        assert_ne!(a, b);
    }

    #[test]
    fn display() {
        assert_eq!(key(7).to_string(), "Order|7|s");
    }

    #[test]
    fn ordering_groups_by_class() {
        let c = ObjectKey::new(StoreId::new("s"), ClassId::new("Customer"), 9_i64);
        assert!(c < key(1));
    }
}
