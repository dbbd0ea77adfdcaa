//! Class and relation metadata.
//!
//! The mapping is the read-only class/mapping collaborator of the engine: it
//! resolves a key's class, the kind of each property, and for every relation
//! property its cardinality, its opposite end-point and its declared sort
//! order. It is built once with [`MappingBuilder`] and never mutated.

mod builder;

pub use builder::{ClassBuilder, MappingBuilder, RelationBuilder};

use crate::error::{CoreError, CoreResult};
use domstore_storage::{ClassId, ObjectKey, PropertyMap, RelationQuery, SortSpec, Value, ValueKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How many objects an end-point holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one related object.
    One,
    /// An ordered collection of related objects.
    Many,
}

/// A plain (non-relation) property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    name: String,
    kind: ValueKind,
    nullable: bool,
}

impl PropertyDefinition {
    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of non-null values.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether `Null` is allowed.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Value of this property on a freshly created object.
    #[must_use]
    pub fn default_value(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            self.kind.default_value()
        }
    }

    /// Checks that `value` fits this property.
    pub(crate) fn check(&self, class: &ClassId, value: &Value) -> CoreResult<()> {
        match value.kind() {
            None if self.nullable => Ok(()),
            None => Err(CoreError::invalid_value(class, &self.name, "not nullable")),
            Some(kind) if kind == self.kind => Ok(()),
            Some(kind) => Err(CoreError::invalid_value(
                class,
                &self.name,
                format!("expected {:?}, got {kind:?}", self.kind),
            )),
        }
    }
}

/// One side of a relation, declared on a class.
///
/// The *real* side of a relation stores the foreign key in its owner's
/// data container under the relation property name. The *virtual* side has
/// no storage of its own and is resolved by querying the real side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEndPointDefinition {
    class: ClassId,
    property: Arc<str>,
    cardinality: Cardinality,
    is_real: bool,
    opposite_class: ClassId,
    opposite_property: Option<Arc<str>>,
    sort: Option<SortSpec>,
}

impl RelationEndPointDefinition {
    /// Class declaring this end-point.
    #[must_use]
    pub fn class(&self) -> &ClassId {
        &self.class
    }

    /// Relation property name.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Cardinality of this end-point.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Whether this end-point holds the foreign key.
    #[must_use]
    pub fn is_real(&self) -> bool {
        self.is_real
    }

    /// Whether this end-point is a collection.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Class of the related objects.
    #[must_use]
    pub fn opposite_class(&self) -> &ClassId {
        &self.opposite_class
    }

    /// Property of the opposite end-point, or `None` for unidirectional relations.
    #[must_use]
    pub fn opposite_property(&self) -> Option<&str> {
        self.opposite_property.as_deref()
    }

    /// Declared sort order (collections only).
    #[must_use]
    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    /// Builds the backend query resolving this virtual end-point for `owner`.
    ///
    /// Returns `None` for real or unidirectional end-points.
    #[must_use]
    pub fn relation_query(&self, owner: &ObjectKey) -> Option<RelationQuery> {
        if self.is_real {
            return None;
        }
        let foreign_key = self.opposite_property.as_deref()?;
        Some(RelationQuery {
            class: self.opposite_class.clone(),
            foreign_key: foreign_key.to_owned(),
            owner: owner.clone(),
            sort: self.sort.clone(),
        })
    }
}

/// Metadata of one mapped class.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    id: ClassId,
    properties: BTreeMap<String, PropertyDefinition>,
    relations: Vec<RelationEndPointDefinition>,
}

impl ClassDefinition {
    /// Class id.
    #[must_use]
    pub fn id(&self) -> &ClassId {
        &self.id
    }

    /// Looks up a plain property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    /// All plain properties, ordered by name.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties.values()
    }

    /// Looks up a relation end-point.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationEndPointDefinition> {
        self.relations.iter().find(|r| &*r.property == name)
    }

    /// All relation end-points, in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationEndPointDefinition> {
        self.relations.iter()
    }

    /// Initial property values of a new object: property defaults plus a
    /// null foreign key for every real end-point.
    #[must_use]
    pub fn default_values(&self) -> PropertyMap {
        let mut values: PropertyMap = self
            .properties
            .values()
            .map(|p| (p.name.clone(), p.default_value()))
            .collect();
        for relation in self.relations.iter().filter(|r| r.is_real) {
            values.insert(relation.property.to_string(), Value::Null);
        }
        values
    }
}

/// The complete, immutable class/relation mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingConfiguration {
    classes: HashMap<ClassId, ClassDefinition>,
}

impl MappingConfiguration {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> MappingBuilder {
        MappingBuilder::new()
    }

    /// Looks up a class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not mapped.
    pub fn class(&self, id: &ClassId) -> CoreResult<&ClassDefinition> {
        self.classes
            .get(id)
            .ok_or_else(|| CoreError::UnknownClass(id.clone()))
    }

    /// Number of mapped classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if the class is mapped.
    #[must_use]
    pub fn contains_class(&self, id: &ClassId) -> bool {
        self.classes.contains_key(id)
    }

    /// Looks up a relation end-point of a class.
    ///
    /// # Errors
    ///
    /// Returns an error if the class or relation property is not mapped.
    pub fn end_point(&self, class: &ClassId, property: &str) -> CoreResult<&RelationEndPointDefinition> {
        self.class(class)?
            .relation(property)
            .ok_or_else(|| CoreError::unknown_property(class, property))
    }

    /// Returns the opposite end-point of a bidirectional relation.
    #[must_use]
    pub fn opposite(&self, definition: &RelationEndPointDefinition) -> Option<&RelationEndPointDefinition> {
        let property = definition.opposite_property.as_deref()?;
        self.classes.get(&definition.opposite_class)?.relation(property)
    }

    /// Returns the end-points of other classes that point at `class`
    /// without an opposite end-point.
    pub fn unidirectional_referrers<'a>(
        &'a self,
        class: &'a ClassId,
    ) -> impl Iterator<Item = &'a RelationEndPointDefinition> + 'a {
        self.classes
            .values()
            .flat_map(|c| c.relations.iter())
            .filter(move |r| r.opposite_property.is_none() && &r.opposite_class == class)
    }
}
