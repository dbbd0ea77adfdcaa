//! MappingBuilder for constructing an immutable MappingConfiguration.

use super::{
    Cardinality, ClassDefinition, MappingConfiguration, PropertyDefinition,
    RelationEndPointDefinition,
};
use crate::error::{CoreError, CoreResult};
use domstore_storage::{ClassId, SortSpec, ValueKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Shape of a declared relation.
#[derive(Debug, Clone)]
enum RelationShape {
    /// `one.collection` holds all `many` whose `foreign_key` points at it.
    OneToMany {
        one: ClassId,
        collection: String,
        many: ClassId,
        foreign_key: String,
    },
    /// `virtual_class.virtual_property` is the object whose `foreign_key` points at it.
    OneToOne {
        virtual_class: ClassId,
        virtual_property: String,
        real_class: ClassId,
        foreign_key: String,
    },
    /// Foreign key with no opposite end-point.
    Unidirectional {
        class: ClassId,
        foreign_key: String,
        target: ClassId,
    },
}

#[derive(Debug, Clone)]
struct RelationDecl {
    shape: RelationShape,
    sort: Option<SortSpec>,
}

/// Builder for constructing an immutable [`MappingConfiguration`].
///
/// Classes are declared first; relations may reference classes declared
/// later, all references are resolved by [`MappingBuilder::build`].
#[derive(Debug, Default)]
pub struct MappingBuilder {
    /// Classes being built.
    classes: HashMap<ClassId, ClassDefinition>,
    /// Relations, resolved at build time.
    relations: Vec<RelationDecl>,
}

impl MappingBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class definition.
    pub fn add_class(&mut self, name: impl AsRef<str>) -> ClassBuilder<'_> {
        ClassBuilder {
            builder: self,
            id: ClassId::new(name),
            properties: BTreeMap::new(),
            duplicate: None,
        }
    }

    /// Add a one-to-many relation.
    ///
    /// `one.collection` is the virtual collection side, `many.foreign_key`
    /// the real side holding a reference to the owner.
    pub fn add_one_to_many(
        &mut self,
        one: impl AsRef<str>,
        collection: impl Into<String>,
        many: impl AsRef<str>,
        foreign_key: impl Into<String>,
    ) -> RelationBuilder<'_> {
        RelationBuilder {
            builder: self,
            decl: RelationDecl {
                shape: RelationShape::OneToMany {
                    one: ClassId::new(one),
                    collection: collection.into(),
                    many: ClassId::new(many),
                    foreign_key: foreign_key.into(),
                },
                sort: None,
            },
        }
    }

    /// Add a one-to-one relation.
    ///
    /// `virtual_class.virtual_property` has no storage and is resolved by
    /// querying `real_class.foreign_key`.
    pub fn add_one_to_one(
        &mut self,
        virtual_class: impl AsRef<str>,
        virtual_property: impl Into<String>,
        real_class: impl AsRef<str>,
        foreign_key: impl Into<String>,
    ) -> RelationBuilder<'_> {
        RelationBuilder {
            builder: self,
            decl: RelationDecl {
                shape: RelationShape::OneToOne {
                    virtual_class: ClassId::new(virtual_class),
                    virtual_property: virtual_property.into(),
                    real_class: ClassId::new(real_class),
                    foreign_key: foreign_key.into(),
                },
                sort: None,
            },
        }
    }

    /// Add a unidirectional relation from `class.foreign_key` to `target`.
    pub fn add_unidirectional(
        &mut self,
        class: impl AsRef<str>,
        foreign_key: impl Into<String>,
        target: impl AsRef<str>,
    ) -> RelationBuilder<'_> {
        RelationBuilder {
            builder: self,
            decl: RelationDecl {
                shape: RelationShape::Unidirectional {
                    class: ClassId::new(class),
                    foreign_key: foreign_key.into(),
                    target: ClassId::new(target),
                },
                sort: None,
            },
        }
    }

    /// Build the immutable mapping.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if a relation names an undeclared
    /// class, or [`CoreError::InvalidMapping`] if a relation property clashes
    /// with another property of the same class or a sort order is declared
    /// on a non-collection end-point.
    pub fn build(self) -> CoreResult<MappingConfiguration> {
        let mut classes = self.classes;

        for decl in self.relations {
            let (first, second) = end_points(&decl)?;
            for definition in std::iter::once(first).chain(second) {
                let class = classes
                    .get_mut(&definition.class)
                    .ok_or_else(|| CoreError::UnknownClass(definition.class.clone()))?;
                if class.property(&definition.property).is_some()
                    || class.relation(&definition.property).is_some()
                {
                    return Err(CoreError::invalid_mapping(format!(
                        "{}.{} is declared twice",
                        class.id, definition.property
                    )));
                }
                class.relations.push(definition);
            }
        }

        for definition in classes.values().flat_map(|c| c.relations.iter()) {
            if !classes.contains_key(&definition.opposite_class) {
                return Err(CoreError::UnknownClass(definition.opposite_class.clone()));
            }
        }

        Ok(MappingConfiguration { classes })
    }
}

fn end_points(
    decl: &RelationDecl,
) -> CoreResult<(RelationEndPointDefinition, Option<RelationEndPointDefinition>)> {
    match &decl.shape {
        RelationShape::OneToMany {
            one,
            collection,
            many,
            foreign_key,
        } => Ok((
            RelationEndPointDefinition {
                class: one.clone(),
                property: Arc::from(collection.as_str()),
                cardinality: Cardinality::Many,
                is_real: false,
                opposite_class: many.clone(),
                opposite_property: Some(Arc::from(foreign_key.as_str())),
                sort: decl.sort.clone(),
            },
            Some(RelationEndPointDefinition {
                class: many.clone(),
                property: Arc::from(foreign_key.as_str()),
                cardinality: Cardinality::One,
                is_real: true,
                opposite_class: one.clone(),
                opposite_property: Some(Arc::from(collection.as_str())),
                sort: None,
            }),
        )),
        RelationShape::OneToOne {
            virtual_class,
            virtual_property,
            real_class,
            foreign_key,
        } => {
            no_sort(decl, virtual_class, virtual_property)?;
            Ok((
                RelationEndPointDefinition {
                    class: virtual_class.clone(),
                    property: Arc::from(virtual_property.as_str()),
                    cardinality: Cardinality::One,
                    is_real: false,
                    opposite_class: real_class.clone(),
                    opposite_property: Some(Arc::from(foreign_key.as_str())),
                    sort: None,
                },
                Some(RelationEndPointDefinition {
                    class: real_class.clone(),
                    property: Arc::from(foreign_key.as_str()),
                    cardinality: Cardinality::One,
                    is_real: true,
                    opposite_class: virtual_class.clone(),
                    opposite_property: Some(Arc::from(virtual_property.as_str())),
                    sort: None,
                }),
            ))
        }
        RelationShape::Unidirectional {
            class,
            foreign_key,
            target,
        } => {
            no_sort(decl, class, foreign_key)?;
            Ok((
                RelationEndPointDefinition {
                    class: class.clone(),
                    property: Arc::from(foreign_key.as_str()),
                    cardinality: Cardinality::One,
                    is_real: true,
                    opposite_class: target.clone(),
                    opposite_property: None,
                    sort: None,
                },
                None,
            ))
        }
    }
}

fn no_sort(decl: &RelationDecl, class: &ClassId, property: &str) -> CoreResult<()> {
    if decl.sort.is_some() {
        return Err(CoreError::invalid_mapping(format!(
            "{class}.{property} is not a collection and cannot be sorted"
        )));
    }
    Ok(())
}

/// Builder for a class definition.
#[derive(Debug)]
pub struct ClassBuilder<'a> {
    builder: &'a mut MappingBuilder,
    id: ClassId,
    properties: BTreeMap<String, PropertyDefinition>,
    duplicate: Option<String>,
}

impl ClassBuilder<'_> {
    fn push(mut self, name: String, kind: ValueKind, nullable: bool) -> Self {
        if self.properties.contains_key(&name) {
            self.duplicate.get_or_insert_with(|| name.clone());
        }
        self.properties.insert(
            name.clone(),
            PropertyDefinition {
                name,
                kind,
                nullable,
            },
        );
        self
    }

    /// Add a non-nullable property.
    #[must_use]
    pub fn property(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.push(name.into(), kind, false)
    }

    /// Add a nullable property.
    #[must_use]
    pub fn nullable(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.push(name.into(), kind, true)
    }

    /// Finish building this class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidMapping`] if the class or one of its
    /// properties is declared twice.
    pub fn done(self) -> CoreResult<ClassId> {
        if self.builder.classes.contains_key(&self.id) {
            return Err(CoreError::invalid_mapping(format!(
                "class {} is declared twice",
                self.id
            )));
        }
        if let Some(name) = self.duplicate {
            return Err(CoreError::invalid_mapping(format!(
                "{}.{name} is declared twice",
                self.id
            )));
        }
        self.builder.classes.insert(
            self.id.clone(),
            ClassDefinition {
                id: self.id.clone(),
                properties: self.properties,
                relations: Vec::new(),
            },
        );
        Ok(self.id)
    }
}

/// Builder for a relation declaration.
#[derive(Debug)]
pub struct RelationBuilder<'a> {
    builder: &'a mut MappingBuilder,
    decl: RelationDecl,
}

impl RelationBuilder<'_> {
    /// Declare the load order of the collection side.
    #[must_use]
    pub fn sorted_by(mut self, sort: SortSpec) -> Self {
        self.decl.sort = Some(sort);
        self
    }

    /// Finish declaring this relation.
    pub fn done(self) {
        self.builder.relations.push(self.decl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_class_rejected() {
        let mut builder = MappingBuilder::new();
        builder.add_class("Order").done().unwrap();
        let err = builder.add_class("Order").done().unwrap_err();
        assert!(matches!(err, CoreError::InvalidMapping { .. }));
    }

    #[test]
    fn duplicate_property_rejected() {
        let mut builder = MappingBuilder::new();
        let err = builder
            .add_class("Order")
            .property("number", ValueKind::Int)
            .nullable("number", ValueKind::Text)
            .done()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidMapping { .. }));
    }

    #[test]
    fn relation_to_unknown_class_rejected() {
        let mut builder = MappingBuilder::new();
        builder.add_class("Order").done().unwrap();
        builder
            .add_one_to_many("Customer", "orders", "Order", "customer")
            .done();
        assert!(matches!(
            builder.build().unwrap_err(),
            CoreError::UnknownClass(_)
        ));
    }

    #[test]
    fn relation_clashing_with_property_rejected() {
        let mut builder = MappingBuilder::new();
        builder.add_class("Customer").done().unwrap();
        builder
            .add_class("Order")
            .property("customer", ValueKind::Int)
            .done()
            .unwrap();
        builder
            .add_one_to_many("Customer", "orders", "Order", "customer")
            .done();
        assert!(matches!(
            builder.build().unwrap_err(),
            CoreError::InvalidMapping { .. }
        ));
    }

    #[test]
    fn sorting_a_single_end_point_rejected() {
        let mut builder = MappingBuilder::new();
        builder.add_class("Order").done().unwrap();
        builder.add_class("Invoice").done().unwrap();
        builder
            .add_one_to_one("Order", "invoice", "Invoice", "order")
            .sorted_by(SortSpec::new().ascending("number"))
            .done();
        assert!(builder.build().is_err());
    }

    #[test]
    fn unidirectional_has_no_opposite() {
        let mut builder = MappingBuilder::new();
        builder.add_class("Customer").done().unwrap();
        builder.add_class("Order").done().unwrap();
        builder.add_unidirectional("Order", "referrer", "Customer").done();
        let mapping = builder.build().unwrap();

        let referrer = mapping.end_point(&ClassId::new("Order"), "referrer").unwrap();
        assert!(referrer.is_real());
        assert!(referrer.opposite_property().is_none());
        assert!(mapping.opposite(referrer).is_none());
        assert_eq!(
            mapping
                .unidirectional_referrers(&ClassId::new("Customer"))
                .count(),
            1
        );
    }
}
