//! Class queries.

use crate::object::DomainObject;
use domstore_storage::{ClassId, PropertyMap, SortSpec};
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&PropertyMap) -> bool + Send + Sync>;

/// A query over the persisted records of one class.
///
/// The filter sees the stored property values. Matching objects that are
/// already loaded are returned with their in-memory identity; objects
/// deleted or invalid in the querying transaction are omitted.
///
/// # Example
///
/// ```rust
/// use domstore_core::Query;
/// use domstore_storage::{SortSpec, Value};
///
/// let query = Query::new("Order")
///     .filter(|p| p.get("number").and_then(Value::as_int).unwrap_or(0) > 10)
///     .sort(SortSpec::new().ascending("number"));
/// assert_eq!(query.class().as_str(), "Order");
/// ```
#[derive(Clone)]
pub struct Query {
    class: ClassId,
    filter: Option<Predicate>,
    sort: Option<SortSpec>,
}

impl Query {
    /// Creates a query returning all objects of `class`.
    #[must_use]
    pub fn new(class: impl Into<ClassId>) -> Self {
        Self {
            class: class.into(),
            filter: None,
            sort: None,
        }
    }

    /// Restricts the result to records matching `predicate`.
    #[must_use]
    pub fn filter(mut self, predicate: impl Fn(&PropertyMap) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Orders the result.
    #[must_use]
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Returns the queried class.
    #[must_use]
    pub fn class(&self) -> &ClassId {
        &self.class
    }

    /// Returns the sort order.
    #[must_use]
    pub fn sort_spec(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub(crate) fn matches(&self, properties: &PropertyMap) -> bool {
        self.filter.as_ref().map_or(true, |f| f(properties))
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("class", &self.class)
            .field("filtered", &self.filter.is_some())
            .field("sort", &self.sort)
            .finish()
    }
}

/// Objects returned by a query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    query: Query,
    objects: Vec<DomainObject>,
}

impl QueryResult {
    /// Creates a result.
    #[must_use]
    pub fn new(query: Query, objects: Vec<DomainObject>) -> Self {
        Self { query, objects }
    }

    /// The query that produced this result.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The matching objects, in result order.
    #[must_use]
    pub fn objects(&self) -> &[DomainObject] {
        &self.objects
    }

    /// Consumes the result, returning the objects.
    #[must_use]
    pub fn into_objects(self) -> Vec<DomainObject> {
        self.objects
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Keeps only objects for which `keep` returns true.
    #[must_use]
    pub fn retain(mut self, keep: impl FnMut(&DomainObject) -> bool) -> Self {
        self.objects.retain(keep);
        self
    }
}
