//! Test fixtures and store helpers.
//!
//! The sample mapping models a small order system:
//!
//! - `Customer` (name) 1:n `Order` through `Customer.orders` / `Order.customer`
//! - `Order` (number) 1:n `OrderItem` through `Order.items` / `OrderItem.order`,
//!   sorted by `position`
//! - `Order` 1:1 `Invoice` through `Order.invoice` / `Invoice.order`
//! - `Order.referred_by`, a unidirectional reference to a `Customer`

use domstore_core::{Config, MappingConfiguration, ObjectStore};
use domstore_storage::{
    ClassId, InMemoryBackend, ObjectKey, PersistenceBackend, PropertyMap, SortSpec, StoreId, Value,
    ValueKind,
};
use std::sync::{Arc, Once};

/// Store id of fixture stores.
pub const TEST_STORE: &str = "test";

/// Builds the sample mapping.
pub fn order_mapping() -> MappingConfiguration {
    let mut builder = MappingConfiguration::builder();
    builder
        .add_class("Customer")
        .property("name", ValueKind::Text)
        .done()
        .expect("Customer class");
    builder
        .add_class("Order")
        .property("number", ValueKind::Int)
        .nullable("note", ValueKind::Text)
        .done()
        .expect("Order class");
    builder
        .add_class("OrderItem")
        .property("position", ValueKind::Int)
        .property("product", ValueKind::Text)
        .done()
        .expect("OrderItem class");
    builder
        .add_class("Invoice")
        .property("amount", ValueKind::Int)
        .done()
        .expect("Invoice class");

    builder
        .add_one_to_many("Customer", "orders", "Order", "customer")
        .sorted_by(SortSpec::new().ascending("number"))
        .done();
    builder
        .add_one_to_many("Order", "items", "OrderItem", "order")
        .sorted_by(SortSpec::new().ascending("position"))
        .done();
    builder
        .add_one_to_one("Order", "invoice", "Invoice", "order")
        .done();
    builder
        .add_unidirectional("Order", "referred_by", "Customer")
        .done();
    builder.build().expect("sample mapping")
}

/// Keys of the seeded records.
#[derive(Debug, Clone)]
pub struct SeedKeys {
    /// Customer "Ada" with orders 1 and 2.
    pub ada: ObjectKey,
    /// Customer "Grace" with order 3.
    pub grace: ObjectKey,
    /// Order 1 of Ada, with two items and an invoice.
    pub order1: ObjectKey,
    /// Order 2 of Ada, without items.
    pub order2: ObjectKey,
    /// Order 3 of Grace, referred by Ada.
    pub order3: ObjectKey,
    /// Item at position 1 of order 1.
    pub item1: ObjectKey,
    /// Item at position 2 of order 1.
    pub item2: ObjectKey,
    /// Invoice of order 1.
    pub invoice1: ObjectKey,
    /// Invoice without an order.
    pub invoice2: ObjectKey,
}

/// A store over a seeded in-memory backend.
pub struct TestStore {
    /// The store.
    pub store: ObjectStore,
    /// The backend, for statistics and direct manipulation.
    pub backend: Arc<InMemoryBackend>,
    /// Keys of the seeded records.
    pub keys: SeedKeys,
}

impl TestStore {
    /// Creates a store with the sample mapping and seeded data.
    pub fn seeded() -> Self {
        Self::seeded_with_config(Config::default())
    }

    /// Creates a seeded store with a custom configuration.
    pub fn seeded_with_config(config: Config) -> Self {
        let (backend, keys) = seeded_backend();
        let store = ObjectStore::open_with_backend(
            order_mapping(),
            Arc::clone(&backend) as Arc<dyn PersistenceBackend>,
            config,
        );
        backend.reset_stats();
        Self {
            store,
            backend,
            keys,
        }
    }

    /// Creates an empty store with the sample mapping.
    pub fn empty() -> Self {
        let (backend, keys) = seeded_backend();
        for key in [
            &keys.ada,
            &keys.grace,
            &keys.order1,
            &keys.order2,
            &keys.order3,
            &keys.item1,
            &keys.item2,
            &keys.invoice1,
            &keys.invoice2,
        ] {
            backend.remove(key);
        }
        let store = ObjectStore::open_with_backend(
            order_mapping(),
            Arc::clone(&backend) as Arc<dyn PersistenceBackend>,
            Config::default(),
        );
        backend.reset_stats();
        Self {
            store,
            backend,
            keys,
        }
    }
}

/// Builds a property map from name/value pairs.
pub fn props(pairs: &[(&str, Value)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), value.clone()))
        .collect()
}

/// Creates an in-memory backend holding the sample records.
pub fn seeded_backend() -> (Arc<InMemoryBackend>, SeedKeys) {
    let backend = Arc::new(InMemoryBackend::with_store(StoreId::new(TEST_STORE)));
    let customer = ClassId::new("Customer");
    let order = ClassId::new("Order");
    let item = ClassId::new("OrderItem");
    let invoice = ClassId::new("Invoice");

    let ada = backend.seed(&customer, props(&[("name", Value::from("Ada"))]));
    let grace = backend.seed(&customer, props(&[("name", Value::from("Grace"))]));

    let order1 = backend.seed(
        &order,
        props(&[
            ("number", Value::Int(1)),
            ("note", Value::Null),
            ("customer", Value::from(ada.clone())),
            ("referred_by", Value::Null),
        ]),
    );
    let order2 = backend.seed(
        &order,
        props(&[
            ("number", Value::Int(2)),
            ("note", Value::from("rush")),
            ("customer", Value::from(ada.clone())),
            ("referred_by", Value::Null),
        ]),
    );
    let order3 = backend.seed(
        &order,
        props(&[
            ("number", Value::Int(3)),
            ("note", Value::Null),
            ("customer", Value::from(grace.clone())),
            ("referred_by", Value::from(ada.clone())),
        ]),
    );

    // Seeded out of position order; the sorted relation must reorder them.
    let item2 = backend.seed(
        &item,
        props(&[
            ("position", Value::Int(2)),
            ("product", Value::from("lamp")),
            ("order", Value::from(order1.clone())),
        ]),
    );
    let item1 = backend.seed(
        &item,
        props(&[
            ("position", Value::Int(1)),
            ("product", Value::from("desk")),
            ("order", Value::from(order1.clone())),
        ]),
    );

    let invoice1 = backend.seed(
        &invoice,
        props(&[("amount", Value::Int(250)), ("order", Value::from(order1.clone()))]),
    );
    let invoice2 = backend.seed(
        &invoice,
        props(&[("amount", Value::Int(90)), ("order", Value::Null)]),
    );

    (
        backend,
        SeedKeys {
            ada,
            grace,
            order1,
            order2,
            order3,
            item1,
            item2,
            invoice1,
            invoice2,
        },
    )
}

static TRACING: Once = Once::new();

/// Installs a test tracing subscriber once per process.
///
/// The filter is read from `RUST_LOG` and defaults to `warn`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
