//! Property-based test generators using proptest.
//!
//! Provides strategies for random relation workloads over the sample
//! mapping of [`crate::fixtures::order_mapping`].

use proptest::prelude::*;

/// One mutation of the `Customer.orders` / `Order.customer` relation.
///
/// Indices refer to pools of customers and orders created by the test and
/// are reduced modulo the pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationOp {
    /// `order.customer = customer`
    SetCustomer {
        /// Order index.
        order: usize,
        /// Customer index.
        customer: usize,
    },
    /// `order.customer = None`
    ClearCustomer {
        /// Order index.
        order: usize,
    },
    /// `customer.orders.add(order)`
    AddOrder {
        /// Customer index.
        customer: usize,
        /// Order index.
        order: usize,
    },
    /// `customer.orders.remove(order)`
    RemoveOrder {
        /// Customer index.
        customer: usize,
        /// Order index.
        order: usize,
    },
}

/// Strategy for a single relation operation.
pub fn relation_op_strategy() -> impl Strategy<Value = RelationOp> {
    prop_oneof![
        (any::<usize>(), any::<usize>())
            .prop_map(|(order, customer)| RelationOp::SetCustomer { order, customer }),
        any::<usize>().prop_map(|order| RelationOp::ClearCustomer { order }),
        (any::<usize>(), any::<usize>())
            .prop_map(|(customer, order)| RelationOp::AddOrder { customer, order }),
        (any::<usize>(), any::<usize>())
            .prop_map(|(customer, order)| RelationOp::RemoveOrder { customer, order }),
    ]
}

/// Strategy for a sequence of relation operations.
pub fn relation_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<RelationOp>> {
    prop::collection::vec(relation_op_strategy(), 0..max_len)
}

/// Strategy for customer names.
pub fn customer_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,15}").expect("Invalid regex")
}

/// Strategy for order numbers.
pub fn order_number_strategy() -> impl Strategy<Value = i64> {
    0i64..10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn customer_names_are_capitalized(name in customer_name_strategy()) {
            prop_assert!(name.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
        }

        #[test]
        fn op_sequences_respect_length(ops in relation_ops_strategy(8)) {
            prop_assert!(ops.len() < 8);
        }
    }
}
