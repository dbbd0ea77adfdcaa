//! Per-transaction property data.
//!
//! This module provides:
//! - [`DataContainer`]: original and current values of one object
//! - [`DataContainerStore`]: all containers of a transaction, in load order
//!
//! Loading itself is driven by the transaction (see
//! [`crate::ClientTransaction::get_with_lazy_load`]); the store only holds
//! what was loaded.

mod container;
mod store;

pub use container::{DataContainer, Lifecycle};
pub use store::DataContainerStore;
