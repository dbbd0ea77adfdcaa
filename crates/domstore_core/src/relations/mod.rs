//! Relation end-points.
//!
//! This module provides:
//! - [`RelationEndPoint`] and [`EndPointValue`]: one side of a relation
//! - [`RelationEndPointRegistry`]: all complete end-points of a transaction
//! - [`EndPointChange`]: the net effect of a relation operation
//!
//! ## Consistency
//!
//! Before any end-point is changed, every end-point the change affects is
//! completed (loaded), so both sides of a bidirectional relation always
//! agree in memory. A virtual end-point that is complete is never reloaded.

mod endpoint;
mod modification;
mod registry;

pub use endpoint::{EndPointValue, RelationEndPoint};
pub use modification::EndPointChange;
pub(crate) use modification::{EndPointLookup, RelationPlanner};
pub use registry::RelationEndPointRegistry;
