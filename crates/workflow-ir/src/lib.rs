//! The workflow operator algebra (component C) and its coalesce
//! rewriter (component D): a recursive, typed IR over aggregation-
//! pipeline and map-reduce primitives, self-normalizing at every node
//! construction.

mod coalesce;
mod docvar;
mod expression;
mod id_handling;
mod jsfn;
mod node;
mod reshape;
mod scope;
mod selector;

pub use docvar::DocVar;
pub use expression::Expression;
pub use id_handling::IdHandling;
pub use jsfn::JsFn;
pub use node::{GeoNearParams, GroupOp, Grouped, Node, SortDir};
pub use reshape::{Reshape, ReshapeValue};
pub use scope::{Scope, ScopeConflict};
pub use selector::{CmpOp, Selector};
