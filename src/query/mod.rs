//! Query primitives: filter evaluation, sort specifications, projections.
//!
//! These are the building blocks the in-memory store uses to answer `find`
//! requests, and the sort specification is part of every cache key.

mod filter;
mod projection;
mod sort;

pub use filter::FilterEvaluator;
pub use projection::Projection;
pub use sort::{SortDirection, SortKey, SortSpec};

pub(crate) use sort::compare_values;
