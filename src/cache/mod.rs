//! Pagination-acceleration caches
//!
//! Offset pagination costs time linear in the offset on the store side. Two
//! caches make deep pages cheap:
//!
//! - `CursorPool` keeps cursors already advanced to known skip positions,
//!   populated in the background under an `AllocationPolicy`
//! - `RangeResultCache` keeps materialized windows of results
//!
//! Both are bounded, expire entries on their own and are invalidated per
//! namespace by writes.

mod cursor_pool;
mod generation;
mod keys;
mod policy;
mod populator;
mod range_cache;

pub use cursor_pool::{CursorPool, SkippedCursor};
pub use keys::{PoolKey, QueryShape, RangeKey};
pub use policy::{AllocationPolicy, SliceTarget};
pub use populator::{Job, Populator};
pub use range_cache::{window_slice, RangeResultCache, Window};
