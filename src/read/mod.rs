//! # Read path
//!
//! Serves pages of collection queries through the range cache and the cursor
//! pool, falling back to the store, and backfills both caches on the way.

mod errors;
mod reader;
mod request;

pub use errors::{ReadError, ReadResult};
pub use reader::CollectionReader;
pub use request::PageRequest;
