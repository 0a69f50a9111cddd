//! aerocache - Pagination acceleration and optimistic writes for document stores
//!
//! Deep offset pages are served from pre-positioned cursors and cached result
//! windows; conditional writes are executed first, validated against version
//! tokens and rolled back on mismatch.

pub mod cache;
pub mod config;
pub mod model;
pub mod observability;
pub mod query;
pub mod read;
pub mod service;
pub mod store;
pub mod write;

pub use config::EngineConfig;
pub use service::Engine;
