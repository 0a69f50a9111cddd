//! Document model shared by the caches, the read path and the write engine.
//!
//! Documents are plain JSON objects. Two reserved fields carry engine
//! semantics:
//!
//! - `_id` identifies the document inside its namespace
//! - `_etag` holds the version token stamped by every successful write
//!
//! Sessions are compared by identity, never by value: two handles are the
//! same session only when they point at the same session object.

mod document;
mod namespace;
mod operators;
mod session;
mod token;

pub use document::{
    and_filters, document_etag, document_id, generate_id, get_path, id_filter, remove_path,
    set_path, Document, ETAG_FIELD, ID_FIELD,
};
pub use namespace::Namespace;
pub use operators::{
    contains_update_operators, current_date_value, flatten, is_update_operator, unflatten,
    PayloadError, UPDATE_OPERATORS,
};
pub use session::SessionHandle;
pub use token::VersionToken;
