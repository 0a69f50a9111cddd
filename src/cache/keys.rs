//! Cache keys
//!
//! Both caches key their entries by the *shape* of a query (everything that
//! determines which documents come back and in which order) plus a position:
//! a skip count for pooled cursors, a `[from, to)` window for cached results.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::model::{Document, Namespace, SessionHandle};
use crate::query::SortSpec;

fn fingerprint(document: &Document) -> String {
    // Map keys are kept sorted, so equal documents serialize identically
    serde_json::to_string(document).unwrap_or_default()
}

/// Everything that identifies one logical query, minus its position.
#[derive(Clone)]
pub struct QueryShape {
    session: Option<SessionHandle>,
    namespace: Namespace,
    filter: Document,
    sort: SortSpec,
    projection: Document,
    hint: Document,
    fingerprint: String,
}

impl QueryShape {
    /// Unfiltered, unsorted query over `namespace` without a session
    pub fn new(namespace: Namespace) -> Self {
        let mut shape = Self {
            session: None,
            namespace,
            filter: Document::new(),
            sort: SortSpec::none(),
            projection: Document::new(),
            hint: Document::new(),
            fingerprint: String::new(),
        };
        shape.refresh_fingerprint();
        shape
    }

    pub fn with_session(mut self, session: Option<SessionHandle>) -> Self {
        self.session = session;
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self.refresh_fingerprint();
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self.refresh_fingerprint();
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = projection;
        self.refresh_fingerprint();
        self
    }

    pub fn with_hint(mut self, hint: Document) -> Self {
        self.hint = hint;
        self.refresh_fingerprint();
        self
    }

    fn refresh_fingerprint(&mut self) {
        self.fingerprint = format!(
            "filter={} sort={} projection={} hint={}",
            fingerprint(&self.filter),
            self.sort,
            fingerprint(&self.projection),
            fingerprint(&self.hint)
        );
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn projection(&self) -> &Document {
        &self.projection
    }

    pub fn hint(&self) -> &Document {
        &self.hint
    }

    /// Canonical text of the filter, used to key collection-size estimates
    pub(crate) fn filter_fingerprint(&self) -> String {
        fingerprint(&self.filter)
    }
}

impl PartialEq for QueryShape {
    fn eq(&self, other: &Self) -> bool {
        SessionHandle::same(self.session.as_ref(), other.session.as_ref())
            && self.namespace == other.namespace
            && self.fingerprint == other.fingerprint
    }
}

impl Eq for QueryShape {}

impl Hash for QueryShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session.hash(state);
        self.namespace.hash(state);
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryShape")
            .field("session", &self.session)
            .field("namespace", &self.namespace)
            .field("query", &self.fingerprint)
            .finish()
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.namespace, self.fingerprint)
    }
}

/// Key of a pooled cursor: a query shape advanced by `skipped` results.
///
/// Several cursors may sit at the same skip; `entry_id` tells them apart.
/// Keys built for lookups carry entry id 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    shape: Arc<QueryShape>,
    skipped: u64,
    entry_id: u64,
}

impl PoolKey {
    /// Lookup key for a request at `skipped`
    pub fn new(shape: Arc<QueryShape>, skipped: u64) -> Self {
        Self {
            shape,
            skipped,
            entry_id: 0,
        }
    }

    pub(crate) fn with_entry_id(shape: Arc<QueryShape>, skipped: u64, entry_id: u64) -> Self {
        Self {
            shape,
            skipped,
            entry_id,
        }
    }

    pub fn shape(&self) -> &Arc<QueryShape> {
        &self.shape
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Key of a cached result window `[from, to)`.
///
/// `exhausted` marks a window that reaches the end of the result set, so it
/// also answers requests running past `to`. The cache gives every stored
/// key its own `entry_id`; lookup keys carry 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeKey {
    shape: Arc<QueryShape>,
    from: u64,
    to: u64,
    exhausted: bool,
    entry_id: u64,
}

impl RangeKey {
    /// Builds a key; `to` is clamped so that `from <= to`.
    pub fn new(shape: Arc<QueryShape>, from: u64, to: u64, exhausted: bool) -> Self {
        Self {
            shape,
            from,
            to: to.max(from),
            exhausted,
            entry_id: 0,
        }
    }

    pub(crate) fn with_entry_id(mut self, entry_id: u64) -> Self {
        self.entry_id = entry_id;
        self
    }

    /// Lookup key for the page `[from, to)`
    pub fn request(shape: Arc<QueryShape>, from: u64, to: u64) -> Self {
        Self::new(shape, from, to, false)
    }

    pub fn shape(&self) -> &Arc<QueryShape> {
        &self.shape
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    pub fn to(&self) -> u64 {
        self.to
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True when this cached window can answer `requested`: same shape and
    /// either full coverage or an exhausted window starting at or before the
    /// requested start.
    pub fn covers(&self, requested: &RangeKey) -> bool {
        if self.shape != requested.shape || self.from > requested.from {
            return false;
        }
        self.to >= requested.to || self.exhausted
    }
}
