//! Page requests

use crate::cache::{AllocationPolicy, QueryShape};
use crate::model::{Document, Namespace, SessionHandle};
use crate::query::SortSpec;

/// One page of a collection query. Pages are numbered from 1.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub session: Option<SessionHandle>,
    pub namespace: Namespace,
    pub page: u64,
    pub pagesize: u64,
    pub sort: SortSpec,
    pub filter: Document,
    pub projection: Document,
    pub hint: Document,
    /// How the cursor pool is populated after this read
    pub allocation_policy: AllocationPolicy,
    /// Serve from and capture into the range cache
    pub use_cache: bool,
}

impl PageRequest {
    /// First page of 100 unsorted, unfiltered results
    pub fn new(namespace: Namespace) -> Self {
        Self {
            session: None,
            namespace,
            page: 1,
            pagesize: 100,
            sort: SortSpec::none(),
            filter: Document::new(),
            projection: Document::new(),
            hint: Document::new(),
            allocation_policy: AllocationPolicy::None,
            use_cache: true,
        }
    }

    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_page(mut self, page: u64, pagesize: u64) -> Self {
        self.page = page;
        self.pagesize = pagesize;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_hint(mut self, hint: Document) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.allocation_policy = policy;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Results before the first one of this page
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.pagesize)
    }

    /// The query this page belongs to
    pub fn shape(&self) -> QueryShape {
        QueryShape::new(self.namespace.clone())
            .with_session(self.session.clone())
            .with_filter(self.filter.clone())
            .with_sort(self.sort.clone())
            .with_projection(self.projection.clone())
            .with_hint(self.hint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip() {
        let ns = Namespace::new("db", "c");
        assert_eq!(PageRequest::new(ns.clone()).skip(), 0);
        assert_eq!(PageRequest::new(ns.clone()).with_page(3, 25).skip(), 50);
        assert_eq!(PageRequest::new(ns).with_page(0, 25).skip(), 0);
    }
}
