//! Per-namespace invalidation counters
//!
//! A reader notes the generation of a namespace before it queries the store
//! and may only cache what it read while the generation is unchanged. Both
//! caches check and bump under the same lock that guards their inserts, so
//! nothing read before an invalidation lands in the cache after it.

use std::collections::HashMap;

use crate::model::Namespace;

#[derive(Debug, Default)]
pub(crate) struct Generations {
    counters: HashMap<Namespace, u64>,
}

impl Generations {
    /// Generation of `namespace`. The namespace is tracked from here on,
    /// so a later `bump_where` reaches it.
    pub(crate) fn current(&mut self, namespace: &Namespace) -> u64 {
        *self.counters.entry(namespace.clone()).or_insert(0)
    }

    pub(crate) fn bump(&mut self, namespace: &Namespace) {
        *self.counters.entry(namespace.clone()).or_insert(0) += 1;
    }

    pub(crate) fn bump_where<F>(&mut self, predicate: F)
    where
        F: Fn(&Namespace) -> bool,
    {
        for (namespace, generation) in self.counters.iter_mut() {
            if predicate(namespace) {
                *generation += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_changes_only_that_namespace() {
        let mut generations = Generations::default();
        let items = Namespace::new("shop", "items");
        let users = Namespace::new("shop", "users");

        let before = generations.current(&items);
        assert_eq!(generations.current(&users), 0);

        generations.bump(&items);
        assert_ne!(generations.current(&items), before);
        assert_eq!(generations.current(&users), 0);
    }

    #[test]
    fn test_bump_where_reaches_tracked_namespaces() {
        let mut generations = Generations::default();
        let items = Namespace::new("shop", "items");
        let logs = Namespace::new("audit", "logs");
        generations.current(&items);
        generations.current(&logs);

        generations.bump_where(|ns| ns.database() == "shop");
        assert_eq!(generations.current(&items), 1);
        assert_eq!(generations.current(&logs), 0);
    }
}
