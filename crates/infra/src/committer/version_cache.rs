//! Cached aggregate root versions and the check of a request against storage.

use std::collections::HashMap;

use eventlog_core::{Aggregate, AggregateRootVersion};

/// Last known persisted version per aggregate.
///
/// Only ever holds versions read from storage or produced by a successful persist. Entries
/// of an aggregate whose batch failed are dropped, so the next request re-reads storage.
#[derive(Debug, Default)]
pub struct AggregateRootVersionCache {
    versions: HashMap<Aggregate, AggregateRootVersion>,
}

impl AggregateRootVersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, aggregate: &Aggregate) -> Option<AggregateRootVersion> {
        self.versions.get(aggregate).copied()
    }

    pub fn set(&mut self, aggregate: Aggregate, version: AggregateRootVersion) {
        self.versions.insert(aggregate, version);
    }

    pub fn invalidate(&mut self, aggregate: &Aggregate) {
        self.versions.remove(aggregate);
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Outcome of comparing a request's expected version with storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Storage agrees with the request.
    Proceed { refresh: bool },
    /// Storage holds `actual`; the request must be rejected.
    Conflict {
        actual: AggregateRootVersion,
        refresh: bool,
    },
}

impl Reconciliation {
    /// Whether the fetched version should replace the cached one.
    pub fn refresh(&self) -> bool {
        match self {
            Self::Proceed { refresh } | Self::Conflict { refresh, .. } => *refresh,
        }
    }
}

/// Decides a request after its expected version was checked against storage.
///
/// - fetched == expected: proceed (the cache was stale or empty, refresh it)
/// - fetched == cached != expected: the cache was right, the caller is behind
/// - otherwise: conflict, and the cache was stale too
pub fn reconcile(
    expected: AggregateRootVersion,
    cached: Option<AggregateRootVersion>,
    fetched: AggregateRootVersion,
) -> Reconciliation {
    if fetched == expected {
        Reconciliation::Proceed {
            refresh: cached != Some(fetched),
        }
    } else {
        Reconciliation::Conflict {
            actual: fetched,
            refresh: cached != Some(fetched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlog_core::{AggregateRootTypeId, EventSourceId};
    use proptest::prelude::*;

    fn v(n: u64) -> AggregateRootVersion {
        AggregateRootVersion::new(n)
    }

    #[test]
    fn stale_cache_matching_storage_proceeds_and_refreshes() {
        assert_eq!(
            reconcile(v(5), Some(v(3)), v(5)),
            Reconciliation::Proceed { refresh: true }
        );
    }

    #[test]
    fn caller_behind_a_correct_cache_conflicts_without_refresh() {
        assert_eq!(
            reconcile(v(3), Some(v(5)), v(5)),
            Reconciliation::Conflict {
                actual: v(5),
                refresh: false
            }
        );
    }

    #[test]
    fn everyone_disagreeing_conflicts_and_refreshes() {
        assert_eq!(
            reconcile(v(3), Some(v(4)), v(6)),
            Reconciliation::Conflict {
                actual: v(6),
                refresh: true
            }
        );
    }

    #[test]
    fn cache_miss_always_refreshes() {
        assert!(reconcile(v(0), None, v(0)).refresh());
        assert!(reconcile(v(1), None, v(0)).refresh());
    }

    #[test]
    fn invalidate_forgets_the_aggregate() {
        let aggregate = Aggregate::new(EventSourceId::new("a").unwrap(), AggregateRootTypeId::new());
        let mut cache = AggregateRootVersionCache::new();
        cache.set(aggregate.clone(), v(2));
        assert_eq!(cache.get(&aggregate), Some(v(2)));

        cache.invalidate(&aggregate);
        assert!(cache.get(&aggregate).is_none());
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn proceeds_exactly_when_storage_matches(expected in 0u64..20, cached in proptest::option::of(0u64..20), fetched in 0u64..20) {
            let outcome = reconcile(v(expected), cached.map(v), v(fetched));
            prop_assert_eq!(matches!(outcome, Reconciliation::Proceed { .. }), expected == fetched);
            prop_assert_eq!(outcome.refresh(), cached != Some(fetched));
        }
    }
}
