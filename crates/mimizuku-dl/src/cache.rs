//! 充足可能性キャッシュ (concept satisfiability cache)

use mimizuku_core::term::ConceptId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// When a satisfiability verdict may be reused across queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSafety {
    /// Cache both verdicts unconditionally.
    Always,
    /// Unsatisfiability is always safe to cache; a satisfiable verdict is
    /// cached only while the ontology has no nominals, since a nominal can
    /// link an otherwise-isolated model fragment back into the ABox.
    Dynamic,
    /// Caching disabled.
    Never,
}

/// Model features recorded with each verdict at population time, so later
/// reuse decisions can be answered without re-running the tableau.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheFeatures {
    /// The model may touch nominal nodes, i.e. link back into the ABox.
    pub nominals: bool,
    /// The model was built under inverse roles, so constraints can flow
    /// backwards across a merge point.
    pub inverses: bool,
}

#[derive(Debug)]
struct Entry {
    satisfiable: bool,
    pinned: bool,
    stamp: u64,
    features: CacheFeatures,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<ConceptId, Entry>,
    capacity: usize,
    clock: u64,
}

/// Shared LRU cache of per-concept satisfiability verdicts. Primitive
/// concepts (atoms and their negations) are pinned and never evicted;
/// compound concepts compete for the remaining capacity. Verdicts are
/// monotonic: once recorded, an entry is never overwritten with the
/// opposite verdict.
#[derive(Debug)]
pub struct ConceptCache {
    inner: RwLock<Inner>,
    safety: CacheSafety,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ConceptCache {
    pub fn new(capacity: usize, safety: CacheSafety) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                capacity,
                clock: 0,
            }),
            safety,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn safety(&self) -> CacheSafety {
        self.safety
    }

    /// Switch the reuse policy. Entries recorded under the old policy may
    /// not satisfy the new one, so any change drops them.
    pub fn set_safety(&mut self, safety: CacheSafety) {
        if safety != self.safety {
            self.safety = safety;
            self.clear();
        }
    }

    pub fn get(&self, concept: ConceptId) -> Option<bool> {
        if self.safety == CacheSafety::Never {
            return None;
        }
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.clock += 1;
        let clock = inner.clock;
        match inner.map.get_mut(&concept) {
            Some(entry) => {
                entry.stamp = clock;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.satisfiable)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Record a verdict. `pinned` marks primitive concepts; the feature
    /// bits describe the model behind a satisfiable verdict and gate later
    /// reuse (`CacheSafety::Dynamic` refuses nominal-involving models
    /// outright).
    pub fn put(
        &self,
        concept: ConceptId,
        satisfiable: bool,
        pinned: bool,
        features: CacheFeatures,
    ) {
        match self.safety {
            CacheSafety::Never => return,
            CacheSafety::Dynamic if satisfiable && features.nominals => return,
            CacheSafety::Always | CacheSafety::Dynamic => {}
        }
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.clock += 1;
        let clock = inner.clock;
        if let Some(entry) = inner.map.get_mut(&concept) {
            // monotonic: keep the first verdict
            entry.stamp = clock;
            return;
        }
        if inner.map.len() >= inner.capacity {
            let victim = inner
                .map
                .iter()
                .filter(|(_, e)| !e.pinned)
                .min_by_key(|(_, e)| e.stamp)
                .map(|(&c, _)| c);
            match victim {
                Some(victim) => {
                    inner.map.remove(&victim);
                }
                // every entry is pinned, let the map grow
                None => {}
            }
        }
        inner.map.insert(
            concept,
            Entry {
                satisfiable,
                pinned,
                stamp: clock,
                features,
            },
        );
    }

    /// Could the cached models for `a` and `b` be joined at their roots
    /// into one model, skipping a tableau run for the conjunction? Answers
    /// conservatively from the recorded feature bits: a missing or
    /// unsatisfiable entry refuses, and so does any model touching
    /// nominals or built under inverse roles, since either can push
    /// constraints across the join point.
    pub fn is_mergable(&self, a: ConceptId, b: ConceptId) -> bool {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match (inner.map.get(&a), inner.map.get(&b)) {
            (Some(ea), Some(eb)) => {
                ea.satisfiable
                    && eb.satisfiable
                    && ea.features == CacheFeatures::default()
                    && eb.features == CacheFeatures::default()
            }
            _ => false,
        }
    }

    /// Does the cached model for `concept` stay valid when its root node
    /// gains new edges? True only for a recorded model with no nominal
    /// involvement; a missing entry answers false.
    pub fn check_nominal_edges(&self, concept: ConceptId) -> bool {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.map.get(&concept) {
            Some(entry) => !entry.features.nominals,
            None => false,
        }
    }

    /// Drop every verdict. Called when the ontology changes.
    pub fn clear(&self) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.map.clear();
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(guard) => guard.map.len(),
            Err(poisoned) => poisoned.into_inner().map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses_counted() {
        let cache = ConceptCache::new(16, CacheSafety::Always);
        assert_eq!(cache.get(ConceptId(5)), None);
        cache.put(ConceptId(5), true, false, CacheFeatures::default());
        assert_eq!(cache.get(ConceptId(5)), Some(true));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_dynamic_safety_skips_sat_with_nominals() {
        let cache = ConceptCache::new(16, CacheSafety::Dynamic);
        cache.put(ConceptId(3), true, false, CacheFeatures { nominals: true, inverses: false });
        assert_eq!(cache.get(ConceptId(3)), None);
        // unsat is cached regardless
        cache.put(ConceptId(4), false, false, CacheFeatures { nominals: true, inverses: false });
        assert_eq!(cache.get(ConceptId(4)), Some(false));
    }

    #[test]
    fn test_never_disables_cache() {
        let cache = ConceptCache::new(16, CacheSafety::Never);
        cache.put(ConceptId(1), false, false, CacheFeatures::default());
        assert_eq!(cache.get(ConceptId(1)), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let cache = ConceptCache::new(2, CacheSafety::Always);
        cache.put(ConceptId(1), true, true, CacheFeatures::default());
        cache.put(ConceptId(2), true, false, CacheFeatures::default());
        cache.put(ConceptId(3), true, false, CacheFeatures::default());
        // the unpinned entry with the oldest stamp was evicted
        assert_eq!(cache.get(ConceptId(1)), Some(true));
        assert_eq!(cache.get(ConceptId(2)), None);
        assert_eq!(cache.get(ConceptId(3)), Some(true));
    }

    #[test]
    fn test_safety_change_drops_entries() {
        let mut cache = ConceptCache::new(16, CacheSafety::Always);
        cache.put(ConceptId(1), true, false, CacheFeatures::default());
        cache.set_safety(CacheSafety::Dynamic);
        assert!(cache.is_empty());
        assert_eq!(cache.safety(), CacheSafety::Dynamic);
    }

    #[test]
    fn test_mergable_only_for_plain_satisfiable_models() {
        let cache = ConceptCache::new(16, CacheSafety::Always);
        cache.put(ConceptId(10), true, false, CacheFeatures::default());
        cache.put(ConceptId(11), true, false, CacheFeatures::default());
        cache.put(ConceptId(12), false, false, CacheFeatures::default());
        cache.put(ConceptId(13), true, false, CacheFeatures { nominals: false, inverses: true });
        assert!(cache.is_mergable(ConceptId(10), ConceptId(11)));
        // unsatisfiable entry
        assert!(!cache.is_mergable(ConceptId(10), ConceptId(12)));
        // inverse-involving model
        assert!(!cache.is_mergable(ConceptId(10), ConceptId(13)));
        // unknown entry
        assert!(!cache.is_mergable(ConceptId(10), ConceptId(99)));
    }

    #[test]
    fn test_nominal_edge_check_is_conservative() {
        let cache = ConceptCache::new(16, CacheSafety::Always);
        cache.put(ConceptId(5), true, false, CacheFeatures::default());
        cache.put(ConceptId(6), true, false, CacheFeatures { nominals: true, inverses: false });
        assert!(cache.check_nominal_edges(ConceptId(5)));
        assert!(!cache.check_nominal_edges(ConceptId(6)));
        // missing verdict: refuse rather than guess
        assert!(!cache.check_nominal_edges(ConceptId(99)));
    }

    #[test]
    fn test_verdicts_are_monotonic() {
        let cache = ConceptCache::new(16, CacheSafety::Always);
        cache.put(ConceptId(7), false, false, CacheFeatures::default());
        cache.put(ConceptId(7), true, false, CacheFeatures::default());
        assert_eq!(cache.get(ConceptId(7)), Some(false));
    }
}
