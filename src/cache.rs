//! # Resolution Caches
//!
//! Events carry natural keys (host id + service id, object id + kind); the
//! store's foreign keys want surrogate row ids. Issuing a lookup query per
//! event would defeat the whole batching design, so the mapping lives in
//! in-memory caches, along with the few hot attributes every write needs
//! (retention length, "is this row locked from external edits").
//!
//! ## Contract
//!
//! - The cache is a performance optimization, not a source of truth: a miss
//!   on a key that should exist falls back to a synchronous
//!   insert-then-populate against the store, which stays authoritative.
//! - No background eviction. Entries live for the process lifetime or until
//!   an explicit purge (instance/object deletion events).
//! - Safe under concurrent reads from multiple writer threads; a reader can
//!   never observe a partially constructed entry (entries are inserted
//!   whole under the write lock).

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::Result;

// =============================================================================
// Generic Cache
// =============================================================================

/// A concurrent map from natural key to resolved entry.
///
/// Lock discipline: the write lock is taken only for the map mutation
/// itself, never across a store round trip. The fallback closure in
/// [`resolve_or_insert`](Self::resolve_or_insert) runs unlocked, so a slow
/// store cannot stall readers of other keys.
#[derive(Debug)]
pub struct Cache<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Cloned entry for `key`, if cached.
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.read().contains_key(key)
    }

    /// Inserts or replaces an entry.
    pub fn insert(&self, key: K, value: V) {
        self.map.write().insert(key, value);
    }

    /// Returns the cached entry, or runs `fallback` (a synchronous store
    /// round trip) and caches its result.
    ///
    /// If two threads race on the same cold key, both may run the fallback;
    /// the first insert wins and the loser's entry is discarded. Fallbacks
    /// are idempotent upserts against the store, so the race is harmless.
    pub fn resolve_or_insert(
        &self,
        key: &K,
        fallback: impl FnOnce() -> Result<V>,
    ) -> Result<V> {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let value = fallback()?;
        let mut map = self.map.write();
        let entry = map.entry(key.clone()).or_insert(value);
        Ok(entry.clone())
    }

    /// Removes one entry (deletion event for that object).
    pub fn purge(&self, key: &K) -> Option<V> {
        self.map.write().remove(key)
    }

    /// Removes every entry matching `predicate` (instance removal purges
    /// all entries of that poller in one sweep).
    pub fn purge_if(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> usize {
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|k, v| !predicate(k, v));
        before - map.len()
    }

    /// Replaces the whole content from a cold-start reload.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let mut map = self.map.write();
        map.clear();
        map.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

// =============================================================================
// Keys and Entries
// =============================================================================

/// Natural key of a metric index: the (host, service) pair it graphs.
pub type IndexKey = (u64, u64);

/// Resolved index row plus the attributes consulted on every metric write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Surrogate row id used as foreign key by metric writes.
    pub index_id: u64,
    /// Retention length applied to data of this index.
    pub rrd_retention: u32,
    /// True if the row is locked from external edits.
    pub locked: bool,
    /// True for special indexes excluded from rebuild sweeps.
    pub special: bool,
}

/// Natural key of a metric: its index plus the metric name.
pub type MetricKey = (u64, String);

/// Resolved metric row plus its hot attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricInfo {
    /// Surrogate row id used as foreign key by value writes.
    pub metric_id: u64,
    /// Data-source type (gauge, counter, derive, absolute).
    pub metric_type: u16,
    /// Unit string repeated on every perfdata write.
    pub unit_name: String,
    /// True if the row is locked from external edits.
    pub locked: bool,
}

/// Natural key of a severity: event-carried id plus object kind.
pub type SeverityKey = (u64, u16);

/// Natural key of a tag: event-carried id plus tag kind.
pub type TagKey = (u64, u16);

// =============================================================================
// Cache Set
// =============================================================================

/// The four resolution caches the write path consults.
///
/// Created empty and refreshed from the store on cold start via the
/// `replace_all` loaders; populated lazily afterwards.
#[derive(Debug, Default)]
pub struct ResolutionCaches {
    /// (host_id, service_id) → index row.
    pub indexes: Cache<IndexKey, IndexInfo>,
    /// (index_id, metric_name) → metric row.
    pub metrics: Cache<MetricKey, MetricInfo>,
    /// (severity_id, kind) → severity row id.
    pub severities: Cache<SeverityKey, u64>,
    /// (tag_id, kind) → tag row id.
    pub tags: Cache<TagKey, u64>,
}

impl ResolutionCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Purges everything belonging to a removed (host, service) pair: its
    /// index entry and all metrics under that index.
    pub fn purge_index(&self, host_id: u64, service_id: u64) {
        if let Some(info) = self.indexes.purge(&(host_id, service_id)) {
            self.metrics.purge_if(|(index_id, _), _| *index_id == info.index_id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(index_id: u64) -> IndexInfo {
        IndexInfo {
            index_id,
            rrd_retention: 180,
            locked: false,
            special: false,
        }
    }

    /// A cold key resolves through exactly one fallback round trip; the
    /// next lookup is served from the cache.
    #[test]
    fn test_miss_falls_back_once_then_caches() {
        let cache: Cache<IndexKey, IndexInfo> = Cache::new();
        let round_trips = AtomicUsize::new(0);

        let resolve = |key: &IndexKey| {
            cache.resolve_or_insert(key, || {
                round_trips.fetch_add(1, Ordering::SeqCst);
                Ok(info(7))
            })
        };

        let first = resolve(&(1, 7)).unwrap();
        let second = resolve(&(1, 7)).unwrap();
        assert_eq!(first.index_id, 7);
        assert_eq!(second, first);
        assert_eq!(round_trips.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallback_error_propagates_and_caches_nothing() {
        let cache: Cache<IndexKey, IndexInfo> = Cache::new();
        let res = cache.resolve_or_insert(&(2, 2), || {
            Err(crate::error::Error::Executor("insert failed".into()))
        });
        assert!(res.is_err());
        assert!(!cache.contains(&(2, 2)));
    }

    #[test]
    fn test_purge_removes_only_target() {
        let cache: Cache<TagKey, u64> = Cache::new();
        cache.insert((1, 0), 10);
        cache.insert((2, 0), 20);
        assert_eq!(cache.purge(&(1, 0)), Some(10));
        assert!(cache.get(&(1, 0)).is_none());
        assert_eq!(cache.get(&(2, 0)), Some(20));
    }

    #[test]
    fn test_purge_index_drops_dependent_metrics() {
        let caches = ResolutionCaches::new();
        caches.indexes.insert((1, 2), info(42));
        caches.metrics.insert(
            (42, "rta".to_string()),
            MetricInfo {
                metric_id: 100,
                metric_type: 0,
                unit_name: "ms".to_string(),
                locked: false,
            },
        );
        caches.metrics.insert(
            (43, "rta".to_string()),
            MetricInfo {
                metric_id: 101,
                metric_type: 0,
                unit_name: "ms".to_string(),
                locked: false,
            },
        );

        caches.purge_index(1, 2);
        assert!(caches.indexes.get(&(1, 2)).is_none());
        assert!(caches.metrics.get(&(42, "rta".to_string())).is_none());
        assert!(caches.metrics.get(&(43, "rta".to_string())).is_some());
    }

    #[test]
    fn test_replace_all_for_cold_start() {
        let cache: Cache<SeverityKey, u64> = Cache::new();
        cache.insert((9, 9), 999);
        cache.replace_all(vec![((1, 0), 11), ((2, 0), 12)]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&(9, 9)).is_none());
        assert_eq!(cache.get(&(1, 0)), Some(11));
    }

    #[test]
    fn test_concurrent_readers_see_whole_entries() {
        use std::sync::Arc;
        let cache: Arc<Cache<MetricKey, MetricInfo>> = Arc::new(Cache::new());

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    cache.insert(
                        (i, format!("m{i}")),
                        MetricInfo {
                            metric_id: i,
                            metric_type: 0,
                            unit_name: "u".to_string(),
                            locked: false,
                        },
                    );
                }
            })
        };

        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    if let Some(m) = cache.get(&(i, format!("m{i}"))) {
                        // Entry is whole: id matches its key.
                        assert_eq!(m.metric_id, i);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
