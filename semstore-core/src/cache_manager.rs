//! Named collection of bounded in-process caches for entity identity.
//!
//! `IdCacheManager` owns a fixed set of LRU caches provisioned at
//! construction — never created ad hoc:
//!
//! - `entity.id`: natural-key hash → surrogate ID
//! - `entity.sort`: natural-key hash → sort key
//! - `entity.lookup`: surrogate ID → natural key
//! - `propertytable.hash`: surrogate ID → per-table content hashes
//!
//! The id/sort caches are addressed exclusively by [`KeyHash`], the
//! deterministic digest of the 4-tuple, so cache identity never depends on
//! display strings or ad hoc concatenation.
//!
//! These caches live for one logical operation (a render, a batch job) and
//! are not shared across requests; nothing here needs cross-request
//! invalidation.

use crate::entity::{key_hash, EntityId, EntityKey, KeyHash};
use crate::error::{Error, Result};
use crate::table::TableHashes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the natural-key → ID cache.
pub const CACHE_ENTITY_ID: &str = "entity.id";
/// Name of the natural-key → sort key cache.
pub const CACHE_ENTITY_SORT: &str = "entity.sort";
/// Name of the ID → natural-key cache.
pub const CACHE_ENTITY_LOOKUP: &str = "entity.lookup";
/// Name of the ID → property-table hashes cache.
pub const CACHE_TABLE_HASHES: &str = "propertytable.hash";

/// All registered cache names.
pub const CACHE_NAMES: &[&str] = &[
    CACHE_ENTITY_ID,
    CACHE_ENTITY_SORT,
    CACHE_ENTITY_LOOKUP,
    CACHE_TABLE_HASHES,
];

/// Per-cache capacities, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct CacheCapacities {
    /// `entity.id` capacity
    pub id: usize,
    /// `entity.sort` capacity
    pub sort: usize,
    /// `entity.lookup` capacity
    pub lookup: usize,
    /// `propertytable.hash` capacity
    pub table_hashes: usize,
}

impl Default for CacheCapacities {
    fn default() -> Self {
        Self {
            id: 2500,
            sort: 2500,
            lookup: 1000,
            table_hashes: 500,
        }
    }
}

/// Hit/miss counters for one named cache.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Number of lookups answered from the cache
    pub hits: u64,
    /// Number of lookups that fell through
    pub misses: u64,
}

impl CacheStatsSnapshot {
    /// Hit rate in `0.0..=1.0` (0 when no lookups happened).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Named set of fixed-capacity LRU caches with a single key-hash function.
pub struct IdCacheManager {
    id: Mutex<LruCache<KeyHash, EntityId>>,
    sort: Mutex<LruCache<KeyHash, String>>,
    lookup: Mutex<LruCache<EntityId, EntityKey>>,
    table_hashes: Mutex<LruCache<EntityId, TableHashes>>,
    id_stats: CacheStats,
    sort_stats: CacheStats,
    lookup_stats: CacheStats,
    table_hashes_stats: CacheStats,
}

impl std::fmt::Debug for IdCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCacheManager")
            .field("id_entries", &self.id.lock().len())
            .field("sort_entries", &self.sort.lock().len())
            .field("lookup_entries", &self.lookup.lock().len())
            .field("table_hash_entries", &self.table_hashes.lock().len())
            .finish()
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).expect("max(1) is non-zero")
}

impl Default for IdCacheManager {
    fn default() -> Self {
        Self::new(CacheCapacities::default())
    }
}

impl IdCacheManager {
    /// Create the manager with the given per-cache capacities.
    pub fn new(caps: CacheCapacities) -> Self {
        Self {
            id: Mutex::new(LruCache::new(capacity(caps.id))),
            sort: Mutex::new(LruCache::new(capacity(caps.sort))),
            lookup: Mutex::new(LruCache::new(capacity(caps.lookup))),
            table_hashes: Mutex::new(LruCache::new(capacity(caps.table_hashes))),
            id_stats: CacheStats::default(),
            sort_stats: CacheStats::default(),
            lookup_stats: CacheStats::default(),
            table_hashes_stats: CacheStats::default(),
        }
    }

    /// Compute the cache-slot digest of a natural key.
    ///
    /// Deterministic and collision-resistant; the only lookup key into the
    /// id and sort caches.
    pub fn compute_hash(&self, key: &EntityKey) -> KeyHash {
        key_hash(&key.title, key.namespace, &key.interwiki, &key.subobject)
    }

    // ------------------------------------------------------------------
    // id / sort caches (keyed by KeyHash)
    // ------------------------------------------------------------------

    /// Write both the id and sort entries for a key. Overwrites silently —
    /// last writer wins, there is no versioning here.
    pub fn set_cache(&self, key: &EntityKey, id: EntityId, sortkey: &str) {
        let hash = self.compute_hash(key);
        self.id.lock().put(hash.clone(), id);
        self.sort.lock().put(hash, sortkey.to_string());
    }

    /// Cached ID for a key, or `None` on miss (the caller falls through to
    /// a backend query — a miss is cheap and expected).
    pub fn get_id(&self, key: &EntityKey) -> Option<EntityId> {
        self.get_id_by_hash(&self.compute_hash(key))
    }

    /// Cached ID by precomputed hash.
    pub fn get_id_by_hash(&self, hash: &KeyHash) -> Option<EntityId> {
        let found = self.id.lock().get(hash).copied();
        match found {
            Some(id) => {
                self.id_stats.hit();
                Some(id)
            }
            None => {
                self.id_stats.miss();
                None
            }
        }
    }

    /// Cached sort key for a key, or `None` on miss.
    pub fn get_sort(&self, key: &EntityKey) -> Option<String> {
        self.get_sort_by_hash(&self.compute_hash(key))
    }

    /// Cached sort key by precomputed hash.
    pub fn get_sort_by_hash(&self, hash: &KeyHash) -> Option<String> {
        let found = self.sort.lock().get(hash).cloned();
        match found {
            Some(s) => {
                self.sort_stats.hit();
                Some(s)
            }
            None => {
                self.sort_stats.miss();
                None
            }
        }
    }

    /// Drop the id/sort entries for a key, and the reverse-lookup entry if
    /// the ID was still cached.
    pub fn delete_cache(&self, key: &EntityKey) {
        let hash = self.compute_hash(key);
        let id = self.id.lock().pop(&hash);
        self.sort.lock().pop(&hash);
        if let Some(id) = id {
            self.lookup.lock().pop(&id);
            self.table_hashes.lock().pop(&id);
        }
    }

    /// Drop all entries associated with an ID.
    pub fn delete_cache_by_id(&self, id: EntityId) {
        let key = self.lookup.lock().pop(&id);
        self.table_hashes.lock().pop(&id);
        if let Some(key) = key {
            let hash = self.compute_hash(&key);
            self.id.lock().pop(&hash);
            self.sort.lock().pop(&hash);
        }
    }

    /// True if the id cache holds an entry for the hash. Does not count as
    /// a hit or miss, and does not touch LRU order.
    pub fn has_cache(&self, hash: &KeyHash) -> bool {
        self.id.lock().contains(hash)
    }

    // ------------------------------------------------------------------
    // lookup cache (ID → key)
    // ------------------------------------------------------------------

    /// Cache the reverse resolution of an ID.
    pub fn set_lookup(&self, id: EntityId, key: EntityKey) {
        self.lookup.lock().put(id, key);
    }

    /// Cached natural key for an ID.
    pub fn get_lookup(&self, id: EntityId) -> Option<EntityKey> {
        let found = self.lookup.lock().get(&id).cloned();
        match found {
            Some(key) => {
                self.lookup_stats.hit();
                Some(key)
            }
            None => {
                self.lookup_stats.miss();
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // table-hash cache (ID → per-table content hashes)
    // ------------------------------------------------------------------

    /// Cache the per-table content hashes for an ID.
    pub fn set_table_hashes(&self, id: EntityId, hashes: TableHashes) {
        self.table_hashes.lock().put(id, hashes);
    }

    /// Cached per-table content hashes for an ID.
    pub fn get_table_hashes(&self, id: EntityId) -> Option<TableHashes> {
        let found = self.table_hashes.lock().get(&id).cloned();
        match found {
            Some(h) => {
                self.table_hashes_stats.hit();
                Some(h)
            }
            None => {
                self.table_hashes_stats.miss();
                None
            }
        }
    }

    /// Drop the table-hash entry for an ID.
    pub fn delete_table_hashes(&self, id: EntityId) {
        self.table_hashes.lock().pop(&id);
    }

    // ------------------------------------------------------------------
    // dynamic access by cache name
    // ------------------------------------------------------------------

    /// Clear one named cache. Fails with [`Error::UnknownCache`] for names
    /// that were never registered.
    pub fn clear_cache(&self, name: &str) -> Result<()> {
        match name {
            CACHE_ENTITY_ID => self.id.lock().clear(),
            CACHE_ENTITY_SORT => self.sort.lock().clear(),
            CACHE_ENTITY_LOOKUP => self.lookup.lock().clear(),
            CACHE_TABLE_HASHES => self.table_hashes.lock().clear(),
            other => return Err(Error::unknown_cache(other)),
        }
        Ok(())
    }

    /// Number of live entries in one named cache.
    pub fn cache_len(&self, name: &str) -> Result<usize> {
        Ok(match name {
            CACHE_ENTITY_ID => self.id.lock().len(),
            CACHE_ENTITY_SORT => self.sort.lock().len(),
            CACHE_ENTITY_LOOKUP => self.lookup.lock().len(),
            CACHE_TABLE_HASHES => self.table_hashes.lock().len(),
            other => return Err(Error::unknown_cache(other)),
        })
    }

    /// Hit/miss counters for one named cache.
    pub fn stats(&self, name: &str) -> Result<CacheStatsSnapshot> {
        Ok(match name {
            CACHE_ENTITY_ID => self.id_stats.snapshot(),
            CACHE_ENTITY_SORT => self.sort_stats.snapshot(),
            CACHE_ENTITY_LOOKUP => self.lookup_stats.snapshot(),
            CACHE_TABLE_HASHES => self.table_hashes_stats.snapshot(),
            other => return Err(Error::unknown_cache(other)),
        })
    }

    /// Clear every registered cache.
    pub fn clear_all(&self) {
        for name in CACHE_NAMES {
            let _ = self.clear_cache(name);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NS_MAIN;

    #[test]
    fn test_set_get_id_and_sort() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);

        assert_eq!(caches.get_id(&key), None);
        caches.set_cache(&key, EntityId(42), "Foo");
        assert_eq!(caches.get_id(&key), Some(EntityId(42)));
        assert_eq!(caches.get_sort(&key).as_deref(), Some("Foo"));
    }

    #[test]
    fn test_overwrite_is_last_writer_wins() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        caches.set_cache(&key, EntityId(1), "a");
        caches.set_cache(&key, EntityId(2), "b");
        assert_eq!(caches.get_id(&key), Some(EntityId(2)));
        assert_eq!(caches.get_sort(&key).as_deref(), Some("b"));
    }

    #[test]
    fn test_delete_cache_drops_all_tiers() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        caches.set_cache(&key, EntityId(42), "Foo");
        caches.set_lookup(EntityId(42), key.clone());

        caches.delete_cache(&key);
        assert_eq!(caches.get_id(&key), None);
        assert_eq!(caches.get_sort(&key), None);
        assert_eq!(caches.get_lookup(EntityId(42)), None);
    }

    #[test]
    fn test_delete_by_id() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        caches.set_cache(&key, EntityId(7), "Foo");
        caches.set_lookup(EntityId(7), key.clone());

        caches.delete_cache_by_id(EntityId(7));
        assert_eq!(caches.get_lookup(EntityId(7)), None);
        assert_eq!(caches.get_id(&key), None);
    }

    #[test]
    fn test_has_cache_by_hash() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        let hash = caches.compute_hash(&key);
        assert!(!caches.has_cache(&hash));
        caches.set_cache(&key, EntityId(1), "Foo");
        assert!(caches.has_cache(&hash));
    }

    #[test]
    fn test_lru_eviction_by_capacity() {
        let caches = IdCacheManager::new(CacheCapacities {
            id: 2,
            sort: 2,
            lookup: 2,
            table_hashes: 2,
        });
        for i in 0..5u64 {
            let key = EntityKey::page(format!("Page{i}"), NS_MAIN);
            caches.set_cache(&key, EntityId(i + 1), "s");
        }
        assert_eq!(caches.cache_len(CACHE_ENTITY_ID).unwrap(), 2);
        // Oldest entries were evicted
        assert_eq!(caches.get_id(&EntityKey::page("Page0", NS_MAIN)), None);
        assert_eq!(
            caches.get_id(&EntityKey::page("Page4", NS_MAIN)),
            Some(EntityId(5))
        );
    }

    #[test]
    fn test_unknown_cache_name_is_hard_error() {
        let caches = IdCacheManager::default();
        let err = caches.clear_cache("entity.bogus").unwrap_err();
        assert!(matches!(err, Error::UnknownCache(_)));
        assert!(caches.cache_len("nope").is_err());
        assert!(caches.stats("nope").is_err());
    }

    #[test]
    fn test_stats_counters() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        caches.get_id(&key); // miss
        caches.set_cache(&key, EntityId(1), "Foo");
        caches.get_id(&key); // hit

        let stats = caches.stats(CACHE_ENTITY_ID).unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_all() {
        let caches = IdCacheManager::default();
        let key = EntityKey::page("Foo", NS_MAIN);
        caches.set_cache(&key, EntityId(1), "Foo");
        caches.clear_all();
        for name in CACHE_NAMES {
            assert_eq!(caches.cache_len(name).unwrap(), 0);
        }
    }
}
