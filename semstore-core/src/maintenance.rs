//! Maintenance and diagnostic utilities built on the identity primitives.
//!
//! Nothing here runs on a hot path: `DuplicateFinder` scans for natural
//! keys that acquired more than one row (pre-constraint legacy data,
//! repair scenarios), and `CacheWarmer` pre-populates the ID caches in
//! bounded chunks before large batch renders.

use crate::entity::EntityKey;
use crate::error::Result;
use crate::id_manager::{DuplicateGroup, EntityIdManager};
use crate::table::{IDS_TABLE, REDIRECTS_TABLE};

/// Result of a full duplicate scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    /// Natural keys with more than one ID row
    pub entity_groups: Vec<DuplicateGroup>,
    /// Redirect sources with more than one mapping row
    pub redirect_groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    /// True if any table holds duplicates.
    pub fn has_duplicates(&self) -> bool {
        !self.entity_groups.is_empty() || !self.redirect_groups.is_empty()
    }
}

/// Scans the identity tables for duplicate natural keys.
#[derive(Clone, Debug)]
pub struct DuplicateFinder {
    manager: EntityIdManager,
}

impl DuplicateFinder {
    /// Create a finder over the identity façade.
    pub fn new(manager: EntityIdManager) -> Self {
        Self { manager }
    }

    /// Scan the ID and redirect tables.
    ///
    /// Reporting only — repair stays operator driven (delete the losing
    /// rows via `EntityIdManager::delete_id`).
    pub async fn scan(&self) -> Result<DuplicateReport> {
        let entity_groups = self.manager.find_duplicates(IDS_TABLE).await?;
        let redirect_groups = self.manager.find_duplicates(REDIRECTS_TABLE).await?;
        if !entity_groups.is_empty() {
            tracing::warn!(
                groups = entity_groups.len(),
                "duplicate natural keys in the id table"
            );
        }
        Ok(DuplicateReport {
            entity_groups,
            redirect_groups,
        })
    }
}

/// Default number of keys warmed per query.
pub const DEFAULT_WARMUP_CHUNK: usize = 500;

/// Chunked batch cache warm-up.
#[derive(Clone, Debug)]
pub struct CacheWarmer {
    manager: EntityIdManager,
    chunk_size: usize,
}

impl CacheWarmer {
    /// Create a warmer with the default chunk size.
    pub fn new(manager: EntityIdManager) -> Self {
        Self {
            manager,
            chunk_size: DEFAULT_WARMUP_CHUNK,
        }
    }

    /// Override the chunk size (minimum 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Warm the ID/sort caches for a key list, one query per chunk.
    ///
    /// Returns the number of entities found. Keys with no row are simply
    /// left uncached.
    pub async fn warm(&self, keys: &[EntityKey]) -> Result<usize> {
        let mut found = 0;
        for chunk in keys.chunks(self.chunk_size) {
            found += self.manager.warm_up_cache(chunk).await?;
        }
        tracing::info!(requested = keys.len(), found, "cache warm-up finished");
        Ok(found)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend, Row};
    use crate::cache_manager::IdCacheManager;
    use crate::entity::NS_MAIN;
    use crate::table::{columns, install_memory_schema, TableSchema};
    use std::sync::Arc;

    fn manager_with_backend() -> (Arc<MemoryBackend>, EntityIdManager) {
        let backend = Arc::new(MemoryBackend::new());
        install_memory_schema(&backend, &TableSchema::standard());
        let mgr = EntityIdManager::new(backend.clone(), Arc::new(IdCacheManager::default()));
        (backend, mgr)
    }

    #[tokio::test]
    async fn test_clean_store_reports_nothing() {
        let (_backend, mgr) = manager_with_backend();
        mgr.make_id(&EntityKey::page("Foo", NS_MAIN), None)
            .await
            .unwrap();

        let report = DuplicateFinder::new(mgr).scan().await.unwrap();
        assert!(!report.has_duplicates());
    }

    #[tokio::test]
    async fn test_duplicate_redirects_reported() {
        let (backend, mgr) = manager_with_backend();
        // Bypass the unique backstop the way legacy/corrupted data would.
        backend.create_table(REDIRECTS_TABLE, &[]);
        for target in [10u64, 11] {
            backend
                .insert(
                    REDIRECTS_TABLE,
                    Row::new()
                        .set(columns::TITLE, "Foo")
                        .set(columns::NS, 0)
                        .set(columns::TARGET_ID, target),
                )
                .await
                .unwrap();
        }

        let report = DuplicateFinder::new(mgr).scan().await.unwrap();
        assert!(report.has_duplicates());
        assert_eq!(report.redirect_groups.len(), 1);
        assert_eq!(report.redirect_groups[0].count, 2);
    }

    #[tokio::test]
    async fn test_warmer_chunks_cover_all_keys() {
        let (_backend, mgr) = manager_with_backend();
        let keys: Vec<EntityKey> = (0..7)
            .map(|i| EntityKey::page(format!("Page{i}"), NS_MAIN))
            .collect();
        for key in &keys {
            mgr.make_id(key, None).await.unwrap();
        }
        mgr.cache_manager().clear_all();

        let warmer = CacheWarmer::new(mgr.clone()).with_chunk_size(3);
        assert_eq!(warmer.warm(&keys).await.unwrap(), 7);
        for key in &keys {
            assert!(mgr.cache_manager().get_id(key).is_some());
        }
    }
}
