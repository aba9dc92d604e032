//! Reverse resolution: surrogate ID → natural key.
//!
//! `IdEntityFinder` special-cases the reserved predefined range — those
//! entities are reconstructed from the static table without a backend
//! call. An unknown ID resolves to `None`: absence of an entity is an
//! expected outcome, not an error.

use crate::backend::{Backend, Cond, RequestOptions};
use crate::cache_manager::IdCacheManager;
use crate::entity::{EntityId, EntityKey, PredefinedProperty};
use crate::error::Result;
use crate::id_finder::IdRow;
use crate::table::{columns, IDS_TABLE};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Reverse resolver, cache-first with a predefined fast path.
#[derive(Clone, Debug)]
pub struct IdEntityFinder {
    backend: Arc<dyn Backend>,
    caches: Arc<IdCacheManager>,
}

impl IdEntityFinder {
    /// Create a finder over a backend and cache manager.
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<IdCacheManager>) -> Self {
        Self { backend, caches }
    }

    /// Resolve an ID to its natural key, or `None` for unknown IDs.
    pub async fn get_entity_by_id(&self, id: EntityId) -> Result<Option<EntityKey>> {
        if id.is_none() {
            return Ok(None);
        }
        if let Some(p) = PredefinedProperty::from_id(id) {
            return Ok(Some(p.entity_key()));
        }
        if let Some(key) = self.caches.get_lookup(id) {
            return Ok(Some(key));
        }

        let row = self
            .backend
            .select_row(
                IDS_TABLE,
                crate::id_finder::ID_ROW_COLUMNS,
                &Cond::eq(columns::ID, id),
            )
            .await?;

        match row {
            Some(row) => {
                let decoded = IdRow::from_row(&row)?;
                self.caches.set_lookup(id, decoded.key.clone());
                self.caches.set_cache(&decoded.key, id, &decoded.sortkey);
                Ok(Some(decoded.key))
            }
            None => Ok(None),
        }
    }

    /// Batch resolve a list of IDs, preserving input order.
    ///
    /// Cache hits and predefined IDs are served per item; everything else
    /// is fetched with a single `IN (...)` query. Unknown IDs are omitted
    /// from the result.
    pub async fn get_entities_from_list(
        &self,
        ids: &[EntityId],
    ) -> Result<Vec<(EntityId, EntityKey)>> {
        let mut resolved: FxHashMap<EntityId, EntityKey> = FxHashMap::default();
        let mut to_fetch: Vec<EntityId> = Vec::new();

        for &id in ids {
            if id.is_none() || resolved.contains_key(&id) || to_fetch.contains(&id) {
                continue;
            }
            if let Some(p) = PredefinedProperty::from_id(id) {
                resolved.insert(id, p.entity_key());
            } else if let Some(key) = self.caches.get_lookup(id) {
                resolved.insert(id, key);
            } else {
                to_fetch.push(id);
            }
        }

        if !to_fetch.is_empty() {
            let rows = self
                .backend
                .select(
                    IDS_TABLE,
                    crate::id_finder::ID_ROW_COLUMNS,
                    &Cond::is_in(columns::ID, to_fetch.iter().copied()),
                    &RequestOptions::default(),
                )
                .await?;
            for row in &rows {
                let decoded = IdRow::from_row(row)?;
                self.caches.set_lookup(decoded.id, decoded.key.clone());
                self.caches.set_cache(&decoded.key, decoded.id, &decoded.sortkey);
                resolved.insert(decoded.id, decoded.key);
            }
        }

        Ok(ids
            .iter()
            .filter_map(|id| resolved.get(id).map(|key| (*id, key.clone())))
            .collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{NS_MAIN, NS_PROPERTY};
    use crate::table::{install_memory_schema, TableSchema};

    async fn seeded() -> (Arc<MemoryBackend>, Arc<IdCacheManager>, IdEntityFinder) {
        let backend = Arc::new(MemoryBackend::new());
        install_memory_schema(&backend, &TableSchema::standard());

        for (id, title) in [(100u64, "Foo"), (101, "Bar")] {
            let key = EntityKey::page(title, NS_MAIN);
            let row = IdRow {
                id: EntityId(id),
                key: key.clone(),
                sortkey: title.into(),
                sort: title.to_lowercase(),
                hash: key.key_hash().as_str().to_string(),
                rev: 0,
            };
            backend.insert(IDS_TABLE, row.to_row()).await.unwrap();
        }

        let caches = Arc::new(IdCacheManager::default());
        let finder = IdEntityFinder::new(backend.clone(), caches.clone());
        (backend, caches, finder)
    }

    #[tokio::test]
    async fn test_get_entity_by_id() {
        let (_backend, _caches, finder) = seeded().await;
        let key = finder.get_entity_by_id(EntityId(100)).await.unwrap();
        assert_eq!(key, Some(EntityKey::page("Foo", NS_MAIN)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_none_not_error() {
        let (_backend, _caches, finder) = seeded().await;
        assert_eq!(finder.get_entity_by_id(EntityId(999)).await.unwrap(), None);
        assert_eq!(finder.get_entity_by_id(EntityId::NONE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_predefined_skips_backend() {
        // Backend has no tables at all: a predefined resolution must not
        // touch it.
        let backend = Arc::new(MemoryBackend::new());
        let caches = Arc::new(IdCacheManager::default());
        let finder = IdEntityFinder::new(backend, caches);

        let id = PredefinedProperty::InstanceOf.id();
        let key = finder.get_entity_by_id(id).await.unwrap().unwrap();
        assert_eq!(key.namespace, NS_PROPERTY);
        assert_eq!(key.title, "_INST");
    }

    #[tokio::test]
    async fn test_reverse_lookup_fills_forward_caches() {
        let (_backend, caches, finder) = seeded().await;
        finder.get_entity_by_id(EntityId(100)).await.unwrap();

        let key = EntityKey::page("Foo", NS_MAIN);
        assert_eq!(caches.get_id(&key), Some(EntityId(100)));
        assert_eq!(caches.get_sort(&key).as_deref(), Some("Foo"));
    }

    #[tokio::test]
    async fn test_batch_list_preserves_order_and_omits_unknown() {
        let (_backend, _caches, finder) = seeded().await;
        let inst = PredefinedProperty::InstanceOf.id();
        let out = finder
            .get_entities_from_list(&[EntityId(101), EntityId(999), inst, EntityId(100)])
            .await
            .unwrap();
        let titles: Vec<&str> = out.iter().map(|(_, k)| k.title.as_str()).collect();
        assert_eq!(titles, vec!["Bar", "_INST", "Foo"]);
    }
}
