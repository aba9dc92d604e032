//! Forward resolution: natural key → surrogate ID.
//!
//! `EntityIdFinder` consults the cache manager before issuing a single-row
//! backend lookup. Positive results are cached; **absence is never
//! cached** — a "not found" is always re-queried, so a concurrent insert
//! by another process is picked up on the next call instead of being
//! shadowed by a stale negative entry.

use crate::backend::{Backend, Cond, RequestOptions, Row};
use crate::cache_manager::IdCacheManager;
use crate::entity::{EntityId, EntityKey};
use crate::error::Result;
use crate::table::{columns, IDS_TABLE};
use std::sync::Arc;

/// All columns of the ID table.
pub const ID_ROW_COLUMNS: &[&str] = &[
    columns::ID,
    columns::TITLE,
    columns::NS,
    columns::IW,
    columns::SUBOBJECT,
    columns::SORTKEY,
    columns::SORT,
    columns::HASH,
    columns::REV,
];

/// One decoded row of the ID table.
#[derive(Clone, Debug, PartialEq)]
pub struct IdRow {
    /// Surrogate ID
    pub id: EntityId,
    /// Natural key
    pub key: EntityKey,
    /// Display sort key
    pub sortkey: String,
    /// Normalized secondary sort field
    pub sort: String,
    /// Natural-key digest (cache addressing only, not a content hash)
    pub hash: String,
    /// Revision/generation stamp, bumped on every data write
    pub rev: u64,
}

impl IdRow {
    /// Decode a backend row.
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: EntityId(row.uint(columns::ID)?),
            key: EntityKey {
                title: row.text(columns::TITLE)?.to_string(),
                namespace: row.int(columns::NS)? as i32,
                interwiki: row.text(columns::IW)?.to_string(),
                subobject: row.text(columns::SUBOBJECT)?.to_string(),
            },
            sortkey: row.text(columns::SORTKEY)?.to_string(),
            sort: row.text(columns::SORT)?.to_string(),
            hash: row.text(columns::HASH)?.to_string(),
            rev: row.uint(columns::REV)?,
        })
    }

    /// Encode into a backend row.
    pub fn to_row(&self) -> Row {
        Row::new()
            .set(columns::ID, self.id)
            .set(columns::TITLE, self.key.title.as_str())
            .set(columns::NS, self.key.namespace)
            .set(columns::IW, self.key.interwiki.as_str())
            .set(columns::SUBOBJECT, self.key.subobject.as_str())
            .set(columns::SORTKEY, self.sortkey.as_str())
            .set(columns::SORT, self.sort.as_str())
            .set(columns::HASH, self.hash.as_str())
            .set(columns::REV, self.rev)
    }
}

/// Exact-match condition over the full 4-tuple.
pub(crate) fn key_cond(key: &EntityKey) -> Cond {
    Cond::And(vec![
        Cond::eq(columns::TITLE, key.title.as_str()),
        Cond::eq(columns::NS, key.namespace),
        Cond::eq(columns::IW, key.interwiki.as_str()),
        Cond::eq(columns::SUBOBJECT, key.subobject.as_str()),
    ])
}

/// Forward resolver, cache-first.
#[derive(Clone, Debug)]
pub struct EntityIdFinder {
    backend: Arc<dyn Backend>,
    caches: Arc<IdCacheManager>,
}

impl EntityIdFinder {
    /// Create a finder over a backend and cache manager.
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<IdCacheManager>) -> Self {
        Self { backend, caches }
    }

    /// Resolve a natural key to its ID, or `EntityId::NONE` if absent.
    ///
    /// Cache-checks first; on a miss issues one single-row lookup filtered
    /// by the 4-tuple and caches a positive result together with its sort
    /// key. Absence falls through uncached.
    pub async fn find_id_by_key(&self, key: &EntityKey) -> Result<EntityId> {
        if let Some(id) = self.caches.get_id(key) {
            return Ok(id);
        }

        let row = self
            .backend
            .select_row(
                IDS_TABLE,
                &[columns::ID, columns::SORTKEY],
                &key_cond(key),
            )
            .await?;

        match row {
            Some(row) => {
                let id = EntityId(row.uint(columns::ID)?);
                let sortkey = row.text(columns::SORTKEY)?;
                self.caches.set_cache(key, id, sortkey);
                Ok(id)
            }
            None => Ok(EntityId::NONE),
        }
    }

    /// Fetch just enough fields to reconstruct ordering: `(id, sortkey)`.
    ///
    /// Hot paths that only need sort order use this instead of a full row
    /// fetch.
    pub async fn fetch_fields_by_id(&self, id: EntityId) -> Result<Option<(EntityId, String)>> {
        let row = self
            .backend
            .select_row(
                IDS_TABLE,
                &[columns::ID, columns::SORTKEY],
                &Cond::eq(columns::ID, id),
            )
            .await?;
        match row {
            Some(row) => Ok(Some((
                EntityId(row.uint(columns::ID)?),
                row.text(columns::SORTKEY)?.to_string(),
            ))),
            None => Ok(None),
        }
    }

    /// Fetch the full ID row by natural key.
    pub async fn fetch_by_key(&self, key: &EntityKey) -> Result<Option<IdRow>> {
        let row = self
            .backend
            .select_row(IDS_TABLE, ID_ROW_COLUMNS, &key_cond(key))
            .await?;
        row.as_ref().map(IdRow::from_row).transpose()
    }

    /// Fetch the full ID row by surrogate ID.
    pub async fn fetch_by_id(&self, id: EntityId) -> Result<Option<IdRow>> {
        let row = self
            .backend
            .select_row(IDS_TABLE, ID_ROW_COLUMNS, &Cond::eq(columns::ID, id))
            .await?;
        row.as_ref().map(IdRow::from_row).transpose()
    }

    /// All IDs matching a `(title, namespace)` pair, across interwikis and
    /// subobjects.
    ///
    /// Used for bulk invalidation and duplicate scans — never for singular
    /// resolution, which needs the full 4-tuple.
    pub async fn find_ids_by_title(&self, title: &str, namespace: i32) -> Result<Vec<EntityId>> {
        let rows = self
            .backend
            .select(
                IDS_TABLE,
                &[columns::ID],
                &Cond::And(vec![
                    Cond::eq(columns::TITLE, title),
                    Cond::eq(columns::NS, namespace),
                ]),
                &RequestOptions::default(),
            )
            .await?;
        rows.iter()
            .map(|row| Ok(EntityId(row.uint(columns::ID)?)))
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{normalize_sort_key, NS_MAIN};
    use crate::table::{install_memory_schema, TableSchema};

    async fn seeded_finder() -> (Arc<MemoryBackend>, EntityIdFinder) {
        let backend = Arc::new(MemoryBackend::new());
        install_memory_schema(&backend, &TableSchema::standard());

        let key = EntityKey::page("Foo", NS_MAIN);
        let row = IdRow {
            id: EntityId(100),
            key: key.clone(),
            sortkey: "Foo".into(),
            sort: normalize_sort_key("Foo"),
            hash: key.key_hash().as_str().to_string(),
            rev: 0,
        };
        backend.insert(IDS_TABLE, row.to_row()).await.unwrap();

        let caches = Arc::new(IdCacheManager::default());
        let finder = EntityIdFinder::new(backend.clone(), caches);
        (backend, finder)
    }

    #[tokio::test]
    async fn test_find_id_cold_then_warm() {
        let (_backend, finder) = seeded_finder().await;
        let key = EntityKey::page("Foo", NS_MAIN);

        let cold = finder.find_id_by_key(&key).await.unwrap();
        assert_eq!(cold, EntityId(100));

        // Warm path must agree with the cold path — the cache is an
        // accelerator, never a second source of truth.
        let warm = finder.find_id_by_key(&key).await.unwrap();
        assert_eq!(warm, cold);
    }

    #[tokio::test]
    async fn test_absence_is_sentinel_and_not_cached() {
        let (backend, finder) = seeded_finder().await;
        let key = EntityKey::page("Missing", NS_MAIN);

        assert_eq!(finder.find_id_by_key(&key).await.unwrap(), EntityId::NONE);

        // A concurrent process creates the entity; the next lookup must
        // see it (no stale negative entry).
        let row = IdRow {
            id: EntityId(200),
            key: key.clone(),
            sortkey: "Missing".into(),
            sort: normalize_sort_key("Missing"),
            hash: key.key_hash().as_str().to_string(),
            rev: 0,
        };
        backend.insert(IDS_TABLE, row.to_row()).await.unwrap();

        assert_eq!(finder.find_id_by_key(&key).await.unwrap(), EntityId(200));
    }

    #[tokio::test]
    async fn test_fetch_fields_by_id() {
        let (_backend, finder) = seeded_finder().await;
        let fields = finder.fetch_fields_by_id(EntityId(100)).await.unwrap();
        assert_eq!(fields, Some((EntityId(100), "Foo".to_string())));
        assert_eq!(finder.fetch_fields_by_id(EntityId(999)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_by_key_round_trips_row() {
        let (_backend, finder) = seeded_finder().await;
        let key = EntityKey::page("Foo", NS_MAIN);
        let row = finder.fetch_by_key(&key).await.unwrap().unwrap();
        assert_eq!(row.id, EntityId(100));
        assert_eq!(row.key, key);
        assert_eq!(row.sort, "foo");
    }

    #[tokio::test]
    async fn test_find_ids_by_title_spans_subobjects() {
        let (backend, finder) = seeded_finder().await;
        let sub = EntityKey::subobject("Foo", NS_MAIN, "s1");
        let row = IdRow {
            id: EntityId(101),
            key: sub.clone(),
            sortkey: "Foo".into(),
            sort: "foo".into(),
            hash: sub.key_hash().as_str().to_string(),
            rev: 0,
        };
        backend.insert(IDS_TABLE, row.to_row()).await.unwrap();

        let mut ids = finder.find_ids_by_title("Foo", NS_MAIN).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![EntityId(100), EntityId(101)]);
    }
}
