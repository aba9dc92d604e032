//! Entity ID lifecycle façade.
//!
//! `EntityIdManager` is the single entry point the storage layer consumes:
//! it composes the forward and reverse finders, the redirect table,
//! duplicate detection, sequence-map storage, table-hash preloading, and
//! cache warm-up.
//!
//! ## ID creation under concurrency
//!
//! `make_id` performs an optimistic insert and treats a unique-constraint
//! violation as "someone else just created it": the row is re-read and the
//! now-existing ID returned. The backend's unique constraint on the
//! natural key is the correctness backstop — there is no application-level
//! locking, so unrelated entity creation never serializes.
//!
//! ## Redirects
//!
//! A redirect maps a source natural key to a target ID. The source's own
//! ID row is preserved (in-links keep resolving), but `get_id` substitutes
//! the target transparently unless the caller asks for the raw ID.

use crate::backend::{Backend, Cond, RequestOptions, Row, Value};
use crate::cache_manager::IdCacheManager;
use crate::entity::{
    normalize_sort_key, EntityId, EntityKey, PredefinedProperty,
};
use crate::entity_finder::IdEntityFinder;
use crate::error::{Error, Result};
use crate::id_finder::{key_cond, EntityIdFinder, IdRow, ID_ROW_COLUMNS};
use crate::table::{
    columns, TableHashes, IDS_TABLE, REDIRECTS_TABLE, SEQMAPS_TABLE, TABLE_HASHES_TABLE,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One group of ID rows sharing a natural key (maintenance/diagnostics).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Page title
    pub title: String,
    /// Namespace number
    pub namespace: i32,
    /// Interwiki prefix
    pub interwiki: String,
    /// Subobject name
    pub subobject: String,
    /// Number of rows carrying this key
    pub count: usize,
}

/// Façade over entity identity: resolution, creation, redirects, and the
/// auxiliary per-entity stores.
#[derive(Clone, Debug)]
pub struct EntityIdManager {
    backend: Arc<dyn Backend>,
    caches: Arc<IdCacheManager>,
    id_finder: EntityIdFinder,
    entity_finder: IdEntityFinder,
}

impl EntityIdManager {
    /// Create the manager over a backend and cache manager.
    pub fn new(backend: Arc<dyn Backend>, caches: Arc<IdCacheManager>) -> Self {
        let id_finder = EntityIdFinder::new(backend.clone(), caches.clone());
        let entity_finder = IdEntityFinder::new(backend.clone(), caches.clone());
        Self {
            backend,
            caches,
            id_finder,
            entity_finder,
        }
    }

    /// The cache manager shared by all identity components.
    pub fn cache_manager(&self) -> &Arc<IdCacheManager> {
        &self.caches
    }

    /// The forward (key → ID) finder.
    pub fn id_finder(&self) -> &EntityIdFinder {
        &self.id_finder
    }

    /// The reverse (ID → key) finder.
    pub fn entity_finder(&self) -> &IdEntityFinder {
        &self.entity_finder
    }

    /// The backend this manager operates on.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve a key to its ID with transparent redirect substitution.
    ///
    /// Returns `EntityId::NONE` for absent entities — no get-or-create
    /// happens here.
    pub async fn get_id(&self, key: &EntityKey) -> Result<EntityId> {
        self.get_id_with(key, true).await
    }

    /// Resolve a key to its own ID, ignoring any redirect on it.
    pub async fn get_id_no_redirect(&self, key: &EntityKey) -> Result<EntityId> {
        self.get_id_with(key, false).await
    }

    async fn get_id_with(&self, key: &EntityKey, resolve_redirect: bool) -> Result<EntityId> {
        // Predefined properties resolve statically, no backend round trip.
        if let Some(id) = predefined_id_for(key) {
            return Ok(id);
        }
        if resolve_redirect && key.is_page() && key.is_local() {
            let target = self.find_redirect(&key.title, key.namespace).await?;
            if target.is_some() {
                return Ok(target);
            }
        }
        self.id_finder.find_id_by_key(key).await
    }

    /// Reverse-resolve an ID (delegates to the entity finder).
    pub async fn get_entity_by_id(&self, id: EntityId) -> Result<Option<EntityKey>> {
        self.entity_finder.get_entity_by_id(id).await
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Get-or-create the ID for a key.
    ///
    /// If the entity exists its ID is returned (updating the stored sort
    /// key if the caller supplied a different one). Otherwise a new row is
    /// inserted with a sequence-allocated ID; a constraint conflict means
    /// a concurrent request won the insert, and the winner's ID is
    /// re-read and returned.
    pub async fn make_id(&self, key: &EntityKey, sortkey: Option<&str>) -> Result<EntityId> {
        if let Some(id) = predefined_id_for(key) {
            return Ok(id);
        }

        let existing = self.id_finder.find_id_by_key(key).await?;
        if existing.is_some() {
            if let Some(sk) = sortkey {
                let current = self.caches.get_sort(key);
                if current.as_deref() != Some(sk) {
                    self.update_sortkey(existing, key, sk).await?;
                }
            }
            return Ok(existing);
        }

        let id = EntityId(self.backend.next_id(IDS_TABLE).await?);
        let sk = sortkey.unwrap_or(&key.title);
        let row = IdRow {
            id,
            key: key.clone(),
            sortkey: sk.to_string(),
            sort: normalize_sort_key(sk),
            hash: key.key_hash().as_str().to_string(),
            rev: 0,
        };

        match self.backend.insert(IDS_TABLE, row.to_row()).await {
            Ok(()) => {
                tracing::debug!(id = id.as_u64(), key = %key, "allocated entity id");
                self.caches.set_cache(key, id, sk);
                self.caches.set_lookup(id, key.clone());
                Ok(id)
            }
            Err(e) if e.is_conflict() => {
                // Lost the race: another request created the row between
                // our read and our insert. Re-read and adopt its ID.
                tracing::debug!(key = %key, "concurrent id creation, re-reading");
                match self.id_finder.fetch_by_key(key).await? {
                    Some(winner) => {
                        self.caches.set_cache(key, winner.id, &winner.sortkey);
                        self.caches.set_lookup(winner.id, key.clone());
                        Ok(winner.id)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn update_sortkey(&self, id: EntityId, key: &EntityKey, sortkey: &str) -> Result<()> {
        self.backend
            .update(
                IDS_TABLE,
                &[
                    (columns::SORTKEY, Value::from(sortkey)),
                    (columns::SORT, Value::from(normalize_sort_key(sortkey))),
                ],
                &Cond::eq(columns::ID, id),
            )
            .await?;
        self.caches.set_cache(key, id, sortkey);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Redirects
    // ------------------------------------------------------------------

    /// Map a source `(title, namespace)` to a target ID.
    ///
    /// The source's own ID row (if any) is left intact; only attribute
    /// lookups are redirected.
    pub async fn add_redirect(&self, target: EntityId, title: &str, namespace: i32) -> Result<()> {
        let row = Row::new()
            .set(columns::TITLE, title)
            .set(columns::NS, namespace)
            .set(columns::TARGET_ID, target);
        self.backend
            .upsert(REDIRECTS_TABLE, &redirect_cond(title, namespace), row)
            .await?;
        tracing::debug!(target_id = target.as_u64(), title, namespace, "redirect added");
        Ok(())
    }

    /// Remove the redirect on a source key, if any.
    pub async fn delete_redirect(&self, title: &str, namespace: i32) -> Result<()> {
        self.backend
            .delete(REDIRECTS_TABLE, &redirect_cond(title, namespace))
            .await?;
        Ok(())
    }

    /// The redirect target for a source key, or `EntityId::NONE`.
    pub async fn find_redirect(&self, title: &str, namespace: i32) -> Result<EntityId> {
        let row = self
            .backend
            .select_row(
                REDIRECTS_TABLE,
                &[columns::TARGET_ID],
                &redirect_cond(title, namespace),
            )
            .await?;
        match row {
            Some(row) => Ok(EntityId(row.uint(columns::TARGET_ID)?)),
            None => Ok(EntityId::NONE),
        }
    }

    /// True if the key is a redirect source.
    ///
    /// Only local pages can redirect; interwiki references and subobjects
    /// always answer `false`.
    pub async fn is_redirect(&self, key: &EntityKey) -> Result<bool> {
        if !key.is_page() || !key.is_local() {
            return Ok(false);
        }
        Ok(self
            .find_redirect(&key.title, key.namespace)
            .await?
            .is_some())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Group a table's rows by natural key and report groups with more
    /// than one member.
    ///
    /// Never used on the hot path; missing key columns are treated as
    /// empty so redirect-style tables can be scanned too.
    pub async fn find_duplicates(&self, table: &str) -> Result<Vec<DuplicateGroup>> {
        let rows = self
            .backend
            .select(
                table,
                &[columns::TITLE, columns::NS, columns::IW, columns::SUBOBJECT],
                &Cond::True,
                &RequestOptions::default(),
            )
            .await?;

        let mut groups: FxHashMap<(String, i32, String, String), usize> = FxHashMap::default();
        for row in &rows {
            let Some(title) = row.opt_text(columns::TITLE) else {
                continue;
            };
            let namespace = row.int(columns::NS).unwrap_or(0) as i32;
            let interwiki = row.opt_text(columns::IW).unwrap_or("").to_string();
            let subobject = row.opt_text(columns::SUBOBJECT).unwrap_or("").to_string();
            *groups
                .entry((title.to_string(), namespace, interwiki, subobject))
                .or_insert(0) += 1;
        }

        let mut out: Vec<DuplicateGroup> = groups
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((title, namespace, interwiki, subobject), count)| DuplicateGroup {
                title,
                namespace,
                interwiki,
                subobject,
                count,
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.title.cmp(&b.title)));
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Warm-up and preloading
    // ------------------------------------------------------------------

    /// Batch-load IDs and sort keys for a list of keys in one query.
    ///
    /// Returns the number of entities found. Keys already cached are
    /// skipped; keys with no row simply stay uncached (absence is never
    /// cached).
    pub async fn warm_up_cache(&self, keys: &[EntityKey]) -> Result<usize> {
        let mut conds = Vec::new();
        for key in keys {
            let hash = self.caches.compute_hash(key);
            if !self.caches.has_cache(&hash) && predefined_id_for(key).is_none() {
                conds.push(key_cond(key));
            }
        }
        if conds.is_empty() {
            return Ok(0);
        }

        let rows = self
            .backend
            .select(
                IDS_TABLE,
                ID_ROW_COLUMNS,
                &Cond::Or(conds),
                &RequestOptions::default(),
            )
            .await?;
        for row in &rows {
            let decoded = IdRow::from_row(row)?;
            self.caches.set_cache(&decoded.key, decoded.id, &decoded.sortkey);
            self.caches.set_lookup(decoded.id, decoded.key.clone());
        }
        tracing::debug!(requested = keys.len(), found = rows.len(), "cache warm-up");
        Ok(rows.len())
    }

    /// Prefetch per-entity property-table content hashes for a set of
    /// subjects.
    ///
    /// The result tells callers which property tables are worth querying
    /// at all for each entity; subjects with no hash row map to an empty
    /// set (nothing stored anywhere). Subjects without an ID are skipped.
    pub async fn preload(
        &self,
        subjects: &[EntityKey],
    ) -> Result<FxHashMap<EntityId, TableHashes>> {
        self.warm_up_cache(subjects).await?;

        let mut out: FxHashMap<EntityId, TableHashes> = FxHashMap::default();
        let mut to_fetch: Vec<EntityId> = Vec::new();
        for key in subjects {
            let id = self.get_id_no_redirect(key).await?;
            if id.is_none() || out.contains_key(&id) {
                continue;
            }
            match self.caches.get_table_hashes(id) {
                Some(hashes) => {
                    out.insert(id, hashes);
                }
                None => to_fetch.push(id),
            }
        }

        if !to_fetch.is_empty() {
            let rows = self
                .backend
                .select(
                    TABLE_HASHES_TABLE,
                    &[columns::ID, columns::HASHES],
                    &Cond::is_in(columns::ID, to_fetch.iter().copied()),
                    &RequestOptions::default(),
                )
                .await?;
            for row in &rows {
                let id = EntityId(row.uint(columns::ID)?);
                let hashes: TableHashes = serde_json::from_str(row.text(columns::HASHES)?)?;
                self.caches.set_table_hashes(id, hashes.clone());
                out.insert(id, hashes);
            }
            // Entities with no hash row hold no data in any table.
            for id in to_fetch {
                out.entry(id).or_default();
            }
        }
        Ok(out)
    }

    /// Writer hook: record the per-table content hashes for an entity.
    pub async fn set_table_hashes(&self, id: EntityId, hashes: &TableHashes) -> Result<()> {
        let blob = serde_json::to_string(hashes)?;
        let row = Row::new().set(columns::ID, id).set(columns::HASHES, blob);
        self.backend
            .upsert(TABLE_HASHES_TABLE, &Cond::eq(columns::ID, id), row)
            .await?;
        self.caches.set_table_hashes(id, hashes.clone());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sequence maps
    // ------------------------------------------------------------------

    /// Store the opaque sequence-map blob for an entity.
    pub async fn save_sequence_map(&self, id: EntityId, map: &serde_json::Value) -> Result<()> {
        let row = Row::new()
            .set(columns::ID, id)
            .set(columns::MAP, serde_json::to_string(map)?);
        self.backend
            .upsert(SEQMAPS_TABLE, &Cond::eq(columns::ID, id), row)
            .await?;
        Ok(())
    }

    /// Load the sequence-map blob for an entity, if any.
    pub async fn load_sequence_map(&self, id: EntityId) -> Result<Option<serde_json::Value>> {
        let row = self
            .backend
            .select_row(SEQMAPS_TABLE, &[columns::MAP], &Cond::eq(columns::ID, id))
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(row.text(columns::MAP)?)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Revision stamps and deletion
    // ------------------------------------------------------------------

    /// Bump the entity's revision stamp, returning the new value.
    ///
    /// Writers call this after changing attribute rows; persistent-cache
    /// freshness checks compare against it.
    pub async fn touch(&self, id: EntityId) -> Result<u64> {
        let row = self
            .backend
            .select_row(IDS_TABLE, &[columns::REV], &Cond::eq(columns::ID, id))
            .await?
            .ok_or_else(|| Error::not_found(format!("entity id {id}")))?;
        let rev = row.uint(columns::REV)? + 1;
        self.backend
            .update(
                IDS_TABLE,
                &[(columns::REV, Value::Uint(rev))],
                &Cond::eq(columns::ID, id),
            )
            .await?;
        Ok(rev)
    }

    /// Current revision stamp of an entity, or `None` if it has no row.
    pub async fn revision(&self, id: EntityId) -> Result<Option<u64>> {
        let row = self
            .backend
            .select_row(IDS_TABLE, &[columns::REV], &Cond::eq(columns::ID, id))
            .await?;
        row.map(|r| r.uint(columns::REV)).transpose()
    }

    /// Remove an entity's ID row and all auxiliary rows, invalidating the
    /// caches that referenced it.
    ///
    /// Called when the entity's last reference is dropped. Attribute rows
    /// in property tables are the writer's responsibility; this drops
    /// identity, redirects touching the entity, its sequence map, and its
    /// table hashes.
    pub async fn delete_id(&self, id: EntityId) -> Result<()> {
        let row = self.id_finder.fetch_by_id(id).await?;

        self.backend
            .delete(IDS_TABLE, &Cond::eq(columns::ID, id))
            .await?;
        self.backend
            .delete(SEQMAPS_TABLE, &Cond::eq(columns::ID, id))
            .await?;
        self.backend
            .delete(TABLE_HASHES_TABLE, &Cond::eq(columns::ID, id))
            .await?;
        self.backend
            .delete(REDIRECTS_TABLE, &Cond::eq(columns::TARGET_ID, id))
            .await?;

        if let Some(row) = &row {
            if row.key.is_page() && row.key.is_local() {
                self.delete_redirect(&row.key.title, row.key.namespace)
                    .await?;
            }
            self.caches.delete_cache(&row.key);
        }
        self.caches.delete_cache_by_id(id);
        tracing::info!(id = id.as_u64(), "entity id deleted");
        Ok(())
    }
}

fn redirect_cond(title: &str, namespace: i32) -> Cond {
    Cond::And(vec![
        Cond::eq(columns::TITLE, title),
        Cond::eq(columns::NS, namespace),
    ])
}

/// Static resolution for predefined property pages.
fn predefined_id_for(key: &EntityKey) -> Option<EntityId> {
    if key.namespace == crate::entity::NS_PROPERTY && key.is_page() && key.is_local() {
        PredefinedProperty::from_key(&key.title).map(|p| p.id())
    } else {
        None
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
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn manager() -> (Arc<MemoryBackend>, EntityIdManager) {
        let backend = Arc::new(MemoryBackend::new());
        install_memory_schema(&backend, &TableSchema::standard());
        let caches = Arc::new(IdCacheManager::default());
        let mgr = EntityIdManager::new(backend.clone(), caches);
        (backend, mgr)
    }

    #[tokio::test]
    async fn test_get_id_absent_is_none() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);
        assert_eq!(mgr.get_id(&key).await.unwrap(), EntityId::NONE);
    }

    #[tokio::test]
    async fn test_make_id_then_get_id_agree() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);

        let id = mgr.make_id(&key, None).await.unwrap();
        assert!(id.is_some());
        assert!(!id.is_predefined(), "allocated above the reserved range");

        // Identity uniqueness: repeated resolution returns the same ID.
        assert_eq!(mgr.get_id(&key).await.unwrap(), id);
        assert_eq!(mgr.make_id(&key, None).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_make_id_updates_sortkey() {
        let (backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = mgr.make_id(&key, Some("Zeta")).await.unwrap();

        // Same key, new sort key → row updated in place.
        assert_eq!(mgr.make_id(&key, Some("Alpha")).await.unwrap(), id);
        let row = backend
            .select_row(
                IDS_TABLE,
                &[columns::SORTKEY, columns::SORT],
                &Cond::eq(columns::ID, id),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.text(columns::SORTKEY).unwrap(), "Alpha");
        assert_eq!(row.text(columns::SORT).unwrap(), "alpha");
    }

    #[tokio::test]
    async fn test_predefined_resolves_without_rows() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("_INST", NS_PROPERTY);
        let id = mgr.get_id(&key).await.unwrap();
        assert_eq!(id, PredefinedProperty::InstanceOf.id());
        assert_eq!(mgr.make_id(&key, None).await.unwrap(), id);
    }

    /// Backend wrapper that fails the first insert with a conflict while
    /// letting a "concurrent" row appear, exercising the re-read path.
    #[derive(Debug)]
    struct ConflictingBackend {
        inner: Arc<MemoryBackend>,
        tripped: AtomicBool,
        winner: Row,
    }

    #[async_trait]
    impl Backend for ConflictingBackend {
        async fn select_row(
            &self,
            table: &str,
            columns: &[&str],
            cond: &Cond,
        ) -> Result<Option<Row>> {
            self.inner.select_row(table, columns, cond).await
        }

        async fn select(
            &self,
            table: &str,
            columns: &[&str],
            cond: &Cond,
            opts: &RequestOptions,
        ) -> Result<Vec<Row>> {
            self.inner.select(table, columns, cond, opts).await
        }

        async fn select_join(
            &self,
            left: &str,
            right: &str,
            on: (&str, &str),
            columns: &[&str],
            cond: &Cond,
            opts: &RequestOptions,
        ) -> Result<Vec<Row>> {
            self.inner
                .select_join(left, right, on, columns, cond, opts)
                .await
        }

        async fn insert(&self, table: &str, row: Row) -> Result<()> {
            if table == IDS_TABLE && !self.tripped.swap(true, Ordering::SeqCst) {
                // The concurrent request's row lands first; ours conflicts.
                self.inner.insert(table, self.winner.clone()).await?;
                return Err(Error::conflict("duplicate natural key"));
            }
            self.inner.insert(table, row).await
        }

        async fn update(
            &self,
            table: &str,
            changes: &[(&str, Value)],
            cond: &Cond,
        ) -> Result<u64> {
            self.inner.update(table, changes, cond).await
        }

        async fn delete(&self, table: &str, cond: &Cond) -> Result<u64> {
            self.inner.delete(table, cond).await
        }

        async fn upsert(&self, table: &str, cond: &Cond, row: Row) -> Result<()> {
            self.inner.upsert(table, cond, row).await
        }

        async fn next_id(&self, table: &str) -> Result<u64> {
            self.inner.next_id(table).await
        }
    }

    #[tokio::test]
    async fn test_make_id_recovers_from_conflict() {
        let inner = Arc::new(MemoryBackend::new());
        install_memory_schema(&inner, &TableSchema::standard());

        let key = EntityKey::page("Foo", NS_MAIN);
        let winner = IdRow {
            id: EntityId(900),
            key: key.clone(),
            sortkey: "Foo".into(),
            sort: "foo".into(),
            hash: key.key_hash().as_str().to_string(),
            rev: 0,
        };
        let backend = Arc::new(ConflictingBackend {
            inner: inner.clone(),
            tripped: AtomicBool::new(false),
            winner: winner.to_row(),
        });

        let mgr = EntityIdManager::new(backend, Arc::new(IdCacheManager::default()));
        let id = mgr.make_id(&key, None).await.unwrap();
        assert_eq!(id, EntityId(900), "conflict resolved by adopting the winner");
        assert_eq!(inner.row_count(IDS_TABLE), 1);
    }

    #[tokio::test]
    async fn test_redirect_lifecycle() {
        let (_backend, mgr) = manager();
        let foo = EntityKey::page("Foo", NS_MAIN);
        let bar = EntityKey::page("Bar", NS_MAIN);

        let foo_id = mgr.make_id(&foo, None).await.unwrap();
        let bar_id = mgr.make_id(&bar, None).await.unwrap();

        mgr.add_redirect(bar_id, "Foo", NS_MAIN).await.unwrap();
        assert!(mgr.is_redirect(&foo).await.unwrap());
        assert_eq!(mgr.get_id(&foo).await.unwrap(), bar_id);
        // The raw ID is still reachable when the caller asks about the
        // redirect source itself.
        assert_eq!(mgr.get_id_no_redirect(&foo).await.unwrap(), foo_id);

        mgr.delete_redirect("Foo", NS_MAIN).await.unwrap();
        assert!(!mgr.is_redirect(&foo).await.unwrap());
        assert_eq!(mgr.get_id(&foo).await.unwrap(), foo_id);
    }

    #[tokio::test]
    async fn test_warm_up_cache_batches() {
        let (_backend, mgr) = manager();
        let keys: Vec<EntityKey> = (0..4)
            .map(|i| EntityKey::page(format!("Page{i}"), NS_MAIN))
            .collect();
        for key in &keys {
            mgr.make_id(key, None).await.unwrap();
        }
        mgr.cache_manager().clear_all();

        let found = mgr.warm_up_cache(&keys).await.unwrap();
        assert_eq!(found, 4);
        for key in &keys {
            assert!(mgr.cache_manager().get_id(key).is_some());
        }

        // Second warm-up finds everything cached and asks for nothing.
        assert_eq!(mgr.warm_up_cache(&keys).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preload_table_hashes() {
        let (_backend, mgr) = manager();
        let foo = EntityKey::page("Foo", NS_MAIN);
        let bar = EntityKey::page("Bar", NS_MAIN);
        let foo_id = mgr.make_id(&foo, None).await.unwrap();
        let bar_id = mgr.make_id(&bar, None).await.unwrap();

        let mut hashes = TableHashes::default();
        hashes.insert("p_text".to_string(), "abc123".to_string());
        mgr.set_table_hashes(foo_id, &hashes).await.unwrap();

        let preloaded = mgr.preload(&[foo.clone(), bar.clone()]).await.unwrap();
        assert_eq!(preloaded.get(&foo_id), Some(&hashes));
        assert_eq!(
            preloaded.get(&bar_id).map(|h| h.len()),
            Some(0),
            "no hash row means no data in any table"
        );
    }

    #[tokio::test]
    async fn test_sequence_map_round_trip() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = mgr.make_id(&key, None).await.unwrap();

        assert_eq!(mgr.load_sequence_map(id).await.unwrap(), None);
        let map = serde_json::json!({"order": [3, 1, 2]});
        mgr.save_sequence_map(id, &map).await.unwrap();
        assert_eq!(mgr.load_sequence_map(id).await.unwrap(), Some(map));
    }

    #[tokio::test]
    async fn test_touch_bumps_revision() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = mgr.make_id(&key, None).await.unwrap();

        assert_eq!(mgr.revision(id).await.unwrap(), Some(0));
        assert_eq!(mgr.touch(id).await.unwrap(), 1);
        assert_eq!(mgr.touch(id).await.unwrap(), 2);
        assert_eq!(mgr.revision(id).await.unwrap(), Some(2));

        assert!(mgr.touch(EntityId(9999)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_id_drops_row_and_caches() {
        let (_backend, mgr) = manager();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = mgr.make_id(&key, None).await.unwrap();
        mgr.save_sequence_map(id, &serde_json::json!([1])).await.unwrap();

        mgr.delete_id(id).await.unwrap();
        assert_eq!(mgr.get_id(&key).await.unwrap(), EntityId::NONE);
        assert_eq!(mgr.get_entity_by_id(id).await.unwrap(), None);
        assert_eq!(mgr.load_sequence_map(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_duplicates() {
        let (backend, mgr) = manager();
        // A scan table without the unique backstop, as a repair scenario.
        backend.create_table("ids_damaged", &[]);
        for id in [1u64, 2, 3] {
            let row = Row::new()
                .set(columns::ID, id + 500)
                .set(columns::TITLE, "Foo")
                .set(columns::NS, 0)
                .set(columns::IW, "")
                .set(columns::SUBOBJECT, "");
            backend.insert("ids_damaged", row).await.unwrap();
        }
        let unique = Row::new()
            .set(columns::ID, 600u64)
            .set(columns::TITLE, "Bar")
            .set(columns::NS, 0)
            .set(columns::IW, "")
            .set(columns::SUBOBJECT, "");
        backend.insert("ids_damaged", unique).await.unwrap();

        let dupes = mgr.find_duplicates("ids_damaged").await.unwrap();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].title, "Foo");
        assert_eq!(dupes[0].count, 3);
    }
}
