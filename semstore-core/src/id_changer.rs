//! Surrogate ID reassignment across all dependent tables.
//!
//! Used on page rename, merge, and delete: `move_id` relocates an
//! entity's ID row, and `change` rewrites every reference to the old ID
//! in the property tables and auxiliary tables.
//!
//! Tables are processed in the schema's fixed declaration order and each
//! per-table update is a plain `UPDATE ... WHERE col = old`, which is
//! idempotent — a crashed or failed run can be replayed from the start.
//! A mid-sequence failure surfaces as a single [`Error::IdReassignment`]
//! naming the table that failed so an operator can resume; no cross-table
//! rollback is attempted.

use crate::backend::{Backend, Cond, Value};
use crate::cache_manager::IdCacheManager;
use crate::entity::{EntityId, NS_CONCEPT};
use crate::error::{Error, Result};
use crate::id_finder::{IdRow, ID_ROW_COLUMNS};
use crate::table::{
    columns, TableSchema, CONCEPTS_TABLE, IDS_TABLE, REDIRECTS_TABLE, SEQMAPS_TABLE,
    TABLE_HASHES_TABLE,
};
use std::sync::Arc;

/// Relocates entity IDs and rewrites all dependent references.
#[derive(Clone, Debug)]
pub struct IdChanger {
    backend: Arc<dyn Backend>,
    schema: Arc<TableSchema>,
    caches: Arc<IdCacheManager>,
}

impl IdChanger {
    /// Create a changer over a backend, schema, and cache manager.
    pub fn new(
        backend: Arc<dyn Backend>,
        schema: Arc<TableSchema>,
        caches: Arc<IdCacheManager>,
    ) -> Self {
        Self {
            backend,
            schema,
            caches,
        }
    }

    /// Relocate an entity to a new surrogate ID.
    ///
    /// Reads the row at `old`; allocates a fresh sequence ID when `target`
    /// is `None`, otherwise writes under the explicit target. The old row
    /// is deleted, the non-ID fields are copied, and every dependent
    /// reference is rewritten via [`IdChanger::change`]. Returns the
    /// relocated row.
    pub async fn move_id(&self, old: EntityId, target: Option<EntityId>) -> Result<IdRow> {
        let row = self
            .backend
            .select_row(IDS_TABLE, ID_ROW_COLUMNS, &Cond::eq(columns::ID, old))
            .await?
            .ok_or_else(|| Error::not_found(format!("entity id {old} has no row")))?;
        let mut decoded = IdRow::from_row(&row)?;

        let new = match target {
            Some(id) => id,
            None => EntityId(self.backend.next_id(IDS_TABLE).await?),
        };
        if new == old {
            return Ok(decoded);
        }

        tracing::info!(old = old.as_u64(), new = new.as_u64(), key = %decoded.key, "moving entity id");

        // Delete before insert so the natural-key uniqueness backstop
        // doesn't reject the copy.
        self.backend
            .delete(IDS_TABLE, &Cond::eq(columns::ID, old))
            .await?;
        decoded.id = new;
        self.backend.insert(IDS_TABLE, decoded.to_row()).await?;

        let ns = decoded.key.namespace;
        self.change(old, new, Some((ns, ns))).await?;

        self.caches.delete_cache_by_id(old);
        self.caches.delete_cache(&decoded.key);
        self.caches.set_cache(&decoded.key, new, &decoded.sortkey);
        self.caches.set_lookup(new, decoded.key.clone());

        Ok(decoded)
    }

    /// Rewrite every reference to `old` as `new` across all dependent
    /// tables.
    ///
    /// For property tables without a fixed property both the subject and
    /// property columns are rewritten (the property itself is data, not
    /// schema); fixed tables only carry subject/object references.
    /// Entity-valued object columns are rewritten everywhere.
    ///
    /// When `namespaces` is given as `(old_ns, new_ns)` and the entity
    /// leaves the concept namespace, its concept rows are dropped rather
    /// than renumbered — a non-concept must not keep concept membership.
    pub async fn change(
        &self,
        old: EntityId,
        new: EntityId,
        namespaces: Option<(i32, i32)>,
    ) -> Result<()> {
        for table in self.schema.reassignment_order() {
            self.rewrite(table.name(), columns::S_ID, old, new).await?;
            if !table.holds_fixed_property() {
                self.rewrite(table.name(), columns::P_ID, old, new).await?;
            }
            if table.stores_entity_objects() {
                self.rewrite(table.name(), columns::O_ID, old, new).await?;
            }
        }

        // Concept rows: renumber, unless the entity stopped being a
        // concept, in which case membership must disappear entirely.
        let leaves_concept_ns = matches!(
            namespaces,
            Some((old_ns, new_ns)) if old_ns == NS_CONCEPT && new_ns != NS_CONCEPT
        );
        if leaves_concept_ns {
            self.backend
                .delete(CONCEPTS_TABLE, &Cond::eq(columns::S_ID, old))
                .await
                .map_err(|e| reassignment_error(CONCEPTS_TABLE, e))?;
        } else {
            self.rewrite(CONCEPTS_TABLE, columns::S_ID, old, new)
                .await?;
        }

        // Auxiliary tables reference the ID directly.
        self.rewrite(REDIRECTS_TABLE, columns::TARGET_ID, old, new)
            .await?;
        self.rewrite(SEQMAPS_TABLE, columns::ID, old, new).await?;
        self.rewrite(TABLE_HASHES_TABLE, columns::ID, old, new)
            .await?;

        Ok(())
    }

    /// One idempotent per-table column rewrite.
    async fn rewrite(&self, table: &str, column: &str, old: EntityId, new: EntityId) -> Result<u64> {
        let changed = self
            .backend
            .update(table, &[(column, Value::from(new))], &Cond::eq(column, old))
            .await
            .map_err(|e| reassignment_error(table, e))?;
        if changed > 0 {
            tracing::debug!(table, column, old = old.as_u64(), new = new.as_u64(), rows = changed, "rewrote id references");
        }
        Ok(changed)
    }
}

fn reassignment_error(table: &str, source: Error) -> Error {
    Error::IdReassignment {
        table: table.to_string(),
        source: Box::new(source),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, RequestOptions, Row};
    use crate::cache_manager::IdCacheManager;
    use crate::entity::{EntityKey, NS_MAIN};
    use crate::id_manager::EntityIdManager;
    use crate::table::install_memory_schema;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        mgr: EntityIdManager,
        changer: IdChanger,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let schema = Arc::new(TableSchema::standard());
        install_memory_schema(&backend, &schema);
        let caches = Arc::new(IdCacheManager::default());
        let mgr = EntityIdManager::new(backend.clone(), caches.clone());
        let changer = IdChanger::new(backend.clone(), schema, caches);
        Fixture {
            backend,
            mgr,
            changer,
        }
    }

    async fn count_where(
        backend: &MemoryBackend,
        table: &str,
        column: &str,
        id: EntityId,
    ) -> usize {
        backend
            .select(table, &[column], &Cond::eq(column, id), &RequestOptions::default())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_move_preserves_references() {
        let f = fixture();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = f.mgr.make_id(&key, None).await.unwrap();

        // Referenced as subject in p_text and as object in p_entity.
        f.backend
            .insert(
                "p_text",
                Row::new()
                    .set(columns::S_ID, id)
                    .set(columns::P_ID, 700u64)
                    .set(columns::O_TEXT, "hello"),
            )
            .await
            .unwrap();
        f.backend
            .insert(
                "p_entity",
                Row::new()
                    .set(columns::S_ID, 800u64)
                    .set(columns::P_ID, 701u64)
                    .set(columns::O_ID, id),
            )
            .await
            .unwrap();

        let moved = f
            .changer
            .move_id(id, Some(EntityId(1001)))
            .await
            .unwrap();
        assert_eq!(moved.id, EntityId(1001));
        assert_eq!(moved.key, key);

        // Exactly the rows previously under `id` now answer for 1001,
        // and nothing answers for `id` anymore.
        assert_eq!(count_where(&f.backend, "p_text", columns::S_ID, EntityId(1001)).await, 1);
        assert_eq!(count_where(&f.backend, "p_text", columns::S_ID, id).await, 0);
        assert_eq!(count_where(&f.backend, "p_entity", columns::O_ID, EntityId(1001)).await, 1);
        assert_eq!(count_where(&f.backend, "p_entity", columns::O_ID, id).await, 0);

        assert_eq!(f.mgr.get_entity_by_id(id).await.unwrap(), None);
        assert_eq!(f.mgr.get_entity_by_id(EntityId(1001)).await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_move_allocates_fresh_id_and_copies_fields() {
        let f = fixture();
        let key = EntityKey::page("Foo", NS_MAIN);
        let id = f.mgr.make_id(&key, Some("Custom sort")).await.unwrap();
        let before = f.mgr.id_finder().fetch_by_id(id).await.unwrap().unwrap();

        let moved = f.changer.move_id(id, None).await.unwrap();
        assert_ne!(moved.id, id);
        assert_eq!(moved.sortkey, before.sortkey);
        assert_eq!(moved.hash, before.hash);

        assert_eq!(f.mgr.get_entity_by_id(id).await.unwrap(), None);
        assert_eq!(
            f.mgr.get_entity_by_id(moved.id).await.unwrap(),
            Some(key.clone())
        );
        // Forward resolution follows the move.
        assert_eq!(f.mgr.get_id(&key).await.unwrap(), moved.id);
    }

    #[tokio::test]
    async fn test_move_missing_id_is_not_found() {
        let f = fixture();
        let err = f.changer.move_id(EntityId(4242), None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_change_rewrites_property_column_in_shared_tables() {
        let f = fixture();
        // The moved entity is itself used as a property in a shared table.
        f.backend
            .insert(
                "p_number",
                Row::new()
                    .set(columns::S_ID, 300u64)
                    .set(columns::P_ID, 55u64)
                    .set(columns::O_NUM, 1.5f64),
            )
            .await
            .unwrap();
        // Fixed tables carry no property column; nothing to rewrite there.
        f.backend
            .insert(
                "p_instance_of",
                Row::new().set(columns::S_ID, 300u64).set(columns::O_ID, 55u64),
            )
            .await
            .unwrap();

        f.changer
            .change(EntityId(55), EntityId(66), None)
            .await
            .unwrap();

        assert_eq!(count_where(&f.backend, "p_number", columns::P_ID, EntityId(66)).await, 1);
        assert_eq!(count_where(&f.backend, "p_number", columns::P_ID, EntityId(55)).await, 0);
        assert_eq!(
            count_where(&f.backend, "p_instance_of", columns::O_ID, EntityId(66)).await,
            1,
            "entity-valued objects are rewritten in fixed tables too"
        );
    }

    #[tokio::test]
    async fn test_change_drops_concept_rows_on_namespace_exit() {
        let f = fixture();
        f.backend
            .insert(
                CONCEPTS_TABLE,
                Row::new().set(columns::S_ID, 90u64).set(columns::DEF, "[[X::+]]"),
            )
            .await
            .unwrap();

        f.changer
            .change(EntityId(90), EntityId(91), Some((NS_CONCEPT, NS_MAIN)))
            .await
            .unwrap();
        assert_eq!(f.backend.row_count(CONCEPTS_TABLE), 0, "membership dropped, not renumbered");

        // Staying a concept renumbers instead.
        f.backend
            .insert(
                CONCEPTS_TABLE,
                Row::new().set(columns::S_ID, 92u64).set(columns::DEF, "[[Y::+]]"),
            )
            .await
            .unwrap();
        f.changer
            .change(EntityId(92), EntityId(93), Some((NS_CONCEPT, NS_CONCEPT)))
            .await
            .unwrap();
        assert_eq!(count_where(&f.backend, CONCEPTS_TABLE, columns::S_ID, EntityId(93)).await, 1);
    }

    #[tokio::test]
    async fn test_change_updates_redirect_targets() {
        let f = fixture();
        f.mgr.add_redirect(EntityId(70), "Old", NS_MAIN).await.unwrap();

        f.changer
            .change(EntityId(70), EntityId(71), None)
            .await
            .unwrap();
        assert_eq!(
            f.mgr.find_redirect("Old", NS_MAIN).await.unwrap(),
            EntityId(71)
        );
    }

    #[tokio::test]
    async fn test_failure_names_the_table() {
        let backend = Arc::new(MemoryBackend::new());
        let schema = Arc::new(TableSchema::standard());
        // Deliberately incomplete installation: p_number missing.
        backend.create_table(IDS_TABLE, &[]);
        backend.create_table("p_entity", &[]);
        backend.create_table("p_text", &[]);
        let changer = IdChanger::new(
            backend,
            schema,
            Arc::new(IdCacheManager::default()),
        );

        let err = changer
            .change(EntityId(1), EntityId(2), None)
            .await
            .unwrap_err();
        match err {
            Error::IdReassignment { table, .. } => assert_eq!(table, "p_number"),
            other => panic!("expected IdReassignment, got {other}"),
        }
    }
}
