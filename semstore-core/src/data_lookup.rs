//! Per-property-table attribute retrieval, with layered caching.
//!
//! `SemanticDataLookup` is the only place that issues backend joins: for
//! tables without a fixed property, rows join the ID table to resolve the
//! property name column. `CachingSemanticDataLookup` layers two tiers on
//! top:
//!
//! - a request-scoped stub cache (one [`StubSemanticData`] per entity,
//!   discarded with the request), and
//! - an optional shared persistent tier holding freshness-tagged
//!   snapshots keyed by `(id, table)` with a bounded TTL.
//!
//! Each `(entity, table)` pair walks the state machine
//! Uncached → Fetching → Cached → Invalidated. Freshness of a persistent
//! snapshot is decided by comparing its recorded revision stamp against
//! the last stamp this process has seen ([`CachingSemanticDataLookup::
//! note_revision`]) — a pure in-memory check, no backend round trip.

use crate::backend::{Backend, Cond, RequestOptions, Row};
use crate::entity::{EntityId, EntityKey};
use crate::error::{Error, Result};
use crate::persistent_cache::KvCache;
use crate::property::{DataValue, HandlerRegistry, Property};
use crate::semantic_data::{SemanticData, StubSemanticData};
use crate::table::{columns, PropertyTableDef, TableSchema, IDS_TABLE};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on persistent snapshot lifetime.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(3600);

/// Fetch progress of one `(entity, table)` pair. Absence means Uncached.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FetchState {
    /// A fetch is underway
    Fetching,
    /// Rows are held in the stub cache
    Cached,
    /// Explicitly invalidated after a write
    Invalidated,
}

/// Freshness metadata carried by a persistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Entity revision stamp at snapshot time
    pub rev: u64,
}

/// Persisted form of one table's rows for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableSnapshot {
    meta: SnapshotMeta,
    rows: Vec<(String, DataValue)>,
}

// ---------------------------------------------------------------------------
// SemanticDataLookup
// ---------------------------------------------------------------------------

/// Uncached per-table fetch of attribute rows.
#[derive(Clone, Debug)]
pub struct SemanticDataLookup {
    backend: Arc<dyn Backend>,
    schema: Arc<TableSchema>,
    handlers: Arc<HandlerRegistry>,
}

impl SemanticDataLookup {
    /// Create a lookup over a backend, table schema, and handler registry.
    pub fn new(
        backend: Arc<dyn Backend>,
        schema: Arc<TableSchema>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            backend,
            schema,
            handlers,
        }
    }

    /// The table schema.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// The handler registry.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Fetch attribute rows of one table for one entity.
    ///
    /// For non-fixed tables this inner-joins the ID table to resolve the
    /// property name column; `constraint` restricts the fetch to a single
    /// known property ID for targeted lookups. `opts` pass through to the
    /// backend predicate builder.
    pub async fn fetch_semantic_data(
        &self,
        id: EntityId,
        table: &PropertyTableDef,
        constraint: Option<EntityId>,
        opts: &RequestOptions,
    ) -> Result<Vec<(String, DataValue)>> {
        let handler = self.handlers.handler_for(table.kind())?;

        if let Some(property_key) = table.fixed_property() {
            let mut cols: Vec<&str> = vec![columns::S_ID];
            cols.extend_from_slice(handler.fetch_fields());
            let rows = self
                .backend
                .select(table.name(), &cols, &Cond::eq(columns::S_ID, id), opts)
                .await?;
            return rows
                .iter()
                .map(|row| Ok((property_key.to_string(), handler.value_from_row(row)?)))
                .collect();
        }

        let mut cols: Vec<&str> = vec![columns::S_ID, columns::TITLE];
        cols.extend_from_slice(handler.fetch_fields());
        let mut cond = vec![Cond::eq(columns::S_ID, id)];
        if let Some(property_id) = constraint {
            cond.push(Cond::eq(columns::P_ID, property_id));
        }
        let rows = self
            .backend
            .select_join(
                table.name(),
                IDS_TABLE,
                (columns::P_ID, columns::ID),
                &cols,
                &Cond::And(cond),
                opts,
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.text(columns::TITLE)?.to_string(),
                    handler.value_from_row(row)?,
                ))
            })
            .collect()
    }

    /// Writer seam: insert one attribute row for a subject.
    ///
    /// Routes the property to its table and encodes the value through the
    /// handler. Shared tables need the property's own ID for the property
    /// column; fixed tables ignore it.
    pub async fn store_value(
        &self,
        subject_id: EntityId,
        property: &Property,
        property_id: EntityId,
        value: &DataValue,
    ) -> Result<()> {
        let table = self.schema.table_for(property)?;
        let handler = self.handlers.handler_for(table.kind())?;

        let mut row = Row::new().set(columns::S_ID, subject_id);
        if !table.holds_fixed_property() {
            if property_id.is_none() {
                return Err(Error::other(format!(
                    "property '{}' needs an id to be stored in shared table '{}'",
                    property.key(),
                    table.name()
                )));
            }
            row.put(columns::P_ID, property_id);
        }
        for (col, v) in handler.fields_from_value(value)? {
            row.put(col, v);
        }
        self.backend.insert(table.name(), row).await
    }
}

// ---------------------------------------------------------------------------
// CachingSemanticDataLookup
// ---------------------------------------------------------------------------

/// Layered lookup: request-scoped stubs plus an optional persistent tier.
#[derive(Debug)]
pub struct CachingSemanticDataLookup {
    lookup: SemanticDataLookup,
    stubs: Mutex<FxHashMap<EntityId, StubSemanticData>>,
    states: Mutex<FxHashMap<(EntityId, String), FetchState>>,
    known_revs: Mutex<FxHashMap<EntityId, u64>>,
    kv: Option<Arc<dyn KvCache>>,
    ttl: Duration,
}

impl CachingSemanticDataLookup {
    /// Layer only the request-scoped stub cache (no persistent tier).
    pub fn new(lookup: SemanticDataLookup) -> Self {
        Self {
            lookup,
            stubs: Mutex::new(FxHashMap::default()),
            states: Mutex::new(FxHashMap::default()),
            known_revs: Mutex::new(FxHashMap::default()),
            kv: None,
            ttl: DEFAULT_SNAPSHOT_TTL,
        }
    }

    /// Layer both tiers, writing freshness-tagged snapshots to `kv`.
    pub fn with_persistent_cache(
        lookup: SemanticDataLookup,
        kv: Arc<dyn KvCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            kv: Some(kv),
            ttl,
            ..Self::new(lookup)
        }
    }

    /// The underlying uncached lookup (for targeted, constraint-driven
    /// fetches that bypass the caches).
    pub fn lookup(&self) -> &SemanticDataLookup {
        &self.lookup
    }

    /// Record the entity's current revision stamp.
    ///
    /// Writers call this after `touch`; snapshots recorded under an older
    /// stamp stop passing the freshness check.
    pub fn note_revision(&self, id: EntityId, rev: u64) {
        self.known_revs.lock().insert(id, rev);
    }

    /// The last revision stamp seen for an entity (0 if never noted).
    pub fn known_revision(&self, id: EntityId) -> u64 {
        self.known_revs.lock().get(&id).copied().unwrap_or(0)
    }

    /// Cheap pre-check deciding whether a persistent snapshot can be
    /// trusted without a backend round trip.
    pub fn is_likely_fresh(&self, id: EntityId, meta: &SnapshotMeta) -> bool {
        meta.rev >= self.known_revision(id)
    }

    /// Current fetch state of one `(entity, table)` pair (`None` =
    /// Uncached).
    pub fn fetch_state(&self, id: EntityId, table: &str) -> Option<FetchState> {
        self.states.lock().get(&(id, table.to_string())).copied()
    }

    fn set_state(&self, id: EntityId, table: &str, state: FetchState) {
        self.states.lock().insert((id, table.to_string()), state);
    }

    fn snapshot_key(id: EntityId, table: &str) -> String {
        format!("semdata:{}:{}", id.as_u64(), table)
    }

    /// Fetch one table's rows for an entity through the cache layers.
    ///
    /// A constrained request (limit/offset/sort/string filters) bypasses
    /// both tiers — a slice is not a faithful snapshot. Unconstrained
    /// requests are served from the stub if that table was already
    /// fetched, then from a fresh persistent snapshot, then from the
    /// backend (populating both tiers).
    pub async fn get_semantic_data_from_table(
        &self,
        id: EntityId,
        subject: &EntityKey,
        table: &PropertyTableDef,
        opts: &RequestOptions,
    ) -> Result<Vec<(String, DataValue)>> {
        if !opts.is_unconstrained() {
            return self.lookup.fetch_semantic_data(id, table, None, opts).await;
        }

        {
            let stubs = self.stubs.lock();
            if let Some(stub) = stubs.get(&id) {
                if stub.has_table(table.name()) {
                    return Ok(stub.table_rows(table.name()).to_vec());
                }
            }
        }

        self.set_state(id, table.name(), FetchState::Fetching);

        // Persistent tier: adopt a fresh snapshot without hitting the
        // backend.
        if let Some(kv) = &self.kv {
            let key = Self::snapshot_key(id, table.name());
            if let Some(bytes) = kv.fetch(&key).await? {
                match serde_json::from_slice::<TableSnapshot>(&bytes) {
                    Ok(snapshot) if self.is_likely_fresh(id, &snapshot.meta) => {
                        self.record_rows(id, subject, table.name(), &snapshot.rows);
                        return Ok(snapshot.rows);
                    }
                    Ok(_) => {
                        tracing::debug!(id = id.as_u64(), table = table.name(), "stale snapshot, refetching");
                    }
                    Err(e) => {
                        tracing::warn!(id = id.as_u64(), table = table.name(), error = %e, "unreadable snapshot, refetching");
                    }
                }
            }
        }

        let rows = match self.lookup.fetch_semantic_data(id, table, None, opts).await {
            Ok(rows) => rows,
            Err(e) => {
                // Failed fetches must not leave the pair stuck in Fetching.
                self.states.lock().remove(&(id, table.name().to_string()));
                return Err(e);
            }
        };
        self.record_rows(id, subject, table.name(), &rows);

        if let Some(kv) = &self.kv {
            let snapshot = TableSnapshot {
                meta: SnapshotMeta {
                    rev: self.known_revision(id),
                },
                rows: rows.clone(),
            };
            let key = Self::snapshot_key(id, table.name());
            kv.save(&key, serde_json::to_vec(&snapshot)?, Some(self.ttl))
                .await?;
        }

        Ok(rows)
    }

    fn record_rows(
        &self,
        id: EntityId,
        subject: &EntityKey,
        table: &str,
        rows: &[(String, DataValue)],
    ) {
        let mut stubs = self.stubs.lock();
        let stub = stubs
            .entry(id)
            .or_insert_with(|| StubSemanticData::new(subject.clone(), id));
        stub.add_table_rows(table, rows);
        drop(stubs);
        self.set_state(id, table, FetchState::Cached);
    }

    /// Freeze the accumulated stub for an entity into a snapshot.
    pub fn semantic_data(&self, id: EntityId) -> Option<SemanticData> {
        self.stubs.lock().get(&id).map(StubSemanticData::freeze)
    }

    /// True once every schema table has been fetched for the entity.
    pub fn is_complete(&self, id: EntityId) -> bool {
        self.stubs
            .lock()
            .get(&id)
            .is_some_and(|stub| stub.is_complete_for(self.lookup.schema()))
    }

    /// Explicitly install a stub (population after a write, so reads in
    /// the same request don't see stale rows).
    pub fn set_lookup_cache(&self, stub: StubSemanticData) {
        let id = stub.subject_id();
        {
            let mut states = self.states.lock();
            for table in self.lookup.schema().tables() {
                if stub.has_table(table.name()) {
                    states.insert((id, table.name().to_string()), FetchState::Cached);
                }
            }
        }
        self.stubs.lock().insert(id, stub);
    }

    /// Drop every cached tier for an entity.
    ///
    /// Clears the stub, marks all table states invalidated, bumps the
    /// known revision so surviving persistent snapshots fail the
    /// freshness check, and deletes the snapshot keys.
    pub async fn invalidate_cache(&self, id: EntityId) -> Result<()> {
        self.stubs.lock().remove(&id);
        {
            let mut states = self.states.lock();
            for table in self.lookup.schema().tables() {
                states.insert((id, table.name().to_string()), FetchState::Invalidated);
            }
        }
        {
            let mut revs = self.known_revs.lock();
            *revs.entry(id).or_insert(0) += 1;
        }
        if let Some(kv) = &self.kv {
            for table in self.lookup.schema().tables() {
                kv.delete(&Self::snapshot_key(id, table.name())).await?;
            }
        }
        tracing::debug!(id = id.as_u64(), "semantic data caches invalidated");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
