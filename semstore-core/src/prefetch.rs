//! Batched cross-entity attribute prefetch.
//!
//! Rendering a result set of N subjects that all display the same
//! property must not issue N single-subject lookups. `prefetch` resolves
//! all subject IDs in one batch, routes the property to its table, issues
//! **one** backend fetch for the whole set, and stores a subject → values
//! map. `get_property_values` then reads from that map only.
//!
//! Reading a combination that was never prefetched is a programmer error
//! — the batching contract says prefetch first — and fails hard with
//! [`Error::PrefetchNotPrepared`] instead of quietly issuing the N+1
//! query it exists to prevent.

use crate::backend::{Backend, Cond, RequestOptions};
use crate::entity::{EntityId, EntityKey, KeyHash};
use crate::error::{Error, Result};
use crate::id_manager::EntityIdManager;
use crate::data_lookup::SemanticDataLookup;
use crate::property::{DataValue, Property};
use crate::table::columns;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

type PrefetchKey = (String, u64);

/// Map from `(property, request-options)` to per-subject value lists.
///
/// Subjects that were prefetched but hold no values get an explicit empty
/// entry, so "prefetched and empty" is distinguishable from "never
/// prefetched".
#[derive(Debug, Default)]
pub struct PrefetchCache {
    map: Mutex<FxHashMap<PrefetchKey, FxHashMap<KeyHash, Vec<DataValue>>>>,
}

impl PrefetchCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of per-subject entries for one property/options pair.
    pub fn insert(
        &self,
        property_key: &str,
        options_fingerprint: u64,
        entries: FxHashMap<KeyHash, Vec<DataValue>>,
    ) {
        self.map
            .lock()
            .entry((property_key.to_string(), options_fingerprint))
            .or_default()
            .extend(entries);
    }

    /// The prefetched values for one subject, or `None` if that
    /// combination was never prefetched.
    pub fn get(
        &self,
        property_key: &str,
        options_fingerprint: u64,
        subject: &KeyHash,
    ) -> Option<Vec<DataValue>> {
        self.map
            .lock()
            .get(&(property_key.to_string(), options_fingerprint))
            .and_then(|entries| entries.get(subject).cloned())
    }

    /// True if the combination has been prefetched.
    pub fn is_prepared(
        &self,
        property_key: &str,
        options_fingerprint: u64,
        subject: &KeyHash,
    ) -> bool {
        self.map
            .lock()
            .get(&(property_key.to_string(), options_fingerprint))
            .is_some_and(|entries| entries.contains_key(subject))
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.map.lock().clear();
    }
}

/// Batched property-value lookup over a prefetch cache.
#[derive(Debug)]
pub struct PrefetchItemLookup {
    manager: EntityIdManager,
    lookup: SemanticDataLookup,
    cache: PrefetchCache,
}

impl PrefetchItemLookup {
    /// Create the lookup over the identity façade and the uncached data
    /// lookup.
    pub fn new(manager: EntityIdManager, lookup: SemanticDataLookup) -> Self {
        Self {
            manager,
            lookup,
            cache: PrefetchCache::new(),
        }
    }

    /// The underlying prefetch cache.
    pub fn cache(&self) -> &PrefetchCache {
        &self.cache
    }

    /// Batch-fetch one property's values for many subjects in one query.
    ///
    /// Subject IDs are resolved with redirect substitution, so a
    /// prefetched redirect source serves its target's values. Returns the
    /// number of value rows fetched.
    pub async fn prefetch(
        &self,
        subjects: &[EntityKey],
        property: &Property,
        opts: &RequestOptions,
    ) -> Result<usize> {
        self.manager.warm_up_cache(subjects).await?;

        let table = self.lookup.schema().table_for(property)?;
        let handler = self.lookup.handlers().handler_for(table.kind())?;

        // Every requested subject gets an entry, even if it resolves to
        // nothing — that is what marks the combination as prepared.
        let mut entries: FxHashMap<KeyHash, Vec<DataValue>> = FxHashMap::default();
        let mut id_to_hashes: FxHashMap<EntityId, Vec<KeyHash>> = FxHashMap::default();
        for subject in subjects {
            let hash = subject.key_hash();
            entries.entry(hash.clone()).or_default();
            let id = self.manager.get_id(subject).await?;
            if id.is_some() {
                id_to_hashes.entry(id).or_default().push(hash);
            }
        }

        let property_id = if table.holds_fixed_property() {
            EntityId::NONE
        } else {
            self.manager.get_id(&property.entity_key()).await?
        };

        let can_have_rows = !id_to_hashes.is_empty()
            && (table.holds_fixed_property() || property_id.is_some());

        let mut fetched = 0;
        if can_have_rows {
            let mut cols: Vec<&str> = vec![columns::S_ID];
            cols.extend_from_slice(handler.fetch_fields());
            let mut cond = vec![Cond::is_in(columns::S_ID, id_to_hashes.keys().copied())];
            if !table.holds_fixed_property() {
                cond.push(Cond::eq(columns::P_ID, property_id));
            }

            let rows = self
                .manager
                .backend()
                .select(table.name(), &cols, &Cond::And(cond), opts)
                .await?;
            fetched = rows.len();

            for row in &rows {
                let subject_id = EntityId(row.uint(columns::S_ID)?);
                let value = handler.value_from_row(row)?;
                if let Some(hashes) = id_to_hashes.get(&subject_id) {
                    for hash in hashes {
                        entries
                            .entry(hash.clone())
                            .or_default()
                            .push(value.clone());
                    }
                }
            }
        }

        tracing::debug!(
            property = property.key(),
            subjects = subjects.len(),
            rows = fetched,
            "prefetched property values"
        );
        self.cache
            .insert(property.key(), opts.fingerprint(), entries);
        Ok(fetched)
    }

    /// Read a subject's prefetched values.
    ///
    /// Fails with [`Error::PrefetchNotPrepared`] if `prefetch` was never
    /// called for this subject/property/options combination.
    pub fn get_property_values(
        &self,
        subject: &EntityKey,
        property: &Property,
        opts: &RequestOptions,
    ) -> Result<Vec<DataValue>> {
        self.cache
            .get(property.key(), opts.fingerprint(), &subject.key_hash())
            .ok_or_else(|| Error::PrefetchNotPrepared {
                property: property.key().to_string(),
                subject: subject.to_string(),
            })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
