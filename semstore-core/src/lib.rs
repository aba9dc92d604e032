//! # semstore-core
//!
//! Entity identity and caching core for a relational triple store.
//!
//! This crate maps domain entities (pages, properties, subobjects) to
//! stable integer surrogate IDs, resolves redirects transparently, tracks
//! per-entity sort keys and revision stamps, and accelerates repeated
//! attribute lookups through layered in-process and persistent caches.
//! Query parsing and rendering are external collaborators; this crate is
//! the piece that must stay consistent between the relational backing
//! store and its caches under concurrent read/write access.
//!
//! ## Design principles
//!
//! 1. **Async at the I/O seam only**: the relational backend and the
//!    persistent cache are async traits; everything above them is plain
//!    single-threaded-per-request logic.
//! 2. **Absence is a sentinel, not an error**: `EntityId::NONE` and
//!    `None` answer "does this exist"; errors are backend failures or
//!    caller contract violations.
//! 3. **Optimistic ID creation**: concurrent creation of the same natural
//!    key is resolved by the backend's unique constraint plus a re-read,
//!    never by application-level locking.
//!
//! ## Example
//!
//! ```ignore
//! use semstore_core::prelude::*;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let schema = Arc::new(TableSchema::standard());
//! install_memory_schema(&backend, &schema);
//!
//! let manager = EntityIdManager::new(backend.clone(), Arc::new(IdCacheManager::default()));
//! let id = manager.make_id(&EntityKey::page("Foo", NS_MAIN), None).await?;
//! assert_eq!(manager.get_id(&EntityKey::page("Foo", NS_MAIN)).await?, id);
//! ```

pub mod backend;
pub mod cache_manager;
pub mod data_lookup;
pub mod entity;
pub mod entity_finder;
pub mod error;
pub mod id_changer;
pub mod id_finder;
pub mod id_manager;
pub mod maintenance;
pub mod persistent_cache;
pub mod prefetch;
pub mod property;
pub mod semantic_data;
pub mod table;

// Re-export main types
pub use backend::{
    cmp_values, Backend, Cond, MemoryBackend, OrderBy, RequestOptions, Row, StringCond,
    StringMatch, Value,
};
pub use cache_manager::{
    CacheCapacities, CacheStatsSnapshot, IdCacheManager, CACHE_ENTITY_ID, CACHE_ENTITY_LOOKUP,
    CACHE_ENTITY_SORT, CACHE_NAMES, CACHE_TABLE_HASHES,
};
pub use data_lookup::{
    CachingSemanticDataLookup, FetchState, SemanticDataLookup, SnapshotMeta,
    DEFAULT_SNAPSHOT_TTL,
};
pub use entity::{
    key_hash, normalize_sort_key, sha256_hex, EntityId, EntityKey, KeyHash, PredefinedProperty,
    NS_CONCEPT, NS_MAIN, NS_PROPERTY, PREDEFINED_ID_MAX, PREDEFINED_PROPERTIES,
};
pub use entity_finder::IdEntityFinder;
pub use error::{Error, Result};
pub use id_changer::IdChanger;
pub use id_finder::{EntityIdFinder, IdRow, ID_ROW_COLUMNS};
pub use id_manager::{DuplicateGroup, EntityIdManager};
pub use maintenance::{CacheWarmer, DuplicateFinder, DuplicateReport, DEFAULT_WARMUP_CHUNK};
pub use persistent_cache::{KvCache, MemoryKvCache};
pub use prefetch::{PrefetchCache, PrefetchItemLookup};
pub use property::{DataItemHandler, DataItemKind, DataValue, HandlerRegistry, Property};
pub use semantic_data::{SemanticData, StubSemanticData};
pub use table::{
    install_memory_schema, PropertyTableDef, TableHashes, TableSchema, CONCEPTS_TABLE, IDS_TABLE,
    REDIRECTS_TABLE, SEQMAPS_TABLE, TABLE_HASHES_TABLE,
};

/// Prelude module for convenient imports of the identity façade and its
/// collaborators.
pub mod prelude {
    pub use crate::backend::{Backend, Cond, MemoryBackend, RequestOptions, Row, Value};
    pub use crate::cache_manager::{CacheCapacities, IdCacheManager};
    pub use crate::data_lookup::{CachingSemanticDataLookup, SemanticDataLookup};
    pub use crate::entity::{EntityId, EntityKey, NS_CONCEPT, NS_MAIN, NS_PROPERTY};
    pub use crate::error::{Error, Result};
    pub use crate::id_changer::IdChanger;
    pub use crate::id_manager::EntityIdManager;
    pub use crate::persistent_cache::{KvCache, MemoryKvCache};
    pub use crate::prefetch::PrefetchItemLookup;
    pub use crate::property::{DataItemKind, DataValue, HandlerRegistry, Property};
    pub use crate::table::{install_memory_schema, TableSchema};
}
