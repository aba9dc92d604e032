//! Table layout: the ID table, auxiliary tables, and property tables.
//!
//! A property table holds attribute rows for one data-item kind, or for
//! one *fixed* predefined property (in which case the property identity is
//! implicit in the table name and the table carries no property column).
//! [`TableSchema`] is the routing decision: given a property, which table
//! do its values live in.

use crate::backend::MemoryBackend;
use crate::entity::PREDEFINED_ID_MAX;
use crate::error::{Error, Result};
use crate::property::{DataItemKind, Property};
use rustc_hash::FxHashMap;

/// The entity ID table.
pub const IDS_TABLE: &str = "ids";
/// The redirect source → target table.
pub const REDIRECTS_TABLE: &str = "redirects";
/// Per-entity sequence-map blobs.
pub const SEQMAPS_TABLE: &str = "seqmaps";
/// Per-entity property-table content hashes.
pub const TABLE_HASHES_TABLE: &str = "table_hashes";
/// Concept definition/membership rows.
pub const CONCEPTS_TABLE: &str = "concepts";

/// Column names shared across the schema.
pub mod columns {
    /// Surrogate ID (ID table and auxiliary tables)
    pub const ID: &str = "id";
    /// Page title
    pub const TITLE: &str = "title";
    /// Namespace number
    pub const NS: &str = "ns";
    /// Interwiki prefix
    pub const IW: &str = "iw";
    /// Subobject name
    pub const SUBOBJECT: &str = "subobject";
    /// Display sort key
    pub const SORTKEY: &str = "sortkey";
    /// Normalized secondary sort field
    pub const SORT: &str = "sort";
    /// Natural-key digest (cache addressing only)
    pub const HASH: &str = "hash";
    /// Per-entity revision/generation stamp
    pub const REV: &str = "rev";
    /// Redirect target ID
    pub const TARGET_ID: &str = "target_id";
    /// Sequence-map blob
    pub const MAP: &str = "map";
    /// Table-hash blob
    pub const HASHES: &str = "hashes";
    /// Concept definition text
    pub const DEF: &str = "def";

    /// Subject ID (property tables)
    pub const S_ID: &str = "s_id";
    /// Property ID (non-fixed property tables)
    pub const P_ID: &str = "p_id";
    /// Entity-valued object
    pub const O_ID: &str = "o_id";
    /// Text object
    pub const O_TEXT: &str = "o_text";
    /// Numeric object
    pub const O_NUM: &str = "o_num";
    /// Boolean object
    pub const O_BOOL: &str = "o_bool";
    /// Timestamp object (RFC 3339 text)
    pub const O_TS: &str = "o_ts";
    /// URI object
    pub const O_URI: &str = "o_uri";
}

/// Per-entity map of property-table name → content hash, used to skip
/// tables known to hold nothing for an entity.
pub type TableHashes = FxHashMap<String, String>;

// ---------------------------------------------------------------------------
// PropertyTableDef
// ---------------------------------------------------------------------------

/// Definition of one property table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyTableDef {
    name: String,
    kind: DataItemKind,
    fixed_property: Option<String>,
}

impl PropertyTableDef {
    /// A table shared by all properties of one kind (rows carry `p_id`).
    pub fn new(name: impl Into<String>, kind: DataItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fixed_property: None,
        }
    }

    /// A table dedicated to a single fixed property (no `p_id` column;
    /// the property identity is the table name).
    pub fn fixed(name: impl Into<String>, kind: DataItemKind, property_key: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            fixed_property: Some(property_key.to_string()),
        }
    }

    /// The backing table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The data-item kind stored here.
    pub fn kind(&self) -> DataItemKind {
        self.kind
    }

    /// The fixed property key, if this table is dedicated to one property.
    pub fn fixed_property(&self) -> Option<&str> {
        self.fixed_property.as_deref()
    }

    /// True if the property identity is implicit in the table name.
    pub fn holds_fixed_property(&self) -> bool {
        self.fixed_property.is_some()
    }

    /// True if object values in this table are entity references.
    pub fn stores_entity_objects(&self) -> bool {
        self.kind == DataItemKind::Entity
    }
}

// ---------------------------------------------------------------------------
// TableSchema
// ---------------------------------------------------------------------------

/// The set of property tables and the property → table routing.
///
/// Routing prefers a fixed table dedicated to the property; otherwise the
/// first declared table of the property's kind. Declaration order is also
/// the fixed processing order for ID reassignment.
#[derive(Debug)]
pub struct TableSchema {
    tables: Vec<PropertyTableDef>,
    by_name: FxHashMap<String, usize>,
    by_fixed: FxHashMap<String, usize>,
    kind_default: FxHashMap<DataItemKind, usize>,
}

impl TableSchema {
    /// Build a schema from table definitions.
    pub fn new(tables: Vec<PropertyTableDef>) -> Self {
        let mut by_name = FxHashMap::default();
        let mut by_fixed = FxHashMap::default();
        let mut kind_default = FxHashMap::default();
        for (i, table) in tables.iter().enumerate() {
            by_name.insert(table.name.clone(), i);
            match &table.fixed_property {
                Some(key) => {
                    by_fixed.insert(key.clone(), i);
                }
                None => {
                    kind_default.entry(table.kind).or_insert(i);
                }
            }
        }
        Self {
            tables,
            by_name,
            by_fixed,
            kind_default,
        }
    }

    /// The standard table set: one shared table per kind, plus fixed
    /// tables for the hot predefined properties.
    pub fn standard() -> Self {
        Self::new(vec![
            PropertyTableDef::new("p_entity", DataItemKind::Entity),
            PropertyTableDef::new("p_text", DataItemKind::Text),
            PropertyTableDef::new("p_number", DataItemKind::Number),
            PropertyTableDef::new("p_bool", DataItemKind::Bool),
            PropertyTableDef::new("p_time", DataItemKind::Time),
            PropertyTableDef::new("p_uri", DataItemKind::Uri),
            PropertyTableDef::fixed("p_instance_of", DataItemKind::Entity, "_INST"),
            PropertyTableDef::fixed("p_modified", DataItemKind::Time, "_MDAT"),
        ])
    }

    /// Route a property to its table.
    pub fn table_for(&self, property: &Property) -> Result<&PropertyTableDef> {
        if let Some(&i) = self.by_fixed.get(property.key()) {
            return Ok(&self.tables[i]);
        }
        self.kind_default
            .get(&property.kind())
            .map(|&i| &self.tables[i])
            .ok_or_else(|| {
                Error::handler(format!(
                    "no property table routes kind {:?}",
                    property.kind()
                ))
            })
    }

    /// Look up a table definition by name.
    pub fn get(&self, name: &str) -> Option<&PropertyTableDef> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// All table definitions in declaration order.
    pub fn tables(&self) -> &[PropertyTableDef] {
        &self.tables
    }

    /// The fixed processing order for ID reassignment: declaration order.
    ///
    /// A fixed, repeatable order plus idempotent per-table updates is what
    /// makes a crashed reassignment replayable from the start.
    pub fn reassignment_order(&self) -> impl Iterator<Item = &PropertyTableDef> {
        self.tables.iter()
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Memory-backend setup
// ---------------------------------------------------------------------------

/// Create the full table set on a [`MemoryBackend`].
///
/// The ID table gets the unique natural-key constraint that backstops
/// concurrent ID creation, and its sequence starts above the predefined
/// range. Real deployments create the equivalent schema with their own
/// tooling; this helper exists for tests and embedded use.
pub fn install_memory_schema(backend: &MemoryBackend, schema: &TableSchema) {
    use columns::*;

    backend.create_table(IDS_TABLE, &[&[TITLE, NS, IW, SUBOBJECT], &[ID]]);
    backend.set_sequence(IDS_TABLE, PREDEFINED_ID_MAX);
    backend.create_table(REDIRECTS_TABLE, &[&[TITLE, NS]]);
    backend.create_table(SEQMAPS_TABLE, &[&[ID]]);
    backend.create_table(TABLE_HASHES_TABLE, &[&[ID]]);
    backend.create_table(CONCEPTS_TABLE, &[]);
    for table in schema.tables() {
        backend.create_table(table.name(), &[]);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
