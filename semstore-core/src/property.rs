//! Properties, data-item kinds, and the handler dispatch table.
//!
//! Attribute values are a closed set of kinds ([`DataItemKind`]); each
//! kind maps at construction time to a [`DataItemHandler`] that knows the
//! object columns of its property tables, how to build `WHERE` predicates
//! for a value, and how to convert rows to values and back. Asking for a
//! kind that was never registered fails fast with a typed error — nothing
//! falls through silently.

use crate::backend::{Cond, Row, Value};
use crate::entity::{EntityId, EntityKey, NS_PROPERTY, PredefinedProperty};
use crate::error::{Error, Result};
use crate::table::columns;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Closed enumeration of attribute value kinds.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataItemKind {
    /// Reference to another entity
    Entity,
    /// Free text
    Text,
    /// Floating-point number
    Number,
    /// Boolean flag
    Bool,
    /// Timestamp
    Time,
    /// External URI
    Uri,
}

/// One attribute value.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValue {
    /// Reference to another entity by surrogate ID
    Entity(EntityId),
    /// Free text
    Text(String),
    /// Floating-point number
    Number(f64),
    /// Boolean flag
    Bool(bool),
    /// UTC timestamp
    Time(DateTime<Utc>),
    /// External URI
    Uri(String),
}

impl DataValue {
    /// The kind of this value.
    pub fn kind(&self) -> DataItemKind {
        match self {
            DataValue::Entity(_) => DataItemKind::Entity,
            DataValue::Text(_) => DataItemKind::Text,
            DataValue::Number(_) => DataItemKind::Number,
            DataValue::Bool(_) => DataItemKind::Bool,
            DataValue::Time(_) => DataItemKind::Time,
            DataValue::Uri(_) => DataItemKind::Uri,
        }
    }
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// A property: a stable key plus the kind of values it holds.
///
/// The key doubles as the title of the property's page in the property
/// namespace. Predefined properties carry reserved keys and IDs.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Property {
    key: String,
    kind: DataItemKind,
}

impl Property {
    /// A user-defined property.
    pub fn new(key: impl Into<String>, kind: DataItemKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    /// A predefined property with its built-in kind.
    pub fn predefined(p: PredefinedProperty) -> Self {
        let kind = match p {
            PredefinedProperty::InstanceOf
            | PredefinedProperty::SubcategoryOf
            | PredefinedProperty::RedirectsTo => DataItemKind::Entity,
            PredefinedProperty::ModificationDate => DataItemKind::Time,
            PredefinedProperty::SortKey => DataItemKind::Text,
            PredefinedProperty::Uri => DataItemKind::Uri,
        };
        Self {
            key: p.key().to_string(),
            kind,
        }
    }

    /// The stable property key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The kind of values this property holds.
    pub fn kind(&self) -> DataItemKind {
        self.kind
    }

    /// The predefined property behind this key, if any.
    pub fn as_predefined(&self) -> Option<PredefinedProperty> {
        PredefinedProperty::from_key(&self.key)
    }

    /// Natural key of the page backing this property.
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::page(self.key.clone(), NS_PROPERTY)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Column-level codec for one data-item kind.
pub trait DataItemHandler: Debug + Send + Sync {
    /// The kind this handler serves.
    fn kind(&self) -> DataItemKind;

    /// Object columns to fetch from a property table of this kind.
    fn fetch_fields(&self) -> &'static [&'static str];

    /// `WHERE` predicate matching rows holding exactly this value.
    fn where_conds(&self, value: &DataValue) -> Result<Cond>;

    /// Decode the object columns of a row into a value.
    fn value_from_row(&self, row: &Row) -> Result<DataValue>;

    /// Encode a value into object columns for insertion.
    fn fields_from_value(&self, value: &DataValue) -> Result<Vec<(&'static str, Value)>>;
}

fn kind_mismatch(expected: DataItemKind, got: &DataValue) -> Error {
    Error::handler(format!(
        "handler for {:?} given a {:?} value",
        expected,
        got.kind()
    ))
}

macro_rules! simple_handler {
    ($name:ident, $kind:expr, $col:expr, $variant:ident, $to_value:expr, $from_row:expr) => {
        #[derive(Debug, Default, Clone, Copy)]
        struct $name;

        impl DataItemHandler for $name {
            fn kind(&self) -> DataItemKind {
                $kind
            }

            fn fetch_fields(&self) -> &'static [&'static str] {
                &[$col]
            }

            fn where_conds(&self, value: &DataValue) -> Result<Cond> {
                match value {
                    DataValue::$variant(v) => Ok(Cond::Eq($col.to_string(), $to_value(v))),
                    other => Err(kind_mismatch($kind, other)),
                }
            }

            fn value_from_row(&self, row: &Row) -> Result<DataValue> {
                $from_row(row)
            }

            fn fields_from_value(&self, value: &DataValue) -> Result<Vec<(&'static str, Value)>> {
                match value {
                    DataValue::$variant(v) => Ok(vec![($col, $to_value(v))]),
                    other => Err(kind_mismatch($kind, other)),
                }
            }
        }
    };
}

simple_handler!(
    EntityHandler,
    DataItemKind::Entity,
    columns::O_ID,
    Entity,
    |v: &EntityId| Value::Uint(v.as_u64()),
    |row: &Row| -> Result<DataValue> { Ok(DataValue::Entity(EntityId(row.uint(columns::O_ID)?))) }
);

simple_handler!(
    TextHandler,
    DataItemKind::Text,
    columns::O_TEXT,
    Text,
    |v: &String| Value::Text(v.clone()),
    |row: &Row| -> Result<DataValue> { Ok(DataValue::Text(row.text(columns::O_TEXT)?.to_string())) }
);

simple_handler!(
    NumberHandler,
    DataItemKind::Number,
    columns::O_NUM,
    Number,
    |v: &f64| Value::Float(*v),
    |row: &Row| -> Result<DataValue> { Ok(DataValue::Number(row.float(columns::O_NUM)?)) }
);

simple_handler!(
    BoolHandler,
    DataItemKind::Bool,
    columns::O_BOOL,
    Bool,
    |v: &bool| Value::Bool(*v),
    |row: &Row| -> Result<DataValue> { Ok(DataValue::Bool(row.boolean(columns::O_BOOL)?)) }
);

simple_handler!(
    UriHandler,
    DataItemKind::Uri,
    columns::O_URI,
    Uri,
    |v: &String| Value::Text(v.clone()),
    |row: &Row| -> Result<DataValue> { Ok(DataValue::Uri(row.text(columns::O_URI)?.to_string())) }
);

/// Timestamps are stored as RFC 3339 UTC text, which sorts correctly in
/// lexicographic column order.
#[derive(Debug, Default, Clone, Copy)]
struct TimeHandler;

fn encode_time(v: &DateTime<Utc>) -> Value {
    Value::Text(v.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

impl DataItemHandler for TimeHandler {
    fn kind(&self) -> DataItemKind {
        DataItemKind::Time
    }

    fn fetch_fields(&self) -> &'static [&'static str] {
        &[columns::O_TS]
    }

    fn where_conds(&self, value: &DataValue) -> Result<Cond> {
        match value {
            DataValue::Time(v) => Ok(Cond::Eq(columns::O_TS.to_string(), encode_time(v))),
            other => Err(kind_mismatch(DataItemKind::Time, other)),
        }
    }

    fn value_from_row(&self, row: &Row) -> Result<DataValue> {
        let raw = row.text(columns::O_TS)?;
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| Error::handler(format!("invalid timestamp '{raw}': {e}")))?;
        Ok(DataValue::Time(parsed.with_timezone(&Utc)))
    }

    fn fields_from_value(&self, value: &DataValue) -> Result<Vec<(&'static str, Value)>> {
        match value {
            DataValue::Time(v) => Ok(vec![(columns::O_TS, encode_time(v))]),
            other => Err(kind_mismatch(DataItemKind::Time, other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Construction-time dispatch table from kind to handler.
///
/// The kind enumeration is closed, but a registry may be built with a
/// subset (embedded deployments that store only some kinds); dispatching
/// on an unregistered kind is a hard error, never a silent fallthrough.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: FxHashMap<DataItemKind, Box<dyn DataItemHandler>>,
}

impl HandlerRegistry {
    /// Registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Registry with the standard handler for every kind.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        reg.register(Box::new(EntityHandler));
        reg.register(Box::new(TextHandler));
        reg.register(Box::new(NumberHandler));
        reg.register(Box::new(BoolHandler));
        reg.register(Box::new(TimeHandler));
        reg.register(Box::new(UriHandler));
        reg
    }

    /// Register (or replace) the handler for its kind.
    pub fn register(&mut self, handler: Box<dyn DataItemHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Dispatch to the handler for a kind.
    pub fn handler_for(&self, kind: DataItemKind) -> Result<&dyn DataItemHandler> {
        self.handlers
            .get(&kind)
            .map(|h| h.as_ref())
            .ok_or_else(|| Error::handler(format!("no handler registered for kind {kind:?}")))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
