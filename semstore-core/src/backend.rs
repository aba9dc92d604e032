//! Relational backend abstraction.
//!
//! This module defines the `Backend` trait the core depends on — an
//! abstract relational interface with single-row and multi-row selects, a
//! one-pair inner join, mutations, and sequence allocation. The core never
//! depends on a specific engine's SQL dialect beyond what this abstraction
//! normalizes.
//!
//! ## Traits
//!
//! - `Backend`: the full relational surface (`select_row`, `select`,
//!   `select_join`, `insert`, `update`, `delete`, `upsert`, `next_id`)
//!
//! ## Implementations
//!
//! Apps provide their own implementations over their engine of choice.
//! `MemoryBackend` ships in this crate for unit tests and embedded use,
//! including declared unique constraints so the optimistic-insert path can
//! be exercised without a real database.
//!
//! ## Concurrency contract
//!
//! `insert` must report a unique-constraint violation as
//! [`Error::Conflict`]; ID creation relies on that as its correctness
//! backstop instead of application-level locking.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

// ============================================================================
// Values and rows
// ============================================================================

/// A single column value.
///
/// The core stores surrogate IDs as `Uint`, namespaces as `Int`, and all
/// display/serialized fields as `Text`; equality is exact per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean column
    Bool(bool),
    /// Signed integer column
    Int(i64),
    /// Unsigned integer column (IDs, counters)
    Uint(u64),
    /// Floating-point column
    Float(f64),
    /// Text column
    Text(String),
}

impl Value {
    /// Rank used for cross-variant ordering in `ORDER BY` emulation.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Total-enough ordering over values for sort emulation.
///
/// Numeric variants compare by value; everything else compares within its
/// variant, with variants ranked Null < Bool < numeric < Text.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.rank().cmp(&b.rank()),
        },
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<crate::entity::EntityId> for Value {
    fn from(id: crate::entity::EntityId) -> Self {
        Value::Uint(id.as_u64())
    }
}

/// A named-column row, the unit of exchange with the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cols: FxHashMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.cols.insert(column.to_string(), value.into());
        self
    }

    /// In-place column setter.
    pub fn put(&mut self, column: &str, value: impl Into<Value>) {
        self.cols.insert(column.to_string(), value.into());
    }

    /// Raw column access.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cols.get(column)
    }

    /// Number of columns present.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cols.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Project the row down to the given columns (absent columns skipped).
    pub fn project(&self, columns: &[&str]) -> Row {
        let mut out = Row::new();
        for col in columns {
            if let Some(v) = self.cols.get(*col) {
                out.put(col, v.clone());
            }
        }
        out
    }

    /// Read an unsigned integer column.
    pub fn uint(&self, column: &str) -> Result<u64> {
        match self.cols.get(column) {
            Some(Value::Uint(v)) => Ok(*v),
            Some(Value::Int(v)) if *v >= 0 => Ok(*v as u64),
            other => Err(column_error(column, "uint", other)),
        }
    }

    /// Read a signed integer column.
    pub fn int(&self, column: &str) -> Result<i64> {
        match self.cols.get(column) {
            Some(Value::Int(v)) => Ok(*v),
            Some(Value::Uint(v)) => Ok(*v as i64),
            other => Err(column_error(column, "int", other)),
        }
    }

    /// Read a float column.
    pub fn float(&self, column: &str) -> Result<f64> {
        match self.cols.get(column).and_then(Value::as_f64) {
            Some(v) => Ok(v),
            None => Err(column_error(column, "float", self.cols.get(column))),
        }
    }

    /// Read a boolean column.
    pub fn boolean(&self, column: &str) -> Result<bool> {
        match self.cols.get(column) {
            Some(Value::Bool(v)) => Ok(*v),
            other => Err(column_error(column, "bool", other)),
        }
    }

    /// Read a text column.
    pub fn text(&self, column: &str) -> Result<&str> {
        match self.cols.get(column) {
            Some(Value::Text(v)) => Ok(v),
            other => Err(column_error(column, "text", other)),
        }
    }

    /// Read a text column, treating NULL/absent as `None`.
    pub fn opt_text(&self, column: &str) -> Option<&str> {
        match self.cols.get(column) {
            Some(Value::Text(v)) => Some(v),
            _ => None,
        }
    }
}

fn column_error(column: &str, expected: &str, got: Option<&Value>) -> Error {
    Error::backend(format!(
        "column '{}': expected {}, got {:?}",
        column, expected, got
    ))
}

// ============================================================================
// Predicates
// ============================================================================

/// String-matching operator for value filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StringMatch {
    /// Substring anywhere in the value
    Contains(String),
    /// Value starts with the pattern
    Prefix(String),
    /// Value ends with the pattern
    Suffix(String),
}

impl StringMatch {
    /// Test the operator against a string.
    pub fn matches(&self, s: &str) -> bool {
        match self {
            StringMatch::Contains(p) => s.contains(p.as_str()),
            StringMatch::Prefix(p) => s.starts_with(p.as_str()),
            StringMatch::Suffix(p) => s.ends_with(p.as_str()),
        }
    }
}

/// Simple `WHERE` predicate tree.
///
/// Deliberately small: equality, membership, string matching, and
/// conjunction/disjunction cover everything this core asks of a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Matches every row
    True,
    /// Column equals value
    Eq(String, Value),
    /// Column value is one of the given values
    In(String, Vec<Value>),
    /// Text column matches the string operator
    Like(String, StringMatch),
    /// All sub-conditions hold
    And(Vec<Cond>),
    /// At least one sub-condition holds
    Or(Vec<Cond>),
}

impl Cond {
    /// Equality shorthand.
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Cond::Eq(column.to_string(), value.into())
    }

    /// Membership shorthand.
    pub fn is_in(column: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Cond::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    /// String-match shorthand.
    pub fn like(column: &str, m: StringMatch) -> Self {
        Cond::Like(column.to_string(), m)
    }

    /// Evaluate the predicate against a row.
    ///
    /// Absent columns never match (SQL NULL semantics for comparisons).
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Cond::True => true,
            Cond::Eq(col, v) => row.get(col) == Some(v),
            Cond::In(col, vs) => row.get(col).is_some_and(|v| vs.contains(v)),
            Cond::Like(col, m) => matches!(row.get(col), Some(Value::Text(s)) if m.matches(s)),
            Cond::And(cs) => cs.iter().all(|c| c.matches(row)),
            Cond::Or(cs) => cs.iter().any(|c| c.matches(row)),
        }
    }
}

// ============================================================================
// Request options
// ============================================================================

/// Sort directive for a select.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    /// Column to sort by
    pub column: String,
    /// Ascending (`true`) or descending order
    pub ascending: bool,
}

impl OrderBy {
    /// Ascending order on a column.
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    /// Descending order on a column.
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// A string filter applied to one column of the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringCond {
    /// Column the filter applies to
    pub column: String,
    /// Match operator
    pub matcher: StringMatch,
}

/// Options passed through to the backend predicate builder: limit, offset,
/// sort, and string-contains filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    /// Maximum number of rows to return
    pub limit: Option<usize>,
    /// Rows to skip before returning
    pub offset: usize,
    /// Sort directive
    pub order_by: Option<OrderBy>,
    /// String filters, ANDed together
    pub string_conds: Vec<StringCond>,
}

impl RequestOptions {
    /// Options that impose no constraint at all.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    /// Builder-style limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder-style offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Builder-style sort.
    pub fn with_order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Builder-style string filter.
    pub fn with_string_cond(mut self, column: &str, matcher: StringMatch) -> Self {
        self.string_conds.push(StringCond {
            column: column.to_string(),
            matcher,
        });
        self
    }

    /// True if these options select the complete, unordered result set.
    ///
    /// Only unconstrained fetches are eligible for persistent snapshotting;
    /// a limited/filtered slice is not a faithful table snapshot.
    pub fn is_unconstrained(&self) -> bool {
        self.limit.is_none()
            && self.offset == 0
            && self.order_by.is_none()
            && self.string_conds.is_empty()
    }

    /// Stable fingerprint for keying per-options caches.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Apply string filters, sort, offset, and limit to an in-memory
    /// result set. Backends that push these down can ignore this helper.
    pub fn apply(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.string_conds.is_empty() {
            rows.retain(|row| {
                self.string_conds.iter().all(|sc| {
                    matches!(row.get(&sc.column), Some(Value::Text(s)) if sc.matcher.matches(s))
                })
            });
        }
        if let Some(order) = &self.order_by {
            rows.sort_by(|a, b| {
                let av = a.get(&order.column).unwrap_or(&Value::Null);
                let bv = b.get(&order.column).unwrap_or(&Value::Null);
                let ord = cmp_values(av, bv);
                if order.ascending { ord } else { ord.reverse() }
            });
        }
        if self.offset > 0 {
            rows = rows.split_off(self.offset.min(rows.len()));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Abstract relational backend.
///
/// All reads and writes issued by this core go through this trait. The
/// join is limited to a single equality pair — the only shape the core
/// needs (property table ⋈ ID table on the property column).
#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// Fetch at most one row matching the condition.
    async fn select_row(&self, table: &str, columns: &[&str], cond: &Cond)
        -> Result<Option<Row>>;

    /// Fetch all rows matching the condition, with options applied.
    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        cond: &Cond,
        opts: &RequestOptions,
    ) -> Result<Vec<Row>>;

    /// Inner join `left` to `right` on `left.on.0 = right.on.1`.
    ///
    /// The merged row exposes columns of both tables; on a name collision
    /// the left table's column wins. `cond` and `opts` are evaluated
    /// against the merged row.
    async fn select_join(
        &self,
        left: &str,
        right: &str,
        on: (&str, &str),
        columns: &[&str],
        cond: &Cond,
        opts: &RequestOptions,
    ) -> Result<Vec<Row>>;

    /// Insert a row.
    ///
    /// Must report a unique-constraint violation as [`Error::Conflict`];
    /// callers on the get-or-create path recover by re-reading.
    async fn insert(&self, table: &str, row: Row) -> Result<()>;

    /// Update matching rows, returning the number of rows changed.
    async fn update(&self, table: &str, changes: &[(&str, Value)], cond: &Cond) -> Result<u64>;

    /// Delete matching rows, returning the number of rows removed.
    async fn delete(&self, table: &str, cond: &Cond) -> Result<u64>;

    /// Replace the first row matching the condition, or insert if none.
    async fn upsert(&self, table: &str, cond: &Cond, row: Row) -> Result<()>;

    /// Allocate the next value of the table's ID sequence.
    async fn next_id(&self, table: &str) -> Result<u64>;
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory backend for unit tests and embedded use.
///
/// Tables must be created before use; each carries an optional set of
/// unique column groups enforced on insert/upsert, so the
/// optimistic-insert-then-re-read path behaves like it would against a
/// real engine. Sequences track explicit ID inserts the way auto-increment
/// engines do: inserting `id = N` advances the sequence past `N`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: FxHashMap<String, TableData>,
    sequences: FxHashMap<String, u64>,
}

#[derive(Debug, Default)]
struct TableData {
    rows: Vec<Row>,
    unique: Vec<Vec<String>>,
}

impl MemoryBackend {
    /// Create an empty backend with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given unique column groups.
    ///
    /// Creating an existing table replaces its constraint declaration but
    /// keeps its rows.
    pub fn create_table(&self, name: &str, unique: &[&[&str]]) {
        let mut inner = self.inner.write();
        let table = inner.tables.entry(name.to_string()).or_default();
        table.unique = unique
            .iter()
            .map(|cols| cols.iter().map(|c| c.to_string()).collect())
            .collect();
    }

    /// Force a sequence to start above the given value.
    pub fn set_sequence(&self, table: &str, value: u64) {
        let mut inner = self.inner.write();
        let seq = inner.sequences.entry(table.to_string()).or_insert(0);
        if *seq < value {
            *seq = value;
        }
    }

    /// Total number of rows in a table (testing/diagnostics).
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn check_unique(table_name: &str, table: &TableData, row: &Row) -> Result<()> {
        for group in &table.unique {
            let candidate: Vec<Option<&Value>> = group.iter().map(|c| row.get(c)).collect();
            if candidate.iter().any(Option::is_none) {
                continue;
            }
            for existing in &table.rows {
                if group
                    .iter()
                    .zip(&candidate)
                    .all(|(c, v)| existing.get(c) == *v)
                {
                    return Err(Error::conflict(format!(
                        "duplicate key ({}) in table '{}'",
                        group.join(", "),
                        table_name
                    )));
                }
            }
        }
        Ok(())
    }

    fn advance_sequence(inner: &mut Inner, table: &str, row: &Row) {
        if let Some(Value::Uint(v)) = row.get("id") {
            let seq = inner.sequences.entry(table.to_string()).or_insert(0);
            if *seq < *v {
                *seq = *v;
            }
        }
    }
}

fn table_error(name: &str) -> Error {
    Error::backend(format!("no such table '{}'", name))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select_row(
        &self,
        table: &str,
        columns: &[&str],
        cond: &Cond,
    ) -> Result<Option<Row>> {
        let inner = self.inner.read();
        let data = inner.tables.get(table).ok_or_else(|| table_error(table))?;
        Ok(data
            .rows
            .iter()
            .find(|r| cond.matches(r))
            .map(|r| r.project(columns)))
    }

    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        cond: &Cond,
        opts: &RequestOptions,
    ) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        let data = inner.tables.get(table).ok_or_else(|| table_error(table))?;
        let matched: Vec<Row> = data
            .rows
            .iter()
            .filter(|r| cond.matches(r))
            .cloned()
            .collect();
        Ok(opts
            .apply(matched)
            .into_iter()
            .map(|r| r.project(columns))
            .collect())
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
        let inner = self.inner.read();
        let left_data = inner.tables.get(left).ok_or_else(|| table_error(left))?;
        let right_data = inner.tables.get(right).ok_or_else(|| table_error(right))?;

        let mut merged = Vec::new();
        for lrow in &left_data.rows {
            let Some(lval) = lrow.get(on.0) else {
                continue;
            };
            for rrow in &right_data.rows {
                if rrow.get(on.1) == Some(lval) {
                    let mut row = rrow.clone();
                    for (col, val) in lrow.iter() {
                        row.put(col, val.clone());
                    }
                    if cond.matches(&row) {
                        merged.push(row);
                    }
                }
            }
        }
        Ok(opts
            .apply(merged)
            .into_iter()
            .map(|r| r.project(columns))
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        let mut inner = self.inner.write();
        let data = inner.tables.get(table).ok_or_else(|| table_error(table))?;
        Self::check_unique(table, data, &row)?;
        Self::advance_sequence(&mut inner, table, &row);
        // borrow again after the sequence bump
        inner
            .tables
            .get_mut(table)
            .expect("table checked above")
            .rows
            .push(row);
        Ok(())
    }

    async fn update(&self, table: &str, changes: &[(&str, Value)], cond: &Cond) -> Result<u64> {
        let mut inner = self.inner.write();
        let data = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| table_error(table))?;
        let mut count = 0;
        for row in data.rows.iter_mut().filter(|r| cond.matches(r)) {
            for (col, val) in changes {
                row.put(col, val.clone());
            }
            count += 1;
        }
        Ok(count)
    }

    async fn delete(&self, table: &str, cond: &Cond) -> Result<u64> {
        let mut inner = self.inner.write();
        let data = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| table_error(table))?;
        let before = data.rows.len();
        data.rows.retain(|r| !cond.matches(r));
        Ok((before - data.rows.len()) as u64)
    }

    async fn upsert(&self, table: &str, cond: &Cond, row: Row) -> Result<()> {
        let mut inner = self.inner.write();
        let data = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| table_error(table))?;
        if let Some(existing) = data.rows.iter_mut().find(|r| cond.matches(r)) {
            *existing = row;
            return Ok(());
        }
        Self::check_unique(table, data, &row)?;
        Self::advance_sequence(&mut inner, table, &row);
        inner
            .tables
            .get_mut(table)
            .expect("table checked above")
            .rows
            .push(row);
        Ok(())
    }

    async fn next_id(&self, table: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let seq = inner.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}

// ============================================================================
// Tests
// ============================================================================
