//! Per-entity attribute containers.
//!
//! Attribute retrieval is assembled table by table, so two types split the
//! lifecycle: [`StubSemanticData`] is the mutable accumulator used only
//! during assembly inside the lookup component, and [`SemanticData`] is
//! the immutable snapshot handed out once assembly (full or partial) is
//! frozen. Partially populated mutable state never escapes the lookup.

use crate::entity::{EntityId, EntityKey};
use crate::property::DataValue;
use crate::table::TableSchema;
use rustc_hash::{FxHashMap, FxHashSet};

/// Mutable accumulator for one entity's attribute values.
///
/// Tracks which property tables have been fetched so the caching layer
/// can serve per-table slices and decide completeness. A stub for a
/// redirect-source subject refuses subobject children: the source's
/// lookups are served from the target's ID, and attaching the source's
/// own subobjects would leak pre-redirect state.
#[derive(Clone, Debug)]
pub struct StubSemanticData {
    subject: EntityKey,
    subject_id: EntityId,
    redirect_source: bool,
    values: FxHashMap<String, Vec<DataValue>>,
    table_rows: FxHashMap<String, Vec<(String, DataValue)>>,
    fetched_tables: FxHashSet<String>,
    subobjects: Vec<EntityKey>,
}

impl StubSemanticData {
    /// Create an empty accumulator for a subject.
    pub fn new(subject: EntityKey, subject_id: EntityId) -> Self {
        Self {
            subject,
            subject_id,
            redirect_source: false,
            values: FxHashMap::default(),
            table_rows: FxHashMap::default(),
            fetched_tables: FxHashSet::default(),
            subobjects: Vec::new(),
        }
    }

    /// The owning subject.
    pub fn subject(&self) -> &EntityKey {
        &self.subject
    }

    /// The owning subject's ID.
    pub fn subject_id(&self) -> EntityId {
        self.subject_id
    }

    /// Mark the subject as a redirect source; from now on subobject
    /// registration is ignored.
    pub fn mark_redirect_source(&mut self) {
        self.redirect_source = true;
    }

    /// True if the subject is a redirect source.
    pub fn is_redirect_source(&self) -> bool {
        self.redirect_source
    }

    /// Record the rows fetched for one property table, merging them into
    /// the per-property view and marking the table as fetched.
    pub fn add_table_rows(&mut self, table: &str, rows: &[(String, DataValue)]) {
        for (property, value) in rows {
            self.values
                .entry(property.clone())
                .or_default()
                .push(value.clone());
        }
        self.table_rows.insert(table.to_string(), rows.to_vec());
        self.fetched_tables.insert(table.to_string());
    }

    /// Register a subobject child discovered during assembly.
    ///
    /// Ignored for redirect sources, and for keys that are not actually
    /// subobjects of this subject's page.
    pub fn add_subobject(&mut self, key: EntityKey) {
        if self.redirect_source {
            return;
        }
        if key.subobject.is_empty()
            || key.title != self.subject.title
            || key.namespace != self.subject.namespace
        {
            return;
        }
        if !self.subobjects.contains(&key) {
            self.subobjects.push(key);
        }
    }

    /// Subobject children registered so far.
    pub fn subobjects(&self) -> &[EntityKey] {
        &self.subobjects
    }

    /// True if the given table has been fetched into this stub.
    pub fn has_table(&self, table: &str) -> bool {
        self.fetched_tables.contains(table)
    }

    /// The rows fetched for one table (empty if never fetched).
    pub fn table_rows(&self, table: &str) -> &[(String, DataValue)] {
        self.table_rows.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True once every table of the schema has been fetched.
    pub fn is_complete_for(&self, schema: &TableSchema) -> bool {
        schema
            .tables()
            .iter()
            .all(|t| self.fetched_tables.contains(t.name()))
    }

    /// Values accumulated for one property (empty if none).
    pub fn values_for(&self, property: &str) -> &[DataValue] {
        self.values.get(property).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Freeze the current contents into an immutable snapshot.
    ///
    /// The stub stays usable; freezing may happen after any prefix of the
    /// tables has been fetched.
    pub fn freeze(&self) -> SemanticData {
        SemanticData {
            subject: self.subject.clone(),
            subject_id: self.subject_id,
            properties: self.values.clone(),
            subobjects: self.subobjects.clone(),
        }
    }
}

/// Immutable snapshot of an entity's attribute values.
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticData {
    subject: EntityKey,
    subject_id: EntityId,
    properties: FxHashMap<String, Vec<DataValue>>,
    subobjects: Vec<EntityKey>,
}

impl SemanticData {
    /// The owning subject.
    pub fn subject(&self) -> &EntityKey {
        &self.subject
    }

    /// The owning subject's ID.
    pub fn subject_id(&self) -> EntityId {
        self.subject_id
    }

    /// Values for one property (empty if none).
    pub fn values_for(&self, property: &str) -> &[DataValue] {
        self.properties
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Property keys present, sorted for deterministic iteration.
    pub fn property_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Iterate `(property, values)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[DataValue])> {
        let mut pairs: Vec<(&str, &[DataValue])> = self
            .properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        pairs.sort_unstable_by_key(|(k, _)| *k);
        pairs.into_iter()
    }

    /// Subobject children.
    pub fn subobjects(&self) -> &[EntityKey] {
        &self.subobjects
    }

    /// Number of properties with at least one value.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True if no property has values.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NS_MAIN;

    fn stub() -> StubSemanticData {
        StubSemanticData::new(EntityKey::page("Foo", NS_MAIN), EntityId(100))
    }

    #[test]
    fn test_accumulate_and_freeze() {
        let mut stub = stub();
        stub.add_table_rows(
            "p_text",
            &[
                ("Comment".to_string(), DataValue::Text("hello".into())),
                ("Comment".to_string(), DataValue::Text("again".into())),
            ],
        );
        stub.add_table_rows(
            "p_number",
            &[("Population".to_string(), DataValue::Number(12.0))],
        );

        assert!(stub.has_table("p_text"));
        assert!(!stub.has_table("p_entity"));
        assert_eq!(stub.values_for("Comment").len(), 2);
        assert_eq!(stub.table_rows("p_number").len(), 1);

        let frozen = stub.freeze();
        assert_eq!(frozen.subject_id(), EntityId(100));
        assert_eq!(frozen.values_for("Population"), &[DataValue::Number(12.0)]);
        assert_eq!(frozen.property_keys(), vec!["Comment", "Population"]);

        // Freezing is a snapshot: later accumulation doesn't leak into it.
        stub.add_table_rows("p_bool", &[("Flag".to_string(), DataValue::Bool(true))]);
        assert!(frozen.values_for("Flag").is_empty());
    }

    #[test]
    fn test_completeness_tracks_schema() {
        let schema = TableSchema::standard();
        let mut stub = stub();
        assert!(!stub.is_complete_for(&schema));
        for table in schema.tables() {
            stub.add_table_rows(table.name(), &[]);
        }
        assert!(stub.is_complete_for(&schema));
    }

    #[test]
    fn test_subobject_registration() {
        let mut stub = stub();
        stub.add_subobject(EntityKey::subobject("Foo", NS_MAIN, "s1"));
        stub.add_subobject(EntityKey::subobject("Foo", NS_MAIN, "s1")); // dup
        stub.add_subobject(EntityKey::subobject("Other", NS_MAIN, "s2")); // wrong page
        stub.add_subobject(EntityKey::page("Foo", NS_MAIN)); // not a subobject
        assert_eq!(stub.subobjects().len(), 1);
    }

    #[test]
    fn test_redirect_source_never_accumulates_subobjects() {
        let mut stub = stub();
        stub.mark_redirect_source();
        stub.add_subobject(EntityKey::subobject("Foo", NS_MAIN, "s1"));
        assert!(stub.is_redirect_source());
        assert!(stub.subobjects().is_empty());
        assert!(stub.freeze().subobjects().is_empty());
    }
}
