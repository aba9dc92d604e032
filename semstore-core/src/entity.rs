//! Entity natural keys, surrogate IDs, and the cache-key digest.
//!
//! An entity — a page, a property, or a subobject attached to a page — is
//! identified by a 4-part natural key: `(title, namespace, interwiki,
//! subobject)`. Two entities are identical iff all four fields match
//! exactly; callers are expected to pass canonical forms.
//!
//! Inside the storage schema an entity is represented by an [`EntityId`],
//! a positive integer surrogate allocated by the backend sequence. `0` is
//! the "no such entity" sentinel, never a valid ID.
//!
//! Cache slots are addressed by [`KeyHash`], a SHA-256 digest of the
//! natural key — never by display strings, so cache identity depends only
//! on exact-match equality.

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;

/// The main (article) namespace.
pub const NS_MAIN: i32 = 0;
/// Namespace holding property pages.
pub const NS_PROPERTY: i32 = 102;
/// Namespace holding concept pages.
pub const NS_CONCEPT: i32 = 108;

/// Highest surrogate ID reserved for predefined properties.
///
/// IDs `1..=PREDEFINED_ID_MAX` are statically assigned and resolve without
/// a backend round trip; the backend sequence starts above this range.
pub const PREDEFINED_ID_MAX: u64 = 50;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Integer surrogate standing in for an entity's natural key.
///
/// `EntityId::NONE` (0) is the typed absence marker used by lookups —
/// "does this exist" answering no is an expected outcome, not an error.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Sentinel for "no entity" (0).
    pub const NONE: Self = Self(0);

    /// Raw `u64` value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Construct from a raw `u64`.
    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// Returns `true` if this is the absence sentinel.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if this ID denotes an entity.
    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Returns `true` if this ID falls in the reserved predefined range.
    #[inline]
    pub fn is_predefined(self) -> bool {
        self.0 >= 1 && self.0 <= PREDEFINED_ID_MAX
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<EntityId> for u64 {
    #[inline]
    fn from(id: EntityId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// 4-part natural key of an entity.
///
/// `interwiki` distinguishes foreign-wiki references; `subobject`
/// distinguishes synthetic sub-entities attached to a page. Empty strings
/// mean "the local page itself".
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct EntityKey {
    /// Canonical page title
    pub title: String,
    /// Namespace number
    pub namespace: i32,
    /// Interwiki prefix, empty for local entities
    pub interwiki: String,
    /// Subobject name, empty for the page itself
    pub subobject: String,
}

impl EntityKey {
    /// Create a local page key (empty interwiki and subobject).
    pub fn page(title: impl Into<String>, namespace: i32) -> Self {
        Self {
            title: title.into(),
            namespace,
            interwiki: String::new(),
            subobject: String::new(),
        }
    }

    /// Create a subobject key attached to a local page.
    pub fn subobject(title: impl Into<String>, namespace: i32, name: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            namespace,
            interwiki: String::new(),
            subobject: name.into(),
        }
    }

    /// Return a copy with the given interwiki prefix.
    pub fn with_interwiki(mut self, interwiki: impl Into<String>) -> Self {
        self.interwiki = interwiki.into();
        self
    }

    /// True if this key denotes a page itself (no subobject part).
    #[inline]
    pub fn is_page(&self) -> bool {
        self.subobject.is_empty()
    }

    /// True if this key is local (no interwiki prefix).
    #[inline]
    pub fn is_local(&self) -> bool {
        self.interwiki.is_empty()
    }

    /// Compute the cache-slot digest for this key.
    pub fn key_hash(&self) -> KeyHash {
        key_hash(&self.title, self.namespace, &self.interwiki, &self.subobject)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.title)?;
        if !self.interwiki.is_empty() {
            write!(f, "@{}", self.interwiki)?;
        }
        if !self.subobject.is_empty() {
            write!(f, "#{}", self.subobject)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KeyHash
// ---------------------------------------------------------------------------

/// Deterministic digest of a natural key, used only to address cache slots.
///
/// Unrelated to content-change detection: identical keys always produce
/// identical hashes, and nothing else is ever folded in.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    /// The hex digest as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute SHA-256 hash of bytes and return as hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the cache-slot digest of a 4-part natural key.
///
/// Fields are joined with an ASCII unit separator (0x1f), which cannot
/// occur in canonical titles, so distinct tuples never collide by
/// concatenation.
pub fn key_hash(title: &str, namespace: i32, interwiki: &str, subobject: &str) -> KeyHash {
    let mut buf = Vec::with_capacity(title.len() + interwiki.len() + subobject.len() + 16);
    buf.extend_from_slice(title.as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(namespace.to_string().as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(interwiki.as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(subobject.as_bytes());
    KeyHash(sha256_hex(&buf))
}

// ---------------------------------------------------------------------------
// Sort keys
// ---------------------------------------------------------------------------

/// Derive the secondary normalized sort field from a display sort key.
///
/// Case-folded with whitespace runs collapsed to single spaces, so ordering
/// is insensitive to caller formatting while the display `sortkey` keeps
/// its original form.
pub fn normalize_sort_key(sortkey: &str) -> String {
    let mut out = String::with_capacity(sortkey.len());
    let mut last_space = true;
    for ch in sortkey.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_space = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Predefined properties
// ---------------------------------------------------------------------------

/// Built-in properties with statically known surrogate IDs.
///
/// These occupy the reserved range `1..=PREDEFINED_ID_MAX` and resolve in
/// both directions (key → ID, ID → key) without touching the backend.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PredefinedProperty {
    /// Category/type membership of a page
    InstanceOf,
    /// Category hierarchy edge
    SubcategoryOf,
    /// Redirect target of a page
    RedirectsTo,
    /// Last modification timestamp
    ModificationDate,
    /// Explicit display sort key
    SortKey,
    /// Canonical URI of the entity
    Uri,
}

/// All predefined properties, in reserved-ID order.
pub const PREDEFINED_PROPERTIES: &[PredefinedProperty] = &[
    PredefinedProperty::InstanceOf,
    PredefinedProperty::SubcategoryOf,
    PredefinedProperty::RedirectsTo,
    PredefinedProperty::ModificationDate,
    PredefinedProperty::SortKey,
    PredefinedProperty::Uri,
];

impl PredefinedProperty {
    /// The statically reserved surrogate ID.
    pub fn id(self) -> EntityId {
        match self {
            PredefinedProperty::InstanceOf => EntityId(1),
            PredefinedProperty::SubcategoryOf => EntityId(2),
            PredefinedProperty::RedirectsTo => EntityId(3),
            PredefinedProperty::ModificationDate => EntityId(4),
            PredefinedProperty::SortKey => EntityId(5),
            PredefinedProperty::Uri => EntityId(6),
        }
    }

    /// The stable storage key (also the property page title).
    pub fn key(self) -> &'static str {
        match self {
            PredefinedProperty::InstanceOf => "_INST",
            PredefinedProperty::SubcategoryOf => "_SUBC",
            PredefinedProperty::RedirectsTo => "_REDI",
            PredefinedProperty::ModificationDate => "_MDAT",
            PredefinedProperty::SortKey => "_SKEY",
            PredefinedProperty::Uri => "_URI",
        }
    }

    /// Resolve a reserved surrogate ID back to its predefined property.
    ///
    /// Returns `None` for IDs outside the assigned set (including unused
    /// slots of the reserved range).
    pub fn from_id(id: EntityId) -> Option<Self> {
        PREDEFINED_PROPERTIES.iter().copied().find(|p| p.id() == id)
    }

    /// Resolve a storage key to its predefined property.
    pub fn from_key(key: &str) -> Option<Self> {
        PREDEFINED_PROPERTIES.iter().copied().find(|p| p.key() == key)
    }

    /// The natural key of the property page backing this property.
    pub fn entity_key(self) -> EntityKey {
        EntityKey::page(self.key(), NS_PROPERTY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_sentinel() {
        assert!(EntityId::NONE.is_none());
        assert!(!EntityId::NONE.is_some());
        assert!(EntityId(42).is_some());
        assert_eq!(EntityId::from_u64(7).as_u64(), 7);
    }

    #[test]
    fn test_predefined_range() {
        assert!(EntityId(1).is_predefined());
        assert!(EntityId(PREDEFINED_ID_MAX).is_predefined());
        assert!(!EntityId(PREDEFINED_ID_MAX + 1).is_predefined());
        assert!(!EntityId::NONE.is_predefined());
    }

    #[test]
    fn test_key_equality_is_exact() {
        let a = EntityKey::page("Foo", NS_MAIN);
        let b = EntityKey::page("Foo", NS_MAIN);
        let c = EntityKey::page("foo", NS_MAIN);
        assert_eq!(a, b);
        assert_ne!(a, c, "identity is case-sensitive");
        assert_ne!(a, EntityKey::subobject("Foo", NS_MAIN, "s1"));
        assert_ne!(a, EntityKey::page("Foo", NS_MAIN).with_interwiki("en"));
    }

    #[test]
    fn test_key_hash_deterministic() {
        let a = EntityKey::page("Foo", NS_MAIN).key_hash();
        let b = EntityKey::page("Foo", NS_MAIN).key_hash();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_hash_distinguishes_fields() {
        // A separator-free concatenation would collide "ab" + "c" with
        // "a" + "bc"; the unit separator must prevent that.
        let h1 = key_hash("ab", 0, "c", "");
        let h2 = key_hash("a", 0, "bc", "");
        assert_ne!(h1, h2);

        let h3 = EntityKey::page("Foo", NS_MAIN).key_hash();
        let h4 = EntityKey::page("Foo", NS_PROPERTY).key_hash();
        assert_ne!(h3, h4);
    }

    #[test]
    fn test_normalize_sort_key() {
        assert_eq!(normalize_sort_key("  Foo   Bar "), "foo bar");
        assert_eq!(normalize_sort_key("ALPHA"), "alpha");
        assert_eq!(normalize_sort_key(""), "");
    }

    #[test]
    fn test_predefined_round_trip() {
        for p in PREDEFINED_PROPERTIES {
            assert!(p.id().is_predefined());
            assert_eq!(PredefinedProperty::from_id(p.id()), Some(*p));
            assert_eq!(PredefinedProperty::from_key(p.key()), Some(*p));
            assert_eq!(p.entity_key().namespace, NS_PROPERTY);
        }
        assert_eq!(PredefinedProperty::from_id(EntityId(49)), None);
        assert_eq!(PredefinedProperty::from_key("Population"), None);
    }

    #[test]
    fn test_display() {
        let key = EntityKey::subobject("Foo", NS_MAIN, "s1").with_interwiki("en");
        assert_eq!(key.to_string(), "0:Foo@en#s1");
        assert_eq!(EntityId(9).to_string(), "9");
    }

    #[test]
    fn test_serde_round_trip() {
        let key = EntityKey::subobject("Foo", NS_MAIN, "s1");
        let json = serde_json::to_string(&key).unwrap();
        let parsed: EntityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);

        let id = EntityId(31);
        assert_eq!(serde_json::to_string(&id).unwrap(), "31");
        let back: EntityId = serde_json::from_str("31").unwrap();
        assert_eq!(back, id);
    }
}
