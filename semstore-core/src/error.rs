//! Error types for semstore-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
///
/// Absence of an entity, ID, or cache entry is never represented here —
/// those outcomes are sentinels (`EntityId::NONE`, `None`) on the lookup
/// APIs. Variants in this enum are either real backend failures or
/// contract violations by the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend (relational store) failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Unique-constraint violation on insert
    ///
    /// `EntityIdManager::make_id` recovers from this locally by re-reading
    /// the now-existing row; it only propagates when an insert conflicts
    /// outside the get-or-create path.
    #[error("Constraint conflict: {0}")]
    Conflict(String),

    /// Resource not found where the caller asserted it must exist
    /// (e.g. relocating an ID that has no row)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cache name not registered with the cache manager
    ///
    /// Caches are provisioned at construction, never ad hoc; asking for an
    /// unknown name is a programmer error.
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// Reading prefetched values for a subject/property combination that
    /// was never prefetched
    #[error("Prefetch not prepared for property '{property}' on subject '{subject}'")]
    PrefetchNotPrepared {
        /// Property key the caller asked for
        property: String,
        /// Display form of the subject
        subject: String,
    },

    /// No handler registered for a data-item kind
    #[error("Data item handler error: {0}")]
    Handler(String),

    /// ID reassignment failed part-way through the dependent tables
    ///
    /// Identifies the table that failed so a maintenance operator can
    /// resume; no cross-table rollback is attempted.
    #[error("ID reassignment failed at table '{table}': {source}")]
    IdReassignment {
        /// The dependent table whose update failed
        table: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// JSON (de)serialization error (persistent snapshots, blobs)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persistent cache tier error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    /// Create a constraint-conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an unknown-cache error
    pub fn unknown_cache(name: impl Into<String>) -> Self {
        Error::UnknownCache(name.into())
    }

    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        Error::Handler(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// True if this is a unique-constraint conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
