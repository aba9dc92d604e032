//! Persistent key-value cache tier.
//!
//! Unlike the in-process caches, this tier is shared across requests and
//! processes. Writers invalidate the specific keys they touch; everything
//! else ages out via TTL. A stale read here is an accepted,
//! bounded-staleness trade-off on read paths, never a correctness
//! violation.
//!
//! Apps provide their own implementation over their store of choice;
//! `MemoryKvCache` ships in this crate for tests and embedded use.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Abstract shared key-value cache with per-entry TTL.
#[async_trait]
pub trait KvCache: Debug + Send + Sync {
    /// Store a value under a key. `ttl = None` means no expiry.
    async fn save(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Fetch a value, or `None` on miss/expiry.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Drop a key. Dropping an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory `KvCache` with TTL bookkeeping.
#[derive(Debug, Default)]
pub struct MemoryKvCache {
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl MemoryKvCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at.map_or(true, |t| t > now))
            .count()
    }

    /// True if no live entries exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn save(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|t| t <= Instant::now()) {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(entry.value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
