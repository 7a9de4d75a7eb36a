//! Time-bounded cache of connector responses.
//!
//! Entries are keyed by connector table name and expire after a fixed
//! TTL. The cache is an ordinary value owned by whoever builds the
//! sources; share it with [`Arc`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::shape::Table;

/// TTL cache of inferred tables.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Arc<Table>)>>,
}

impl ResponseCache {
    /// Creates an empty cache. A zero `ttl` disables caching.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached table for `key` if it has not expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<Table>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((stored, table)) if stored.elapsed() < self.ttl => Some(Arc::clone(table)),
            Some(_) => {
                log::debug!("Cached response for '{key}' expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `table` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, table: Arc<Table>) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (Instant::now(), table));
    }

    /// Drops the entry for `key`. Returns `true` if one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
