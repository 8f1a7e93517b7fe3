//! A bounded, per-process cache for tool results, keyed by
//! `(tool, argsHash)` (`SPEC_FULL.md` §4.4 step 6). Cheaper than the ledger
//! for intra-process reuse; the ledger remains the durable source of truth.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct Entry {
    data: Value,
    inserted_at: Instant,
}

/// Bounded LRU-ish cache: entries older than `ttl` are treated as absent,
/// and insertion evicts the oldest entry once `capacity` is exceeded.
pub struct ToolCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
    order: Mutex<Vec<(String, String)>>,
}

impl ToolCache {
    /// Build a cache bounded to `capacity` entries, each valid for `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Entry>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fetch a cached value if present and unexpired.
    #[must_use]
    pub fn get(&self, tool: &str, args_hash: &str) -> Option<Value> {
        let key = (tool.to_string(), args_hash.to_string());
        let entries = self.lock_entries();
        let entry = entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Store a value, evicting the oldest entry if at capacity.
    pub fn put(&self, tool: &str, args_hash: &str, data: Value) {
        let key = (tool.to_string(), args_hash.to_string());
        let mut entries = self.lock_entries();
        let mut order = self.lock_order();

        if !entries.contains_key(&key) {
            order.push(key.clone());
        }
        entries.insert(
            key,
            Entry {
                data,
                inserted_at: Instant::now(),
            },
        );

        while entries.len() > self.capacity && !order.is_empty() {
            let oldest = order.remove(0);
            entries.remove(&oldest);
        }
    }
}
