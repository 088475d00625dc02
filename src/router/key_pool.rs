//! API Key Pool Management
//!
//! Holds the keys of one provider with a shared rotation cursor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A single API key with usage tracking
#[derive(Debug)]
pub struct ApiKey {
    /// The actual API key value
    value: String,

    /// Total number of dispatches made with this key
    request_count: AtomicU64,

    /// Dispatches rejected for rate limit, quota or auth reasons
    failure_count: AtomicU64,
}

impl ApiKey {
    /// Create a new API key
    pub fn new(value: String) -> Self {
        Self {
            value,
            request_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Get the key value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Record usage of this key
    pub fn record_usage(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejection of this key
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// Pool of API keys with round-robin rotation
#[derive(Debug)]
pub struct KeyPool {
    /// Provider id this pool belongs to
    provider: String,

    /// Keys in configured order
    keys: Vec<ApiKey>,

    /// Rotation cursor, advanced once per fresh pick
    cursor: AtomicUsize,
}

impl KeyPool {
    /// Create a new key pool
    pub fn new(provider: String, keys: Vec<String>) -> Self {
        Self {
            provider,
            keys: keys.into_iter().map(ApiKey::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Get the provider id
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of keys in the pool
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Key at an index returned by `advance` or `next_available`
    pub fn key(&self, index: usize) -> Option<&ApiKey> {
        self.keys.get(index)
    }

    /// Take the next rotation slot, wrapping
    pub fn advance(&self) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        Some(self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len())
    }

    /// First key at or after `start` (wrapping) that is not in `excluded`.
    /// Does not touch the shared cursor.
    pub fn next_available(&self, start: usize, excluded: &HashSet<usize>) -> Option<usize> {
        let len = self.keys.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|idx| !excluded.contains(idx))
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> KeyPoolStats {
        KeyPoolStats {
            total_keys: self.keys.len(),
            total_requests: self.keys.iter().map(|k| k.request_count()).sum(),
            total_failures: self.keys.iter().map(|k| k.failure_count()).sum(),
        }
    }
}

/// Statistics about a key pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPoolStats {
    pub total_keys: usize,
    pub total_requests: u64,
    pub total_failures: u64,
}
