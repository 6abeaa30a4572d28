//! In-memory response cache with TTL expiry and strict LRU eviction.
//!
//! [`ResponseCache`] skips redundant expensive work by remembering the
//! result of a (query, identity) pair. Entries expire on read once their
//! TTL has elapsed, and insertion beyond capacity evicts exactly the
//! least-recently-accessed entry.
//!
//! # Key derivation
//!
//! Keys hash `(identity, normalized(query))`, where normalization trims
//! and lowercases the query. Identical normalized queries from the same
//! identity collide to the same entry; different identities never share
//! an entry for the same text.
//!
//! # Why not moka
//!
//! The contract requires deterministic, synchronous eviction: a read of a
//! stale entry removes it immediately, and an insert at capacity evicts
//! exactly one entry (the LRU one, ties broken by insertion order).
//! moka's eviction is batched and approximate, so the store is a plain
//! map under a mutex instead.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::telemetry;
use crate::{MuninnError, Result};

/// Configuration for the response cache.
///
/// ```rust
/// # use muninn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(1_000)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 1,000.
    pub max_entries: usize,
    /// Time-to-live for cached entries. Default: 1 hour.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Validate field ranges, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_entries == 0 {
            errors.push("max_entries must be at least 1".to_string());
        }
        if self.ttl.is_zero() {
            errors.push("ttl must be greater than zero".to_string());
        }
        errors
    }
}

/// Point-in-time counters for a [`ResponseCache`].
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Entries currently stored.
    pub entries: usize,
    /// Configured capacity.
    pub max_entries: usize,
    /// Configured time-to-live.
    pub ttl: Duration,
    /// Lookup hits since construction.
    pub hits: u64,
    /// Lookup misses since construction (including expirations).
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
    /// Monotonic access sequence; breaks last-access ties deterministically.
    seq: u64,
}

/// Bounded key→value store with expire-on-read TTL and strict LRU eviction.
///
/// Generic over the cached value; the cache treats it as opaque and only
/// requires `Clone` to hand copies back on hits.
pub struct ResponseCache<V> {
    config: CacheConfig,
    entries: Mutex<HashMap<u64, Entry<V>>>,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Stable in-process key over `(identity, normalized(query))`.
fn cache_key(identity: &str, query: &str) -> u64 {
    let normalized = query.trim().to_lowercase();
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    normalized.hash(&mut hasher);
    hasher.finish()
}

impl<V: Clone> ResponseCache<V> {
    /// Create a response cache, validating the configuration.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MuninnError::Configuration(errors.join("; ")));
        }
        Ok(Self {
            config,
            entries: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Look up the cached value for `(query, identity)`.
    ///
    /// Returns `None` on miss. A stale entry (older than the TTL) is
    /// removed as a side effect and reported as a miss. A hit refreshes
    /// the entry's last-access time.
    pub fn lookup(&self, query: &str, identity: &str) -> Option<V> {
        let key = cache_key(identity, query);
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&key) else {
            self.record_miss();
            return None;
        };
        if entry.created_at.elapsed() >= self.config.ttl {
            entries.remove(&key);
            self.record_miss();
            return None;
        }

        entry.last_access = Instant::now();
        entry.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let value = entry.value.clone();
        self.record_hit();
        Some(value)
    }

    /// Store a value for `(query, identity)`, replacing any existing entry.
    ///
    /// Inserting a new key at capacity first evicts the entry with the
    /// oldest last-access time (insertion order breaks ties). The entry
    /// becomes visible to concurrent lookups only once fully written.
    pub fn store(&self, query: &str, identity: &str, value: V) {
        let key = cache_key(identity, query);
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            let evict = entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.seq))
                .map(|(k, _)| *k);
            if let Some(evict) = evict {
                entries.remove(&evict);
            }
        }

        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                last_access: now,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Drop the entry for `(query, identity)`, if present.
    pub fn invalidate(&self, query: &str, identity: &str) {
        self.entries.lock().remove(&cache_key(identity, query));
    }

    /// Drop all entries. Hit/miss counters are preserved.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.len(),
            max_entries: self.config.max_entries,
            ttl: self.config.ttl,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "response").increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "response").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalization_trims_and_lowercases() {
        assert_eq!(cache_key("u1", "  Hello World "), cache_key("u1", "hello world"));
        assert_ne!(cache_key("u1", "hello"), cache_key("u2", "hello"));
    }

    #[test]
    fn replace_does_not_evict() {
        let cache: ResponseCache<String> =
            ResponseCache::new(CacheConfig::new().max_entries(2)).unwrap();
        cache.store("a", "u", "1".into());
        cache.store("b", "u", "2".into());
        // Overwriting an existing key at capacity must not shrink the cache.
        cache.store("a", "u", "3".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("a", "u").as_deref(), Some("3"));
        assert_eq!(cache.lookup("b", "u").as_deref(), Some("2"));
    }

    #[test]
    fn invalid_config_fails_construction() {
        let result = ResponseCache::<String>::new(CacheConfig::new().max_entries(0));
        assert!(matches!(result, Err(MuninnError::Configuration(_))));
    }
}
