//! Disk-backed, content-addressed cache for cloned voice models.
//!
//! [`VoiceModelCache`] keys each entry on the SHA-256 digest of the
//! reference input, so identical reference audio always maps to the same
//! entry. Blobs live as one file per key under the cache directory, with
//! an `index.json` mapping digest → metadata that survives restarts.
//!
//! # Consistency
//!
//! The blob is written before the index is persisted, so a crash mid-`put`
//! leaves at worst an orphaned blob file — never an index entry pointing
//! at a missing blob. An index entry whose blob has gone missing anyway
//! (external deletion, partial state) is purged lazily by [`get`] and
//! reported as an ordinary miss, not a hard error.
//!
//! [`get`]: VoiceModelCache::get

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{MuninnError, Result};

/// Index file name inside the cache directory.
const INDEX_FILE: &str = "index.json";

/// Fraction of entries evicted in one batch when the cache is full.
const EVICTION_FRACTION: usize = 5; // one fifth

/// Configuration for the voice model cache.
///
/// ```rust
/// # use muninn::VoiceCacheConfig;
/// let config = VoiceCacheConfig::new()
///     .cache_dir("/tmp/voice-models")
///     .max_models(50);
/// ```
#[derive(Debug, Clone)]
pub struct VoiceCacheConfig {
    /// Directory holding blob files and the index. Default: the platform
    /// cache dir (e.g. `~/.cache/muninn/voice-models`).
    pub cache_dir: PathBuf,
    /// Maximum number of cached models. Default: 100.
    pub max_models: usize,
}

impl Default for VoiceCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("muninn")
                .join("voice-models"),
            max_models: 100,
        }
    }
}

impl VoiceCacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the maximum number of cached models.
    pub fn max_models(mut self, n: usize) -> Self {
        self.max_models = n;
        self
    }

    /// Validate field ranges, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_models == 0 {
            errors.push("max_models must be at least 1".to_string());
        }
        if self.cache_dir.as_os_str().is_empty() {
            errors.push("cache_dir must not be empty".to_string());
        }
        errors
    }
}

/// One persisted index record: digest → blob metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    /// Milliseconds since the Unix epoch at which the blob was written.
    timestamp_ms: u64,
    /// Time-to-live in milliseconds.
    ttl_ms: u64,
    /// Blob size in bytes.
    size: u64,
    /// Blob file location.
    path: PathBuf,
}

/// Point-in-time counters for a [`VoiceModelCache`].
#[derive(Debug, Clone)]
pub struct VoiceCacheStats {
    /// Entries currently indexed.
    pub entries: usize,
    /// Configured capacity.
    pub max_models: usize,
    /// Sum of indexed blob sizes in bytes.
    pub total_bytes: u64,
}

/// Content-addressed, disk-backed cache with TTL and oldest-first eviction.
pub struct VoiceModelCache {
    config: VoiceCacheConfig,
    index: Mutex<HashMap<String, IndexEntry>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Hex SHA-256 digest of the reference input.
fn content_hash(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

impl VoiceModelCache {
    /// Open (or create) a cache rooted at `config.cache_dir`.
    ///
    /// Loads any existing index. Index entries whose blob files are
    /// missing are kept and self-healed lazily by [`get`](Self::get); a
    /// corrupt index file is discarded with a warning rather than failing
    /// the open.
    pub async fn open(config: VoiceCacheConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MuninnError::Configuration(errors.join("; ")));
        }
        tokio::fs::create_dir_all(&config.cache_dir).await?;

        let index_path = config.cache_dir.join(INDEX_FILE);
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %index_path.display(), error = %e,
                        "discarding unreadable voice cache index");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            config,
            index: Mutex::new(index),
        })
    }

    /// Look up the cached model for a reference input.
    ///
    /// Returns `None` when the digest is unknown, the entry has expired,
    /// or the backing blob is unreadable (in which case the dangling
    /// index entry is purged — self-healing, not an error).
    pub async fn get(&self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = content_hash(input);
        let mut index = self.index.lock().await;

        let Some(entry) = index.get(&hash) else {
            self.record_miss();
            return Ok(None);
        };

        if now_ms().saturating_sub(entry.timestamp_ms) >= entry.ttl_ms {
            // Expired: purge opportunistically.
            if let Some(stale) = index.remove(&hash) {
                let _ = tokio::fs::remove_file(&stale.path).await;
            }
            self.persist(&index).await?;
            self.record_miss();
            return Ok(None);
        }

        let path = entry.path.clone();
        match tokio::fs::read(&path).await {
            Ok(blob) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "voice").increment(1);
                Ok(Some(blob))
            }
            Err(e) => {
                warn!(hash = %hash, error = %e,
                    "purging voice cache entry with unreadable blob");
                index.remove(&hash);
                self.persist(&index).await?;
                self.record_miss();
                Ok(None)
            }
        }
    }

    /// Store a model blob for a reference input.
    ///
    /// Re-putting an identical input overwrites the existing entry
    /// (last-write-wins, still one index record per digest). Inserting a
    /// new digest at capacity first evicts the oldest fifth of the index
    /// (at least one entry) together with their blob files.
    pub async fn put(&self, input: &[u8], blob: &[u8], ttl: Duration) -> Result<()> {
        let hash = content_hash(input);
        let mut index = self.index.lock().await;

        if !index.contains_key(&hash) && index.len() >= self.config.max_models {
            self.evict_oldest(&mut index).await;
        }

        let path = self.config.cache_dir.join(format!("{hash}.bin"));
        // Blob first, index second: a crash here orphans a blob at worst.
        tokio::fs::write(&path, blob).await?;
        index.insert(
            hash,
            IndexEntry {
                timestamp_ms: now_ms(),
                ttl_ms: ttl.as_millis() as u64,
                size: blob.len() as u64,
                path,
            },
        );
        self.persist(&index).await
    }

    /// Snapshot of cache counters.
    pub async fn stats(&self) -> VoiceCacheStats {
        let index = self.index.lock().await;
        VoiceCacheStats {
            entries: index.len(),
            max_models: self.config.max_models,
            total_bytes: index.values().map(|e| e.size).sum(),
        }
    }

    /// Remove the oldest-by-timestamp fifth of the index (at least one
    /// entry), deleting their blob files.
    async fn evict_oldest(&self, index: &mut HashMap<String, IndexEntry>) {
        let batch = (index.len() / EVICTION_FRACTION).max(1);
        let mut by_age: Vec<(String, u64)> = index
            .iter()
            .map(|(hash, entry)| (hash.clone(), entry.timestamp_ms))
            .collect();
        by_age.sort_by_key(|(_, ts)| *ts);

        for (hash, _) in by_age.into_iter().take(batch) {
            if let Some(entry) = index.remove(&hash) {
                debug!(hash = %hash, "evicting voice model");
                let _ = tokio::fs::remove_file(&entry.path).await;
            }
        }
    }

    /// Serialize the index to `index.json` via a temp file + rename, so a
    /// crash mid-write never leaves a truncated index behind.
    async fn persist(&self, index: &HashMap<String, IndexEntry>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(index)?;
        let final_path = self.config.cache_dir.join(INDEX_FILE);
        let tmp_path = self.config.cache_dir.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    fn record_miss(&self) {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "voice").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_hashes_identically() {
        assert_eq!(content_hash(b"reference"), content_hash(b"reference"));
        assert_ne!(content_hash(b"reference"), content_hash(b"other"));
    }

    #[test]
    fn config_rejects_zero_capacity() {
        let errors = VoiceCacheConfig::new().max_models(0).validate();
        assert_eq!(errors, vec!["max_models must be at least 1".to_string()]);
    }
}
