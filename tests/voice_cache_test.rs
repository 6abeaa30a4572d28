//! Tests for [`VoiceModelCache`] — content addressing, disk persistence,
//! TTL, self-healing, and batch eviction.

use std::path::Path;
use std::time::Duration;

use muninn::{VoiceCacheConfig, VoiceModelCache};

const HOUR: Duration = Duration::from_secs(3600);

async fn open(dir: &Path, max_models: usize) -> VoiceModelCache {
    VoiceModelCache::open(
        VoiceCacheConfig::new()
            .cache_dir(dir)
            .max_models(max_models),
    )
    .await
    .unwrap()
}

/// Paths of blob files currently in the cache directory.
fn blob_files(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect()
}

// =========================================================================
// Round-trip and content addressing
// =========================================================================

#[tokio::test]
async fn put_then_get_returns_blob() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 10).await;

    cache.put(b"reference-audio", b"model-blob", HOUR).await.unwrap();
    let blob = cache.get(b"reference-audio").await.unwrap();
    assert_eq!(blob.as_deref(), Some(b"model-blob".as_slice()));
}

#[tokio::test]
async fn unknown_input_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 10).await;

    assert!(cache.get(b"never-stored").await.unwrap().is_none());
}

#[tokio::test]
async fn identical_input_keeps_one_entry_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 10).await;

    cache.put(b"same-reference", b"first", HOUR).await.unwrap();
    cache.put(b"same-reference", b"second", HOUR).await.unwrap();

    assert_eq!(cache.stats().await.entries, 1);
    assert_eq!(blob_files(dir.path()).len(), 1);
    assert_eq!(
        cache.get(b"same-reference").await.unwrap().as_deref(),
        Some(b"second".as_slice())
    );
}

// =========================================================================
// TTL
// =========================================================================

#[tokio::test]
async fn expired_entry_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 10).await;

    cache
        .put(b"ref", b"blob", Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(cache.get(b"ref").await.unwrap().is_none());
    // Opportunistic purge dropped the stale entry.
    assert_eq!(cache.stats().await.entries, 0);
}

// =========================================================================
// Self-healing
// =========================================================================

#[tokio::test]
async fn missing_blob_is_a_miss_and_purges_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 10).await;

    cache.put(b"ref", b"blob", HOUR).await.unwrap();
    for blob in blob_files(dir.path()) {
        std::fs::remove_file(blob).unwrap();
    }

    assert!(cache.get(b"ref").await.unwrap().is_none());
    assert_eq!(cache.stats().await.entries, 0);
    // Healed state persists: a fresh handle sees the purge too.
    let reopened = open(dir.path(), 10).await;
    assert!(reopened.get(b"ref").await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_index_is_discarded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.json"), b"{ not json").unwrap();

    let cache = open(dir.path(), 10).await;
    assert_eq!(cache.stats().await.entries, 0);
}

// =========================================================================
// Persistence
// =========================================================================

#[tokio::test]
async fn index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = open(dir.path(), 10).await;
        cache.put(b"ref", b"blob", HOUR).await.unwrap();
    }

    let cache = open(dir.path(), 10).await;
    assert_eq!(
        cache.get(b"ref").await.unwrap().as_deref(),
        Some(b"blob".as_slice())
    );

    // The on-disk index is plain JSON.
    let raw = std::fs::read_to_string(dir.path().join("index.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(parsed.is_object());
}

// =========================================================================
// Eviction
// =========================================================================

#[tokio::test]
async fn full_cache_evicts_oldest_batch() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 5).await;

    for i in 0u8..5 {
        cache.put(&[i], &[i, i], HOUR).await.unwrap();
        // Distinct timestamps so "oldest" is well defined.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cache.stats().await.entries, 5);

    cache.put(b"newest", b"blob", HOUR).await.unwrap();

    // One fifth of 5 entries evicted, then the new one inserted.
    let stats = cache.stats().await;
    assert_eq!(stats.entries, 5);
    assert_eq!(blob_files(dir.path()).len(), 5);

    // The oldest entry is gone; the newest is present.
    assert!(cache.get(&[0u8]).await.unwrap().is_none());
    assert!(cache.get(b"newest").await.unwrap().is_some());
}

#[tokio::test]
async fn stats_report_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open(dir.path(), 7).await;

    cache.put(b"a", b"12345", HOUR).await.unwrap();
    cache.put(b"b", b"123", HOUR).await.unwrap();

    let stats = cache.stats().await;
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.max_models, 7);
    assert_eq!(stats.total_bytes, 8);
}
