//! Integration tests for TaskCache over the on-disk fjall engine.
//!
//! Each test runs against its own temporary directory.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use task_cache::engine::fjall::FjallOptions;
use task_cache::{CacheError, CacheLimits, DiskTaskCache, Settings, TaskResult};

fn cache_in(dir: &TempDir) -> DiskTaskCache {
    DiskTaskCache::new(FjallOptions::new(dir.path().join("results")))
}

#[tokio::test]
async fn test_insert_get_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(&dir);
    cache.open().await.unwrap();

    cache.insert("t1", br#"{"x":1}"#.to_vec()).await.unwrap();
    assert_eq!(
        cache.get("t1").await.unwrap(),
        TaskResult::Completed { data: json!({"x": 1}) }
    );
    assert_eq!(cache.get("t2").await.unwrap(), TaskResult::Pending);
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_results_survive_new_handle() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = cache_in(&dir);
        cache.open().await.unwrap();
        cache.insert("t1", br#"{"done":true}"#.to_vec()).await.unwrap();
        cache.close().await.unwrap();
    }

    let cache = cache_in(&dir);
    cache.open().await.unwrap();
    assert_eq!(
        cache.get("t1").await.unwrap().into_data(),
        Some(json!({"done": true}))
    );
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_record_reads_pending_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(&dir).with_limits(CacheLimits::default().with_ttl(Duration::from_millis(50)));
    cache.open().await.unwrap();

    cache.insert("t1", &b"{}"[..]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get("t1").await.unwrap(), TaskResult::Pending);
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_large_payload_goes_through_blob_storage() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(&dir);
    cache.open().await.unwrap();

    let big = json!({"blob": "y".repeat(256 * 1024)});
    cache
        .insert("big", serde_json::to_vec(&big).unwrap())
        .await
        .unwrap();
    assert_eq!(cache.get("big").await.unwrap().into_data(), Some(big));
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_reclaim_worker_sweeps_expired_records() {
    let dir = tempfile::tempdir().unwrap();
    let limits = CacheLimits::default()
        .with_ttl(Duration::from_millis(20))
        .with_reclaim_interval(Duration::from_millis(100));
    let cache = cache_in(&dir).with_limits(limits);
    cache.open().await.unwrap();

    cache.insert("t1", &b"{}"[..]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    let stats = cache.reclaim_stats();
    assert!(stats.attempts >= 2, "expected periodic attempts, got {stats:?}");
    assert!(stats.reclaimed >= 1, "expected the expired record to be swept, got {stats:?}");
    assert_eq!(stats.failures, 0);
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_task_ids_leave_cache_usable() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(&dir);
    cache.open().await.unwrap();

    assert!(matches!(
        cache.insert("", &b"{}"[..]).await,
        Err(CacheError::Write { .. })
    ));
    assert!(matches!(
        cache.insert(&"k".repeat(65_536), &b"{}"[..]).await,
        Err(CacheError::Write { .. })
    ));
    assert!(matches!(cache.get("").await, Err(CacheError::Read { .. })));

    cache.insert("t1", br#"{"ok":true}"#.to_vec()).await.unwrap();
    assert_eq!(
        cache.get("t1").await.unwrap(),
        TaskResult::Completed { data: json!({"ok": true}) }
    );
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_unbounded_ttl_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_in(&dir).with_limits(CacheLimits::default().with_ttl(Duration::MAX));
    cache.open().await.unwrap();

    cache.insert("t1", &b"[]"[..]).await.unwrap();
    assert_eq!(cache.get("t1").await.unwrap().into_data(), Some(json!([])));
    cache.close().await.unwrap();
}

#[tokio::test]
async fn test_unusable_path_fails_engine_init() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let cache = DiskTaskCache::new(FjallOptions::new(file.path()));
    assert!(matches!(
        cache.open().await,
        Err(CacheError::EngineInit { .. })
    ));
    assert!(!cache.is_open().await);
}

#[tokio::test]
async fn test_from_settings_uses_configured_path_and_limits() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.cache.path = dir.path().join("configured");
    settings.cache.ttl_secs = 42;

    let cache = DiskTaskCache::from_settings(&settings);
    assert_eq!(cache.limits().ttl, Duration::from_secs(42));
    assert_eq!(cache.options().path, dir.path().join("configured"));

    cache.open().await.unwrap();
    cache.insert("t1", &b"[]"[..]).await.unwrap();
    assert!(dir.path().join("configured").exists());
    cache.close().await.unwrap();
}
