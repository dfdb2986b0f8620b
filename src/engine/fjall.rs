//! On-disk storage engine backed by `fjall`.
//!
//! [`FjallEngine`] stores each record in a single key/value-separated
//! partition. Small values stay inline in the LSM tree; values above the
//! separation threshold go to blob files, which is what
//! [`reclaim`](StorageEngine::reclaim) garbage-collects.
//!
//! # Value Layout
//!
//! | Bytes | Content |
//! |-------|---------|
//! | `0..8` | expiry, Unix epoch milliseconds, big-endian `u64` |
//! | `8..`  | caller payload, verbatim |
//!
//! `fjall` has no native TTL, so expiry is checked on every read and
//! expired keys are removed during reclamation.
//!
//! # Sweep Cost
//!
//! The expiry header sits in the value, so the sweep reads every value it
//! inspects, including blob-stored ones. Each pass inspects at most
//! [`FjallOptions::sweep_batch_size`] keys and the next pass resumes after
//! the last key seen, wrapping to the start once the partition is
//! exhausted. A large backlog of expired records is therefore removed over
//! several passes.
//!
//! # Blocking
//!
//! `fjall` does synchronous I/O. Every operation runs on tokio's blocking
//! pool so async callers are never stalled.
//!
//! # Examples
//!
//! ```rust,no_run
//! use task_cache::cache::TaskCache;
//! use task_cache::engine::fjall::{FjallEngine, FjallOptions};
//!
//! # async fn example() -> Result<(), task_cache::CacheError> {
//! let cache: TaskCache<FjallEngine> = TaskCache::new(FjallOptions::new("/var/lib/task-cache"));
//! cache.open().await?;
//! cache.insert("t1", br#"{"x":1}"#.to_vec()).await?;
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fjall::{
    Config, GarbageCollection, Keyspace, KvSeparationOptions, PartitionCreateOptions,
    PartitionHandle, PersistMode,
};
use parking_lot::Mutex;

use super::record;
use super::{EngineError, ReclaimOutcome, StorageEngine};
use crate::constants::{RESULTS_PARTITION, SWEEP_BATCH_SIZE};

/// Open parameters for [`FjallEngine`].
///
/// The defaults are tuned for small, short-lived values.
///
/// | Setting | Default |
/// |---------|---------|
/// | `max_write_buffer_size` | 16 MiB |
/// | `max_memtable_size` | 4 MiB |
/// | `blob_file_target_size` | 16 MiB |
/// | `separation_threshold` | 64 KiB |
/// | `sweep_batch_size` | 10 000 keys |
#[derive(Debug, Clone)]
pub struct FjallOptions {
    /// Directory holding the keyspace. Created if missing.
    pub path: PathBuf,
    /// Upper bound on the sum of all memtables before a flush is forced.
    pub max_write_buffer_size: u64,
    /// Size at which a single memtable is rotated.
    pub max_memtable_size: u32,
    /// Target size of each blob file.
    pub blob_file_target_size: u64,
    /// Values at or above this size are stored in blob files.
    pub separation_threshold: u32,
    /// Keys inspected by one expiry sweep. Zero is treated as one.
    pub sweep_batch_size: usize,
}

impl FjallOptions {
    /// Default options rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_write_buffer_size: 16 << 20,
            max_memtable_size: 4 << 20,
            blob_file_target_size: 16 << 20,
            separation_threshold: 64 << 10,
            sweep_batch_size: SWEEP_BATCH_SIZE,
        }
    }
}

struct Inner {
    path: PathBuf,
    keyspace: Keyspace,
    partition: PartitionHandle,
    // Serializes writes so an expiry sweep never removes a key that was
    // rewritten between its check and its delete.
    write_lock: Mutex<()>,
    // Last key inspected by the previous sweep; `None` starts from the top.
    sweep_cursor: Mutex<Option<Vec<u8>>>,
    sweep_batch_size: usize,
    reclaiming: AtomicBool,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn sweep_expired(&self) -> Result<usize, EngineError> {
        let now = record::now_millis();
        let mut cursor = self.sweep_cursor.lock();
        let start = match cursor.take() {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };

        let mut candidates = Vec::new();
        let mut inspected = 0;
        let mut last_seen = None;
        for item in self
            .partition
            .range((start, Bound::<Vec<u8>>::Unbounded))
            .take(self.sweep_batch_size)
        {
            let (key, value) = item.map_err(|e| EngineError::backend("expiry scan failed", e))?;
            inspected += 1;
            if let Ok((expires_at, _)) = record::decode(&value) {
                if record::is_expired(expires_at, now) {
                    candidates.push(key.clone());
                }
            }
            last_seen = Some(key.to_vec());
        }
        // A short batch means the end was reached.
        *cursor = if inspected == self.sweep_batch_size {
            last_seen
        } else {
            None
        };
        drop(cursor);

        let mut removed = 0;
        for key in candidates {
            let _guard = self.write_lock.lock();
            let still_expired = match self.partition.get(&key) {
                Ok(Some(value)) => record::decode(&value)
                    .map(|(expires_at, _)| record::is_expired(expires_at, now))
                    .unwrap_or(false),
                Ok(None) => false,
                Err(e) => return Err(EngineError::backend("expiry re-check failed", e)),
            };
            if still_expired {
                self.partition
                    .remove(key)
                    .map_err(|e| EngineError::backend("failed to remove expired record", e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn collect_blobs(&self, discard_ratio: f32) -> Result<u64, EngineError> {
        self.partition
            .gc_scan()
            .map_err(|e| EngineError::backend("blob scan failed", e))?;
        self.partition
            .gc_with_staleness_threshold(discard_ratio)
            .map_err(|e| EngineError::backend("blob rewrite failed", e))
    }
}

/// Clears the in-progress flag however the pass ends.
struct ReclaimGuard<'a>(&'a AtomicBool);

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Embedded on-disk storage engine.
#[derive(Clone)]
pub struct FjallEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FjallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallEngine")
            .field("path", &self.inner.path)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl FjallEngine {
    /// Directory this engine was opened on.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, EngineError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| EngineError::backend("storage task failed", e))?
    }

    fn open_blocking(options: &FjallOptions) -> Result<Self, EngineError> {
        let unavailable = |e: fjall::Error| EngineError::Unavailable {
            path: options.path.clone(),
            source: Box::new(e),
        };

        let keyspace = Config::new(&options.path)
            .max_write_buffer_size(options.max_write_buffer_size)
            .open()
            .map_err(unavailable)?;
        let partition = keyspace
            .open_partition(
                RESULTS_PARTITION,
                PartitionCreateOptions::default()
                    .max_memtable_size(options.max_memtable_size)
                    .with_kv_separation(
                        KvSeparationOptions::default()
                            .separation_threshold(options.separation_threshold)
                            .file_target_size(options.blob_file_target_size),
                    ),
            )
            .map_err(unavailable)?;

        Ok(Self {
            inner: Arc::new(Inner {
                path: options.path.clone(),
                keyspace,
                partition,
                write_lock: Mutex::new(()),
                sweep_cursor: Mutex::new(None),
                sweep_batch_size: options.sweep_batch_size.max(1),
                reclaiming: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

#[async_trait]
impl StorageEngine for FjallEngine {
    type Options = FjallOptions;

    async fn open(options: &FjallOptions) -> Result<Self, EngineError> {
        let options = options.clone();
        tokio::task::spawn_blocking(move || Self::open_blocking(&options))
            .await
            .map_err(|e| EngineError::backend("storage task failed", e))?
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), EngineError> {
        let key = key.to_string();
        self.blocking(move |inner| {
            inner.ensure_open()?;
            EngineError::check_key(&key)?;
            let raw = record::encode(record::expires_at(ttl), &value);
            let _guard = inner.write_lock.lock();
            inner
                .partition
                .insert(key.as_str(), raw)
                .map_err(|e| EngineError::backend("insert failed", e))
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, EngineError> {
        let key = key.to_string();
        self.blocking(move |inner| {
            inner.ensure_open()?;
            EngineError::check_key(&key)?;
            let Some(raw) = inner
                .partition
                .get(key.as_str())
                .map_err(|e| EngineError::backend("lookup failed", e))?
            else {
                return Ok(None);
            };
            let (expires_at, payload) = record::decode(&raw)?;
            if record::is_expired(expires_at, record::now_millis()) {
                return Ok(None);
            }
            Ok(Some(Bytes::copy_from_slice(payload)))
        })
        .await
    }

    async fn reclaim(&self, discard_ratio: f32) -> Result<ReclaimOutcome, EngineError> {
        self.blocking(move |inner| {
            inner.ensure_open()?;
            if inner
                .reclaiming
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(EngineError::ReclaimInProgress);
            }
            let _guard = ReclaimGuard(&inner.reclaiming);

            let expired_removed = inner.sweep_expired()?;
            let bytes_reclaimed = inner.collect_blobs(discard_ratio)?;
            if expired_removed == 0 && bytes_reclaimed == 0 {
                return Err(EngineError::NothingToReclaim);
            }
            Ok(ReclaimOutcome {
                expired_removed,
                bytes_reclaimed,
            })
        })
        .await
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.blocking(|inner| {
            if inner.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            inner
                .keyspace
                .persist(PersistMode::SyncAll)
                .map_err(|e| EngineError::backend("failed to persist journal", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    async fn open_in(dir: &tempfile::TempDir) -> FjallEngine {
        FjallEngine::open(&FjallOptions::new(dir.path().join("db")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_in(&dir).await;
        engine
            .put("t1", Bytes::from_static(br#"{"x":1}"#), TTL)
            .await
            .unwrap();
        assert_eq!(
            engine.get("t1").await.unwrap(),
            Some(Bytes::from_static(br#"{"x":1}"#))
        );
        assert_eq!(engine.get("t2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_is_immediately_absent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_in(&dir).await;
        engine
            .put("t1", Bytes::from_static(b"{}"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(engine.get("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reclaim_sweeps_expired_keys() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_in(&dir).await;
        engine
            .put("gone", Bytes::from_static(b"{}"), Duration::ZERO)
            .await
            .unwrap();
        engine
            .put("kept", Bytes::from_static(b"{}"), TTL)
            .await
            .unwrap();

        let outcome = engine.reclaim(0.7).await.unwrap();
        assert_eq!(outcome.expired_removed, 1);
        assert!(engine.get("kept").await.unwrap().is_some());
        assert!(matches!(
            engine.reclaim(0.7).await,
            Err(EngineError::NothingToReclaim)
        ));
    }

    #[tokio::test]
    async fn sweep_resumes_across_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = FjallOptions::new(dir.path().join("db"));
        options.sweep_batch_size = 2;
        let engine = FjallEngine::open(&options).await.unwrap();
        for i in 0..5 {
            engine
                .put(&format!("t{i}"), Bytes::from_static(b"{}"), Duration::ZERO)
                .await
                .unwrap();
        }

        let removed: Vec<usize> = [
            engine.reclaim(0.7).await.unwrap(),
            engine.reclaim(0.7).await.unwrap(),
            engine.reclaim(0.7).await.unwrap(),
        ]
        .iter()
        .map(|outcome| outcome.expired_removed)
        .collect();
        assert_eq!(removed, vec![2, 2, 1]);
        assert!(matches!(
            engine.reclaim(0.7).await,
            Err(EngineError::NothingToReclaim)
        ));
    }

    #[tokio::test]
    async fn invalid_keys_leave_engine_usable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_in(&dir).await;
        assert!(matches!(
            engine.put("", Bytes::from_static(b"{}"), TTL).await,
            Err(EngineError::InvalidKey { len: 0 })
        ));
        let long = "k".repeat(crate::constants::MAX_TASK_ID_BYTES + 1);
        assert!(matches!(
            engine.put(&long, Bytes::from_static(b"{}"), TTL).await,
            Err(EngineError::InvalidKey { .. })
        ));
        assert!(matches!(engine.get("").await, Err(EngineError::InvalidKey { .. })));

        engine.put("t1", Bytes::from_static(b"{}"), TTL).await.unwrap();
        assert_eq!(engine.get("t1").await.unwrap(), Some(Bytes::from_static(b"{}")));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = open_in(&dir).await;
            engine
                .put("t1", Bytes::from_static(b"[1]"), TTL)
                .await
                .unwrap();
            engine.close().await.unwrap();
        }
        let engine = open_in(&dir).await;
        assert_eq!(
            engine.get("t1").await.unwrap(),
            Some(Bytes::from_static(b"[1]"))
        );
    }

    #[tokio::test]
    async fn open_on_a_regular_file_is_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = FjallEngine::open(&FjallOptions::new(file.path())).await;
        assert!(matches!(result, Err(EngineError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn closed_engine_rejects_operations_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_in(&dir).await;
        engine.close().await.unwrap();
        engine.close().await.unwrap();
        assert!(matches!(engine.get("t1").await, Err(EngineError::Closed)));
    }
}
