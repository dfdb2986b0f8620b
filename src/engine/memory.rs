//! In-memory storage engine.
//!
//! [`MemoryEngine`] keeps records in a `DashMap<String, (Bytes, Instant)>`
//! where the `Instant` is the record's expiry. It uses the tokio clock, so
//! tests running with a paused runtime can drive expiry with
//! `tokio::time::advance`.
//!
//! # Examples
//!
//! ```
//! use task_cache::cache::TaskCache;
//! use task_cache::engine::memory::{MemoryEngine, MemoryOptions};
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let cache: TaskCache<MemoryEngine> = TaskCache::new(MemoryOptions::default());
//! assert!(!cache.is_open().await);
//! cache.open().await.unwrap();
//! assert!(cache.is_open().await);
//! # cache.close().await.unwrap();
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{EngineError, ReclaimOutcome, StorageEngine};

// Fallback expiry when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Options for [`MemoryEngine`]. There is nothing to configure.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOptions;

/// Thread-safe, non-persistent storage engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    data: DashMap<String, (Bytes, Instant)>,
    reclaiming: AtomicBool,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    type Options = MemoryOptions;

    async fn open(_options: &MemoryOptions) -> Result<Self, EngineError> {
        Ok(Self::new())
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), EngineError> {
        self.ensure_open()?;
        EngineError::check_key(key)?;
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + FAR_FUTURE);
        self.data.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, EngineError> {
        self.ensure_open()?;
        EngineError::check_key(key)?;
        let Some(entry) = self.data.get(key) else {
            return Ok(None);
        };
        let (value, expires_at) = entry.value();
        if *expires_at <= Instant::now() {
            return Ok(None);
        }
        Ok(Some(value.clone()))
    }

    async fn reclaim(&self, _discard_ratio: f32) -> Result<ReclaimOutcome, EngineError> {
        self.ensure_open()?;
        if self
            .reclaiming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::ReclaimInProgress);
        }

        let now = Instant::now();
        let candidates: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.value().1 <= now)
            .map(|entry| entry.key().clone())
            .collect();
        // Re-check on removal: the key may have been rewritten since the scan.
        let removed = candidates
            .iter()
            .filter(|key| {
                self.data
                    .remove_if(key.as_str(), |_, (_, expires_at)| *expires_at <= now)
                    .is_some()
            })
            .count();

        self.reclaiming.store(false, Ordering::Release);

        if removed == 0 {
            return Err(EngineError::NothingToReclaim);
        }
        Ok(ReclaimOutcome {
            expired_removed: removed,
            bytes_reclaimed: 0,
        })
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::Release);
        self.data.clear();
        Ok(())
    }
}
