//! The task cache handle.
//!
//! [`TaskCache`] wraps a [`StorageEngine`] with a lifecycle, size limits,
//! JSON decoding, a post-write hook and failure reporting.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --open--> Open --close--> Closed
//! ```
//!
//! `open` on an open handle and `close` on an idle or closed handle are
//! no-ops. `Closed` is terminal: construct a new handle to reopen.
//!
//! `insert` and `get` share a read lock on the lifecycle; `open` and
//! `close` take it exclusively. Individual keys are never locked: writes
//! are single-key, atomic and last-write-wins.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use task_cache::cache::TaskCache;
//! use task_cache::TaskResult;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), task_cache::CacheError> {
//! let cache = TaskCache::in_memory();
//! cache.open().await?;
//!
//! assert_eq!(cache.get("t1").await?, TaskResult::Pending);
//! cache.insert("t1", br#"{"x":1}"#.to_vec()).await?;
//! assert_eq!(
//!     cache.get("t1").await?,
//!     TaskResult::Completed { data: json!({"x": 1}) }
//! );
//!
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

mod notifier;
mod reclaimer;

pub use notifier::{Notifier, PostWriteHook};
pub use reclaimer::ReclaimStats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::RwLock;

use crate::constants::{
    DEFAULT_TTL, MAX_PAYLOAD_BYTES, NOTIFY_MAX_PAYLOAD_BYTES, RECLAIM_DISCARD_RATIO,
    RECLAIM_INTERVAL,
};
use crate::diagnostics::Diagnostics;
use crate::engine::memory::{MemoryEngine, MemoryOptions};
use crate::engine::StorageEngine;
use crate::error::CacheError;
use crate::types::TaskResult;
use reclaimer::{ReclaimCounters, Reclaimer};

/// Per-handle limits and timings.
///
/// Defaults come from [`crate::constants`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheLimits {
    /// Time-to-live attached to every write.
    pub ttl: Duration,
    /// Payloads larger than this are rejected.
    pub max_payload_bytes: usize,
    /// Payloads larger than this are stored but skip the post-write hook.
    pub notify_max_payload_bytes: usize,
    /// Period of the reclamation worker.
    pub reclaim_interval: Duration,
    /// Minimum stale fraction before a segment is rewritten.
    pub reclaim_discard_ratio: f32,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            notify_max_payload_bytes: NOTIFY_MAX_PAYLOAD_BYTES,
            reclaim_interval: RECLAIM_INTERVAL,
            reclaim_discard_ratio: RECLAIM_DISCARD_RATIO,
        }
    }
}

impl CacheLimits {
    /// Sets the record time-to-live. Expiries past the clock's range
    /// saturate to the far future.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the insert payload ceiling.
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Sets the post-write hook payload ceiling.
    pub fn with_notify_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.notify_max_payload_bytes = bytes;
        self
    }

    /// Sets the reclamation period. The worker clamps it to at most one day.
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }
}

/// The four operations callers need from a result cache.
///
/// Implemented by every [`TaskCache`]; object safe so tests and embedders
/// can hold an `Arc<dyn ResultStore>`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Makes the store usable. Idempotent.
    async fn open(&self) -> Result<(), CacheError>;

    /// Stores `payload` as the result of `task_id`.
    async fn insert(&self, task_id: &str, payload: Bytes) -> Result<(), CacheError>;

    /// Polls the result of `task_id`.
    async fn get(&self, task_id: &str) -> Result<TaskResult, CacheError>;

    /// Shuts the store down. Idempotent.
    async fn close(&self) -> Result<(), CacheError>;
}

pub(crate) enum Lifecycle<E> {
    Idle,
    Open { engine: E, reclaimer: Reclaimer },
    Closed,
}

impl<E> Lifecycle<E> {
    pub(crate) fn engine(&self) -> Option<&E> {
        match self {
            Self::Open { engine, .. } => Some(engine),
            Self::Idle | Self::Closed => None,
        }
    }
}

/// Handle to a TTL-bounded task result cache.
pub struct TaskCache<E: StorageEngine> {
    options: E::Options,
    limits: CacheLimits,
    diagnostics: Diagnostics,
    notifier: Option<Notifier>,
    counters: Arc<ReclaimCounters>,
    state: Arc<RwLock<Lifecycle<E>>>,
}

impl<E: StorageEngine> std::fmt::Debug for TaskCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCache")
            .field("options", &self.options)
            .field("limits", &self.limits)
            .field("diagnostics", &self.diagnostics)
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

impl TaskCache<MemoryEngine> {
    /// Unopened handle over a non-persistent engine.
    pub fn in_memory() -> Self {
        Self::new(MemoryOptions)
    }
}

#[cfg(feature = "disk")]
impl TaskCache<crate::engine::fjall::FjallEngine> {
    /// Unopened on-disk handle configured from `settings`.
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self::new(crate::engine::fjall::FjallOptions::new(&settings.cache.path))
            .with_limits(settings.cache.limits())
            .with_diagnostics(Diagnostics::from_settings(&settings.diagnostics))
    }
}

impl<E: StorageEngine> TaskCache<E> {
    /// Unopened handle with default limits, no hook and local-only
    /// failure reporting.
    pub fn new(options: E::Options) -> Self {
        Self {
            options,
            limits: CacheLimits::default(),
            diagnostics: Diagnostics::disabled(),
            notifier: None,
            counters: Arc::new(ReclaimCounters::default()),
            state: Arc::new(RwLock::new(Lifecycle::Idle)),
        }
    }

    /// Replaces the limits. Takes effect at the next `open`.
    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Routes failures to `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Runs `hook` after every successful insert.
    pub fn with_notifier(mut self, hook: impl PostWriteHook) -> Self {
        self.notifier = Some(Notifier::new(hook));
        self
    }

    /// Limits in effect.
    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    /// Engine open parameters.
    pub fn options(&self) -> &E::Options {
        &self.options
    }

    /// Reclamation counters.
    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.counters.snapshot()
    }

    /// Whether `insert` and `get` are currently accepted.
    pub async fn is_open(&self) -> bool {
        matches!(*self.state.read().await, Lifecycle::Open { .. })
    }

    /// Opens the engine and starts the reclamation worker.
    ///
    /// Calling this on an open handle does nothing.
    ///
    /// # Errors
    ///
    /// - [`CacheError::EngineInit`] if the engine cannot be opened. The
    ///   handle stays unopened and may be retried.
    /// - [`CacheError::Closed`] if the handle has been closed.
    pub async fn open(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        match &*state {
            Lifecycle::Open { .. } => return Ok(()),
            Lifecycle::Closed => return Err(CacheError::Closed),
            Lifecycle::Idle => {},
        }

        let engine = match E::open(&self.options).await {
            Ok(engine) => engine,
            Err(source) => {
                let err = CacheError::EngineInit { source };
                self.diagnostics.capture(
                    &err,
                    "failed to open storage engine",
                    json!({ "options": format!("{:?}", self.options) }),
                );
                return Err(err);
            },
        };

        let reclaimer = Reclaimer::spawn(
            Arc::downgrade(&self.state),
            Arc::clone(&self.counters),
            self.limits.reclaim_interval,
            self.limits.reclaim_discard_ratio,
        );
        *state = Lifecycle::Open { engine, reclaimer };

        tracing::info!(
            ttl_secs = self.limits.ttl.as_secs(),
            reclaim_interval_secs = self.limits.reclaim_interval.as_secs(),
            "task cache opened"
        );
        Ok(())
    }

    /// Stores `payload` as the result of `task_id` with the configured TTL.
    ///
    /// Returns once the engine has accepted the write; the post-write hook
    /// runs afterwards in the background.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Closed`] if the handle is not open.
    /// - [`CacheError::PayloadTooLarge`] if the payload exceeds
    ///   [`CacheLimits::max_payload_bytes`]. Nothing is written.
    /// - [`CacheError::Write`] if the engine fails the write, or with an
    ///   [`EngineError::InvalidKey`](crate::engine::EngineError::InvalidKey)
    ///   source if `task_id` is empty or longer than 65535 bytes.
    pub async fn insert(&self, task_id: &str, payload: impl Into<Bytes>) -> Result<(), CacheError> {
        let payload: Bytes = payload.into();
        let size = payload.len();

        let state = self.state.read().await;
        let engine = state.engine().ok_or(CacheError::Closed)?;

        if size > self.limits.max_payload_bytes {
            tracing::warn!(
                task_id = %task_id,
                size,
                limit = self.limits.max_payload_bytes,
                "rejecting oversized task result"
            );
            return Err(CacheError::PayloadTooLarge {
                task_id: task_id.to_string(),
                size,
                limit: self.limits.max_payload_bytes,
            });
        }

        if let Err(source) = engine.put(task_id, payload.clone(), self.limits.ttl).await {
            let err = CacheError::Write {
                task_id: task_id.to_string(),
                size,
                source,
            };
            self.report(
                &err,
                "failed to insert task result",
                json!({ "task_id": task_id, "size": size }),
            );
            return Err(err);
        }
        drop(state);

        tracing::debug!(task_id = %task_id, size, "task result stored");
        if let Some(notifier) = &self.notifier {
            notifier.dispatch(task_id, payload, self.limits.notify_max_payload_bytes);
        }
        Ok(())
    }

    /// Polls the result of `task_id`.
    ///
    /// An absent or expired record is [`TaskResult::Pending`], not an error.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Closed`] if the handle is not open.
    /// - [`CacheError::CorruptRecord`] if the stored payload is not JSON.
    /// - [`CacheError::Read`] if the engine fails the lookup or rejects
    ///   `task_id`.
    pub async fn get(&self, task_id: &str) -> Result<TaskResult, CacheError> {
        let state = self.state.read().await;
        let engine = state.engine().ok_or(CacheError::Closed)?;

        let stored = match engine.get(task_id).await {
            Ok(stored) => stored,
            Err(source) => {
                let err = CacheError::Read {
                    task_id: task_id.to_string(),
                    source,
                };
                self.report(&err, "failed to get task result", json!({ "task_id": task_id }));
                return Err(err);
            },
        };
        drop(state);

        let Some(raw) = stored else {
            return Ok(TaskResult::Pending);
        };
        match serde_json::from_slice(&raw) {
            Ok(data) => Ok(TaskResult::Completed { data }),
            Err(source) => {
                tracing::warn!(
                    task_id = %task_id,
                    size = raw.len(),
                    error = %source,
                    "stored task result is not valid JSON"
                );
                Err(CacheError::CorruptRecord {
                    task_id: task_id.to_string(),
                    source,
                })
            },
        }
    }

    // Rejected identifiers are caller errors and stay out of diagnostics.
    fn report(&self, err: &CacheError, message: &str, fields: serde_json::Value) {
        if err.is_retryable() {
            self.diagnostics.capture(err, message, fields);
        } else {
            tracing::warn!(error = %err, "{message}");
        }
    }

    /// Stops the reclamation worker and closes the engine.
    ///
    /// A no-op on a handle that was never opened or is already closed.
    ///
    /// # Errors
    ///
    /// [`CacheError::Close`] if the engine does not shut down cleanly. The
    /// handle is closed regardless.
    pub async fn close(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        let (engine, reclaimer) = match std::mem::replace(&mut *state, Lifecycle::Closed) {
            Lifecycle::Open { engine, reclaimer } => (engine, reclaimer),
            idle_or_closed => {
                *state = idle_or_closed;
                return Ok(());
            },
        };

        let closed = engine.close().await;
        drop(state);
        reclaimer.stop().await;

        match closed {
            Ok(()) => {
                tracing::info!("task cache closed");
                Ok(())
            },
            Err(source) => {
                let err = CacheError::Close { source };
                self.diagnostics
                    .capture(&err, "failed to close storage engine", json!({}));
                Err(err)
            },
        }
    }
}

#[async_trait]
impl<E: StorageEngine> ResultStore for TaskCache<E> {
    async fn open(&self) -> Result<(), CacheError> {
        TaskCache::open(self).await
    }

    async fn insert(&self, task_id: &str, payload: Bytes) -> Result<(), CacheError> {
        TaskCache::insert(self, task_id, payload).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskResult, CacheError> {
        TaskCache::get(self, task_id).await
    }

    async fn close(&self) -> Result<(), CacheError> {
        TaskCache::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_limits_match_constants() {
        let limits = CacheLimits::default();
        assert_eq!(limits.ttl, Duration::from_secs(300));
        assert_eq!(limits.max_payload_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.notify_max_payload_bytes, 5 * 1024 * 1024);
        assert_eq!(limits.reclaim_interval, Duration::from_secs(120));
        assert_eq!(limits.reclaim_discard_ratio, 0.7);
    }

    #[test]
    fn limit_builders() {
        let limits = CacheLimits::default()
            .with_ttl(Duration::from_secs(5))
            .with_max_payload_bytes(10)
            .with_notify_max_payload_bytes(4)
            .with_reclaim_interval(Duration::from_millis(50));
        assert_eq!(limits.ttl, Duration::from_secs(5));
        assert_eq!(limits.max_payload_bytes, 10);
        assert_eq!(limits.notify_max_payload_bytes, 4);
        assert_eq!(limits.reclaim_interval, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn close_before_open_keeps_handle_openable() {
        let cache = TaskCache::in_memory();
        cache.close().await.unwrap();
        cache.open().await.unwrap();
        assert!(cache.is_open().await);
        cache.close().await.unwrap();
        assert!(!cache.is_open().await);
    }

    #[tokio::test]
    async fn closed_handle_cannot_reopen() {
        let cache = TaskCache::in_memory();
        cache.open().await.unwrap();
        cache.close().await.unwrap();
        assert!(matches!(cache.open().await, Err(CacheError::Closed)));
    }

    #[tokio::test]
    async fn trait_object_delegates() {
        let store: Arc<dyn ResultStore> = Arc::new(TaskCache::in_memory());
        store.open().await.unwrap();
        store
            .insert("t1", Bytes::from_static(b"[1,2]"))
            .await
            .unwrap();
        assert_eq!(
            store.get("t1").await.unwrap(),
            TaskResult::Completed {
                data: serde_json::json!([1, 2])
            }
        );
        store.close().await.unwrap();
    }

    #[test]
    fn debug_output_names_the_handle() {
        let cache = TaskCache::in_memory();
        let debug = format!("{cache:?}");
        assert!(debug.starts_with("TaskCache"));
        assert!(debug.contains("limits"));
    }
}
