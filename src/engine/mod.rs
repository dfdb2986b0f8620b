//! Storage engine trait and supporting types.
//!
//! The [`StorageEngine`] trait is the seam between the cache handle and the
//! embedded key-value engine that actually holds the bytes. Engines are
//! dumb: they store a value under a key with an expiry, hand it back while
//! it is live, reclaim space on request and shut down. Lifecycle locking,
//! size limits, JSON decoding, notifications and diagnostics all live in
//! [`TaskCache`](crate::cache::TaskCache).
//!
//! # Engines
//!
//! - [`MemoryEngine`](memory::MemoryEngine) -- `DashMap`-backed, non-persistent.
//! - [`FjallEngine`](fjall::FjallEngine) -- embedded LSM tree on disk.
//!   Available behind the `disk` feature flag.
//!
//! # Expiry
//!
//! `get` must return `Ok(None)` for a key whose TTL has elapsed, whether or
//! not the engine has physically removed it yet. `reclaim` is best-effort
//! housekeeping and is never needed for correctness.
//!
//! # Keys
//!
//! Both engines accept keys of 1 to
//! [`MAX_TASK_ID_BYTES`](crate::constants::MAX_TASK_ID_BYTES) bytes and
//! answer anything else with [`EngineError::InvalidKey`] before touching
//! storage.

#[cfg(feature = "disk")]
pub mod fjall;
pub mod memory;
pub(crate) mod record;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::constants::MAX_TASK_ID_BYTES;

/// Boxed error type carried as the cause of engine failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a completed reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Expired records physically removed during the pass.
    pub expired_removed: usize,
    /// Bytes of segment space released, when the engine can tell.
    pub bytes_reclaimed: u64,
}

/// Errors raised by storage engines.
///
/// [`NothingToReclaim`](EngineError::NothingToReclaim) and
/// [`ReclaimInProgress`](EngineError::ReclaimInProgress) are the two
/// expected answers from [`StorageEngine::reclaim`] that callers treat as
/// no-ops; see [`is_benign_reclaim`](EngineError::is_benign_reclaim).
///
/// # Examples
///
/// ```
/// use task_cache::engine::EngineError;
///
/// assert!(EngineError::NothingToReclaim.is_benign_reclaim());
/// let err = EngineError::backend("journal write failed", std::io::Error::other("EIO"));
/// assert!(!err.is_benign_reclaim());
/// assert_eq!(err.to_string(), "backend error: journal write failed");
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// The storage location could not be opened (missing, unwritable,
    /// locked by another process).
    #[error("storage path {} unavailable: {source}", .path.display())]
    Unavailable {
        /// The directory the engine tried to open.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// Any other I/O or engine-internal failure.
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// The key is empty or longer than the engine can index.
    #[error("invalid key length {len}: must be 1..={max} bytes", max = MAX_TASK_ID_BYTES)]
    InvalidKey {
        /// Length of the rejected key in bytes.
        len: usize,
    },

    /// A reclamation pass found nothing worth rewriting.
    #[error("nothing to reclaim")]
    NothingToReclaim,

    /// Another reclamation pass is already running.
    #[error("reclaim already in progress")]
    ReclaimInProgress,

    /// The engine has been closed.
    #[error("engine is closed")]
    Closed,
}

impl EngineError {
    /// Wraps an arbitrary error as [`EngineError::Backend`].
    pub fn backend(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Rejects keys outside `1..=MAX_TASK_ID_BYTES` bytes.
    pub fn check_key(key: &str) -> Result<(), Self> {
        if key.is_empty() || key.len() > MAX_TASK_ID_BYTES {
            return Err(Self::InvalidKey { len: key.len() });
        }
        Ok(())
    }

    /// Returns `true` for the reclaim answers that mean "nothing to do".
    pub fn is_benign_reclaim(&self) -> bool {
        matches!(self, Self::NothingToReclaim | Self::ReclaimInProgress)
    }
}

/// Embedded key-value engine holding task records.
///
/// Implementations must be safe for concurrent `put`/`get` from many tasks:
/// the cache handle only serializes open and close, never individual keys.
/// A `put` is a single atomic write; a concurrent `get` of the same key
/// observes either the previous or the new value, never a mix.
#[async_trait]
pub trait StorageEngine: Send + Sync + Sized + 'static {
    /// Engine-specific open parameters (paths, buffer sizes).
    type Options: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Opens (or creates) an engine instance.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Unavailable`] if the storage location cannot be used.
    /// - [`EngineError::Backend`] on any other initialization failure.
    async fn open(options: &Self::Options) -> Result<Self, EngineError>;

    /// Stores `value` under `key`, replacing any previous value, expiring
    /// `ttl` after the write.
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), EngineError>;

    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, EngineError>;

    /// Reclaims space held by expired and overwritten values.
    ///
    /// `discard_ratio` is the minimum stale fraction of a segment before it
    /// is rewritten.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NothingToReclaim`] when the pass freed nothing.
    /// - [`EngineError::ReclaimInProgress`] when another pass is running.
    /// - Anything else is a genuine failure.
    async fn reclaim(&self, discard_ratio: f32) -> Result<ReclaimOutcome, EngineError>;

    /// Flushes and shuts the engine down. Closing twice is a no-op; `put`,
    /// `get` and `reclaim` fail with [`EngineError::Closed`] afterwards.
    async fn close(&self) -> Result<(), EngineError>;
}
