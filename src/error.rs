//! Error types for task cache operations.
//!
//! [`CacheError`] is what callers of [`TaskCache`](crate::cache::TaskCache)
//! see. Engine-level failures are carried as [`EngineError`] sources so the
//! original cause stays reachable through [`std::error::Error::source`].

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by the cache handle.
///
/// An absent or expired task is never an error: it is
/// [`TaskResult::Pending`](crate::types::TaskResult::Pending).
///
/// # Examples
///
/// ```
/// use task_cache::CacheError;
///
/// let err = CacheError::PayloadTooLarge {
///     task_id: "t1".to_string(),
///     size: 11 * 1024 * 1024,
///     limit: 10 * 1024 * 1024,
/// };
/// assert!(err.to_string().contains("t1"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum CacheError {
    /// The storage engine could not be initialized. The handle stays
    /// unopened.
    #[error("failed to open storage engine: {source}")]
    EngineInit {
        /// The engine failure.
        #[source]
        source: EngineError,
    },

    /// The handle was never opened or has been closed.
    #[error("task cache is closed")]
    Closed,

    /// The payload exceeds the configured hard ceiling.
    #[error("payload for task {task_id} too large: {size} bytes exceeds {limit} byte limit")]
    PayloadTooLarge {
        /// The task being written.
        task_id: String,
        /// Size of the rejected payload.
        size: usize,
        /// The configured ceiling.
        limit: usize,
    },

    /// The engine rejected or failed the write.
    #[error("failed to save result for task {task_id} ({size} bytes): {source}")]
    Write {
        /// The task being written.
        task_id: String,
        /// Size of the payload that failed to persist.
        size: usize,
        /// The engine failure.
        #[source]
        source: EngineError,
    },

    /// The engine failed the lookup.
    #[error("failed to read result for task {task_id}: {source}")]
    Read {
        /// The task being read.
        task_id: String,
        /// The engine failure.
        #[source]
        source: EngineError,
    },

    /// A stored payload exists but is not valid JSON.
    #[error("stored result for task {task_id} is corrupt: {source}")]
    CorruptRecord {
        /// The task whose record failed to decode.
        task_id: String,
        /// The decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// The engine did not shut down cleanly. The handle is closed anyway.
    #[error("failed to close storage engine: {source}")]
    Close {
        /// The engine failure.
        #[source]
        source: EngineError,
    },
}

impl CacheError {
    /// Returns `true` for engine I/O failures a caller may retry.
    ///
    /// A rejected task identifier fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Write { source, .. } | Self::Read { source, .. } => {
                !matches!(source, EngineError::InvalidKey { .. })
            },
            _ => false,
        }
    }

    /// The task identifier this error concerns, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::PayloadTooLarge { task_id, .. }
            | Self::Write { task_id, .. }
            | Self::Read { task_id, .. }
            | Self::CorruptRecord { task_id, .. } => Some(task_id),
            Self::EngineInit { .. } | Self::Closed | Self::Close { .. } => None,
        }
    }
}
