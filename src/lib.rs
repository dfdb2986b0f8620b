//! TTL-bounded result cache for asynchronously computed tasks.
//!
//! Producers finish a task and [`insert`](TaskCache::insert) its JSON
//! payload under the task identifier. Consumers poll with
//! [`get`](TaskCache::get) and see [`TaskResult::Pending`] until the result
//! lands, then [`TaskResult::Completed`] until the record's time-to-live
//! elapses. Records are never deleted explicitly; they simply expire.
//!
//! # Overview
//!
//! - A [`TaskCache`] handle owns one embedded key-value engine and guards
//!   its open/closed lifecycle.
//! - A background reclamation worker periodically asks the engine to free
//!   space held by expired and overwritten values.
//! - An optional [`PostWriteHook`](cache::PostWriteHook) runs after every
//!   successful insert, off the caller's path.
//! - Failures surfaced to callers are also reported through
//!   [`Diagnostics`](diagnostics::Diagnostics).
//!
//! # Module Organization
//!
//! - [`cache`] - The handle, its limits, reclamation and post-write hook
//! - [`engine`] - Storage engine trait plus in-memory and on-disk engines
//! - [`diagnostics`] - Failure reports and sinks
//! - [`config`] - TOML and environment configuration
//! - [`error`] - Error taxonomy
//! - [`types`] - The [`TaskResult`] read projection
//! - [`constants`] - Default limits and timings
//!
//! # Feature Flags
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `disk` | yes | [`FjallEngine`](engine::fjall::FjallEngine) |
//! | `logging` | yes | `init_logging` |
//! | `http-sink` | no | `HttpSink` for remote failure reports |

pub mod cache;
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod engine;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod types;

// Re-exports for ergonomic access
pub use cache::{CacheLimits, Notifier, PostWriteHook, ReclaimStats, ResultStore, TaskCache};
pub use config::{ConfigError, Settings};
pub use diagnostics::{Diagnostics, DiagnosticsSink, FailureReport};
pub use engine::{EngineError, StorageEngine};
pub use error::CacheError;
#[cfg(feature = "logging")]
pub use logging::init_logging;
pub use types::TaskResult;

/// In-memory cache, for tests and single-process use.
pub type InMemoryTaskCache = TaskCache<engine::memory::MemoryEngine>;

/// On-disk cache.
#[cfg(feature = "disk")]
pub type DiskTaskCache = TaskCache<engine::fjall::FjallEngine>;
