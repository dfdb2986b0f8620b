//! Default limits and timings for the task result cache.
//!
//! These are the values a [`CacheLimits::default()`](crate::cache::CacheLimits)
//! starts from. Every one of them can be overridden per handle.

use std::time::Duration;

/// Time-to-live attached to every record at write time.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Hard ceiling on a single payload accepted by `insert` (10 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Payloads above this size (5 MiB) are written but not handed to the
/// post-write hook.
pub const NOTIFY_MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Period of the background reclamation worker.
pub const RECLAIM_INTERVAL: Duration = Duration::from_secs(120);

/// Longest accepted time-to-live and reclamation period (one day).
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest task identifier, in bytes, an engine accepts.
pub const MAX_TASK_ID_BYTES: usize = u16::MAX as usize;

/// Keys inspected per expiry sweep in the on-disk engine.
pub const SWEEP_BATCH_SIZE: usize = 10_000;

/// Fraction of a blob segment that must be stale before it is rewritten.
pub const RECLAIM_DISCARD_RATIO: f32 = 0.7;

/// Name of the partition holding task records in the on-disk engine.
pub const RESULTS_PARTITION: &str = "task_results";
