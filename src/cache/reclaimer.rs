//! Periodic storage reclamation.
//!
//! One worker per open handle. Each tick it takes the handle's read lock,
//! asks the engine to reclaim space, and records the outcome. Holding the
//! read lock across the attempt means `close` (which takes the write lock)
//! waits for an in-flight attempt and no attempt starts after `close`
//! returns.
//!
//! The worker holds only a [`Weak`] reference to the handle state, so a
//! dropped handle stops its worker too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Lifecycle;
use crate::constants::MAX_DURATION;
use crate::engine::StorageEngine;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Counters for reclamation attempts since the handle was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Attempts started.
    pub attempts: u64,
    /// Attempts that freed something.
    pub reclaimed: u64,
    /// Attempts that found nothing to do.
    pub noops: u64,
    /// Attempts that failed.
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ReclaimCounters {
    attempts: AtomicU64,
    reclaimed: AtomicU64,
    noops: AtomicU64,
    failures: AtomicU64,
}

impl ReclaimCounters {
    pub(crate) fn snapshot(&self) -> ReclaimStats {
        ReclaimStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            noops: self.noops.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Running worker. Dropping it cancels the worker.
pub(crate) struct Reclaimer {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub(crate) fn spawn<E: StorageEngine>(
        state: Weak<RwLock<Lifecycle<E>>>,
        counters: Arc<ReclaimCounters>,
        period: Duration,
        discard_ratio: f32,
    ) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(
            state,
            counters,
            period.clamp(MIN_PERIOD, MAX_DURATION),
            discard_ratio,
            token.clone(),
        ));
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancels the worker and waits for it to exit.
    pub(crate) async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "reclamation worker ended abnormally");
            }
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run<E: StorageEngine>(
    state: Weak<RwLock<Lifecycle<E>>>,
    counters: Arc<ReclaimCounters>,
    period: Duration,
    discard_ratio: f32,
    token: CancellationToken,
) {
    let now = Instant::now();
    let first = now.checked_add(period).unwrap_or(now);
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(period_ms = period.as_millis() as u64, "reclamation worker started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let Some(state) = state.upgrade() else {
            break;
        };
        let guard = state.read().await;
        if token.is_cancelled() {
            break;
        }
        let Some(engine) = guard.engine() else {
            break;
        };

        counters.attempts.fetch_add(1, Ordering::Relaxed);
        match engine.reclaim(discard_ratio).await {
            Ok(outcome) => {
                counters.reclaimed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    expired_removed = outcome.expired_removed,
                    bytes_reclaimed = outcome.bytes_reclaimed,
                    "storage reclaimed"
                );
            },
            Err(e) if e.is_benign_reclaim() => {
                counters.noops.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(reason = %e, "reclamation skipped");
            },
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "storage reclamation failed");
            },
        }
    }

    tracing::debug!("reclamation worker stopped");
}
