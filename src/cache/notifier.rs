//! Post-write hook dispatch.
//!
//! After a successful insert the cache hands the task id and payload to a
//! [`PostWriteHook`] on tokio's blocking pool. The insert has already
//! returned by the time the hook runs; a slow hook delays nothing and a
//! panicking hook is logged and contained.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

/// Callback run after every successful insert.
///
/// Closures `Fn(&str, &[u8])` implement this trait directly.
///
/// ```
/// use task_cache::cache::{Notifier, PostWriteHook};
///
/// let notifier = Notifier::new(|task_id: &str, payload: &[u8]| {
///     println!("task {task_id} completed with {} bytes", payload.len());
/// });
/// # let _ = notifier;
/// ```
pub trait PostWriteHook: Send + Sync + 'static {
    /// Called with the task id and the exact payload that was stored.
    fn after_insert(&self, task_id: &str, payload: &[u8]);
}

impl<F> PostWriteHook for F
where
    F: Fn(&str, &[u8]) + Send + Sync + 'static,
{
    fn after_insert(&self, task_id: &str, payload: &[u8]) {
        self(task_id, payload)
    }
}

/// Shared handle to a [`PostWriteHook`].
#[derive(Clone)]
pub struct Notifier {
    hook: Arc<dyn PostWriteHook>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

impl Notifier {
    /// Wraps `hook`.
    pub fn new(hook: impl PostWriteHook) -> Self {
        Self {
            hook: Arc::new(hook),
        }
    }

    /// Wraps an already shared hook.
    pub fn from_arc(hook: Arc<dyn PostWriteHook>) -> Self {
        Self { hook }
    }

    /// Runs the hook in the background unless `payload` exceeds
    /// `max_payload_bytes`.
    ///
    /// Returns the handle of the spawned task, or `None` when skipped.
    pub(crate) fn dispatch(
        &self,
        task_id: &str,
        payload: Bytes,
        max_payload_bytes: usize,
    ) -> Option<JoinHandle<()>> {
        if payload.len() > max_payload_bytes {
            tracing::warn!(
                task_id = %task_id,
                size = payload.len(),
                limit = max_payload_bytes,
                "payload too large for post-write hook, skipping"
            );
            return None;
        }

        let hook = Arc::clone(&self.hook);
        let task_id = task_id.to_string();
        Some(tokio::task::spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.after_insert(&task_id, &payload)));
            if let Err(panic) = outcome {
                tracing::error!(
                    task_id = %task_id,
                    panic = %panic_message(panic.as_ref()),
                    "post-write hook panicked"
                );
            }
        }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn hook_receives_task_id_and_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = Notifier::new(move |task_id: &str, payload: &[u8]| {
            sink.lock().push((task_id.to_string(), payload.to_vec()));
        });

        let handle = notifier
            .dispatch("t1", Bytes::from_static(b"{}"), 16)
            .unwrap();
        handle.await.unwrap();

        assert_eq!(*seen.lock(), vec![("t1".to_string(), b"{}".to_vec())]);
    }

    #[tokio::test]
    async fn oversized_payload_is_skipped() {
        let notifier = Notifier::new(|_: &str, _: &[u8]| panic!("must not run"));
        assert!(notifier
            .dispatch("t1", Bytes::from(vec![0u8; 17]), 16)
            .is_none());
    }

    #[tokio::test]
    async fn payload_at_limit_is_dispatched() {
        let notifier = Notifier::new(|_: &str, _: &[u8]| {});
        let handle = notifier.dispatch("t1", Bytes::from(vec![0u8; 16]), 16);
        handle.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_hook_is_contained() {
        let notifier = Notifier::new(|_: &str, _: &[u8]| panic!("hook failure"));
        let handle = notifier
            .dispatch("t1", Bytes::from_static(b"{}"), 16)
            .unwrap();
        // The panic is caught inside the task, so the join succeeds.
        handle.await.unwrap();
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
