//! Task runtime (spec.md §6 "Task runtime", §11 of SPEC_FULL.md).
//!
//! Stands in for the original's Celery broker: named queues, fire-and-forget
//! submission, exponential-backoff retry, and queue-length inspection are
//! exactly what spec.md §6 requires and no more — no external broker is in
//! scope (SPEC_FULL.md §11, §14 non-goals). Every submitted unit is wrapped
//! in the caller-chosen [`backoff::BackoffConfig`] retry policy so the
//! Workflow Driver (spec.md §4.7) and Missing-Roots Repair (spec.md §4.9)
//! share one retry mechanism with different policies.

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{Backoff, BackoffConfig};
use observability_deps::tracing::error;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;
/// A unit of work is re-invoked once per retry attempt, so it must be able
/// to build a fresh future each time (spec.md §4.7: "each unit is
/// idempotent... same chunk index deterministically re-produces the same
/// query, same upsert").
pub type UnitFactory = Box<dyn Fn() -> TaskFuture + Send + Sync>;

/// A task runtime abstraction: named queues, fire-and-forget submission
/// with retry, and queue-length inspection (spec.md §6).
#[async_trait]
pub trait TaskQueue: Debug + Send + Sync {
    /// Submits `unit` to `queue_name`, fire-and-forget. The unit is retried
    /// per `policy` on failure; after the retry budget is exhausted the
    /// failure is logged and dropped (spec.md §7: "after max attempts,
    /// record `last_error`, leave checkpoint as-is" — logging the outcome
    /// is this crate's job, updating the checkpoint is the caller's, done
    /// from inside `unit` itself before it returns `Ok`).
    fn submit(&self, queue_name: &str, policy: BackoffConfig, unit: UnitFactory);

    /// Current in-flight unit count for `queue_name` (spec.md §4.7 step 6,
    /// §4.8 completion condition).
    fn queue_len(&self, queue_name: &str) -> usize;

    /// Blocks until `queue_name`'s length drops to or below `threshold`
    /// (spec.md §4.7 step 6, §5 "Backpressure": "the sole admission-control
    /// mechanism").
    async fn wait_until_at_most(&self, queue_name: &str, threshold: usize);
}

#[derive(Debug, Default)]
struct QueueState {
    len: AtomicUsize,
    notify: Notify,
}

/// In-process task runtime backed by `tokio::spawn`, matching SPEC_FULL.md
/// §11: an in-process bounded queue plus atomic length counter satisfies
/// spec.md §6's "Task runtime" contract without adopting an external
/// broker.
#[derive(Debug, Clone, Default)]
pub struct InProcessTaskQueue {
    queues: Arc<Mutex<HashMap<String, Arc<QueueState>>>>,
}

impl InProcessTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_for(&self, queue_name: &str) -> Arc<QueueState> {
        self.queues
            .lock()
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(QueueState::default()))
            .clone()
    }
}

#[async_trait]
impl TaskQueue for InProcessTaskQueue {
    fn submit(&self, queue_name: &str, policy: BackoffConfig, unit: UnitFactory) {
        let state = self.state_for(queue_name);
        state.len.fetch_add(1, Ordering::SeqCst);
        let queue_name = queue_name.to_string();

        tokio::spawn(async move {
            let backoff = Backoff::new(policy);
            let result = backoff.retry_with_backoff("task_unit", || unit()).await;
            if let Err(e) = result {
                error!(queue = %queue_name, error = %e, "task unit exhausted retries, dropping");
            }
            state.len.fetch_sub(1, Ordering::SeqCst);
            // wake every waiter on each completion (not just drain-to-zero)
            // so a nonzero threshold in `wait_until_at_most` is observed
            // promptly too.
            state.notify.notify_waiters();
        });
    }

    fn queue_len(&self, queue_name: &str) -> usize {
        self.state_for(queue_name).len.load(Ordering::SeqCst)
    }

    async fn wait_until_at_most(&self, queue_name: &str, threshold: usize) {
        let state = self.state_for(queue_name);
        loop {
            if state.len.load(Ordering::SeqCst) <= threshold {
                return;
            }
            let notified = state.notify.notified();
            if state.len.load(Ordering::SeqCst) <= threshold {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[tokio::test]
    async fn queue_len_tracks_in_flight_units() {
        let queue = InProcessTaskQueue::new();
        let gate = Arc::new(tokio::sync::Barrier::new(2));
        let gate2 = gate.clone();

        queue.submit(
            "process",
            BackoffConfig::Fixed {
                delay: Duration::from_millis(1),
                max_retries: 0,
            },
            Box::new(move || {
                let gate2 = gate2.clone();
                Box::pin(async move {
                    gate2.wait().await;
                    Ok(())
                })
            }),
        );

        assert_eq!(queue.queue_len("process"), 1);
        gate.wait().await;
        queue.wait_until_at_most("process", 0).await;
        assert_eq!(queue.queue_len("process"), 0);
    }

    #[tokio::test]
    async fn failed_unit_retries_then_drains() {
        let queue = InProcessTaskQueue::new();
        let attempts = Arc::new(StdAtomicUsize::new(0));
        let attempts2 = attempts.clone();

        queue.submit(
            "process",
            BackoffConfig::Fixed {
                delay: Duration::from_millis(1),
                max_retries: 3,
            },
            Box::new(move || {
                let attempts2 = attempts2.clone();
                Box::pin(async move {
                    let n = attempts2.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("transient".into())
                    } else {
                        Ok(())
                    }
                })
            }),
        );

        queue.wait_until_at_most("process", 0).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_still_drains_queue() {
        let queue = InProcessTaskQueue::new();
        queue.submit(
            "process",
            BackoffConfig::Fixed {
                delay: Duration::from_millis(1),
                max_retries: 1,
            },
            Box::new(|| Box::pin(async { Err("always fails".into()) })),
        );
        queue.wait_until_at_most("process", 0).await;
        assert_eq!(queue.queue_len("process"), 0);
    }
}
