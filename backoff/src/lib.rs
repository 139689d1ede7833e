//! Retry-with-backoff helper shared by every component that calls out to an
//! external service (the segmentation volume, the chunked-graph service,
//! the database, the checkpoint store).
//!
//! Two policies are supported because the two workflows this crate backs
//! need different ones: chunk ingest units retry with exponential backoff
//! up to 10 attempts, while root-ID repair units retry with a fixed 3s
//! countdown up to 6 attempts.

#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::fmt::Debug;
use std::time::Duration;

use observability_deps::tracing::{info, warn};
use rand::Rng;

/// Policy controlling the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffConfig {
    /// Delay doubles each attempt (with jitter), starting at `init_backoff`
    /// and capped at `max_backoff`, up to `max_retries` attempts.
    Exponential {
        init_backoff: Duration,
        max_backoff: Duration,
        max_retries: usize,
    },
    /// Every attempt waits the same fixed duration, up to `max_retries`
    /// attempts.
    Fixed {
        delay: Duration,
        max_retries: usize,
    },
}

impl BackoffConfig {
    /// The policy spec.md §4.7 specifies for chunk-processing task units:
    /// exponential backoff, 10 attempts.
    pub fn chunk_ingest() -> Self {
        Self::Exponential {
            init_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_retries: 10,
        }
    }

    /// The policy spec.md §4.7 specifies for repair-mode task units: a
    /// fixed 3s countdown, 6 attempts.
    pub fn repair() -> Self {
        Self::Fixed {
            delay: Duration::from_secs(3),
            max_retries: 6,
        }
    }

    fn max_retries(&self) -> usize {
        match self {
            Self::Exponential { max_retries, .. } => *max_retries,
            Self::Fixed { max_retries, .. } => *max_retries,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        match self {
            Self::Fixed { delay, .. } => *delay,
            Self::Exponential {
                init_backoff,
                max_backoff,
                ..
            } => {
                let factor = 2u32.saturating_pow(attempt as u32);
                let nominal = init_backoff.saturating_mul(factor).min(*max_backoff);
                jitter(nominal)
            }
        }
    }
}

fn jitter(nominal: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let frac = rng.gen_range(0.5..1.0);
    Duration::from_secs_f64(nominal.as_secs_f64() * frac)
}

/// Error returned once a [`Backoff`] has exhausted its configured number of
/// retries. Carries the last error observed.
#[derive(Debug, thiserror::Error)]
#[error("operation {operation} failed after {attempts} attempts: {source}")]
pub struct BackoffError<E> {
    pub operation: &'static str,
    pub attempts: usize,
    #[source]
    pub source: E,
}

/// Drives a retry loop for a single named operation.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Runs `f` until it succeeds or the configured retry budget is
    /// exhausted. `f` is called once per attempt; its error type `E` is
    /// reported as-is when retries run out.
    pub async fn retry_with_backoff<F, Fut, T, E>(
        &self,
        operation: &'static str,
        mut f: F,
    ) -> Result<T, BackoffError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Debug,
    {
        let max_retries = self.config.max_retries();
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => {
                    if attempt > 0 {
                        info!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) if attempt < max_retries => {
                    let delay = self.config.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        ?delay,
                        error = ?e,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(BackoffError {
                        operation,
                        attempts: attempt + 1,
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let backoff = Backoff::new(BackoffConfig::Fixed {
            delay: Duration::from_millis(1),
            max_retries: 5,
        });
        let calls = AtomicUsize::new(0);

        let result = backoff
            .retry_with_backoff("test_op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let backoff = Backoff::new(BackoffConfig::Fixed {
            delay: Duration::from_millis(1),
            max_retries: 2,
        });
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = backoff
            .retry_with_backoff("test_op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>("still broken") }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn chunk_ingest_matches_spec() {
        assert_eq!(BackoffConfig::chunk_ingest().max_retries(), 10);
    }

    #[test]
    fn repair_matches_spec() {
        let BackoffConfig::Fixed { delay, max_retries } = BackoffConfig::repair() else {
            panic!("expected fixed policy");
        };
        assert_eq!(delay, Duration::from_secs(3));
        assert_eq!(max_retries, 6);
    }
}
