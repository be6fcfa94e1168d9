//! Timeout, cancellation and drain handling shared by store adapters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{StoreFailure, StoreResult};
use crate::TRACING_TARGET_CONNECTION;

/// Runs store operations under a timeout and tracks them for shutdown.
///
/// Each call to [`run`](Self::run) is counted as in flight until it completes.
/// [`shutdown`](Self::shutdown) rejects new calls, waits for the in-flight ones
/// to drain for at most the grace period, then aborts whatever is left with
/// [`Status::Cancelled`](super::Status::Cancelled).
#[derive(Debug, Default)]
pub struct OperationDriver {
    closing: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    abort: CancellationToken,
}

/// Decrements the in-flight count when an operation finishes or is dropped.
struct InFlight<'a>(&'a OperationDriver);

impl<'a> InFlight<'a> {
    fn enter(driver: &'a OperationDriver) -> Self {
        driver.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(driver)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl OperationDriver {
    /// Creates a driver accepting operations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` for `key`, bounded by `timeout`.
    pub async fn run<T, F>(&self, key: &str, timeout: Duration, operation: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.is_closing() {
            return Err(StoreFailure::cancelled(key));
        }

        let _in_flight = InFlight::enter(self);
        tokio::select! {
            biased;
            () = self.abort.cancelled() => Err(StoreFailure::cancelled(key)),
            outcome = tokio::time::timeout(timeout, operation) => {
                outcome.unwrap_or_else(|_| Err(StoreFailure::timed_out(key)))
            }
        }
    }

    /// Returns the number of operations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns `true` once shutdown has started.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Rejects new operations and drains the running ones.
    ///
    /// Returns `false` if shutdown had already been started by an earlier call.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight() == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                remaining = self.in_flight(),
                grace_ms = grace.as_millis(),
                "Grace period elapsed, cancelling in-flight operations"
            );
        }

        self.abort.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::Status;

    #[tokio::test]
    async fn test_run_passes_outcome_through() {
        let driver = OperationDriver::new();
        let outcome = driver
            .run("k", Duration::from_secs(1), async { Ok::<_, StoreFailure>(7) })
            .await;
        assert_eq!(outcome, Ok(7));
        assert_eq!(driver.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let driver = OperationDriver::new();
        let outcome = driver
            .run("k", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, StoreFailure>(())
            })
            .await;
        assert_eq!(outcome.unwrap_err().status, Status::TimedOut);
    }

    #[tokio::test]
    async fn test_run_after_shutdown_is_cancelled() {
        let driver = OperationDriver::new();
        assert!(driver.shutdown(Duration::from_millis(10)).await);
        assert!(!driver.shutdown(Duration::from_millis(10)).await);

        let outcome = driver
            .run("k", Duration::from_secs(1), async { Ok::<_, StoreFailure>(()) })
            .await;
        assert_eq!(outcome.unwrap_err().status, Status::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight() {
        let driver = Arc::new(OperationDriver::new());
        let running = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .run("k", Duration::from_secs(10), async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, StoreFailure>(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(driver.in_flight(), 1);

        assert!(driver.shutdown(Duration::from_secs(1)).await);
        assert_eq!(running.await.unwrap(), Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_after_grace() {
        let driver = Arc::new(OperationDriver::new());
        let running = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .run("k", Duration::from_secs(60), async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok::<_, StoreFailure>(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        assert!(driver.shutdown(Duration::from_millis(100)).await);
        let outcome = running.await.unwrap();
        assert_eq!(outcome.unwrap_err().status, Status::Cancelled);
    }
}
