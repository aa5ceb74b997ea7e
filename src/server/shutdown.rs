//! Graceful shutdown coordination
//!
//! The coordinator tracks in-flight requests and broadcasts the stop signal
//! that makes the accept loop exit and open connections finish their current
//! request. It knows nothing about uploads.

use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix;
use tokio::sync::watch;

/// Shutdown errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("Shutdown timed out after {timeout:?} with {in_flight} request(s) still in flight")]
    Timeout { timeout: Duration, in_flight: usize },
}

struct Inner {
    stop: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

/// Drain-on-shutdown coordinator, cheap to clone
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner { stop, in_flight }),
        }
    }

    /// Count a request as in flight until the guard is dropped
    pub fn track(&self) -> RequestGuard {
        self.inner.in_flight.send_modify(|n| *n += 1);
        metrics::REQUESTS_IN_FLIGHT.inc();
        RequestGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Requests currently in flight
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once shutdown has begun
    pub async fn stopped(&self) {
        let mut rx = self.inner.stop.subscribe();
        loop {
            let stopping = *rx.borrow_and_update();
            if stopping || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolves once no request is in flight
    async fn drained(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        loop {
            let in_flight = *rx.borrow_and_update();
            if in_flight == 0 || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop accepting work and wait up to `timeout` for in-flight requests.
    ///
    /// Requests still running when the deadline passes are not cancelled;
    /// they keep running independently of this call's return.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let started = Instant::now();
        self.inner.stop.send_replace(true);

        tracing::info!(
            in_flight = self.in_flight(),
            timeout_secs = timeout.as_secs_f64(),
            "Draining in-flight requests"
        );

        match tokio::time::timeout(timeout, self.drained()).await {
            Ok(()) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "All requests drained"
                );
                Ok(())
            }
            Err(_) => {
                let in_flight = self.in_flight();
                tracing::warn!(in_flight, "Shutdown deadline exceeded");
                Err(ShutdownError::Timeout { timeout, in_flight })
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one request as in flight
pub struct RequestGuard {
    inner: Arc<Inner>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        metrics::REQUESTS_IN_FLIGHT.dec();
    }
}

/// Waits for SIGTERM or SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C signal, initiating graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!("Received SIGTERM signal, initiating graceful shutdown");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_shutdown_with_nothing_in_flight() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_stopping());

        let result = coordinator.shutdown(Duration::from_millis(50)).await;

        assert_eq!(result, Ok(()));
        assert!(coordinator.is_stopping());
    }

    #[tokio::test]
    async fn test_guard_counts_in_flight() {
        let coordinator = ShutdownCoordinator::new();
        let a = coordinator.track();
        let b = coordinator.track();
        assert_eq!(coordinator.in_flight(), 2);
        drop(a);
        assert_eq!(coordinator.in_flight(), 1);
        drop(b);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_fast_requests() {
        let coordinator = ShutdownCoordinator::new();

        let guard = coordinator.track();
        let fast = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            drop(guard);
            "done"
        });

        let result = coordinator.shutdown(Duration::from_secs(2)).await;

        assert_eq!(result, Ok(()));
        assert_eq!(fast.await.unwrap(), "done");
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_slow_request() {
        let coordinator = ShutdownCoordinator::new();

        let fast_guard = coordinator.track();
        let fast = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            drop(fast_guard);
            Ok::<_, ()>("fast ok")
        });

        let slow_guard = coordinator.track();
        let slow = tokio::spawn(async move {
            sleep(Duration::from_millis(600)).await;
            drop(slow_guard);
            "slow ok"
        });

        let result = coordinator.shutdown(Duration::from_millis(150)).await;

        assert_eq!(
            result,
            Err(ShutdownError::Timeout {
                timeout: Duration::from_millis(150),
                in_flight: 1
            })
        );
        // The fast request finished normally inside the window
        assert_eq!(fast.await.unwrap(), Ok("fast ok"));
        // The slow one keeps running after shutdown returned
        assert_eq!(slow.await.unwrap(), "slow ok");
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.stopped().await })
        };

        sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        coordinator.shutdown(Duration::from_millis(10)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stopped() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_already_stopping() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown(Duration::from_millis(10)).await.unwrap();

        tokio::time::timeout(Duration::from_millis(100), coordinator.stopped())
            .await
            .expect("stopped() should resolve immediately");
    }
}
