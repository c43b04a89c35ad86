//! Single-flight limiter keyed by channel name
//!
//! At most one operation per channel runs at a time. A second request for a
//! busy channel is rejected immediately, never queued. The in-flight marker
//! is an RAII lease, so it is released when the operation returns, fails,
//! panics, or its future is dropped.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::constants::BUSY_MESSAGE;

/// Rejection for a channel that already has an operation in flight
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", BUSY_MESSAGE)]
pub struct ChannelBusy {
    pub channel: String,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGuard {
    in_flight: InFlight,
}

/// Marks one channel as in flight until dropped
#[derive(Debug)]
pub struct OperationLease {
    channel: String,
    in_flight: InFlight,
}

impl OperationLease {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for OperationLease {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.channel);
    }
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `channel`, or report it busy
    pub fn try_acquire(&self, channel: &str) -> Result<OperationLease, ChannelBusy> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string());

        if !inserted {
            log::warn!("Rejected duplicate request on busy channel '{}'", channel);
            return Err(ChannelBusy {
                channel: channel.to_string(),
            });
        }

        Ok(OperationLease {
            channel: channel.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run `operation` while holding `channel`. The operation is not invoked
    /// at all when the channel is busy.
    pub async fn run<F, Fut, T>(&self, channel: &str, operation: F) -> Result<T, ChannelBusy>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _lease = self.try_acquire(channel)?;
        Ok(operation().await)
    }

    pub fn is_in_flight(&self, channel: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(channel)
    }

    /// Snapshot of channels currently in flight, sorted
    pub fn in_flight(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        channels.sort();
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{oneshot, Barrier};

    #[tokio::test]
    async fn test_second_call_on_same_channel_is_busy() {
        let guard = ConcurrencyGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let first = {
            let guard = guard.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                guard
                    .run("run-adhelper-script", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        "first done"
                    })
                    .await
            })
        };

        started_rx.await.unwrap();

        let second = guard
            .run("run-adhelper-script", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                "second done"
            })
            .await;

        let busy = second.unwrap_err();
        assert_eq!(
            busy.to_string(),
            "Operation already in progress. Please wait for it to complete."
        );
        assert_eq!(busy.channel, "run-adhelper-script");

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Ok("first done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!guard.is_in_flight("run-adhelper-script"));
    }

    #[tokio::test]
    async fn test_different_channels_run_concurrently() {
        let guard = ConcurrencyGuard::new();
        let barrier = Arc::new(Barrier::new(2));

        let a = guard.run("create-new-user", || {
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                1
            }
        });
        let b = guard.run("bulk-process-users", || {
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                2
            }
        });

        // Deadlocks unless both operations are in flight at the same time
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(a, b) })
            .await
            .expect("operations on different channels must not block each other");

        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
        assert!(guard.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_lease_released_after_error() {
        let guard = ConcurrencyGuard::new();

        let result: Result<Result<(), String>, ChannelBusy> = guard
            .run("create-new-user", || async { Err("script failed".to_string()) })
            .await;

        assert_eq!(result, Ok(Err("script failed".to_string())));
        assert!(!guard.is_in_flight("create-new-user"));
        assert!(guard.try_acquire("create-new-user").is_ok());
    }

    #[tokio::test]
    async fn test_lease_released_after_panic() {
        let guard = ConcurrencyGuard::new();

        let task = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .run("create-new-user", || async {
                        panic!("handler blew up");
                    })
                    .await
            })
        };

        assert!(task.await.is_err());
        assert!(!guard.is_in_flight("create-new-user"));
    }

    #[tokio::test]
    async fn test_lease_released_when_future_dropped() {
        let guard = ConcurrencyGuard::new();

        let pending = guard.run("create-new-user", || std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(timed_out.is_err());
        assert!(!guard.is_in_flight("create-new-user"));
    }

    #[test]
    fn test_try_acquire_is_exclusive() {
        let guard = ConcurrencyGuard::new();
        let lease = guard.try_acquire("a").unwrap();
        assert_eq!(lease.channel(), "a");
        assert!(guard.try_acquire("a").is_err());
        assert!(guard.try_acquire("b").is_ok());
        drop(lease);
        assert!(guard.try_acquire("a").is_ok());
    }
}
