//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM set a process-wide flag and wake every feed loop
//! sleeping between cycles. A running cycle is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Global flag indicating whether a shutdown has been requested.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

static SHUTDOWN_NOTIFY: OnceLock<Notify> = OnceLock::new();

fn notifier() -> &'static Notify {
    SHUTDOWN_NOTIFY.get_or_init(Notify::new)
}

/// Check if shutdown has been requested.
#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Request a shutdown (can be called from signal handlers or tests).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
    notifier().notify_waiters();
}

/// Serializes tests that set the flag or depend on it staying clear.
#[cfg(test)]
pub(crate) static FLAG_TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Reset shutdown flag (mainly for testing).
#[cfg(test)]
pub fn reset_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::Relaxed);
}

/// Sleep for `duration` unless a shutdown is requested first.
///
/// Returns `true` when the full duration elapsed.
pub async fn sleep_unless_shutdown(duration: Duration) -> bool {
    let notified = notifier().notified();
    tokio::pin!(notified);
    // Register before checking the flag so a concurrent request is not lost.
    notified.as_mut().enable();
    if is_shutdown_requested() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = notified => false,
    }
}

/// Resolves once a shutdown has been requested.
pub async fn wait_for_shutdown() {
    loop {
        let notified = notifier().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// A guard that manages signal handlers for graceful shutdown.
/// When created, it spawns a task that listens for SIGINT and SIGTERM.
pub struct ShutdownGuard {
    _marker: (),
}

impl ShutdownGuard {
    /// Create a new shutdown guard and start listening for signals.
    ///
    /// If handlers cannot be registered the guard is still created but
    /// signal handling is disabled.
    pub fn new() -> Self {
        tokio::spawn(async move {
            let sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGINT handler: {}", e);
                    None
                }
            };

            let sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    None
                }
            };

            match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT, finishing current cycles..."),
                        _ = term.recv() => info!("Received SIGTERM, finishing current cycles..."),
                    }
                    request_shutdown();
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    info!("Received SIGINT, finishing current cycles...");
                    request_shutdown();
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    info!("Received SIGTERM, finishing current cycles...");
                    request_shutdown();
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                }
            }
        });

        Self { _marker: () }
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_wakes_sleepers() {
        let _flag = FLAG_TEST_LOCK.lock().await;
        reset_shutdown();
        assert!(!is_shutdown_requested());
        assert!(sleep_unless_shutdown(Duration::from_millis(10)).await);

        let sleeper = tokio::spawn(sleep_unless_shutdown(Duration::from_secs(3600)));
        let waiter = tokio::spawn(wait_for_shutdown());
        tokio::time::sleep(Duration::from_millis(50)).await;

        request_shutdown();
        assert!(is_shutdown_requested());
        assert!(!sleeper.await.unwrap());
        waiter.await.unwrap();

        // Already requested: returns immediately.
        assert!(!sleep_unless_shutdown(Duration::from_secs(3600)).await);
        reset_shutdown();
    }
}
