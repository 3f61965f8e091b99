//! Bootstrap utilities for the finance binaries.
//!
//! Shared initialization code: logging, connecting to dependencies that may
//! not be up yet, and shutdown signals.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the FINANCE_LOG environment variable.
///
/// Defaults to "info" level if FINANCE_LOG is not set. Setting
/// FINANCE_LOG_FORMAT=json switches to one JSON object per line.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect to a dependency with exponential backoff retry.
///
/// # Arguments
/// * `dependency` - Human-readable name for logging (e.g., "dead letter queue")
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after `max_attempts`.
pub async fn connect_with_retry<T, E, F, Fut>(
    dependency: &str,
    max_attempts: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let max_attempts = max_attempts.max(1);
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(connection) => {
                info!(dependency, attempt, "Connected");
                return Ok(connection);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    "Failed to connect to {} (attempt {}/{}): {}. Retrying in {:?}...",
                    dependency, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to {} after {} attempts: {}",
                    dependency,
                    max_attempts,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}

/// Watch channel that flips to `true` on the first shutdown signal.
///
/// Every receiver cloned from the returned one observes the same signal.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });
    rx
}

/// Future that resolves once `shutdown` flips to `true` or its sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_connect_with_retry_succeeds_after_failures() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = connect_with_retry("test", 5, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err(format!("attempt {} failed", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_connect_with_retry_returns_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = connect_with_retry("test", 2, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {}", n))
        })
        .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_on_flip() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }
}
