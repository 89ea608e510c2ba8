//! Docker runtime adapter.
//!
//! [`DockerClient`] implements [`crate::runtime::ContainerRuntime`] by driving
//! the `docker` CLI, with a single Engine API call over the daemon socket for
//! raw statistics samples.

pub mod client;
mod engine;
pub mod error;

pub use client::{DockerClient, DockerTimeouts};
pub use error::DockerError;

use std::future::Future;
use std::time::Duration;

/// Attempts made for a runtime call before a transient failure is surfaced.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Retry a runtime call while it fails transiently.
///
/// Only [`DockerError::is_transient`] failures are retried; "not found" and
/// command failures return immediately.
///
/// # Retry Strategy
/// Exponential backoff: 100ms, 200ms, 400ms... capped at 2 seconds.
pub async fn retry_transient<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    mut call: F,
) -> Result<T, DockerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DockerError>>,
{
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded after {} attempts", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::debug!(
                    "{} attempt {}/{} failed ({}), retrying in {:?}",
                    operation,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(2));
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!("{} failed after {} attempts: {}", operation, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

/// Wait for the Docker daemon to answer, with retry and exponential backoff.
///
/// Used at boot, where the daemon may still be starting alongside us.
///
/// # Returns
/// - `true` if daemon becomes healthy within the timeout
/// - `false` if daemon remains unhealthy after all retries
pub async fn wait_for_daemon(
    client: &DockerClient,
    max_attempts: u32,
    total_timeout: Duration,
) -> bool {
    use tokio::time::{sleep, timeout};

    let start = std::time::Instant::now();
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=max_attempts {
        if start.elapsed() >= total_timeout {
            tracing::debug!(
                "Docker daemon health check timeout after {:?}",
                start.elapsed()
            );
            return false;
        }

        let remaining = total_timeout.saturating_sub(start.elapsed());
        let check = timeout(remaining, client.daemon_healthy(Duration::from_secs(2))).await;

        match check {
            Ok(true) => {
                if attempt > 1 {
                    tracing::info!(
                        "Docker daemon became healthy after {} attempts ({:?})",
                        attempt,
                        start.elapsed()
                    );
                }
                return true;
            }
            Ok(false) | Err(_) => {
                if attempt < max_attempts {
                    tracing::debug!(
                        "Docker daemon health check attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                } else {
                    tracing::warn!(
                        "Docker daemon unhealthy after {} attempts ({:?})",
                        max_attempts,
                        start.elapsed()
                    );
                }
            }
        }
    }

    false
}
