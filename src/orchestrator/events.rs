//! Event reconciliation loop.
//!
//! Watches the runtime's container lifecycle events for the lifetime of the
//! process and writes each one back through
//! [`ServiceController::handle_runtime_event`]. A dropped subscription is
//! re-established with capped exponential backoff.

use crate::runtime::{EventFilter, RuntimeEvent};
use crate::service::ServiceController;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// First delay before re-subscribing.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the re-subscribe delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Delay before the next subscription attempt: 1s, 2s, 4s, ... capped at 30s.
pub(super) fn reconnect_delay(consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    INITIAL_RECONNECT_DELAY
        .saturating_mul(2u32.pow(exponent))
        .min(MAX_RECONNECT_DELAY)
}

/// Spawn [`run_event_loop`] on the tokio runtime.
pub fn spawn_event_loop(controller: ServiceController, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run_event_loop(controller, cancel))
}

/// Consume runtime events until `cancel` fires.
pub async fn run_event_loop(controller: ServiceController, cancel: CancellationToken) {
    let filter = EventFilter::container_lifecycle();
    let mut failures: u32 = 0;

    loop {
        let subscription = tokio::select! {
            _ = cancel.cancelled() => break,
            result = controller.runtime().events(&filter) => result,
        };

        match subscription {
            Ok(mut events) => {
                tracing::info!("Listening for container events");
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!("Event loop shutting down");
                            return;
                        }
                        next = events.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => {
                            failures = 0;
                            process_event(&controller, &event).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Container event stream failed: {}", e);
                            break;
                        }
                        None => {
                            tracing::warn!("Container event stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to subscribe to container events: {}", e),
        }

        failures = failures.saturating_add(1);
        let delay = reconnect_delay(failures);
        tracing::debug!(attempt = failures, "Re-subscribing to container events in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Event loop stopped");
}

/// Resolve the event's container and hand it to the controller. Failures are
/// logged; one bad event never stops the loop.
pub async fn process_event(controller: &ServiceController, event: &RuntimeEvent) {
    // The container may already be gone (destroy); the event's own image
    // attribute covers that case.
    let container = match controller.runtime().get(&event.container_id).await {
        Ok(container) => container,
        Err(e) => {
            tracing::debug!(
                container = %event.container_id,
                "Could not inspect container for event: {}",
                e
            );
            None
        }
    };

    if let Err(e) = controller
        .handle_runtime_event(event, container.as_ref())
        .await
    {
        tracing::error!(
            container = %event.container_id,
            action = %event.action,
            "Failed to reconcile container event: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::ZERO);
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5), Duration::from_secs(16));
        assert_eq!(reconnect_delay(6), Duration::from_secs(30));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_secs(30));
    }
}
