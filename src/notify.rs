//! Outbound status notifications.
//!
//! The transport that carries events to clients is not ours; it only needs
//! to implement [`Notifier`]. [`BroadcastNotifier`] fans events out to
//! in-process subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Publish a named event with a JSON payload. Must not block.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

/// In-process fan-out over a tokio broadcast channel. Slow subscribers lose
/// the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, event: &str, payload: Value) {
        tracing::debug!(event, "Publishing notification");
        // No subscribers is fine.
        let _ = self.tx.send(Notification {
            event: event.to_string(),
            payload,
            emitted_at: Utc::now(),
        });
    }
}
