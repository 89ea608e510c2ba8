//! Log and statistics streaming.
//!
//! Streams are pull-based [`futures::Stream`]s guarded by a [`StreamFlag`].
//! Clearing the flag from anywhere ends the stream at its next pull; nothing
//! is interrupted mid-call. A runtime failure produces one terminal
//! [`Error::StreamingInterrupted`] item.

mod logs;
mod stats;

pub use logs::stream_logs;
pub use stats::{cpu_percent, stream_stats, StatsSnapshot};

use crate::error::Error;
use crate::notify::Notifier;
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Logs,
    Stats,
}

impl StreamKind {
    /// Event carrying each streamed item.
    pub fn message_event(&self) -> &'static str {
        match self {
            StreamKind::Logs => "log_message",
            StreamKind::Stats => "stats_message",
        }
    }

    /// Event announcing that the stream broke.
    pub fn failed_event(&self) -> &'static str {
        match self {
            StreamKind::Logs => "get_logs_failed",
            StreamKind::Stats => "get_stats_failed",
        }
    }

    fn payload_key(&self) -> &'static str {
        match self {
            StreamKind::Logs => "log",
            StreamKind::Stats => "stats",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            StreamKind::Logs => "logs",
            StreamKind::Stats => "stats",
        }
    }
}

/// Shared on/off switch for one stream.
#[derive(Debug, Clone)]
pub struct StreamFlag(Arc<AtomicBool>);

impl StreamFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether both handles switch the same stream.
    pub fn same_as(&self, other: &StreamFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Streaming flags per service and stream kind.
///
/// Enabling a stream replaces (and clears) any previous flag for the same
/// key, so at most one stream per service and kind stays live.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    flags: Arc<RwLock<HashMap<(i64, StreamKind), StreamFlag>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, service_id: i64, kind: StreamKind) -> StreamFlag {
        let flag = StreamFlag::new(true);
        if let Some(previous) = self
            .flags
            .write()
            .insert((service_id, kind), flag.clone())
        {
            previous.clear();
        }
        flag
    }

    /// Returns whether a stream was enabled.
    pub fn disable(&self, service_id: i64, kind: StreamKind) -> bool {
        match self.flags.write().remove(&(service_id, kind)) {
            Some(flag) => {
                let was_enabled = flag.is_enabled();
                flag.clear();
                was_enabled
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, service_id: i64, kind: StreamKind) -> bool {
        self.flags
            .read()
            .get(&(service_id, kind))
            .is_some_and(StreamFlag::is_enabled)
    }

    /// Forget `flag` once its stream has ended. A newer flag registered for
    /// the same service and kind stays in place.
    pub fn release(&self, service_id: i64, kind: StreamKind, flag: &StreamFlag) {
        flag.clear();
        let mut flags = self.flags.write();
        if flags
            .get(&(service_id, kind))
            .is_some_and(|current| current.same_as(flag))
        {
            flags.remove(&(service_id, kind));
        }
    }

    /// Clear every flag, e.g. on shutdown.
    pub fn disable_all(&self) {
        for (_, flag) in self.flags.write().drain() {
            flag.clear();
        }
    }
}

/// Drain `stream` into the notifier until it ends.
///
/// Items become `log_message` / `stats_message` events; an interruption
/// becomes one `get_logs_failed` / `get_stats_failed` event. Returns the
/// number of items relayed.
pub async fn relay<S, T>(
    stream: S,
    kind: StreamKind,
    service_id: i64,
    notifier: Arc<dyn Notifier>,
) -> usize
where
    S: Stream<Item = Result<T, Error>>,
    T: Serialize,
{
    futures::pin_mut!(stream);
    let mut relayed = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => match serde_json::to_value(value) {
                Ok(value) => {
                    let mut payload = json!({ "service_id": service_id });
                    payload[kind.payload_key()] = value;
                    notifier.emit(kind.message_event(), payload);
                    relayed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        service_id,
                        "Skipping {} item that cannot be encoded: {}",
                        kind.noun(),
                        e
                    );
                }
            },
            Err(e) => {
                tracing::error!(service_id, "Error streaming {}: {}", kind.noun(), e);
                notifier.emit(kind.failed_event(), failure_payload(kind, service_id));
            }
        }
    }
    tracing::debug!(service_id, relayed, "{} stream ended", kind.noun());
    relayed
}

/// Payload of a `get_logs_failed` / `get_stats_failed` event. The cause is
/// logged, not sent.
pub fn failure_payload(kind: StreamKind, service_id: i64) -> Value {
    json!({
        "service_id": service_id,
        "error": format!("Error streaming {}", kind.noun()),
        "message": format!("Error streaming {}; is the service running?", kind.noun()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::BroadcastNotifier;

    #[test]
    fn enabling_replaces_previous_flag() {
        let registry = StreamRegistry::new();
        let first = registry.enable(1, StreamKind::Logs);
        let second = registry.enable(1, StreamKind::Logs);
        assert!(!first.is_enabled());
        assert!(second.is_enabled());
        assert!(registry.is_enabled(1, StreamKind::Logs));
        assert!(!registry.is_enabled(1, StreamKind::Stats));
    }

    #[test]
    fn disabling_clears_outstanding_flag() {
        let registry = StreamRegistry::new();
        let flag = registry.enable(7, StreamKind::Stats);
        assert!(registry.disable(7, StreamKind::Stats));
        assert!(!flag.is_enabled());
        assert!(!registry.disable(7, StreamKind::Stats));
    }

    #[test]
    fn release_forgets_only_its_own_flag() {
        let registry = StreamRegistry::new();
        let ended = registry.enable(3, StreamKind::Logs);
        registry.release(3, StreamKind::Logs, &ended);
        assert!(!registry.is_enabled(3, StreamKind::Logs));
        assert!(!registry.disable(3, StreamKind::Logs));

        let old = registry.enable(3, StreamKind::Logs);
        let current = registry.enable(3, StreamKind::Logs);
        registry.release(3, StreamKind::Logs, &old);
        assert!(current.is_enabled());
        assert!(registry.is_enabled(3, StreamKind::Logs));
    }

    /// Serializes to its reading, or fails when there is none.
    struct Reading(Option<u32>);

    impl Serialize for Reading {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.0 {
                Some(value) => serializer.serialize_u32(value),
                None => Err(serde::ser::Error::custom("no reading")),
            }
        }
    }

    #[tokio::test]
    async fn relay_skips_items_that_cannot_be_encoded() {
        let notifier = Arc::new(BroadcastNotifier::default());
        let mut notifications = notifier.subscribe();
        let items: Vec<Result<Reading, Error>> =
            vec![Ok(Reading(Some(1))), Ok(Reading(None)), Ok(Reading(Some(3)))];

        let relayed = relay(
            futures::stream::iter(items),
            StreamKind::Stats,
            9,
            notifier.clone(),
        )
        .await;
        assert_eq!(relayed, 2);

        let mut readings = Vec::new();
        while let Ok(notification) = notifications.try_recv() {
            assert_eq!(notification.event, "stats_message");
            readings.push(notification.payload["stats"].clone());
        }
        assert_eq!(readings, vec![json!(1), json!(3)]);
    }

    #[test]
    fn disable_all_stops_everything() {
        let registry = StreamRegistry::new();
        let a = registry.enable(1, StreamKind::Logs);
        let b = registry.enable(2, StreamKind::Stats);
        registry.disable_all();
        assert!(!a.is_enabled() && !b.is_enabled());
    }

    #[test]
    fn failure_payload_names_the_stream() {
        let payload = failure_payload(StreamKind::Stats, 4);
        assert_eq!(payload["service_id"], 4);
        assert_eq!(payload["error"], "Error streaming stats");
        assert_eq!(
            payload["message"],
            "Error streaming stats; is the service running?"
        );
        assert_eq!(StreamKind::Logs.failed_event(), "get_logs_failed");
    }
}
