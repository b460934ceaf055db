//! Publish/subscribe relay for lifecycle events.
//!
//! [`TelemetryBridge::emit`] delivers each event synchronously to every
//! registered [`TelemetrySubscriber`], then broadcasts it to async listeners
//! obtained with [`TelemetryBridge::subscribe`]. Emitting never blocks and
//! never fails the caller.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::config::TelemetryConfig;
use crate::hooks::registry::panic_message;
use crate::telemetry::error::Result;

/// A structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Event name, e.g. `workflow:step:complete`.
    pub event_name: String,
    /// Event payload.
    pub data: Value,
    /// RFC 3339 emission time.
    pub timestamp: String,
}

/// Synchronous listener notified on every emitted event.
pub trait TelemetrySubscriber: Send + Sync {
    /// Subscriber name, used for removal and in logs.
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged by the bridge and otherwise ignored.
    fn on_event(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Telemetry relay shared by the engine and the optimizer.
///
/// Cloning shares subscribers and the broadcast channel.
#[derive(Clone)]
pub struct TelemetryBridge {
    subscribers: Arc<RwLock<Vec<Arc<dyn TelemetrySubscriber>>>>,
    broadcast_tx: broadcast::Sender<TelemetryEvent>,
}

impl std::fmt::Debug for TelemetryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBridge")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.broadcast_tx.receiver_count())
            .finish()
    }
}

impl Default for TelemetryBridge {
    fn default() -> Self {
        Self::new(&TelemetryConfig::default())
    }
}

impl TelemetryBridge {
    /// Creates a bridge with the configured broadcast capacity.
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self { subscribers: Arc::new(RwLock::new(Vec::new())), broadcast_tx }
    }

    /// Emits an event to all subscribers, then to broadcast receivers.
    pub fn emit(&self, event_name: &str, data: Value) {
        let event = TelemetryEvent {
            event_name: event_name.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        // Snapshot so a subscriber may add/remove subscribers without deadlocking.
        let subscribers: Vec<Arc<dyn TelemetrySubscriber>> =
            self.subscribers.read().unwrap_or_else(PoisonError::into_inner).clone();

        for subscriber in subscribers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    subscriber = %subscriber.name(),
                    event = %event.event_name,
                    error = %e,
                    "Telemetry subscriber failed"
                ),
                Err(payload) => warn!(
                    subscriber = %subscriber.name(),
                    event = %event.event_name,
                    panic = %panic_message(payload.as_ref()),
                    "Telemetry subscriber panicked"
                ),
            }
        }

        // No receivers or lagging receivers are not the emitter's problem.
        let _ = self.broadcast_tx.send(event.clone());
        trace!(event = %event.event_name, "Telemetry event emitted");
    }

    /// Subscribes to the async event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Registers a synchronous subscriber.
    pub fn add_subscriber(&self, subscriber: Arc<dyn TelemetrySubscriber>) {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner).push(subscriber);
    }

    /// Removes every subscriber with the given name, returning how many were removed.
    pub fn remove_subscriber(&self, name: &str) -> usize {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.name() != name);
        before - subscribers.len()
    }

    /// Number of registered synchronous subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::error::TelemetryError;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl TelemetrySubscriber for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &TelemetryEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.event_name.clone());
            Ok(())
        }
    }

    struct Failing;

    impl TelemetrySubscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_event(&self, _event: &TelemetryEvent) -> Result<()> {
            Err(TelemetryError::SubscriberFailed {
                subscriber: "failing".to_string(),
                message: "nope".to_string(),
            })
        }
    }

    struct Panicking;

    impl TelemetrySubscriber for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_event(&self, _event: &TelemetryEvent) -> Result<()> {
            panic!("subscriber exploded");
        }
    }

    #[test]
    fn test_emit_preserves_order() {
        let bridge = TelemetryBridge::default();
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        bridge.add_subscriber(recorder.clone());

        bridge.emit("workflow:start", json!({}));
        bridge.emit("workflow:step:start", json!({}));
        bridge.emit("workflow:complete", json!({}));

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["workflow:start", "workflow:step:start", "workflow:complete"]
        );
    }

    #[test]
    fn test_failing_subscribers_are_isolated() {
        let bridge = TelemetryBridge::default();
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        bridge.add_subscriber(Arc::new(Failing));
        bridge.add_subscriber(Arc::new(Panicking));
        bridge.add_subscriber(recorder.clone());

        bridge.emit("workflow:start", json!({"executionId": "x"}));
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_subscriber() {
        let bridge = TelemetryBridge::default();
        bridge.add_subscriber(Arc::new(Failing));
        bridge.add_subscriber(Arc::new(Failing));
        assert_eq!(bridge.subscriber_count(), 2);
        assert_eq!(bridge.remove_subscriber("failing"), 2);
        assert_eq!(bridge.remove_subscriber("failing"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_receivers_get_events() {
        let bridge = TelemetryBridge::default();
        let mut rx = bridge.subscribe();
        bridge.emit("optimization:start", json!({"optimizationId": "o"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_name, "optimization:start");
        assert_eq!(event.data["optimizationId"], "o");
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }

    #[test]
    fn test_emit_without_receivers_is_fine() {
        let bridge = TelemetryBridge::default();
        bridge.emit("workflow:failed", json!({"error": "x"}));
    }
}
