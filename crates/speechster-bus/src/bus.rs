//! Headless fan-out of relay events to browser observers.
//!
//! Unlike a broadcast channel, the bus keeps an explicit registry of
//! [`ObserverSink`] handles so that `/status` can count observers and dead
//! transports are pruned the moment a publish notices them.
//!
//! # Delivery
//!
//! | Property | Guarantee |
//! |---|---|
//! | Per observer | Frames arrive in publish order |
//! | Across observers | No ordering relation |
//! | Reliability | At most once; a full queue drops the frame |
//! | History | None; new observers only get `welcome` |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use speechster_types::{EventKind, RelayEvent};
use tracing::{debug, warn};

use crate::sink::ObserverSink;

/// Handle returned by [`FanoutBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Shared registry of observers. Wrap it in an `Arc` and hand clones to every
/// component that publishes.
#[derive(Default)]
pub struct FanoutBus {
    observers: Mutex<BTreeMap<ObserverId, Arc<dyn ObserverSink>>>,
    next_id: AtomicU64,
}

impl FanoutBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` and immediately queue a `welcome` frame carrying the
    /// current server time (epoch milliseconds) to it.
    ///
    /// The welcome is queued under the registry lock, so no other event can
    /// reach the new observer ahead of it.
    pub fn subscribe(&self, sink: Arc<dyn ObserverSink>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let welcome = RelayEvent::new(
            EventKind::Welcome,
            json!({ "ts": Utc::now().timestamp_millis() }),
        );

        let mut observers = self.observers.lock();
        match serde_json::to_string(&welcome) {
            Ok(frame) => {
                if !sink.send(Arc::from(frame)) {
                    warn!(%id, "could not queue welcome frame");
                }
            }
            Err(e) => warn!(error = %e, "welcome serialization failed"),
        }
        let _ = observers.insert(id, sink);
        debug!(%id, observers = observers.len(), "observer subscribed");
        id
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) {
        let mut observers = self.observers.lock();
        if observers.remove(&id).is_some() {
            debug!(%id, observers = observers.len(), "observer unsubscribed");
        }
    }

    /// Serialize `{type, payload}` once and queue it on every open sink.
    ///
    /// Returns the number of sinks that accepted the frame. Closed sinks are
    /// pruned; sinks with a full queue are skipped for this event only.
    pub fn publish(&self, kind: EventKind, payload: Value) -> usize {
        self.publish_event(&RelayEvent::new(kind, payload))
    }

    /// Same as [`publish`](Self::publish) for a pre-built event.
    pub fn publish_event(&self, event: &RelayEvent) -> usize {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(event_type = %event.kind, error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut observers = self.observers.lock();
        let mut delivered = 0;
        observers.retain(|id, sink| {
            if !sink.is_open() {
                debug!(%id, "pruning closed observer");
                return false;
            }
            if sink.send(Arc::clone(&frame)) {
                delivered += 1;
                true
            } else if sink.is_open() {
                warn!(%id, event_type = %event.kind, "observer queue full, event dropped");
                true
            } else {
                debug!(%id, "pruning observer after failed send");
                false
            }
        });
        debug!(event_type = %event.kind, delivered, "event published");
        delivered
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}
