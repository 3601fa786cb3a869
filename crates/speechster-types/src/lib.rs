use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Fallback device id used when a request names no device and none is bound.
pub const UNKNOWN_DEVICE: &str = "esp_unknown";

/// Every event type that can be fanned out to observers.
///
/// The serialized form is the dotted wire name browsers switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Handshake sent to a freshly connected observer.
    #[serde(rename = "welcome")]
    Welcome,
    /// A command was placed in the mailbox.
    #[serde(rename = "control.queued")]
    ControlQueued,
    /// The device consumed the pending command.
    #[serde(rename = "control.sent")]
    ControlSent,
    /// Raw telemetry from the device.
    #[serde(rename = "esp.telemetry")]
    EspTelemetry,
    /// An audio artifact (upload or stream) finished writing.
    #[serde(rename = "esp.audio")]
    EspAudio,
    /// OTA progress reported by the device.
    #[serde(rename = "esp.ota")]
    EspOta,
    /// A result line produced by the inference sidecar.
    #[serde(rename = "esp.ai_result")]
    EspAiResult,
}

impl EventKind {
    /// The wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Welcome => "welcome",
            EventKind::ControlQueued => "control.queued",
            EventKind::ControlSent => "control.sent",
            EventKind::EspTelemetry => "esp.telemetry",
            EventKind::EspAudio => "esp.audio",
            EventKind::EspOta => "esp.ota",
            EventKind::EspAiResult => "esp.ai_result",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope pushed to observers: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl RelayEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// The single command waiting for the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: Uuid,
    /// Opaque payload; the relay never inspects it.
    pub command: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingCommand {
    /// Wrap `command` with a fresh id and the current time.
    pub fn new(command: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            enqueued_at: Utc::now(),
        }
    }
}

/// Latest telemetry report received from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Index entry describing one audio file written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub device_id: String,
    pub filename: String,
    pub ts: DateTime<Utc>,
}

/// Result of a device polling the command mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing pending.
    Empty,
    /// The poller is not the device currently bound to the session.
    NotRegistered,
    /// The pending command, now removed from the mailbox.
    Command(PendingCommand),
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        !matches!(self, PollOutcome::Command(_))
    }
}

/// Errors raised outside the request path: startup, storage, sidecar.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("inference sidecar error: {0}")]
    Sidecar(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_uses_dotted_wire_names() {
        let json = serde_json::to_string(&EventKind::EspAiResult).unwrap();
        assert_eq!(json, "\"esp.ai_result\"");
        assert_eq!(EventKind::ControlQueued.as_str(), "control.queued");
        assert_eq!(EventKind::Welcome.to_string(), "welcome");
    }

    #[test]
    fn relay_event_serializes_type_and_payload() {
        let event = RelayEvent::new(EventKind::EspOta, json!({"device_id": "esp1"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "esp.ota");
        assert_eq!(value["payload"]["device_id"], "esp1");
    }

    #[test]
    fn pending_commands_get_distinct_ids() {
        let a = PendingCommand::new(json!({"cmd": "reboot"}));
        let b = PendingCommand::new(json!({"cmd": "reboot"}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn poll_outcome_emptiness() {
        assert!(PollOutcome::Empty.is_empty());
        assert!(PollOutcome::NotRegistered.is_empty());
        assert!(!PollOutcome::Command(PendingCommand::new(json!(1))).is_empty());
    }

    #[test]
    fn relay_error_display() {
        let err = RelayError::Bind {
            addr: "0.0.0.0:8080".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:8080"));

        let err2 = RelayError::Sidecar("spawn failed".into());
        assert!(err2.to_string().contains("spawn failed"));
    }
}
