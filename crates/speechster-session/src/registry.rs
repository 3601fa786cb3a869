//! Device binding and telemetry ingestion.
//!
//! Telemetry is last-writer-wins: a report from a device other than the bound
//! one silently takes over the session (with a warning in the log).

use chrono::Utc;
use serde_json::{Value, json};
use speechster_types::{EventKind, TelemetrySnapshot};
use tracing::{debug, info, warn};

use crate::{DeviceSession, SessionState};

impl SessionState {
    /// Bind `candidate` or replace a different binding. Always accepts.
    pub(crate) fn bind_or_validate(&mut self, candidate: &str) -> bool {
        match self.device_id.as_deref() {
            None => {
                info!(device_id = candidate, "device bound to session");
                self.device_id = Some(candidate.to_string());
            }
            Some(current) if current == candidate => {}
            Some(current) => {
                warn!(
                    device_id = candidate,
                    previous = current,
                    "report from unexpected device, replacing current device"
                );
                self.device_id = Some(candidate.to_string());
            }
        }
        true
    }
}

impl DeviceSession {
    /// Bind `candidate_id` if nothing is bound, keep it if it already is, or
    /// overwrite a different binding. Returns `true` in every case.
    pub fn bind_or_validate(&self, candidate_id: &str) -> bool {
        self.state.lock().bind_or_validate(candidate_id)
    }

    /// The device currently bound to the session, if any.
    pub fn current_device(&self) -> Option<String> {
        self.state.lock().device_id.clone()
    }

    /// Store `payload` as the latest telemetry from `device_id` and fan it
    /// out as `esp.telemetry`.
    pub fn record_telemetry(&self, device_id: &str, payload: Value) {
        let mut state = self.state.lock();
        state.bind_or_validate(device_id);
        state.telemetry = Some(TelemetrySnapshot {
            device_id: device_id.to_string(),
            payload: payload.clone(),
            received_at: Utc::now(),
        });
        debug!(device_id, "telemetry recorded");
        self.bus.publish(
            EventKind::EspTelemetry,
            json!({ "device_id": device_id, "payload": payload }),
        );
    }

    /// The most recent telemetry snapshot.
    pub fn last_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.state.lock().telemetry.clone()
    }
}
