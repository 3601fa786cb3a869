//! Single-slot command mailbox.
//!
//! The browser enqueues, the device polls. Only the most recent command is
//! kept and it is handed out exactly once.
//!
//! | Situation | `poll` result | Mutation |
//! |---|---|---|
//! | Nothing bound | binds the poller, then as below | binding |
//! | Bound to another device | [`PollOutcome::NotRegistered`] | none |
//! | Command pending | [`PollOutcome::Command`] | slot cleared |
//! | Slot empty | [`PollOutcome::Empty`] | none |

use serde_json::{Value, json};
use speechster_types::{EventKind, PendingCommand, PollOutcome};
use tracing::{info, warn};
use uuid::Uuid;

use crate::DeviceSession;

impl DeviceSession {
    /// Place `command` in the mailbox for `device_id`, replacing anything
    /// still unconsumed.
    ///
    /// The control path is authoritative: it rebinds the session to
    /// `device_id` even if another device was bound.
    pub fn enqueue(&self, device_id: &str, command: Value) -> Uuid {
        let pending = PendingCommand::new(command.clone());
        let id = pending.id;
        let mut state = self.state.lock();
        if state.device_id.as_deref() != Some(device_id) {
            info!(
                device_id,
                previous = state.device_id.as_deref(),
                "control request selects device"
            );
            state.device_id = Some(device_id.to_string());
        }
        if let Some(replaced) = state.pending.replace(pending) {
            info!(replaced = %replaced.id, "unconsumed command overwritten");
        }
        // Published under the lock so a racing poll cannot announce
        // `control.sent` first.
        self.bus.publish(
            EventKind::ControlQueued,
            json!({ "device_id": device_id, "command": command, "id": id }),
        );
        id
    }

    /// Hand the pending command to `device_id`, if it owns the session.
    ///
    /// Read-and-clear happens under the session lock, so concurrent polls
    /// can never both receive the same command.
    pub fn poll(&self, device_id: &str) -> PollOutcome {
        let mut state = self.state.lock();
        match state.device_id.as_deref() {
            None => {
                info!(device_id, "first poller becomes session owner");
                state.device_id = Some(device_id.to_string());
            }
            Some(current) if current != device_id => {
                warn!(
                    device_id,
                    current, "rejected command poll from non-owner device"
                );
                return PollOutcome::NotRegistered;
            }
            Some(_) => {}
        }

        match state.pending.take() {
            Some(command) => {
                self.bus.publish(
                    EventKind::ControlSent,
                    json!({ "device_id": device_id, "id": command.id }),
                );
                PollOutcome::Command(command)
            }
            None => PollOutcome::Empty,
        }
    }

    /// Whether a command is waiting for the device.
    pub fn has_command(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}
