//! `speechster-session` – device session and command mailbox
//!
//! Owns the only shared mutable state of the relay: which device is
//! current, the single pending command, and the latest telemetry snapshot.
//! All three live behind one mutex inside [`DeviceSession`].
//!
//! # Modules
//!
//! - [`registry`] – device binding and telemetry ingestion. Conflicting
//!   telemetry overwrites the binding.
//! - [`mailbox`] – single-slot, exactly-once command queue. Conflicting
//!   polls are rejected without mutation.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use speechster_bus::FanoutBus;
//! use speechster_session::DeviceSession;
//! use speechster_types::PollOutcome;
//!
//! let session = DeviceSession::new(Arc::new(FanoutBus::new()));
//! let id = session.enqueue("esp1", json!({"cmd": "reboot"}));
//!
//! match session.poll("esp1") {
//!     PollOutcome::Command(cmd) => assert_eq!(cmd.id, id),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(session.poll("esp1"), PollOutcome::Empty);
//! ```

pub mod mailbox;
pub mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use speechster_bus::FanoutBus;
use speechster_types::{PendingCommand, TelemetrySnapshot};

#[derive(Debug, Default)]
struct SessionState {
    device_id: Option<String>,
    pending: Option<PendingCommand>,
    telemetry: Option<TelemetrySnapshot>,
}

/// Process-wide session state, injected into the gateway behind an `Arc`.
///
/// Events are published while the lock is held, so observers see them in
/// the order the state changed. The bus never calls back into the session,
/// and the lock is never held across an `.await`.
pub struct DeviceSession {
    state: Mutex<SessionState>,
    bus: Arc<FanoutBus>,
}

impl DeviceSession {
    /// Create an unbound session that publishes to `bus`.
    pub fn new(bus: Arc<FanoutBus>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            bus,
        }
    }

    /// The bus this session publishes to.
    pub fn bus(&self) -> &Arc<FanoutBus> {
        &self.bus
    }
}
