use std::sync::Arc;
use std::time::Instant;

use speechster_audio::AudioHub;
use speechster_bus::FanoutBus;
use speechster_session::DeviceSession;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<DeviceSession>,
    pub bus: Arc<FanoutBus>,
    pub audio: Arc<AudioHub>,
    /// `None` when no shared key is configured.
    pub api_key: Option<Arc<str>>,
    /// Cancelled once on SIGINT/SIGTERM or panic; every socket loop watches it.
    pub shutdown: CancellationToken,
    pub started: Instant,
}

impl AppState {
    /// Build the state around `bus`. An empty `api_key` counts as unset.
    pub fn new(bus: Arc<FanoutBus>, audio: AudioHub, api_key: Option<&str>) -> Self {
        Self {
            session: Arc::new(DeviceSession::new(Arc::clone(&bus))),
            bus,
            audio: Arc::new(audio),
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    /// Observer sockets plus audio sockets currently streaming.
    pub fn ws_clients(&self) -> usize {
        self.bus.observer_count() + self.audio.open_streams()
    }
}

#[cfg(test)]
pub(crate) fn test_state(dir: &std::path::Path, api_key: Option<&str>) -> AppState {
    use speechster_audio::AudioStore;

    let bus = Arc::new(FanoutBus::new());
    let audio = AudioHub::new(AudioStore::new(dir), Arc::clone(&bus));
    AppState::new(bus, audio, api_key)
}
