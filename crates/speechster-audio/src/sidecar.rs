//! Inference sidecar: a child process that reads raw PCM on stdin and prints
//! one JSON result per line on stdout.
//!
//! Audio is handed over through a bounded channel. [`Sidecar::forward`] never
//! waits: when the channel is full the chunk is dropped, and once the child
//! dies every chunk is dropped. A slow or crashed sidecar therefore cannot
//! stall the WebSocket read loop.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use serde_json::Value;
use speechster_bus::FanoutBus;
use speechster_types::{EventKind, RelayError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Chunks buffered for the sidecar before new ones are dropped.
pub const SIDECAR_QUEUE_DEPTH: usize = 64;

/// What happened to a chunk passed to [`Sidecar::forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Queued,
    /// The queue was full; the chunk was discarded.
    Dropped,
    /// The sidecar is no longer running.
    Dead,
}

/// Handle to a running inference subprocess.
pub struct Sidecar {
    tx: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
    dropped: AtomicU64,
}

impl Sidecar {
    /// Spawn `command_line` (program followed by whitespace-separated
    /// arguments) and start the stdin pump and stdout reader tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Sidecar`] if the command is empty or the process
    /// cannot be started.
    pub fn spawn(command_line: &str, bus: Arc<FanoutBus>) -> Result<Self, RelayError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| RelayError::Sidecar("empty sidecar command".to_string()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::Sidecar(format!("failed to spawn `{command_line}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::Sidecar("sidecar stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Sidecar("sidecar stdout unavailable".to_string()))?;

        info!(command = command_line, pid = child.id(), "inference sidecar started");

        let (tx, rx) = mpsc::channel(SIDECAR_QUEUE_DEPTH);
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(pump_stdin(stdin, rx, Arc::clone(&alive)));
        tokio::spawn(read_results(child, stdout, bus, Arc::clone(&alive)));

        Ok(Self {
            tx,
            alive,
            dropped: AtomicU64::new(0),
        })
    }

    /// Queue `chunk` for the sidecar without waiting.
    pub fn forward(&self, chunk: Bytes) -> ForwardOutcome {
        if !self.is_alive() {
            return ForwardOutcome::Dead;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => ForwardOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "sidecar queue full, audio chunk dropped");
                ForwardOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.alive.store(false, Ordering::Relaxed);
                ForwardOutcome::Dead
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Chunks discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn pump_stdin(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Bytes>, alive: Arc<AtomicBool>) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            warn!(error = %e, "sidecar stdin closed, audio forwarding stopped");
            alive.store(false, Ordering::Relaxed);
            return;
        }
    }
}

async fn read_results(
    mut child: Child,
    stdout: ChildStdout,
    bus: Arc<FanoutBus>,
    alive: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                publish_result_line(&line, &bus);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read sidecar output");
                break;
            }
        }
    }
    alive.store(false, Ordering::Relaxed);

    match child.wait().await {
        Ok(status) => warn!(%status, "inference sidecar exited"),
        Err(e) => warn!(error = %e, "inference sidecar lost"),
    }
}

/// Publish `line` as `esp.ai_result` when it is a JSON object. Returns
/// whether anything was published; other output is only logged.
pub(crate) fn publish_result_line(line: &str, bus: &FanoutBus) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(result @ Value::Object(_)) => {
            debug!(%result, "sidecar result");
            bus.publish(EventKind::EspAiResult, result);
            true
        }
        _ => {
            debug!(line = trimmed, "sidecar output");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speechster_bus::ChannelSink;
    use std::time::Duration;

    fn bus_with_observer() -> (Arc<FanoutBus>, mpsc::Receiver<Arc<str>>) {
        let bus = Arc::new(FanoutBus::new());
        let (sink, mut rx) = ChannelSink::channel(32);
        bus.subscribe(sink);
        let _welcome = rx.try_recv();
        (bus, rx)
    }

    #[test]
    fn json_lines_become_ai_results() {
        let (bus, mut rx) = bus_with_observer();
        assert!(publish_result_line(
            r#"{"label": "yes", "confidence": 0.91, "timestamp": 1.0}"#,
            &bus
        ));

        let event: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(event["type"], "esp.ai_result");
        assert_eq!(event["payload"]["label"], "yes");
    }

    #[test]
    fn banner_lines_are_not_published() {
        let (bus, mut rx) = bus_with_observer();
        assert!(!publish_result_line("[OK] Model loaded (27 classes) on cpu", &bus));
        assert!(!publish_result_line("   ", &bus));
        assert!(!publish_result_line("42", &bus));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let bus = Arc::new(FanoutBus::new());
        assert!(matches!(Sidecar::spawn("   ", bus), Err(RelayError::Sidecar(_))));
    }

    #[tokio::test]
    async fn missing_program_is_rejected() {
        let bus = Arc::new(FanoutBus::new());
        let result = Sidecar::spawn("speechster-no-such-sidecar-binary", bus);
        assert!(matches!(result, Err(RelayError::Sidecar(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwarded_bytes_reach_the_process() {
        // `cat` echoes stdin, so a JSON line written in comes back as a result.
        let (bus, mut rx) = bus_with_observer();
        let sidecar = Sidecar::spawn("cat", Arc::clone(&bus)).expect("cat available");

        let line = Bytes::from_static(b"{\"label\":\"stop\",\"confidence\":0.88}\n");
        assert_eq!(sidecar.forward(line), ForwardOutcome::Queued);

        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("result in time")
            .expect("bus open");
        let event: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(event["type"], "esp.ai_result");
        assert_eq!(event["payload"]["label"], "stop");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_sidecar_is_reported_dead() {
        let bus = Arc::new(FanoutBus::new());
        let sidecar = Sidecar::spawn("true", bus).expect("true available");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sidecar.is_alive() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!sidecar.is_alive());
        assert_eq!(sidecar.forward(Bytes::from_static(b"pcm")), ForwardOutcome::Dead);
    }
}
