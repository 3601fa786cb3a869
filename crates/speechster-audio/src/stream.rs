//! [`AudioHub`] – shared entry point for audio ingest – and [`AudioStream`],
//! the per-connection capture state machine.
//!
//! ```text
//!   open_stream()        write_frame()          close()
//!  ───────────────► Open ─────────────► Streaming ───────► Closed
//!                    │                                  ▲
//!                    └──────────── close() ─────────────┘
//! ```
//!
//! Closing always indexes the artifact and publishes `esp.audio`, even for a
//! stream that never received a frame.
//!
//! The sidecar reads one continuous PCM stream, so only one connection feeds
//! it at a time: the first stream to write a frame claims it until that
//! stream ends. Concurrent streams are still recorded, just not classified.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use speechster_bus::FanoutBus;
use speechster_types::{AudioArtifact, EventKind};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::index::AudioIndex;
use crate::sidecar::{ForwardOutcome, Sidecar};
use crate::store::AudioStore;

/// Lifecycle of one audio ingest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// File created, no frame received yet.
    Open,
    /// At least one frame appended.
    Streaming,
    /// File flushed and indexed.
    Closed,
}

/// Storage, index, sidecar and bus shared by every audio connection.
pub struct AudioHub {
    store: AudioStore,
    index: AudioIndex,
    bus: Arc<FanoutBus>,
    sidecar: Option<Sidecar>,
    /// Stream currently feeding the sidecar.
    sidecar_owner: Mutex<Option<Uuid>>,
    open_streams: AtomicUsize,
}

impl AudioHub {
    pub fn new(store: AudioStore, bus: Arc<FanoutBus>) -> Self {
        Self {
            store,
            index: AudioIndex::default(),
            bus,
            sidecar: None,
            sidecar_owner: Mutex::new(None),
            open_streams: AtomicUsize::new(0),
        }
    }

    /// Forward streamed audio to `sidecar` (builder-style).
    pub fn with_sidecar(mut self, sidecar: Sidecar) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// Replace the default 1000-entry index (builder-style).
    pub fn with_index(mut self, index: AudioIndex) -> Self {
        self.index = index;
        self
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    pub fn index(&self) -> &AudioIndex {
        &self.index
    }

    pub fn sidecar(&self) -> Option<&Sidecar> {
        self.sidecar.as_ref()
    }

    /// Audio connections currently between open and close.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Relaxed)
    }

    /// Persist a one-shot upload, index it and announce it.
    ///
    /// On error nothing is indexed and no event is published.
    pub async fn save_upload(
        &self,
        device_id: &str,
        data: &[u8],
    ) -> std::io::Result<AudioArtifact> {
        let dir = self.store.ensure_audio_dir(device_id).await?;
        let ts = Utc::now();
        let filename = AudioStore::upload_filename(ts);
        tokio::fs::write(dir.join(&filename), data).await?;

        info!(device_id, filename = %filename, bytes = data.len(), "audio upload stored");
        let artifact = AudioArtifact {
            device_id: device_id.to_string(),
            filename,
            ts,
        };
        self.record(&artifact);
        Ok(artifact)
    }

    /// Create a fresh `stream_<uuid>.raw` file for `device_id` and return the
    /// connection's capture handle in the [`StreamState::Open`] state.
    pub async fn open_stream(self: &Arc<Self>, device_id: &str) -> std::io::Result<AudioStream> {
        let dir = self.store.ensure_audio_dir(device_id).await?;
        let session_id = Uuid::new_v4();
        let filename = AudioStore::stream_filename(session_id);
        let path = dir.join(&filename);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let open = self.open_streams.fetch_add(1, Ordering::Relaxed) + 1;
        info!(device_id, %session_id, path = %path.display(), open, "audio stream opened");

        Ok(AudioStream {
            hub: Arc::clone(self),
            device_id: device_id.to_string(),
            session_id,
            filename,
            path,
            file: Some(BufWriter::new(file)),
            state: StreamState::Open,
            bytes_written: 0,
            sidecar_lost: false,
            sidecar_busy: false,
        })
    }

    /// Claim the sidecar for `session_id`. `true` if this stream holds it.
    pub(crate) fn claim_sidecar(&self, session_id: Uuid) -> bool {
        let mut owner = self.sidecar_owner.lock();
        match *owner {
            None => {
                *owner = Some(session_id);
                true
            }
            Some(current) => current == session_id,
        }
    }

    pub(crate) fn release_sidecar(&self, session_id: Uuid) {
        let mut owner = self.sidecar_owner.lock();
        if *owner == Some(session_id) {
            *owner = None;
        }
    }

    fn record(&self, artifact: &AudioArtifact) {
        if let Some(evicted) = self.index.push(artifact.clone()) {
            debug!(filename = %evicted.filename, "audio index evicted oldest record");
        }
        self.bus.publish(
            EventKind::EspAudio,
            json!({
                "device_id": artifact.device_id,
                "filename": artifact.filename,
                "path": AudioStore::retrieval_path(&artifact.device_id, &artifact.filename),
                "ts": artifact.ts.timestamp_millis(),
            }),
        );
    }
}

/// Capture handle owned by exactly one ingest connection.
pub struct AudioStream {
    hub: Arc<AudioHub>,
    device_id: String,
    session_id: Uuid,
    filename: String,
    path: PathBuf,
    file: Option<BufWriter<File>>,
    state: StreamState,
    bytes_written: u64,
    sidecar_lost: bool,
    sidecar_busy: bool,
}

impl AudioStream {
    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one binary frame and hand a copy to the sidecar, if any.
    ///
    /// Write and forward failures are logged; the stream stays usable.
    pub async fn write_frame(&mut self, frame: Bytes) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        self.state = StreamState::Streaming;

        match file.write_all(&frame).await {
            Ok(()) => self.bytes_written += frame.len() as u64,
            Err(e) => warn!(path = %self.path.display(), error = %e, "audio write failed"),
        }

        let Some(sidecar) = self.hub.sidecar.as_ref() else {
            return;
        };
        if !self.hub.claim_sidecar(self.session_id) {
            if !self.sidecar_busy {
                self.sidecar_busy = true;
                info!(
                    session_id = %self.session_id,
                    "sidecar busy with another stream, not forwarding"
                );
            }
            return;
        }
        if sidecar.forward(frame) == ForwardOutcome::Dead && !self.sidecar_lost {
            self.sidecar_lost = true;
            warn!(session_id = %self.session_id, "sidecar unavailable, audio not forwarded");
        }
    }

    /// Flush and close the file, index the artifact, and publish `esp.audio`.
    pub async fn close(mut self) -> AudioArtifact {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush().await
        {
            warn!(path = %self.path.display(), error = %e, "audio flush failed");
        }
        self.state = StreamState::Closed;

        let artifact = AudioArtifact {
            device_id: self.device_id.clone(),
            filename: self.filename.clone(),
            ts: Utc::now(),
        };
        info!(
            device_id = %self.device_id,
            path = %self.path.display(),
            bytes = self.bytes_written,
            "audio stream closed"
        );
        self.hub.record(&artifact);
        artifact
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.hub.release_sidecar(self.session_id);
        let _ = self.hub.open_streams.fetch_sub(1, Ordering::Relaxed);
    }
}
