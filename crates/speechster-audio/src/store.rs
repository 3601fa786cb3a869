//! On-disk layout for recorded audio.
//!
//! ```text
//! <data_dir>/
//!   <safe_device_id>/
//!     audio/
//!       stream_<uuid>.raw
//!       upload_<epoch_ms>_<uuid8>.raw
//! ```
//!
//! The same relative layout is served read-only under `/data`, so every file
//! has a predictable retrieval path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// URL prefix the data directory is mounted at.
pub const DATA_MOUNT: &str = "/data";

/// Resolves device folders and file names below a data root.
#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
}

impl AudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make `device_id` safe to use as a single path component.
    ///
    /// Anything outside `[A-Za-z0-9_.-]` becomes `_`; an empty id becomes
    /// `unknown`. Pure-dot ids are rewritten so they cannot escape the root.
    pub fn sanitize(device_id: &str) -> String {
        if device_id.is_empty() {
            return "unknown".to_string();
        }
        let safe: String = device_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe.chars().all(|c| c == '.') {
            safe.replace('.', "_")
        } else {
            safe
        }
    }

    /// `<root>/<safe_device>/audio`, without touching the filesystem.
    pub fn audio_dir(&self, device_id: &str) -> PathBuf {
        self.root.join(Self::sanitize(device_id)).join("audio")
    }

    /// Create the device's audio folder if needed and return it.
    pub async fn ensure_audio_dir(&self, device_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.audio_dir(device_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// URL path under which `filename` of `device_id` is served.
    pub fn retrieval_path(device_id: &str, filename: &str) -> String {
        format!("{DATA_MOUNT}/{}/audio/{filename}", Self::sanitize(device_id))
    }

    /// File name for a streamed session.
    pub fn stream_filename(session_id: Uuid) -> String {
        format!("stream_{session_id}.raw")
    }

    /// File name for a one-shot upload received at `at`.
    pub fn upload_filename(at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("upload_{}_{}.raw", at.timestamp_millis(), &suffix[..8])
    }
}
