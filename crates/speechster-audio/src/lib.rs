//! `speechster-audio` – audio capture from the device
//!
//! Two ingest paths end in the same place: a `.raw` file under the device's
//! folder, an entry in the in-memory [`AudioIndex`], and an `esp.audio`
//! event for observers.
//!
//! # Modules
//!
//! - [`index`] – bounded ring buffer of the most recent audio artifacts.
//! - [`store`] – on-disk layout (`<data>/<device>/audio/<file>.raw`) and the
//!   matching retrieval paths under `/data`.
//! - [`stream`] – [`AudioHub`] and the per-connection [`AudioStream`] state
//!   machine (`Open -> Streaming -> Closed`) plus one-shot uploads.
//! - [`sidecar`] – optional inference subprocess fed through a bounded,
//!   drop-on-full channel; its JSON output becomes `esp.ai_result`.

pub mod index;
pub mod sidecar;
pub mod store;
pub mod stream;

pub use index::{AudioIndex, DEFAULT_INDEX_CAPACITY};
pub use sidecar::{ForwardOutcome, Sidecar};
pub use store::AudioStore;
pub use stream::{AudioHub, AudioStream, StreamState};
