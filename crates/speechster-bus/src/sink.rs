//! Transport-agnostic observer handles.
//!
//! The bus never touches a socket directly. Each observer is represented by
//! an [`ObserverSink`]; the WebSocket layer owns the actual socket and drains
//! whatever the sink queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Number of frames buffered per observer before new frames are dropped.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// A destination for serialized event frames.
pub trait ObserverSink: Send + Sync {
    /// Queue `frame` for delivery. Returns `false` when the frame was not
    /// accepted (queue full or transport gone). Must not block.
    fn send(&self, frame: Arc<str>) -> bool;

    /// Whether the underlying transport can still accept frames.
    fn is_open(&self) -> bool;
}

/// [`ObserverSink`] backed by a bounded `mpsc` channel.
///
/// The receiving half lives in the socket's writer loop. Dropping that
/// receiver closes the sink, which lets the bus prune it.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a sink together with the receiver its writer loop should drain.
    pub fn channel(depth: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(depth);
        (Arc::new(Self::new(tx)), rx)
    }

    /// Frames rejected because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ObserverSink for ChannelSink {
    fn send(&self, frame: Arc<str>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
