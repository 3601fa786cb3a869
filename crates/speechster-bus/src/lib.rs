//! `speechster-bus` – observer fan-out
//!
//! Pushes every relay event to every connected browser observer without any
//! observer blocking the others or the publisher.
//!
//! # Modules
//!
//! - [`sink`] – the [`ObserverSink`] transport abstraction and the
//!   channel-backed [`ChannelSink`] used by WebSocket writer loops.
//! - [`bus`] – [`FanoutBus`], the registry of live sinks that serializes an
//!   event once and hands the frame to each of them.

pub mod bus;
pub mod sink;

pub use bus::{FanoutBus, ObserverId};
pub use sink::{ChannelSink, ObserverSink, DEFAULT_QUEUE_DEPTH};
