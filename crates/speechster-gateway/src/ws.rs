//! `/ws` observer channel.
//!
//! Each socket registers a [`ChannelSink`] on the bus and runs one loop that
//! multiplexes three sources: queued broadcast frames going down, browser
//! messages coming up, and the shutdown token.

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use speechster_bus::{ChannelSink, DEFAULT_QUEUE_DEPTH};
use speechster_types::{EventKind, RelayEvent};
use tracing::{debug, info, warn};

use crate::routes::control_fields;
use crate::state::AppState;

/// Close reason sent to every socket when the process stops.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

pub(crate) fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

pub(crate) fn shutdown_message() -> Message {
    close_message(close_code::AWAY, SHUTDOWN_REASON)
}

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, state))
}

async fn observe(socket: WebSocket, state: AppState) {
    let (sink, mut frames) = ChannelSink::channel(DEFAULT_QUEUE_DEPTH);
    let observer = state.bus.subscribe(sink);
    info!(%observer, observers = state.bus.observer_count(), "observer connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(shutdown_message()).await;
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ack) = handle_upstream_message(text.as_str(), &state)
                            && ws_tx.send(Message::Text(ack.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%observer, error = %e, "observer socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.bus.unsubscribe(observer);
    info!(%observer, "observer disconnected");
}

/// Apply one text message sent by a browser.
///
/// `{"action": "control", "device_id": ..., "command": ...}` is enqueued
/// exactly as `POST /control` would, and the returned frame is the direct
/// acknowledgement for the sending socket. Anything else is logged and
/// dropped.
pub(crate) fn handle_upstream_message(text: &str, state: &AppState) -> Option<String> {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        debug!("ignoring non-JSON observer message");
        return None;
    };

    let action = json.get("action").and_then(Value::as_str);
    if action != Some("control") {
        debug!(?action, "ignoring observer message");
        return None;
    }

    let Some((device_id, command)) = control_fields(&json) else {
        warn!("control message without device_id or command");
        return None;
    };

    let id = state.session.enqueue(&device_id, command);
    info!(device_id, %id, "command queued over WebSocket");
    let ack = RelayEvent::new(
        EventKind::ControlQueued,
        json!({ "device_id": device_id, "id": id }),
    );
    serde_json::to_string(&ack).ok()
}
