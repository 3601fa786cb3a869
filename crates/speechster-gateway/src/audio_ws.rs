//! `/data/audio` ingest channel.
//!
//! One [`AudioStream`](speechster_audio::AudioStream) per socket. Binary
//! frames are appended; everything else is ignored. The file is finalized
//! before the socket is closed, whichever side ends the session.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use speechster_types::UNKNOWN_DEVICE;
use tracing::{debug, error};

use crate::state::AppState;
use crate::ws::{close_message, shutdown_message};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| ingest(socket, state))
}

async fn ingest(mut socket: WebSocket, state: AppState) {
    let device_id = state
        .session
        .current_device()
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

    let mut stream = match state.audio.open_stream(&device_id).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(device_id, error = %e, "cannot open audio stream file");
            let _ = socket.send(close_message(close_code::ERROR, "server-error")).await;
            return;
        }
    };

    let shutdown = state.shutdown.clone();
    let mut stopping = false;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                stopping = true;
                break;
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Binary(frame))) => stream.write_frame(frame).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session_id = %stream.session_id(), error = %e, "audio socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    stream.close().await;
    if stopping {
        let _ = socket.send(shutdown_message()).await;
    }
}
