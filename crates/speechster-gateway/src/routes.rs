//! Plain HTTP handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use speechster_audio::AudioStore;
use speechster_types::{EventKind, PollOutcome, UNKNOWN_DEVICE};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

use crate::auth::{self, CredentialQuery, KeyCheck};
use crate::error::ApiError;
use crate::state::AppState;

/// Read an id field the way devices send it: a non-empty string or a number.
pub(crate) fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{device_id, command}` out of a control request, shared by HTTP and `/ws`.
///
/// `command` must be present but may be any JSON value.
pub(crate) fn control_fields(body: &Value) -> Option<(String, Value)> {
    let device_id = id_field(body.get("device_id"))?;
    let command = body.get("command")?.clone();
    Some((device_id, command))
}

/// Parse a JSON request body regardless of `Content-Type`.
///
/// Bodies are read as raw bytes so the key gate runs before any parsing. An
/// empty body reads as `{}`.
pub(crate) fn json_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "request body is not valid JSON");
        ApiError::InvalidJson
    })
}

/// `POST /control`
pub async fn control(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CredentialQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    auth::require_api_key(state.api_key.as_deref(), &headers, query.key.as_deref())?;
    let body = json_body(&body)?;
    let (device_id, command) = control_fields(&body).ok_or(ApiError::MissingFields)?;
    let id = state.session.enqueue(&device_id, command);
    info!(device_id, %id, "command queued over HTTP");
    Ok(Json(json!({ "status": "queued", "id": id })))
}

/// `POST /esp/telemetry`
pub async fn telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CredentialQuery>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    match auth::check_api_key(state.api_key.as_deref(), &headers, query.key.as_deref()) {
        KeyCheck::Open | KeyCheck::Accepted => {}
        KeyCheck::Missing | KeyCheck::Mismatch => {
            warn!("telemetry rejected: missing or invalid API key");
            return Err(ApiError::TelemetryUnauthorized);
        }
    }
    let payload = json_body(&body)?;

    let device_id = id_field(payload.get("device_id"))
        .or_else(|| id_field(payload.get("id")))
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
    state.session.record_telemetry(&device_id, payload);
    Ok(Json(json!({ "status": "ok" })))
}

/// `POST /esp/upload` (multipart: `device_id`, `file`)
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut device_field = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "device_id" => {
                let text = field.text().await.map_err(|e| ApiError::Multipart(e.body_text()))?;
                device_field = Some(text);
            }
            "file" => {
                let data = field.bytes().await.map_err(|e| ApiError::Multipart(e.body_text()))?;
                file = Some(data);
            }
            _ => {}
        }
    }

    let data = file.ok_or(ApiError::MissingFile)?;
    let device_id = device_field
        .filter(|d| !d.is_empty())
        .or_else(|| state.session.current_device())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

    match state.audio.save_upload(&device_id, &data).await {
        Ok(artifact) => Ok(Json(json!({ "status": "ok", "filename": artifact.filename }))),
        Err(e) => {
            error!(device_id, error = %e, "audio upload write failed");
            Err(ApiError::WriteFailed)
        }
    }
}

/// `POST /esp/ota` – relayed to observers, no state change.
pub async fn ota(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let payload = json_body(&body)?;
    let device_id = id_field(payload.get("device_id"))
        .or_else(|| state.session.current_device())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
    state
        .bus
        .publish(EventKind::EspOta, json!({ "device_id": device_id, "payload": payload }));
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub device_id: Option<String>,
}

/// `GET /esp/commands?device_id=ID`
pub async fn poll_commands(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, ApiError> {
    let device_id = query
        .device_id
        .filter(|d| !d.is_empty())
        .ok_or(ApiError::MissingDeviceId)?;
    Ok(Json(poll_body(state.session.poll(&device_id))))
}

fn poll_body(outcome: PollOutcome) -> Value {
    match outcome {
        PollOutcome::Empty => json!({ "empty": true }),
        PollOutcome::NotRegistered => json!({ "empty": true, "message": "not-registered" }),
        PollOutcome::Command(cmd) => json!({
            "empty": false,
            "command": cmd.command,
            "id": cmd.id,
            "ts": cmd.enqueued_at.timestamp_millis(),
        }),
    }
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "uptime": state.started.elapsed().as_secs_f64(),
        "ws_clients": state.ws_clients(),
        "device": state.session.current_device(),
        "hasCommand": state.session.has_command(),
        "lastTelemetryTs": state.session.last_telemetry().map(|t| t.received_at.timestamp_millis()),
    }))
}

/// `GET /data/{device}/audio/{file}` – serve a recorded file.
pub async fn audio_file(
    State(state): State<AppState>,
    Path((device, file)): Path<(String, String)>,
    req: Request,
) -> Response {
    if file.starts_with('.') || AudioStore::sanitize(&file) != file {
        return ApiError::NotFound.into_response();
    }
    let path = state.audio.store().audio_dir(&device).join(&file);
    match ServeFile::new(path).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
