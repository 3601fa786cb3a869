//! End-to-end tests against a real listener on an ephemeral port.

use std::any::Any;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use speechster_bus::FanoutBus;
use speechster_gateway::{AppState, GatewayConfig, GatewayServer, TlsPaths};
use speechster_types::RelayError;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    http: String,
    ws: String,
    state: AppState,
    token: CancellationToken,
    handle: JoinHandle<Result<(), RelayError>>,
    https: Option<String>,
    /// Keeps the temporary data directory (or file) alive.
    _scratch: Box<dyn Any + Send>,
}

fn local_config(data_dir: &Path, api_key: Option<&str>) -> GatewayConfig {
    GatewayConfig {
        bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        http_port: 0,
        https_port: 0,
        data_dir: data_dir.to_path_buf(),
        api_key: api_key.map(str::to_string),
        tls: None,
    }
}

async fn launch(config: GatewayConfig, scratch: Box<dyn Any + Send>) -> Relay {
    let server = GatewayServer::new(config, Arc::new(FanoutBus::new()), None);
    let state = server.state().clone();
    let token = server.shutdown_token();
    let listeners = server.bind().await.expect("bind");
    let addr = listeners.http_addr().expect("local addr");
    let https = listeners.https_addr().map(|a| format!("https://{a}"));
    let handle = tokio::spawn(server.serve(listeners));

    Relay {
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}"),
        state,
        token,
        handle,
        https,
        _scratch: scratch,
    }
}

async fn start(api_key: Option<&str>) -> Relay {
    let dir = tempfile::tempdir().expect("tmp dir");
    launch(local_config(dir.path(), api_key), Box::new(dir)).await
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Next Close frame as `(code, reason)`, skipping everything else.
async fn next_close(socket: &mut Socket) -> (u16, String) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("close in time")
            .expect("socket open")
            .expect("frame ok");
        if let Message::Close(frame) = msg {
            let frame = frame.expect("close frame");
            return (u16::from(frame.code), frame.reason.as_str().to_string());
        }
    }
}

async fn connect(url: &str) -> Socket {
    let (socket, _) = connect_async(url).await.expect("ws connect");
    socket
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("frame ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

async fn observer(relay: &Relay) -> Socket {
    let mut socket = connect(&format!("{}/ws", relay.ws)).await;
    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    socket
}

#[tokio::test]
async fn observer_gets_welcome_then_http_control_broadcast() {
    let relay = start(None).await;
    let mut socket = connect(&format!("{}/ws", relay.ws)).await;

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["payload"]["ts"].is_i64());

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/control", relay.http))
        .json(&json!({"device_id": "esp1", "command": {"cmd": "reboot"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["status"], "queued");

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "control.queued");
    assert_eq!(event["payload"]["device_id"], "esp1");
    assert_eq!(event["payload"]["id"], resp["id"]);

    let polled: Value = reqwest::get(format!("{}/esp/commands?device_id=esp1", relay.http))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(polled["empty"], false);

    let sent = next_json(&mut socket).await;
    assert_eq!(sent["type"], "control.sent");
    assert_eq!(sent["payload"]["id"], resp["id"]);
}

#[tokio::test]
async fn websocket_control_is_acked_and_broadcast() {
    let relay = start(None).await;
    let mut sender = observer(&relay).await;
    let mut watcher = observer(&relay).await;

    sender
        .send(Message::Text(
            json!({"action": "control", "device_id": "esp1", "command": {"cmd": "led"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let first = next_json(&mut sender).await;
    let second = next_json(&mut sender).await;
    let (ack, broadcast) = if first["payload"].get("command").is_some() {
        (second, first)
    } else {
        (first, second)
    };
    assert_eq!(ack["type"], "control.queued");
    assert!(ack["payload"].get("command").is_none());
    assert_eq!(broadcast["payload"]["command"]["cmd"], "led");
    assert_eq!(ack["payload"]["id"], broadcast["payload"]["id"]);

    let seen = next_json(&mut watcher).await;
    assert_eq!(seen["type"], "control.queued");
    assert!(relay.state.session.has_command());
}

#[tokio::test]
async fn malformed_websocket_input_keeps_socket_open() {
    let relay = start(None).await;
    let mut socket = observer(&relay).await;

    socket.send(Message::Text("garbage".into())).await.unwrap();
    relay.state.session.record_telemetry("esp1", json!({"rssi": -50}));

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "esp.telemetry");
    assert_eq!(event["payload"]["payload"]["rssi"], -50);
}

#[tokio::test]
async fn audio_stream_is_written_indexed_and_served() {
    let relay = start(None).await;
    relay.state.session.bind_or_validate("esp1");
    let mut watcher = observer(&relay).await;

    let mut audio = connect(&format!("{}/data/audio", relay.ws)).await;
    audio.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    audio.send(Message::Text("ignored".into())).await.unwrap();
    audio.send(Message::Binary(vec![4u8, 5].into())).await.unwrap();
    audio.close(None).await.unwrap();

    let event = next_json(&mut watcher).await;
    assert_eq!(event["type"], "esp.audio");
    assert_eq!(event["payload"]["device_id"], "esp1");
    let path = event["payload"]["path"].as_str().unwrap().to_string();
    assert!(path.starts_with("/data/esp1/audio/stream_"));
    assert_eq!(relay.state.audio.index().len(), 1);

    let bytes = reqwest::get(format!("{}{path}", relay.http))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&bytes[..], &[1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn multipart_upload_is_announced() {
    let relay = start(None).await;
    let mut watcher = observer(&relay).await;

    let form = reqwest::multipart::Form::new()
        .text("device_id", "esp7")
        .part("file", reqwest::multipart::Part::bytes(vec![9u8; 64]).file_name("clip.raw"));
    let resp = reqwest::Client::new()
        .post(format!("{}/esp/upload", relay.http))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["filename"].as_str().unwrap().starts_with("upload_"));

    let event = next_json(&mut watcher).await;
    assert_eq!(event["type"], "esp.audio");
    assert_eq!(event["payload"]["device_id"], "esp7");
    assert_eq!(event["payload"]["filename"], body["filename"]);
}

#[tokio::test]
async fn telemetry_without_credentials_is_rejected() {
    let relay = start(Some("s3cret")).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/esp/telemetry", relay.http))
        .json(&json!({"device_id": "esp1", "temp": 20}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(relay.state.session.current_device().is_none());

    let resp = reqwest::Client::new()
        .post(format!("{}/esp/telemetry?key=s3cret", relay.http))
        .json(&json!({"device_id": "esp1", "temp": 20}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(relay.state.session.current_device().as_deref(), Some("esp1"));
}

#[tokio::test]
async fn status_counts_connected_observers() {
    let relay = start(None).await;
    let _socket = observer(&relay).await;

    let status: Value = reqwest::get(format!("{}/status", relay.http))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["ws_clients"], 1);
    assert_eq!(status["hasCommand"], false);
}

#[tokio::test]
async fn shutdown_closes_observers_with_going_away() {
    let relay = start(None).await;
    let mut socket = observer(&relay).await;

    relay.token.cancel();

    let (code, reason) = next_close(&mut socket).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Server shutting down");

    let result = tokio::time::timeout(Duration::from_secs(5), relay.handle)
        .await
        .expect("serve returns")
        .expect("task joins");
    assert!(result.is_ok());
}

#[tokio::test]
async fn unwritable_data_dir_closes_audio_socket_with_1011() {
    let not_a_dir = tempfile::NamedTempFile::new().expect("tmp file");
    let config = local_config(not_a_dir.path(), None);
    let relay = launch(config, Box::new(not_a_dir)).await;

    let mut audio = connect(&format!("{}/data/audio", relay.ws)).await;
    let (code, reason) = next_close(&mut audio).await;
    assert_eq!(code, 1011);
    assert_eq!(reason, "server-error");
    assert!(relay.state.audio.index().is_empty());
    assert_eq!(relay.state.audio.open_streams(), 0);
}

#[tokio::test]
async fn shutdown_finalizes_open_audio_stream_before_closing() {
    let relay = start(None).await;
    relay.state.session.bind_or_validate("esp1");

    let mut audio = connect(&format!("{}/data/audio", relay.ws)).await;
    audio.send(Message::Binary(vec![7u8; 16].into())).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while relay.state.audio.open_streams() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "stream never opened");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    relay.token.cancel();

    let (code, reason) = next_close(&mut audio).await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Server shutting down");
    // The artifact is recorded before the close frame goes out.
    let artifact = relay.state.audio.index().latest().expect("stream indexed");
    assert_eq!(artifact.device_id, "esp1");
    assert!(artifact.filename.starts_with("stream_"));
    assert_eq!(relay.state.audio.open_streams(), 0);

    let on_disk = relay.state.audio.store().audio_dir("esp1").join(&artifact.filename);
    assert!(on_disk.is_file());
}

#[tokio::test]
async fn https_listener_serves_router_and_plaintext_redirects_chrome() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let config = GatewayConfig {
        tls: Some(TlsPaths {
            cert: fixture("localhost.pem"),
            key: fixture("localhost-key.pem"),
        }),
        ..local_config(dir.path(), None)
    };
    let relay = launch(config, Box::new(dir)).await;
    let https = relay.https.clone().expect("HTTPS enabled with fixture certificate");

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client.get(format!("{https}/status")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["hasCommand"], false);

    let resp = client
        .get(format!("{}/status", relay.http))
        .header("user-agent", "Mozilla/5.0 AppleWebKit/537.36 Chrome/126.0 Safari/537.36")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    let port = https.rsplit(':').next().unwrap();
    assert_eq!(
        resp.headers()["location"].to_str().unwrap(),
        format!("https://127.0.0.1:{port}/status")
    );

    let resp = client.get(format!("{}/status", relay.http)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}
