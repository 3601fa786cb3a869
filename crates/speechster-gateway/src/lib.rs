//! `speechster-gateway` – HTTP + WebSocket ingress for the relay
//!
//! Puts the device session, the observer bus and the audio sink behind one
//! axum router, served over plaintext and, when certificates are present,
//! over TLS.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /control` | enqueue a command for the device (shared key) |
//! | `POST /esp/telemetry` | device telemetry (shared key when configured) |
//! | `POST /esp/upload` | one-shot multipart audio upload |
//! | `POST /esp/ota` | OTA progress passthrough |
//! | `GET /esp/commands` | device command poll |
//! | `GET /status` | session introspection |
//! | `GET /ws` | observer channel, broadcast + `control` upstream |
//! | `GET /data/audio` | binary audio ingest channel |
//! | `GET /data/{device}/audio/{file}` | recorded audio retrieval |
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use speechster_bus::FanoutBus;
//! use speechster_gateway::{GatewayConfig, GatewayServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = GatewayServer::new(GatewayConfig::default(), Arc::new(FanoutBus::new()), None);
//!     let listeners = server.bind().await.expect("bind failed");
//!     server.serve(listeners).await.expect("gateway failed");
//! }
//! ```

pub mod audio_ws;
pub mod auth;
pub mod config;
pub mod error;
pub mod redirect;
pub mod routes;
pub mod server;
pub mod state;
pub mod tls;
pub mod ws;

pub use config::{GatewayConfig, TlsPaths};
pub use error::ApiError;
pub use redirect::RedirectPolicy;
pub use server::{BoundListeners, GatewayServer, MAX_BODY_BYTES, build_router};
pub use state::AppState;
