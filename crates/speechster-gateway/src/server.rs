//! [`GatewayServer`] – wires state, router and listeners together.
//!
//! Startup is split in two so a caller can tell bind failures (exit code 1)
//! apart from runtime errors:
//!
//! ```text
//!   GatewayServer::new ──► bind() ──► serve() ──► shutdown token cancelled
//!                           │                        │
//!                           └─ RelayError::Bind      └─ sockets closed 1001
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use speechster_audio::{AudioHub, AudioStore, Sidecar};
use speechster_bus::FanoutBus;
use speechster_types::RelayError;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::redirect::{self, RedirectPolicy};
use crate::state::AppState;
use crate::{audio_ws, routes, tls, ws};

/// Largest request body accepted, uploads included.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Build the full route table over `state`.
///
/// `redirect_policy` is only set for the plaintext router while HTTPS is
/// served.
pub fn build_router(state: AppState, redirect_policy: Option<RedirectPolicy>) -> Router {
    let router = Router::new()
        .route("/control", post(routes::control))
        .route("/esp/telemetry", post(routes::telemetry))
        .route("/esp/upload", post(routes::upload))
        .route("/esp/ota", post(routes::ota))
        .route("/esp/commands", get(routes::poll_commands))
        .route("/status", get(routes::status))
        .route("/ws", get(ws::upgrade))
        .route("/data/audio", get(audio_ws::upgrade))
        .route("/data/{device}/audio/{file}", get(routes::audio_file))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let router = match redirect_policy {
        Some(policy) => {
            router.layer(middleware::from_fn_with_state(policy, redirect::https_redirect))
        }
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

/// Listeners produced by [`GatewayServer::bind`].
pub struct BoundListeners {
    http: TcpListener,
    https: Option<(TcpListener, TlsAcceptor)>,
}

impl BoundListeners {
    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    /// `None` when HTTPS is disabled.
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.https.as_ref().and_then(|(l, _)| l.local_addr().ok())
    }
}

pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    /// Build the shared state. A `sidecar`, if given, receives every
    /// streamed audio frame.
    pub fn new(config: GatewayConfig, bus: Arc<FanoutBus>, sidecar: Option<Sidecar>) -> Self {
        let mut audio = AudioHub::new(AudioStore::new(&config.data_dir), Arc::clone(&bus));
        if let Some(sidecar) = sidecar {
            audio = audio.with_sidecar(sidecar);
        }
        let state = AppState::new(bus, audio, config.api_key.as_deref());
        Self { config, state }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling this token stops the listeners and closes every socket.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Bind the plaintext listener and, when usable TLS material exists,
    /// the secure one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if either port cannot be bound. Missing
    /// or unusable TLS files only disable HTTPS.
    pub async fn bind(&self) -> Result<BoundListeners, RelayError> {
        let http_addr = self.config.http_addr();
        let http = TcpListener::bind(http_addr)
            .await
            .map_err(|source| RelayError::Bind { addr: http_addr, source })?;

        let https = match self.tls_acceptor() {
            Some(acceptor) => {
                let addr = self.config.https_addr();
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| RelayError::Bind { addr, source })?;
                Some((listener, acceptor))
            }
            None => None,
        };

        Ok(BoundListeners { http, https })
    }

    fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        let paths = self.config.tls.as_ref()?;
        if !paths.present() {
            warn!(
                cert = %paths.cert.display(),
                key = %paths.key.display(),
                "TLS certificate not found, HTTPS disabled"
            );
            return None;
        }
        match tls::load_acceptor(paths) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                warn!(error = %e, "TLS material unusable, HTTPS disabled");
                None
            }
        }
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(self, listeners: BoundListeners) -> Result<(), RelayError> {
        let token = self.state.shutdown.clone();
        let redirect_policy = listeners.https_addr().map(|addr| RedirectPolicy::new(addr.port()));

        let tls_task = listeners.https.map(|(listener, acceptor)| {
            let router = build_router(self.state.clone(), None);
            tokio::spawn(tls::serve_tls(listener, acceptor, router, token.clone()))
        });

        let plain = build_router(self.state.clone(), redirect_policy);
        info!(addr = %listeners.http.local_addr()?, "HTTP listening");
        axum::serve(listeners.http, plain)
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .await?;

        if let Some(task) = tls_task {
            let _ = task.await;
        }
        info!("gateway stopped");
        Ok(())
    }
}
