//! Opportunistic plaintext → HTTPS redirect for Chrome.
//!
//! Chrome refuses microphone and Bluetooth APIs on insecure origins, so when
//! the secure listener is up, Chrome page loads over plaintext are bounced to
//! the HTTPS port. WebSocket upgrades are never redirected.

use axum::extract::{Request, State};
use axum::http::header::{HOST, LOCATION, UPGRADE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Installed on the plaintext router only while HTTPS is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    https_port: u16,
}

impl RedirectPolicy {
    pub fn new(https_port: u16) -> Self {
        Self { https_port }
    }

    pub fn https_port(&self) -> u16 {
        self.https_port
    }

    /// The `Location` to send, or `None` to serve the request as is.
    pub fn target(&self, headers: &HeaderMap, uri: &Uri) -> Option<String> {
        if headers.contains_key(UPGRADE) {
            return None;
        }
        let agent = headers.get(USER_AGENT)?.to_str().ok()?;
        if !agent.contains("Chrome") {
            return None;
        }
        let host = host_without_port(headers.get(HOST)?.to_str().ok()?);
        if host.is_empty() {
            return None;
        }
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Some(format!("https://{host}:{}{path}", self.https_port))
    }
}

fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // Bracketed IPv6 literal keeps its brackets.
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or(host)
    }
}

pub async fn https_redirect(
    State(policy): State<RedirectPolicy>,
    req: Request,
    next: Next,
) -> Response {
    match policy.target(req.headers(), req.uri()) {
        Some(location) => {
            debug!(%location, "redirecting Chrome to HTTPS");
            (StatusCode::FOUND, [(LOCATION, location)]).into_response()
        }
        None => next.run(req).await,
    }
}
