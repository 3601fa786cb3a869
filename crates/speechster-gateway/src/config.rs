//! Runtime settings consumed by [`GatewayServer`](crate::GatewayServer).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// PEM certificate chain and private key for the secure listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    /// Both files exist on disk.
    pub fn present(&self) -> bool {
        self.cert.is_file() && self.key.is_file()
    }
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("certs/localhost+3.pem"),
            key: PathBuf::from("certs/localhost+3-key.pem"),
        }
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub bind_host: IpAddr,
    pub http_port: u16,
    pub https_port: u16,
    /// Root of the recorded-audio tree.
    pub data_dir: PathBuf,
    /// Shared secret for `/control` and `/esp/telemetry`. `None` leaves both open.
    pub api_key: Option<String>,
    /// `None` disables the secure listener entirely.
    pub tls: Option<TlsPaths>,
}

impl GatewayConfig {
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.http_port)
    }

    pub fn https_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.https_port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            data_dir: PathBuf::from("data"),
            api_key: None,
            tls: Some(TlsPaths::default()),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_host", &self.bind_host)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("data_dir", &self.data_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ports() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.http_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.https_addr().port(), 8443);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let cfg = GatewayConfig {
            api_key: Some("super-secret".into()),
            ..GatewayConfig::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn missing_tls_files_are_not_present() {
        let paths = TlsPaths {
            cert: PathBuf::from("/nonexistent/cert.pem"),
            key: PathBuf::from("/nonexistent/key.pem"),
        };
        assert!(!paths.present());
    }
}
