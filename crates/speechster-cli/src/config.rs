//! Relay configuration – an optional `speechster.toml` plus environment
//! overrides.
//!
//! | TOML key | Env var | Default |
//! |---|---|---|
//! | `bind_host` | `SPEECHSTER_BIND` | `0.0.0.0` |
//! | `http_port` | `HTTP_PORT` | `8080` |
//! | `https_port` | `HTTPS_PORT` | `8443` |
//! | `data_dir` | `DATA_DIR` | `data` |
//! | `api_key` | `SPEECHSTER_API_KEY` | empty (gate off) |
//! | `tls_cert` | `SPEECHSTER_TLS_CERT` | `certs/localhost+3.pem` |
//! | `tls_key` | `SPEECHSTER_TLS_KEY` | `certs/localhost+3-key.pem` |
//! | `sidecar` | `SPEECHSTER_SIDECAR` | empty (no sidecar) |
//!
//! The file itself is located through `SPEECHSTER_CONFIG`.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use speechster_gateway::{GatewayConfig, TlsPaths};
use speechster_types::RelayError;

pub const CONFIG_ENV: &str = "SPEECHSTER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "speechster.toml";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_host: String,
    pub http_port: u16,
    pub https_port: u16,
    pub data_dir: PathBuf,
    pub api_key: String,
    /// Empty disables HTTPS.
    pub tls_cert: String,
    pub tls_key: String,
    /// Inference command line, e.g. `python3 ai_stream.py`.
    pub sidecar: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let tls = TlsPaths::default();
        Self {
            bind_host: "0.0.0.0".to_string(),
            http_port: 8080,
            https_port: 8443,
            data_dir: PathBuf::from("data"),
            api_key: String::new(),
            tls_cert: tls.cert.to_string_lossy().into_owned(),
            tls_key: tls.key.to_string_lossy().into_owned(),
            sidecar: String::new(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_host", &self.bind_host)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("data_dir", &self.data_dir)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("sidecar", &self.sidecar)
            .finish()
    }
}

impl RelayConfig {
    /// Settings for the gateway, with the bind host parsed.
    pub fn gateway_config(&self) -> Result<GatewayConfig, RelayError> {
        let bind_host: IpAddr = self.bind_host.parse().map_err(|e| {
            RelayError::Config(format!("invalid bind_host `{}`: {e}", self.bind_host))
        })?;

        let tls = (!self.tls_cert.is_empty() && !self.tls_key.is_empty()).then(|| TlsPaths {
            cert: PathBuf::from(&self.tls_cert),
            key: PathBuf::from(&self.tls_key),
        });

        Ok(GatewayConfig {
            bind_host,
            http_port: self.http_port,
            https_port: self.https_port,
            data_dir: self.data_dir.clone(),
            api_key: (!self.api_key.is_empty()).then(|| self.api_key.clone()),
            tls,
        })
    }

    pub fn sidecar_command(&self) -> Option<&str> {
        let cmd = self.sidecar.trim();
        (!cmd.is_empty()).then_some(cmd)
    }
}

/// Path of the config file: `$SPEECHSTER_CONFIG` or `./speechster.toml`.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config file (if any) and apply environment overrides.
pub fn load() -> Result<RelayConfig, RelayError> {
    let mut cfg = load_from(&config_path())?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse `path`; a missing file yields the defaults.
pub(crate) fn load_from(path: &Path) -> Result<RelayConfig, RelayError> {
    if !path.exists() {
        return Ok(RelayConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {e}", path.display())))
}

pub fn apply_env_overrides(cfg: &mut RelayConfig) {
    apply_overrides_with(cfg, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Unparsable ports are ignored.
pub(crate) fn apply_overrides_with(cfg: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SPEECHSTER_BIND") {
        cfg.bind_host = v;
    }
    if let Some(v) = lookup("HTTP_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.http_port = port;
    }
    if let Some(v) = lookup("HTTPS_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.https_port = port;
    }
    if let Some(v) = lookup("DATA_DIR") {
        cfg.data_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SPEECHSTER_API_KEY") {
        cfg.api_key = v;
    }
    if let Some(v) = lookup("SPEECHSTER_TLS_CERT") {
        cfg.tls_cert = v;
    }
    if let Some(v) = lookup("SPEECHSTER_TLS_KEY") {
        cfg.tls_key = v;
    }
    if let Some(v) = lookup("SPEECHSTER_SIDECAR") {
        cfg.sidecar = v;
    }
}
