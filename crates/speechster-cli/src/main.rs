//! `speechster` – relay between one embedded device and its browser observers.
//!
//! 1. Loads `speechster.toml` (optional) and environment overrides.
//! 2. Starts the inference sidecar when one is configured.
//! 3. Serves the gateway on the HTTP port, and on the HTTPS port when
//!    certificates are present.
//! 4. Shuts down gracefully on SIGINT/SIGTERM or on a panic.
//!
//! Exit status is 1 when startup fails (bad config, port in use) and 0 after
//! a clean shutdown.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use speechster_audio::Sidecar;
use speechster_bus::FanoutBus;
use speechster_gateway::{BoundListeners, GatewayConfig, GatewayServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::RelayConfig;

/// Time given to close frames and file flushes before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("speechster");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration error");
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    let gateway = match cfg.gateway_config() {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "configuration error");
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    info!(config = ?cfg, "configuration loaded");

    print_banner();

    if let Err(e) = std::fs::create_dir_all(&gateway.data_dir) {
        error!(dir = %gateway.data_dir.display(), error = %e, "cannot create data directory");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cfg, gateway))
}

async fn run(cfg: RelayConfig, gateway: GatewayConfig) -> ExitCode {
    let bus = Arc::new(FanoutBus::new());
    let sidecar = cfg.sidecar_command().and_then(|cmd| {
        Sidecar::spawn(cmd, Arc::clone(&bus))
            .map_err(|e| warn!(error = %e, "continuing without inference sidecar"))
            .ok()
    });

    let server = GatewayServer::new(gateway, bus, sidecar);
    let token = server.shutdown_token();
    install_signal_handler(token.clone());
    install_panic_hook(token);

    let listeners = match server.bind().await {
        Ok(listeners) => listeners,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("{}: {e}", "Startup failed".red().bold());
            return ExitCode::FAILURE;
        }
    };
    print_endpoints(&listeners);

    if let Err(e) = server.serve(listeners).await {
        error!(error = %e, "gateway failed");
        return ExitCode::FAILURE;
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    println!("{}", "  ✓ Speechster stopped.".green());
    ExitCode::SUCCESS
}

fn install_signal_handler(token: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            return;
        }
        println!();
        println!("{}", "⚠  Signal received – shutting down …".yellow().bold());
        token.cancel();
    }) {
        warn!(error = %e, "failed to install signal handler; Ctrl-C will not shut down gracefully");
    }
}

/// A panic anywhere takes the same path as a termination signal.
fn install_panic_hook(token: CancellationToken) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        error!("panic detected, shutting down");
        token.cancel();
    }));
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                  __       __         "#.bold().cyan());
    println!("{}", r#"  / __/__  ___ ___ ____/ /  ___ / /____ ____"#.bold().cyan());
    println!("{}", r#" _\ \/ _ \/ -_) -_) __/ _ \(_-</ __/ -_) __/"#.bold().cyan());
    println!("{}", r#"/___/ .__/\__/\__/\__/_//_/___/\__/\__/_/   "#.bold().cyan());
    println!("{}", r#"   /_/                                      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Speechster relay".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}

fn print_endpoints(listeners: &BoundListeners) {
    if let Ok(addr) = listeners.http_addr() {
        println!("  HTTP   {}", format!("http://{addr}").bold());
    }
    match listeners.https_addr() {
        Some(addr) => println!("  HTTPS  {}", format!("https://{addr}").bold()),
        None => println!("  HTTPS  {}", "disabled (no certificate)".dimmed()),
    }
    println!();
}
