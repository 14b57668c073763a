//! jsbox-daemon - keeps one sandbox instance booted and runs scripts in it
//!
//! Clients speak the length-prefixed msgpack protocol from
//! `jsbox_core::protocol` over a Unix socket. Booting is paid once; every
//! execute request reuses the shared instance unless it asks for a fresh one.

use anyhow::Result;
use clap::Parser;
use jsbox_core::{LocalRuntime, Runner, SandboxContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "jsbox-daemon")]
#[command(author, version, about = "Shared sandbox instance daemon")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path (overrides config and JSBOX_SOCKET)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Boot the shared instance before accepting connections
    #[arg(long)]
    preboot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jsbox=info".parse()?))
        .init();

    let args = Args::parse();
    tracing::info!("jsbox-daemon starting");

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    tracing::info!(
        socket = ?config.socket_path,
        interpreter = %config.runner.interpreter,
        timeout = ?config.runner.timeout,
        "configuration loaded"
    );

    let runtime = Arc::new(LocalRuntime::new(config.runtime.clone()));
    let context = Arc::new(SandboxContext::new(runtime.clone()));
    let runner = Runner::new(runtime, config.runner.clone());

    if args.preboot {
        let instance = context.get_or_create().await?;
        tracing::info!(instance = %instance.id(), "shared instance prebooted");
    }

    // Create socket directory if needed
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove a stale socket from a previous run
    let _ = std::fs::remove_file(&config.socket_path);

    let listener = UnixListener::bind(&config.socket_path)?;
    tracing::info!(socket = ?config.socket_path, "listening");

    server::run(listener, server::Daemon::new(context, runner), &config.socket_path).await
}
