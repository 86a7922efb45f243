//! LoRa application server.
//!
//! Usage:
//!
//!   lora-app-server [OPTIONS]
//!
//! Two listeners:
//!
//!   --bind        internal ApplicationServer api for the network server
//!                 (plaintext, TLS or mutual TLS)
//!   --http-bind   public api: gRPC, REST under /api, static files (TLS)
//!
//! Every flag has an environment fallback; `--config` loads a JSON file
//! underneath them. Run with `--help` for the full list.
//!
//! The server runs until interrupted (SIGINT/SIGTERM). A second signal
//! during teardown stops it immediately.

mod config;
mod lifecycle;
mod shutdown;

use clap::Parser;

use loraapp_types::Result;

use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = config::CliArgs::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("lora app server failed to start: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Server main logic
// ---------------------------------------------------------------------------

async fn run(cli: config::CliArgs) -> Result<()> {
    let config = config::resolve(cli)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        rpc_bind = %config.rpc.bind,
        http_bind = %config.http.bind,
        "starting lora app server"
    );

    let mut coordinator = ShutdownCoordinator::from_os_signals()?;
    let running = lifecycle::start(&config, coordinator.subscribe()).await?;
    tracing::info!(
        rpc_addr = %running.rpc_addr,
        http_addr = %running.http_addr,
        "lora app server started"
    );

    coordinator.await_termination().await;

    match coordinator.initiate_shutdown(running.into_tasks()).await {
        ShutdownOutcome::Graceful => tracing::info!("lora app server stopped"),
        ShutdownOutcome::Immediate => tracing::info!("lora app server stopped immediately"),
    }
    Ok(())
}
