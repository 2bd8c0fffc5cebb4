//! overlay-transportd - managed transport demonstration daemon
//!
//! Wires a managed transport pair in-process and exchanges a packet each
//! way, exercising the full handshake and settlement path without a real
//! socket or discovery service.

use clap::Parser;
use overlay_transportd::config::Config;
use overlay_transportd::server::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("overlay_transportd=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "overlay-transportd v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    match Server::new(config) {
        Ok(server) => {
            if let Err(e) = server.run().await {
                error!("server error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            error!("failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
