//! Ciphera relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Loopback on the default port
//! ciphera-relay
//!
//! # Public bind with verbose access logs
//! ciphera-relay --bind 0.0.0.0:8080 --log-level debug
//! ```

use std::net::SocketAddr;

use ciphera_relay::{routes, RelayState};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ciphera store-and-forward relay
#[derive(Parser, Debug)]
#[command(name = "ciphera-relay")]
#[command(about = "Untrusted store-and-forward relay for Ciphera")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Ciphera relay starting");

    let state = RelayState::new();
    let (addr, server) = warp::serve(routes(state)).bind_with_graceful_shutdown(
        args.bind,
        async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        },
    );

    tracing::info!("relay listening on {addr}");
    server.await;
}
