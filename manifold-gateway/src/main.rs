//! # Manifold Gateway Binary
//!
//! Entry point for the gateway server.
//!
//! ```bash
//! # Default configuration file (config.toml)
//! manifold-gateway
//!
//! # Custom configuration and binding
//! manifold-gateway --config gateway.toml --host 0.0.0.0 --port 8080
//! ```
//!
//! Deployment knobs can also come from the environment (`MANIFOLD_HOST`,
//! `MANIFOLD_PORT`, `MANIFOLD_PROBE_INTERVAL`, ...); command-line flags win
//! over both the file and the environment. The server drains on Ctrl-C:
//! the listener stops accepting, then the health prober and the catalog
//! refresh loop are stopped.

use clap::Parser;
use manifold_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;

/// Command line arguments for the Manifold Gateway server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Host address to bind, overriding the configuration file.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging filter, e.g. "info" or "manifold_core=debug,info".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let (app, runtime) = create_server(config).await?;

    tracing::info!("starting manifold gateway on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}
