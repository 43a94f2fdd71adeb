//! gridpoold — the GridPool daemon.
//!
//! Single binary that assembles the grid provisioning service:
//! - Compute backend client (REST)
//! - Reservation ledger
//! - Pool service (search, provisioning, acquisition, release)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gridpoold serve --config gridpool.toml --port 8080
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use gridpool_acquire::{GridPool, InMemoryReservations};
use gridpool_compute::{RandomSource, RestCompute};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "gridpoold", about = "GridPool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the provisioning service.
    Serve {
        /// Path to the configuration file.
        #[arg(long, default_value = "gridpool.toml")]
        config: PathBuf,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridpoold=debug,gridpool=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, port } => serve(config, port).await,
    }
}

async fn serve(config_path: PathBuf, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("GridPool daemon starting");

    let settings = Settings::from_file(&config_path)?;
    info!(path = ?config_path, zones = settings.pool.zones.len(), "configuration loaded");

    // ── Assemble the pool service ──────────────────────────────

    let backend = RestCompute::new(
        &settings.backend.base_url,
        &settings.backend.project,
        settings.backend_token(),
    )?;
    info!(
        base_url = %settings.backend.base_url,
        project = %settings.backend.project,
        "compute backend client ready"
    );

    let pool = GridPool::new(
        Arc::new(backend),
        Arc::new(InMemoryReservations::new()),
        RandomSource::new(),
        settings.retry_policy(),
        settings.search_settings(),
        settings.provision_settings(),
        settings.acquire_settings(),
    );
    info!("pool service initialized");

    // ── Start the API server ───────────────────────────────────

    let router = gridpool_api::build_router(pool);
    let port = port_override.unwrap_or(settings.server.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("GridPool daemon stopped");
    Ok(())
}
