//! switchd — the Switchyard daemon.
//!
//! Single binary that assembles the controller:
//! - State store (redb)
//! - Probe executor + health tracker
//! - Traffic admission + blue/green switch
//! - Rollout engine (driven through the external instance manager)
//! - Operator REST API
//!
//! # Usage
//!
//! ```text
//! switchd run --config switchyard.toml --port 8787 --data-dir /var/lib/switchyard
//! ```

mod config;
mod controller;
mod manager;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::info;

use switchyard_api::ApiState;
use switchyard_rollout::{RetryPolicy, RolloutEngine};
use switchyard_state::StateStore;
use switchyard_traffic::{AdmissionIndex, TrafficController};

use crate::config::DaemonConfig;
use crate::controller::Controller;
use crate::manager::HttpInstanceManager;

#[derive(Parser)]
#[command(name = "switchd", about = "Switchyard daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller.
    Run {
        /// Path to the switchyard.toml config file.
        #[arg(long, default_value = "switchyard.toml")]
        config: PathBuf,

        /// Port for the operator API.
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/switchyard")]
        data_dir: PathBuf,

        /// Reconcile pass interval in seconds.
        #[arg(long, default_value = "5")]
        reconcile_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchd=debug,switchyard=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            reconcile_interval,
        } => run(config, port, data_dir, reconcile_interval).await,
    }
}

async fn run(
    config_path: PathBuf,
    port: u16,
    data_dir: PathBuf,
    reconcile_interval: u64,
) -> anyhow::Result<()> {
    info!("Switchyard daemon starting");

    let config = DaemonConfig::from_file(&config_path)?;

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("switchyard.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let instance_manager = Arc::new(HttpInstanceManager::new(&config.manager.url));
    info!(url = %config.manager.url, "instance manager client initialized");

    let engine = Arc::new(RolloutEngine::new(
        state.clone(),
        instance_manager.clone(),
        RetryPolicy {
            max_retries: config.manager.max_retries.unwrap_or(3),
            ..RetryPolicy::default()
        },
    ));

    let traffic = TrafficController::new(state.clone(), AdmissionIndex::new());

    let (reports_tx, reports_rx) = mpsc::channel(256);
    let events = mpsc::channel(256);

    let mut controller = Controller::new(
        state.clone(),
        reports_tx,
        events,
        traffic.clone(),
        engine.clone(),
        instance_manager,
        Duration::from_secs(reconcile_interval),
    );
    controller.bootstrap(&config).await?;
    info!(services = config.services.len(), "controller bootstrapped");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start the control loop ─────────────────────────────────

    let controller_handle = tokio::spawn(async move {
        controller.run(reports_rx, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = switchyard_api::build_router(ApiState {
        store: state,
        engine,
        traffic,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = controller_handle.await;

    info!("Switchyard daemon stopped");
    Ok(())
}
