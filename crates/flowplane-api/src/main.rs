//! Flowplane CLI and REST API entry point.
//!
//! Binary name: `fpl`
//!
//! `fpl serve` wires the SQLite store, run queue, worker pool, sweeper, and
//! REST API into one process. `fpl validate` checks a workflow document
//! structurally without touching the database.

mod cli;
mod http;
mod state;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flowplane_infra::worker::{spawn_sweeper, spawn_workers};
use flowplane_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file, json } => {
            let valid = cli::validate_file(&file, json).await?;
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve { otel } => serve(otel).await,
    }
}

async fn serve(enable_otel: bool) -> anyhow::Result<()> {
    init_tracing(enable_otel).map_err(|e| anyhow::anyhow!("{e}"))?;

    let data_dir = flowplane_infra::config::data_dir();
    let config = flowplane_infra::config::load_global_config(&data_dir).await;
    let (app_state, consumer) = AppState::init(&data_dir, config).await?;
    let config = Arc::clone(&app_state.config);

    let cancel = CancellationToken::new();
    let workers = spawn_workers(
        Arc::clone(&app_state.engine),
        consumer,
        config.worker_count,
        cancel.clone(),
    );
    let sweeper = spawn_sweeper(
        Arc::clone(&app_state.sweeper),
        config.sweep_interval_secs,
        cancel.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        workers = config.worker_count,
        data_dir = %data_dir.display(),
        "flowplane listening"
    );

    let router = http::router::build_router(app_state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: stop workers and sweeper after the listener closes.
    cancel.cancel();
    for handle in workers {
        let _ = handle.await;
    }
    let _ = sweeper.await;
    shutdown_tracing();

    info!("flowplane stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
