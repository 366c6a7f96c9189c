//! Worker process (corq-worker) - Main entry point
//!
//! Attaches to the message bus, dequeues query jobs one at a time and
//! publishes a single stored reply per job. Any number of worker
//! processes may run against the same bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use corq_common::config::Config;
use corq_worker::{TableBackend, Worker};

/// Command-line arguments for corq-worker
#[derive(Parser, Debug)]
#[command(name = "corq-worker")]
#[command(about = "Corpus query worker for CORQ")]
#[command(version)]
struct Args {
    /// Path to the CORQ configuration file
    #[arg(short, long, env = "CORQ_CONFIG")]
    config: PathBuf,

    /// Stable worker identifier; a random one is generated when omitted
    #[arg(short, long, env = "CORQ_WORKER_ID")]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corq_worker=debug,corq_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let conf = Config::load(&args.config).context("Failed to load configuration")?;
    let worker_id = args
        .worker_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!("Starting CORQ worker {}", worker_id);
    info!("Corpus registry: {}", conf.corpora.registry_dir.display());

    let bus = corq_common::bus::open(&conf.bus)
        .await
        .context("Failed to attach to the message bus")?;

    let mut worker = Worker::new(
        worker_id,
        bus,
        Arc::new(TableBackend::new()),
        conf.bus.query_channel(),
        conf.worker.tick(),
        conf.bus.result_ttl(),
        conf.worker.performance_log_dir.clone(),
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    worker
        .listen(shutdown_rx)
        .await
        .context("Worker loop failed")?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
