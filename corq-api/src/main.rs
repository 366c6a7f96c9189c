//! API process (corq-api) - Main entry point
//!
//! Serves the HTTP query endpoints and dispatches the underlying work to
//! the worker pool over the message bus.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corq_api::api::{self, AppState};
use corq_api::qgen::VerbSubjectQGen;
use corq_api::{CollDatabase, Dispatcher, FileCache, PartitionSet, ReorderCalculator};
use corq_common::config::Config;

const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

/// Command-line arguments for corq-api
#[derive(Parser, Debug)]
#[command(name = "corq-api")]
#[command(about = "Corpus query API server for CORQ")]
#[command(version)]
struct Args {
    /// Path to the CORQ configuration file
    #[arg(short, long, env = "CORQ_CONFIG")]
    config: PathBuf,

    /// Listen address override, e.g. 0.0.0.0:8787
    #[arg(short, long, env = "CORQ_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corq_api=debug,corq_common=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let conf = Config::load(&args.config).context("Failed to load configuration")?;
    let listen = args
        .listen
        .or_else(|| conf.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

    info!("Starting CORQ API server on {}", listen);

    let bus = corq_common::bus::open(&conf.bus)
        .await
        .context("Failed to attach to the message bus")?;
    let dispatcher = Arc::new(Dispatcher::new(
        bus,
        conf.bus.result_channel_prefix(),
        conf.bus.reply_timeout(),
    ));
    let partitions = Arc::new(PartitionSet::new(&conf.corpora.partitions_dir));

    let cache_conf = conf.cache.clone().unwrap_or_default();
    let cache = cache_conf.dir.as_deref().map(|dir| {
        info!("File cache enabled at {}", dir.display());
        Arc::new(FileCache::new(dir))
    });
    let coll_db = match cache_conf.coll_db.as_deref() {
        Some(path) => Some(Arc::new(
            CollDatabase::open(path)
                .await
                .context("Failed to open the collocation database")?,
        )),
        None => None,
    };

    let qgen = Arc::new(VerbSubjectQGen::new(conf.sketch.clone()));
    let reorder = Arc::new(ReorderCalculator::new(
        Arc::clone(&dispatcher),
        qgen.clone(),
        coll_db,
        conf.sketch.clone(),
    ));

    let app_state = AppState {
        dispatcher,
        partitions,
        reorder,
        qgen,
        cache,
        registry_dir: conf.corpora.registry_dir.to_string_lossy().to_string(),
        sketch: conf.sketch.clone(),
    };
    let app = api::create_router(app_state);

    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", listen))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
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
