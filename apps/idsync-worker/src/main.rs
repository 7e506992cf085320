//! idsync worker
//!
//! Claims queued worker tasks and runs their import, synchronisation and
//! export run profiles until it receives Ctrl+C or SIGTERM.

mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use idsync_connector::prelude::MemoryConnectorFactory;
use idsync_connector::ConnectorRegistry;
use idsync_db::{MemoryStore, SyncStore};
use idsync_sync::{
    ExpressionEngine, ExpressionEngineConfig, RunProfileExecutor, SyncConfig, SyncWorker,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    let config = match SyncConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log_filter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        concurrency = config.worker_concurrency,
        poll_interval_ms = config.poll_interval_ms,
        "Starting idsync worker"
    );

    let mut registry = ConnectorRegistry::new();
    MemoryConnectorFactory::new().register(&mut registry);
    info!(connector_types = ?registry.connector_types(), "Connectors registered");

    let store: Arc<dyn SyncStore> = Arc::new(MemoryStore::new());
    let expressions = Arc::new(ExpressionEngine::with_config(ExpressionEngineConfig {
        max_operations: config.expression_max_operations,
        ..ExpressionEngineConfig::default()
    }));
    let executor = Arc::new(RunProfileExecutor::new(
        store.clone(),
        Arc::new(registry),
        expressions,
        config.clone(),
    ));

    let worker = SyncWorker::new(store, executor, WorkerConfig::from(&config));
    let shutdown = worker.shutdown_handle();
    tokio::spawn(shutdown_signal(shutdown));

    worker.run().await;
    info!("idsync worker stopped");
}

/// Set the worker's shutdown flag on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
}
