//! Notifilter server.
//!
//! ## Configuration
//!
//! - `NOTIFILTER_CONFIG`: path to the TOML config (default: `config/notifilter.toml`)
//! - `RUST_LOG`: logging level (default: "info")
//!
//! A `.env` file in the working directory is loaded first.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use notifilter::admin::{self, AdminState};
use notifilter::config::NotifilterConfig;
use notifilter::ingest::{self, UdpListener};
use notifilter::pipeline::{Metrics, Pipeline};
use notifilter::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NotifilterConfig::load()?;

    // Persistence must be reachable before any event is accepted.
    let store = config.build_store()?;
    let stored = store.count().await.map_err(|e| {
        error!(error = %e, "Event store unreachable at startup");
        e
    })?;
    info!(stored_events = stored, "Event store ready");

    let search = config.build_search_index();
    if let Some((index, name)) = &search {
        match index.count(name).await {
            Ok(count) => info!(index = %name, indexed_events = count, "Search index ready"),
            Err(e) => warn!(index = %name, error = %e, "Search index unreachable, continuing"),
        }
    }

    let registry = Arc::new(config.build_registry());
    let dispatcher = Arc::new(config.build_dispatcher());
    let metrics = Arc::new(Metrics::new());

    let mut pipeline = Pipeline::new(store.clone(), registry.clone(), dispatcher.clone())
        .with_metrics(metrics.clone());
    if let Some((index, name)) = &search {
        pipeline = pipeline.with_search_index(index.clone(), name.clone());
    }
    let pipeline = Arc::new(pipeline);

    let shutdown = ShutdownSignal::with_timeout(config.shutdown_timeout());

    // Ingestion
    let listener = UdpListener::bind(&config.listener.bind, config.listener.max_packet_size)
        .await
        .map_err(|e| {
            error!(addr = %config.listener.bind, error = %e, "Failed to bind UDP listener");
            e
        })?;
    let (queue_tx, queue_rx) = mpsc::channel(config.listener.queue_capacity);
    let listener_handle = listener.spawn(queue_tx, metrics.clone(), &shutdown);
    let worker_handle = tokio::spawn(ingest::run_worker(pipeline, queue_rx));

    // Admin surface
    if config.admin.api_key.is_none() {
        warn!("admin.api_key not set, write routes are unauthenticated");
    }
    let app = admin::router(Arc::new(AdminState {
        registry: registry.clone(),
        dispatcher,
        store,
        search,
        metrics,
        api_key: config.admin.api_key.clone(),
    }));
    let admin_listener = tokio::net::TcpListener::bind(&config.admin.bind).await?;
    info!(addr = %config.admin.bind, "Admin API listening");

    let mut admin_shutdown = shutdown.subscribe();
    let admin_handle = tokio::spawn(async move {
        let result = axum::serve(admin_listener, app)
            .with_graceful_shutdown(async move {
                let _ = admin_shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Admin server failed");
        }
    });

    info!(
        udp = %config.listener.bind,
        notifiers = registry.len(),
        "Notifilter started"
    );

    shutdown.wait().await;

    // The listener drops its queue sender on exit, which lets the worker
    // drain the remaining datagrams and finish.
    let drain = async {
        let _ = listener_handle.await;
        let _ = worker_handle.await;
        let _ = admin_handle.await;
    };

    if tokio::time::timeout(shutdown.timeout(), drain).await.is_err() {
        warn!(
            timeout_secs = shutdown.timeout().as_secs(),
            "Shutdown timeout reached, abandoning queued events"
        );
    }

    info!("Notifilter stopped");
    Ok(())
}
