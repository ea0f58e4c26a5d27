use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

use docpipe_service::api;
use docpipe_service::collaborators::{HttpClassifier, HttpStructuralParser};
use docpipe_service::config::load_config;
use docpipe_service::db::Database;
use docpipe_service::service::PipelineService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting docpipe service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(load_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;
    std::fs::create_dir_all(config.storage.blob_dir())?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, /metrics will be empty");
            None
        }
    };

    let parser = Arc::new(HttpStructuralParser::new(config.parser.clone())?);
    let classifier = Arc::new(HttpClassifier::new(config.classifier.clone())?);
    let service = Arc::new(PipelineService::new(
        config.clone(),
        db,
        parser,
        classifier,
    ));

    // Recovers tasks orphaned by a previous crash before workers start claiming
    let sweeper = PipelineService::start_stale_task_sweeper(service.clone());
    let workers = PipelineService::start_workers(service.clone());

    let app = api::router(service.clone(), metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down workers");
    service.shutdown();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker ended abnormally");
        }
    }
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Stale task sweeper ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docpipe_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
