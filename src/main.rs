//! depot — versioned object-store service with pluggable blob backends.

use axum::routing::get;
use axum::Router;
use clap::Parser;
use depot::api::handlers::{
    create_bucket, delete_bucket, delete_object, get_bucket, get_object, head_bucket, head_object,
    health_check, list_buckets, metrics_handler, post_object, put_object, AppState,
};
use depot::api::AllowAll;
use depot::config::Config;
use depot::db::Database;
use depot::metrics::Metrics;
use depot::models::Location;
use depot::storage::{StorageFactory, StorageRegistry};
use depot::tasks::{self, TaskContext, TaskQueue};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.3.2 (built 2026-08-01T10:00:00Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("DEPOT_BUILD_TIME"),
        )
    })
}

/// depot — versioned object-store service
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing.
    // Priority: RUST_LOG > DEPOT_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("DEPOT_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("depot=trace,tower_http=trace")
            } else {
                EnvFilter::new("depot=info,tower_http=info")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    config.validate()?;

    info!(
        "Starting depot v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("DEPOT_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Catalog: {:?}", config.db_path);
    info!("  Digest algorithm: {}", config.checksum_algorithm.name());
    if config.locations.is_empty() {
        warn!("  No storage locations configured; uploads will fail until one exists");
    }
    for location in &config.locations {
        info!(
            "  Location {:?}: {} ({}{})",
            location.name,
            location.uri,
            location.storage_backend,
            if location.default { ", default" } else { "" }
        );
    }

    // Open the catalog and seed configured locations.
    let db = Database::open(&config.db_path)?;
    {
        let locations = config.locations.clone();
        for location in &locations {
            // Filesystem roots must exist before the first save.
            std::fs::create_dir_all(&location.uri)?;
        }
        db.call(move |conn| Location::seed(conn, &locations)).await?;
    }

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    let registry = StorageRegistry::builtin(config.checksum_algorithm);
    let factory = Arc::new(StorageFactory::new(
        registry,
        config.storage_path_dimensions,
        config.storage_path_split_length,
    ));

    // Background worker pool and periodic sweeps.
    let (queue, task_rx) = TaskQueue::new();
    let task_ctx = Arc::new(TaskContext::new(
        db.clone(),
        config.clone(),
        factory.clone(),
        metrics.clone(),
        queue.clone(),
    ));
    tasks::start_workers(task_ctx.clone(), task_rx, config.task_workers);
    tasks::spawn_periodic(task_ctx);

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        factory,
        tasks: queue,
        metrics: metrics.clone(),
        oracle: Arc::new(AllowAll),
    });

    // REST surface:
    //   POST   /files                      - create bucket
    //   GET    /files                      - list buckets
    //   HEAD   /files/{bucket}             - existence check
    //   GET    /files/{bucket}[?versions|?uploads]
    //   DELETE /files/{bucket}             - soft delete
    //   PUT    /files/{bucket}/{key}       - upload (or part with ?uploadId)
    //   GET    /files/{bucket}/{key}       - download (or parts with ?uploadId)
    //   POST   /files/{bucket}/{key}       - multipart initiate/complete
    //   DELETE /files/{bucket}/{key}       - delete marker / version / abort
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/files", get(list_buckets).post(create_bucket))
        .route(
            "/files/:bucket",
            get(get_bucket).head(head_bucket).delete(delete_bucket),
        )
        .route(
            "/files/:bucket/*key",
            get(get_object)
                .put(put_object)
                .post(post_object)
                .delete(delete_object)
                .head(head_object),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            depot::metrics::http_metrics_middleware,
        ))
        .with_state(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("depot listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
