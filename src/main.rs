use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wren::analytics::{geoip, Clock, IngestService, RetentionTask, SaltRotator, SystemClock};
use wren::api::{create_router, AppState};
use wren::config::Config;
use wren::storage::{self, CachedStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let backend = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.site_max_entries,
        Duration::from_secs(config.cache.site_ttl_secs),
        Duration::from_secs(config.cache.site_miss_ttl_secs),
    ));

    let geo = geoip::from_config(config.analytics.geoip_city_db_path.as_deref())?;
    match config.analytics.geoip_city_db_path.as_deref() {
        Some(path) => info!("GeoIP enabled with database: {}", path),
        None => info!("GeoIP disabled, locations will be reported as Unknown"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let salts = Arc::new(SaltRotator::new(config.analytics.salt_retention_days));
    let ingest = Arc::new(
        IngestService::new(
            Arc::clone(&storage),
            geo,
            Arc::clone(&salts),
            &config.analytics,
        )
        .with_clock(Arc::clone(&clock)),
    );

    let retention = RetentionTask::spawn(
        Arc::clone(&storage),
        salts,
        Arc::clone(&clock),
        config.analytics.purge_interval_secs,
    );

    let state = Arc::new(AppState {
        storage,
        ingest,
        clock,
        analytics: config.analytics.clone(),
        dashboard: config.dashboard.clone(),
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Wren listening on http://{}", addr);
    info!("   - Beacons accepted at http://{}/api/event", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    retention.shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
