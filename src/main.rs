use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use files_stash::{
    config::Config,
    create_router,
    db::{self, SqliteMetadataStore},
    files::{run_sweeper, FileService, LinkSigner},
    storage::DiskBlobStore,
    utils::init_logger,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    let _log_guard = init_logger();
    info!(server = ?config.server, files = ?config.files, "Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;

    // Run migrations
    info!("Running database migrations...");
    let metadata = SqliteMetadataStore::new(pool.clone());
    metadata
        .migrate()
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    tokio::fs::create_dir_all(&config.storage.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory {}",
                config.storage.data_dir.display()
            )
        })?;
    let blobs = DiskBlobStore::new(&config.storage.data_dir).with_max_size(config.files.max_size);
    let signer = LinkSigner::new(config.auth.hmac_key.as_bytes())?;

    let files = FileService::new(
        Arc::new(blobs),
        Arc::new(metadata),
        signer,
        config.files.ttl(),
    );

    if let Some(period) = config.files.sweep_interval() {
        tokio::spawn(run_sweeper(files.clone(), period));
    }

    // Create shared state
    let state = AppState {
        files,
        pool,
        config: config.clone(),
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
