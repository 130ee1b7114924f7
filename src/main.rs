use anyhow::{Context, Result};
use axum::Router;
use services::{
    fs_backend::FsBackend, gc::GarbageCollector, metadata_store::MetadataStore,
    object_backend::ObjectBackend, storage_service::StorageService,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting rgw-gateway with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {parent:?}"))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{db_url}`"))?
        .create_if_missing(true)
        .foreign_keys(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await
            .with_context(|| format!("connecting to {db_url}"))?,
    );
    let store = MetadataStore::new(db);

    let applied = store.migrate().await.context("applying schema")?;
    tracing::debug!("Schema up to date ({} statements)", applied);
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Backend pools: provision at bootstrap, then refuse to start without them ---
    let backend = FsBackend::new(&cfg.storage_dir);
    backend
        .provision()
        .await
        .with_context(|| format!("provisioning pools under {}", cfg.storage_dir))?;
    backend
        .check_pools()
        .await
        .context("backend pools unavailable")?;

    // --- Core services ---
    let storage = StorageService::new(store, Arc::new(backend))
        .with_max_object_bytes(cfg.max_body_bytes);
    let app_state = state::AppState::new(storage.clone());

    let shutdown = CancellationToken::new();
    let gc = GarbageCollector::new(app_state.multipart.clone(), storage, cfg.upload_ttl())
        .with_blob_grace(cfg.blob_grace())
        .spawn(cfg.gc_interval(), shutdown.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.body_limit()).with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(err) = gc.await {
        tracing::warn!(error = %err, "garbage collector task ended abnormally");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
