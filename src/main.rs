use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, BackendKind};
use services::{
    gateway_service::UploadGateway, local_store::LocalObjectStore,
    memory_store::MemoryObjectStore, object_store::ObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        backend = ?cfg.store.backend,
        container = %cfg.container,
        root_prefix = %cfg.root_prefix,
        "starting upload-gateway"
    );

    // --- Initialize the object store once for the whole process ---
    let store: Arc<dyn ObjectStore> = match cfg.store.backend {
        BackendKind::Local => {
            let local = LocalObjectStore::connect(&cfg.store, &cfg.container)
                .await
                .with_context(|| {
                    format!("opening local object store at {}", cfg.store.database_url)
                })?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(());
            }
            Arc::new(local)
        }
        BackendKind::Memory => {
            if migrate {
                tracing::warn!("--migrate has no effect on the memory backend");
                return Ok(());
            }
            Arc::new(MemoryObjectStore::new())
        }
    };

    let gateway = UploadGateway::new(
        store,
        cfg.root_prefix.clone(),
        cfg.container.clone(),
        cfg.store.blob_endpoint.clone(),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(state::AppState {
        gateway,
        auth: Arc::new(auth::AuthState::new(&cfg.jwt_secret)),
        max_upload_bytes: cfg.max_upload_bytes,
        request_timeout: cfg.request_timeout,
    });

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

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
