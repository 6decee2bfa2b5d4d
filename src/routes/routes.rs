//! Defines routes for the file API.
//!
//! ## Structure
//! - **Probes** (unauthenticated)
//!   - `GET    /healthz`
//!   - `GET    /readyz`
//!
//! - **File endpoints** under `/api/v1/Arquivos` (bearer token required)
//!   - `POST   /Carregar`          — multipart upload
//!   - `GET    /Download/{*nome}`  — download by key
//!   - `DELETE /Apagar/{*nome}`    — idempotent delete
//!   - `GET    /Listar`            — list the container
//!
//! - **Blob addresses** (bearer token required)
//!   - `GET    /blobs/{container}/{*nome}` — the `Uri` returned by uploads
//!     and listings
//!
//! The wildcard `*nome` accepts nested keys like `Amauri/Images/photo.jpg`
//! as well as the percent-encoded `Amauri%2FImages%2Fphoto.jpg`.

use crate::{
    auth::require_bearer,
    handlers::{
        file_handlers::{delete_file, download_file, list_files, read_blob, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub const API_PREFIX: &str = "/api/v1/Arquivos";

/// Mount point of the blob addresses; the default `BlobEndpoint` ends here.
pub const BLOB_PREFIX: &str = "/blobs";

/// Build the full application router with its shared state attached.
pub fn routes(state: AppState) -> Router {
    let files = Router::new()
        .route(
            "/Carregar",
            post(upload_file).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/Download/{*nome}", get(download_file))
        .route("/Apagar/{*nome}", delete(delete_file))
        .route("/Listar", get(list_files))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_bearer,
        ));

    let blobs = Router::new()
        .route("/{container}/{*nome}", get(read_blob))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest(API_PREFIX, files)
        .nest(BLOB_PREFIX, blobs)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
