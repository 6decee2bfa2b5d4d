use crate::{auth::AuthState, services::gateway_service::UploadGateway};
use axum::extract::FromRef;
use std::{sync::Arc, time::Duration};

/// Process-wide state, built once at startup and shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub gateway: UploadGateway,
    pub auth: Arc<AuthState>,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
}

impl FromRef<AppState> for UploadGateway {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}
