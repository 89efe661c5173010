use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::service::SyncTriggerResult;
use crate::sync::{SyncKind, SyncStatus};
use crate::web::{AppError, AppState};

async fn trigger_sync_handler(
    State(app_state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<SyncTriggerResult>, AppError> {
    let kind: SyncKind = kind.parse().map_err(AppError::InvalidInput)?;
    Ok(Json(app_state.service.trigger_sync(kind).await?))
}

async fn sync_status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<SyncStatus>, AppError> {
    Ok(Json(app_state.service.sync_status().await?))
}

pub fn create_sync_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(sync_status_handler))
        .route("/{kind}", post(trigger_sync_handler))
}
