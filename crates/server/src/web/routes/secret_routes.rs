use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::db::{
    entities::subscriber_secret,
    services::{self, SecretInput},
};
use crate::web::{AppError, AppState};

// Local records only. They reach the router on the next secrets push.

async fn list_secrets_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<subscriber_secret::Model>>, AppError> {
    Ok(Json(services::list_secrets(app_state.service.db()).await?))
}

async fn get_secret_handler(
    State(app_state): State<Arc<AppState>>,
    Path(secret_id): Path<i32>,
) -> Result<Json<subscriber_secret::Model>, AppError> {
    services::get_secret(app_state.service.db(), secret_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Secret {secret_id} not found")))
}

async fn create_secret_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SecretInput>,
) -> Result<(StatusCode, Json<subscriber_secret::Model>), AppError> {
    payload.validate().map_err(AppError::InvalidInput)?;
    let secret = services::create_secret(app_state.service.db(), &payload, None).await?;
    Ok((StatusCode::CREATED, Json(secret)))
}

async fn update_secret_handler(
    State(app_state): State<Arc<AppState>>,
    Path(secret_id): Path<i32>,
    Json(payload): Json<SecretInput>,
) -> Result<Json<subscriber_secret::Model>, AppError> {
    payload.validate().map_err(AppError::InvalidInput)?;
    services::update_secret(app_state.service.db(), secret_id, &payload, None)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Secret {secret_id} not found")))
}

async fn delete_secret_handler(
    State(app_state): State<Arc<AppState>>,
    Path(secret_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let result = services::delete_secret(app_state.service.db(), secret_id).await?;
    if result.rows_affected > 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Secret {secret_id} not found")))
    }
}

pub fn create_secrets_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_secrets_handler).post(create_secret_handler))
        .route(
            "/{secret_id}",
            get(get_secret_handler)
                .put(update_secret_handler)
                .delete(delete_secret_handler),
        )
}
