use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::db::{
    entities::service_profile,
    services::{self, ServiceProfileInput},
};
use crate::web::{AppError, AppState};

async fn list_service_profiles_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<service_profile::Model>>, AppError> {
    Ok(Json(services::list_service_profiles(app_state.service.db()).await?))
}

async fn get_service_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<Json<service_profile::Model>, AppError> {
    services::get_service_profile(app_state.service.db(), profile_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Service profile {profile_id} not found")))
}

async fn create_service_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ServiceProfileInput>,
) -> Result<(StatusCode, Json<service_profile::Model>), AppError> {
    payload.validate().map_err(AppError::InvalidInput)?;
    let profile = services::create_service_profile(app_state.service.db(), &payload, None).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn update_service_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
    Json(payload): Json<ServiceProfileInput>,
) -> Result<Json<service_profile::Model>, AppError> {
    payload.validate().map_err(AppError::InvalidInput)?;
    services::update_service_profile(app_state.service.db(), profile_id, &payload, None)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Service profile {profile_id} not found")))
}

async fn delete_service_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let result = services::delete_service_profile(app_state.service.db(), profile_id).await?;
    if result.rows_affected > 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Service profile {profile_id} not found")))
    }
}

pub fn create_service_profiles_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(list_service_profiles_handler).post(create_service_profile_handler),
        )
        .route(
            "/{profile_id}",
            get(get_service_profile_handler)
                .put(update_service_profile_handler)
                .delete(delete_service_profile_handler),
        )
}
