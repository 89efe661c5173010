use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::diagnostics::DiagnosticsReport;
use crate::registry::ProfileInput;
use crate::service::{ConnectionTestRequest, ConnectionTestResult};
use crate::web::{models::ConnectionProfileView, AppError, AppState};

async fn list_connections_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConnectionProfileView>>, AppError> {
    let profiles = app_state.service.registry().list().await?;
    Ok(Json(profiles.into_iter().map(Into::into).collect()))
}

async fn create_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ProfileInput>,
) -> Result<(StatusCode, Json<ConnectionProfileView>), AppError> {
    let profile = app_state.service.registry().create(payload).await?;
    Ok((StatusCode::CREATED, Json(profile.into())))
}

async fn get_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<Json<ConnectionProfileView>, AppError> {
    let profile = app_state.service.registry().get(profile_id).await?;
    Ok(Json(profile.into()))
}

async fn update_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
    Json(payload): Json<ProfileInput>,
) -> Result<Json<ConnectionProfileView>, AppError> {
    let profile = app_state.service.registry().update(profile_id, payload).await?;
    Ok(Json(profile.into()))
}

async fn delete_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    app_state.service.registry().delete(profile_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<Json<ConnectionProfileView>, AppError> {
    let profile = app_state.service.registry().activate(profile_id).await?;
    Ok(Json(profile.into()))
}

async fn deactivate_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<Json<ConnectionProfileView>, AppError> {
    let profile = app_state.service.registry().deactivate(profile_id).await?;
    Ok(Json(profile.into()))
}

async fn test_connection_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ConnectionTestRequest>,
) -> Result<Json<ConnectionTestResult>, AppError> {
    Ok(Json(app_state.service.test_connection(payload).await?))
}

async fn diagnostics_handler(
    State(app_state): State<Arc<AppState>>,
    Path(profile_id): Path<i32>,
) -> Result<Json<DiagnosticsReport>, AppError> {
    Ok(Json(app_state.service.run_diagnostics(profile_id).await?))
}

pub fn create_connections_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_connections_handler).post(create_connection_handler))
        .route("/test", post(test_connection_handler))
        .route(
            "/{profile_id}",
            get(get_connection_handler)
                .put(update_connection_handler)
                .delete(delete_connection_handler),
        )
        .route("/{profile_id}/activate", post(activate_connection_handler))
        .route("/{profile_id}/deactivate", post(deactivate_connection_handler))
        .route("/{profile_id}/diagnostics", post(diagnostics_handler))
}
