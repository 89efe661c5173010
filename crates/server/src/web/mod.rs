use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::service::RouterService;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RouterService>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(service: Arc<RouterService>) -> Router {
    let app_state = Arc::new(AppState { service });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/connections", routes::create_connections_router())
        .nest("/api/sync", routes::create_sync_router())
        .nest("/api/secrets", routes::create_secrets_router())
        .nest("/api/service-profiles", routes::create_service_profiles_router())
        .with_state(app_state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::testing::{memory_db, test_cipher, FakeRouter, SECRET_MENU};

    async fn app(router: &FakeRouter) -> Router {
        let service = Arc::new(RouterService::new(
            memory_db().await,
            test_cipher(),
            Duration::from_secs(2),
            Arc::new(router.clone()),
        ));
        create_axum_router(service)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn profile_body(name: &str) -> Value {
        json!({
            "name": name,
            "host": "10.0.0.1",
            "username": "admin",
            "password": "router-pass",
            "timeout_seconds": 2
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(&FakeRouter::new()).await;
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_created_profile_never_exposes_credential() {
        let app = app(&FakeRouter::new()).await;

        let (status, created) = send(&app, "POST", "/api/connections", Some(profile_body("edge"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["has_credential"], json!(true));
        assert_eq!(created["port"], json!(8728));

        let (status, listed) = send(&app, "GET", "/api/connections", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let text = listed.to_string();
        assert!(!text.contains("router-pass"));
        assert!(!text.contains("secret_ciphertext"));
    }

    #[tokio::test]
    async fn test_duplicate_profile_name_conflicts() {
        let app = app(&FakeRouter::new()).await;
        send(&app, "POST", "/api/connections", Some(profile_body("edge"))).await;

        let (status, body) = send(&app, "POST", "/api/connections", Some(profile_body("edge"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_deleting_active_profile_conflicts() {
        let app = app(&FakeRouter::new()).await;
        let (_, created) = send(&app, "POST", "/api/connections", Some(profile_body("edge"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, activated) = send(&app, "POST", &format!("/api/connections/{id}/activate"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(activated["is_active"], json!(true));

        let (status, _) = send(&app, "DELETE", &format!("/api/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        send(&app, "POST", &format!("/api/connections/{id}/deactivate"), None).await;
        let (status, _) = send(&app, "DELETE", &format!("/api/connections/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let app = app(&FakeRouter::new()).await;
        let (status, body) = send(&app, "GET", "/api/connections/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("Connection profile 99 not found"));
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected() {
        let app = app(&FakeRouter::new()).await;
        let mut body = profile_body("edge");
        body["host"] = json!("  ");
        let (status, _) = send(&app, "POST", "/api/connections", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_sync_kind_is_bad_request() {
        let app = app(&FakeRouter::new()).await;
        let (status, body) = send(&app, "POST", "/api/sync/everything", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("everything"));
    }

    #[tokio::test]
    async fn test_sync_without_active_profile_reports_unavailable() {
        let router = FakeRouter::new();
        let app = app(&router).await;

        let (status, body) = send(&app, "POST", "/api/sync/all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(router.connects(), 0);
    }

    #[tokio::test]
    async fn test_sync_pull_then_list_secrets() {
        let router = FakeRouter::new();
        router.seed(SECRET_MENU, &[("name", "wendy"), ("password", "pw")]);
        let app = app(&router).await;
        let (_, created) = send(&app, "POST", "/api/connections", Some(profile_body("edge"))).await;
        let id = created["id"].as_i64().unwrap();
        send(&app, "POST", &format!("/api/connections/{id}/activate"), None).await;

        let (status, body) = send(&app, "POST", "/api/sync/secrets-pull", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["counts"]["created"], json!(1));

        let (_, secrets) = send(&app, "GET", "/api/secrets", None).await;
        assert_eq!(secrets[0]["name"], json!("wendy"));
    }

    #[tokio::test]
    async fn test_secret_validation() {
        let app = app(&FakeRouter::new()).await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/secrets",
            Some(json!({ "name": "xavier", "password": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, created) = send(
            &app,
            "POST",
            "/api/secrets",
            Some(json!({ "name": "xavier", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["profile"], json!("default"));
        assert!(created["remote_key"].is_null());
    }

    #[tokio::test]
    async fn test_missing_service_profile_is_not_found() {
        let app = app(&FakeRouter::new()).await;
        let (status, _) = send(&app, "DELETE", "/api/service-profiles/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
