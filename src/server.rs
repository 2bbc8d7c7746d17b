//! Health endpoint, served at `/injector` and `/healthz`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub version: String,
    pub message: String,
}

pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            message: "ok".to_string(),
        }),
    )
}

/// `/injector` is the primary route, `/healthz` an alias.
pub fn router() -> Router {
    Router::new()
        .route("/injector", get(healthz))
        .route("/healthz", get(healthz))
}

/// Serve the health endpoint until the listener fails.
pub async fn serve(addr: &str) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("cannot bind {}: {}", addr, e))?;
    tracing::info!(%addr, "health endpoint listening");
    axum::serve(listener, router())
        .await
        .map_err(|e| format!("health server error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_health(uri: &str) -> HealthResponse {
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_injector_route() {
        let health = get_health("/injector").await;
        assert_eq!(health.message, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_healthz_alias() {
        assert_eq!(get_health("/healthz").await, get_health("/injector").await);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = router()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
