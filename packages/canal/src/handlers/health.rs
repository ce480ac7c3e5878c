//! Health check and metrics endpoints

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::AppState;
use crate::metrics::HealthStatus;

/// GET /health - overall health summary
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();

    match state.db.get_stats().await {
        Ok(stats) => {
            let health = HealthStatus {
                status: "healthy".to_string(),
                active_connections: snapshot.connections.active,
                conversations: stats.conversations,
                messages: stats.messages,
                uptime_secs: snapshot.uptime_secs,
            };
            (StatusCode::OK, Json(health))
        }
        Err(e) => {
            error!("Health check could not read the store: {}", e);
            let health = HealthStatus {
                status: "degraded".to_string(),
                active_connections: snapshot.connections.active,
                conversations: 0,
                messages: 0,
                uptime_secs: snapshot.uptime_secs,
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(health))
        }
    }
}

/// GET /health/live - trivial liveness probe
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// GET /health/ready - readiness probe that exercises the database pool
pub async fn health_ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.pool.acquire().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ready" }))),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "not_ready" })),
            )
        }
    }
}

/// GET /metrics - full metrics snapshot as JSON
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::test_helpers::test_app_state;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_healthy() {
        let state = test_app_state().await;
        let app = Router::new()
            .route("/health", get(health_handler))
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_connections, 0);
    }

    #[tokio::test]
    async fn readiness_probe_passes_with_live_pool() {
        let state = test_app_state().await;
        let app = Router::new()
            .route("/health/ready", get(health_ready_handler))
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_snapshot_roundtrips() {
        let state = test_app_state().await;
        state.metrics.connection_opened();
        state.metrics.message_created();

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.messages.created, 1);
    }
}
