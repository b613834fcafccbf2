//! Status and diagnostics endpoints
//!
//! - `GET /api/health`: liveness plus collection counts, 503 while disconnected
//! - `GET /api/db/status`: connection state, statistics and a fresh probe
//! - `GET /api/db/diagnostics`: full diagnostics run

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use evpulse_database::mongodb::{ConnectionManager, ConnectionState, DiagnosticReport};
use evpulse_database::{DatabaseError, run_diagnostics};
use mongodb::bson::{Document, doc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;

/// Collections counted by the health endpoint
const COUNTED_COLLECTIONS: [&str; 5] = ["users", "stations", "sessions", "bookings", "transactions"];

/// Shared state handed to every handler (cheap to clone)
#[derive(Clone, Debug)]
pub struct AppState {
    pub manager: ConnectionManager,
    /// Connection string and database the diagnostics endpoint runs against
    pub uri: String,
    pub database: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/db/status", get(db_status))
        .route("/api/db/diagnostics", get(db_diagnostics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Database failure rendered as `{error, message, details}`
pub struct ApiError(DatabaseError);

impl From<DatabaseError> for ApiError {
    fn from(error: DatabaseError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_service_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        tracing::error!(
            error_code = self.0.code(),
            status = status.as_u16(),
            "Database error: {}",
            self.0
        );

        (status, Json(self.0.to_body())).into_response()
    }
}

#[derive(Serialize)]
struct DatabaseSummary {
    status: &'static str,
    state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<f64>,
}

async fn health(State(state): State<AppState>) -> Response {
    let manager = &state.manager;

    if !manager.is_connected() {
        let body = json!({
            "status": "degraded",
            "message": "EVPulse API running but database not connected",
            "database": DatabaseSummary {
                status: "disconnected",
                state: manager.state(),
                healthy: None,
                latency_ms: None,
            },
            "timestamp": Utc::now(),
        });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let report = manager.health_check().await;
    let stats = manager.stats();

    let mut collections = BTreeMap::new();
    for name in COUNTED_COLLECTIONS {
        collections.insert(name, count_documents(manager, name).await);
    }

    let body = json!({
        "status": "healthy",
        "message": "EVPulse API is running",
        "database": DatabaseSummary {
            status: "connected",
            state: manager.state(),
            healthy: Some(report.healthy),
            latency_ms: report.latency_ms,
        },
        "collections": collections,
        "stats": {
            "uptime_seconds": stats.uptime_seconds,
            "queries_executed": stats.queries_executed,
            "reconnections": stats.reconnections,
        },
        "timestamp": Utc::now(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Zero when the count fails; the endpoint reports liveness, not data
async fn count_documents(manager: &ConnectionManager, name: &str) -> u64 {
    let Ok(collection) = manager.get_collection::<Document>(name) else {
        return 0;
    };
    match collection.count_documents(doc! {}).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(collection = name, error = %e, "Count failed");
            0
        }
    }
}

async fn db_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.manager.status().await;
    let mut body = serde_json::to_value(&status).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut body {
        map.insert("timestamp".into(), json!(Utc::now()));
    }
    Json(body)
}

async fn db_diagnostics(
    State(state): State<AppState>,
) -> Result<Json<DiagnosticReport>, ApiError> {
    let report = run_diagnostics(Some(&state.uri), Some(&state.database)).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(uri: &str) -> AppState {
        AppState {
            manager: ConnectionManager::mongo(),
            uri: uri.to_string(),
            database: "evpulse".to_string(),
        }
    }

    async fn get_json(app: Router, path: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_degraded_while_disconnected() {
        let (status, body) = get_json(router(state("")), "/api/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"]["status"], "disconnected");
        assert_eq!(body["database"]["state"], "disconnected");
    }

    #[tokio::test]
    async fn test_db_status_while_disconnected() {
        let (status, body) = get_json(router(state("")), "/api/db/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
        assert_eq!(body["state"], "disconnected");
        assert!(body["health"].is_null());
        assert_eq!(body["stats"]["connections_made"], 0);
    }

    #[tokio::test]
    async fn test_diagnostics_without_uri_is_server_error() {
        let (status, body) = get_json(router(state("")), "/api/db/diagnostics").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "DB_CONFIG_ERROR");
    }

    #[test]
    fn test_not_initialized_maps_to_503() {
        let response = ApiError::from(DatabaseError::not_initialized()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
