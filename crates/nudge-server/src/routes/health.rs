use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::state::AppState;

/// GET /api/health. 503 when the shared store is unreachable.
pub async fn health(State(app): State<AppState>) -> (StatusCode, Json<Value>) {
    match app.store.exists("health:probe").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": "reachable" })),
        ),
        Err(e) => {
            warn!(error = %e, "health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "store": "unreachable" })),
            )
        }
    }
}
