use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::handlers::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_status = match sqlx::query("SELECT 1").fetch_one(state.database.pool()).await {
        Ok(_) => "healthy",
        Err(e) => {
            tracing::error!("Health check could not reach the database: {}", e);
            "unhealthy"
        }
    };

    let (status, overall) = if db_status == "healthy" {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": overall,
            "checks": {
                "database": db_status
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
