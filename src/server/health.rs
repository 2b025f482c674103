//! Liveness probe.

use axum::Json;
use serde_json::{Value, json};

/// `GET /health`: returns `{"status":"ok"}` while the process is serving.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
