use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::config::StorageBackend;
use crate::AppState;

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let storage = match state.config.storage_backend {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    };
    Json(json!({ "status": "ok", "storage": storage }))
}
