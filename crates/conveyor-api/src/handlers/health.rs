//! Health probe.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use super::ApiError;
use crate::AppState;

/// `GET /health` — store connectivity probe.
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.storage.health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}
