//! Consumer CRUD and lifecycle handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use conveyor_broker::ConsumerEventKind;
use conveyor_core::{ConsumerSpec, ConsumerStatus};

use super::{emit, message, ApiError};
use crate::AppState;

/// `GET /consumers` — every stored definition.
pub async fn list_consumers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConsumerSpec>>, ApiError> {
    let consumers = state.storage.consumers.list().await?;
    Ok(Json(consumers))
}

/// `POST /consumers` — create a definition and start it when `running`.
pub async fn create_consumer(
    State(state): State<AppState>,
    Json(mut spec): Json<ConsumerSpec>,
) -> Result<impl IntoResponse, ApiError> {
    spec.validate()?;

    let id = state.storage.consumers.insert(&spec).await?;
    spec.id = id.to_string();

    emit(&state, ConsumerEventKind::Added, spec).await;

    Ok((StatusCode::CREATED, Json(json!({ "message": "consumer created", "id": id }))))
}

/// `PUT /consumers/{id}` — replace a definition; the worker set follows.
pub async fn update_consumer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut spec): Json<ConsumerSpec>,
) -> Result<impl IntoResponse, ApiError> {
    spec.id = id;
    spec.validate()?;

    state.storage.consumers.update(&spec).await?;
    emit(&state, ConsumerEventKind::Updated, spec).await;

    Ok(message("consumer updated"))
}

/// `DELETE /consumers/{id}` — remove the definition and its broker queues.
pub async fn delete_consumer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state.storage.consumers.fetch(&id).await?;

    state.storage.consumers.delete(&id).await?;
    emit(&state, ConsumerEventKind::Deleted, spec).await;

    Ok(message("consumer deleted"))
}

/// `PUT /consumers/{id}/enable` — set `running` and reconcile.
pub async fn enable_consumer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.consumers.set_status(&id, ConsumerStatus::Running).await?;
    let spec = state.storage.consumers.fetch(&id).await?;

    emit(&state, ConsumerEventKind::Updated, spec).await;

    Ok(message("consumer enabled"))
}

/// `PUT /consumers/{id}/disable` — set `stopped` and reconcile.
pub async fn disable_consumer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.consumers.set_status(&id, ConsumerStatus::Stopped).await?;
    let spec = state.storage.consumers.fetch(&id).await?;

    emit(&state, ConsumerEventKind::Updated, spec).await;

    Ok(message("consumer disabled"))
}

/// `PUT /consumers/{id}/restart` — stop and start from the same definition.
pub async fn restart_consumer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state.storage.consumers.fetch(&id).await?;

    emit(&state, ConsumerEventKind::Restarted, spec).await;

    Ok(message("consumer restarted"))
}
