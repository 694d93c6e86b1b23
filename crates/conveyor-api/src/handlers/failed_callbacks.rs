//! Failed-callback inspection and re-drive handlers.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::warn;

use conveyor_core::{CoreError, FailedCallback};

use super::{message, ApiError};
use crate::AppState;

/// `GET /failed-callbacks` — all records, most recent first.
pub async fn list_failed_callbacks(
    State(state): State<AppState>,
) -> Result<Json<Vec<FailedCallback>>, ApiError> {
    let records = state.storage.failed_callbacks.list().await?;
    Ok(Json(records))
}

/// `POST /failed-callbacks/{id}/retry` — re-drive one record.
///
/// The row is removed up front; the detached retry re-inserts it with fresh
/// status and body if the fallback schedule runs dry again.
pub async fn retry_failed_callback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.storage.failed_callbacks.fetch(id).await?;
    state.storage.failed_callbacks.delete(id).await?;

    state.dispatcher.retry_failed(record);

    Ok(message("retry process initiated"))
}

/// `DELETE /failed-callbacks/{id}` — drop one record.
pub async fn delete_failed_callback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.failed_callbacks.delete(id).await?;
    Ok(message("failed callback deleted"))
}

/// Body of `POST /failed-callbacks/bulk`.
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    /// Record ids the action applies to.
    pub ids: Vec<i64>,
    /// `"retry"` or `"delete"`.
    pub action: String,
}

/// `POST /failed-callbacks/bulk` — apply retry or delete to many records.
///
/// Records that vanished since the caller listed them are skipped.
pub async fn bulk_failed_callbacks(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    match request.action.as_str() {
        "retry" => {
            for id in request.ids {
                match state.storage.failed_callbacks.fetch(id).await {
                    Ok(record) => {
                        state.storage.failed_callbacks.delete(id).await?;
                        state.dispatcher.retry_failed(record);
                    },
                    Err(CoreError::NotFound(_)) => {
                        warn!(id, "bulk retry skipped missing record");
                    },
                    Err(err) => return Err(err.into()),
                }
            }
        },
        "delete" => {
            for id in request.ids {
                state.storage.failed_callbacks.delete(id).await?;
            }
        },
        other => {
            return Err(CoreError::invalid(format!("unknown bulk action {other:?}")).into());
        },
    }

    Ok(message("bulk action completed"))
}
