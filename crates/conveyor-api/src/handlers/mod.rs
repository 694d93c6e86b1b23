//! HTTP request handlers for the admin API.
//!
//! Handlers follow one pattern: validate, commit to the store, then emit the
//! supervisor event. Error bodies are `{"error": "..."}` with the status code
//! derived from the core error taxonomy.

pub mod broker_config;
pub mod consumers;
pub mod failed_callbacks;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use conveyor_broker::{ConsumerEvent, ConsumerEventKind};
use conveyor_core::{ConsumerSpec, CoreError};

use crate::AppState;

pub use broker_config::{get_broker_config, put_broker_config, test_broker_connection};
pub use consumers::{
    create_consumer, delete_consumer, disable_consumer, enable_consumer, list_consumers,
    restart_consumer, update_consumer,
};
pub use failed_callbacks::{
    bulk_failed_callbacks, delete_failed_callback, list_failed_callbacks, retry_failed_callback,
};
pub use health::health_check;

/// Core error wrapped for HTTP transport.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_) | CoreError::ConstraintViolation(_) => {
                StatusCode::BAD_REQUEST
            },
            CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Simple `{"message": ...}` success body.
fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

/// Emits a supervisor event for an already-committed mutation.
///
/// A closed channel only happens during shutdown; the runtime reconciles from
/// the store on next start, so the mutation stands either way.
async fn emit(state: &AppState, kind: ConsumerEventKind, spec: ConsumerSpec) {
    let id = spec.id.clone();
    if state.events.send(ConsumerEvent { kind, spec }).await.is_err() {
        warn!(consumer_id = %id, "supervisor event channel closed, event dropped");
    }
}
