//! Broker configuration and connection-test handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use conveyor_broker::BrokerSettings;
use conveyor_core::BrokerConfig;

use super::{message, ApiError};
use crate::AppState;

/// `GET /rabbitmq-config` — the stored broker settings.
pub async fn get_broker_config(
    State(state): State<AppState>,
) -> Result<Json<BrokerConfig>, ApiError> {
    let config = state.storage.settings.fetch_broker_config().await?;
    Ok(Json(config))
}

/// `PUT /rabbitmq-config` — replace the stored broker settings.
///
/// Running workers keep their current connections; the new settings apply to
/// every subsequent dial.
pub async fn put_broker_config(
    State(state): State<AppState>,
    Json(config): Json<BrokerConfig>,
) -> Result<impl IntoResponse, ApiError> {
    state.storage.settings.update_broker_config(&config).await?;
    Ok(message("rabbitmq configuration updated"))
}

/// `POST /test-rabbitmq-connection` — dial once with the posted settings.
pub async fn test_broker_connection(Json(config): Json<BrokerConfig>) -> impl IntoResponse {
    match conveyor_broker::test_connection(&BrokerSettings::new(config)).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "connection successful" }))),
        Err(err) => {
            error!(error = %err, "broker connection test failed");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("failed to connect to RabbitMQ: {err}") })),
            )
        },
    }
}
