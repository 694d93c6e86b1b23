//! HTTP server setup and request routing.
//!
//! Requests flow through CORS, tracing, and timeout layers into the handlers.
//! Shutdown is driven by the process-wide cancellation token so the API and
//! the supervisor wind down together.

use std::{net::SocketAddr, time::Duration};

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{config::Config, handlers, AppState};

/// Creates the admin router with all routes and middleware.
pub fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/rabbitmq-config",
            get(handlers::get_broker_config).put(handlers::put_broker_config),
        )
        .route("/test-rabbitmq-connection", post(handlers::test_broker_connection))
        .route("/consumers", get(handlers::list_consumers).post(handlers::create_consumer))
        .route(
            "/consumers/{id}",
            put(handlers::update_consumer).delete(handlers::delete_consumer),
        )
        .route("/consumers/{id}/enable", put(handlers::enable_consumer))
        .route("/consumers/{id}/disable", put(handlers::disable_consumer))
        .route("/consumers/{id}/restart", put(handlers::restart_consumer))
        .route("/failed-callbacks", get(handlers::list_failed_callbacks))
        .route("/failed-callbacks/{id}", delete(handlers::delete_failed_callback))
        .route("/failed-callbacks/{id}/retry", post(handlers::retry_failed_callback))
        .route("/failed-callbacks/bulk", post(handlers::bulk_failed_callbacks))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the admin API until the shutdown token fires.
///
/// # Errors
///
/// Returns `std::io::Error` when the port cannot be bound or the listener
/// fails.
pub async fn start_server(
    state: AppState,
    config: &Config,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("admin API stopped");
    Ok(())
}
