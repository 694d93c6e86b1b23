//! Conveyor AMQP-to-HTTP dispatcher.
//!
//! Main entry point. Initializes structured logging, opens the embedded
//! store, reconciles stored consumers into live workers, and serves the
//! administrative API until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conveyor_api::{start_server, AppState, Config};
use conveyor_broker::{BrokerSettings, Supervisor, WorkerContext};
use conveyor_core::storage::Storage;
use conveyor_delivery::{Alerter, CallbackClient, Dispatcher, TracingAccessLog};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("configuration invalid")?;

    // The guard flushes buffered log lines on drop; keep it for the whole run.
    let _log_guard = init_tracing(&config);

    info!(
        database_path = %config.database_path,
        port = config.port,
        "starting conveyor dispatcher"
    );

    let pool = open_database(&config.database_path).await?;
    let storage = Storage::new(pool);
    storage.migrate().await.context("schema migration failed")?;
    info!("store ready");

    let broker_config = storage
        .settings
        .fetch_broker_config()
        .await
        .context("broker configuration missing")?;
    let mut settings = BrokerSettings::new(broker_config);
    settings.frame_max = config.frame_max;
    settings.heartbeat = config.heartbeat;

    let client = CallbackClient::new().context("HTTP client construction failed")?;
    let alerter = Alerter::new(client.clone(), config.alert_webhook.clone());
    let dispatcher =
        Arc::new(Dispatcher::new(client, storage.clone(), alerter, Arc::new(TracingAccessLog)));

    let shutdown = CancellationToken::new();

    let ctx = Arc::new(WorkerContext { settings, dispatcher: dispatcher.clone() });
    let supervisor = Arc::new(Supervisor::new(storage.clone(), ctx, shutdown.child_token()));

    let (events_tx, events_rx) = mpsc::channel(64);
    let supervisor_task = tokio::spawn(supervisor.run(events_rx));

    let state = AppState::new(storage.clone(), events_tx, dispatcher);
    let addr = config.server_addr().context("invalid server address")?;
    let server_task = tokio::spawn({
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = start_server(state, &config, addr, shutdown).await {
                error!(error = %error, "admin API failed");
            }
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    shutdown.cancel();

    let _ = supervisor_task.await;
    let _ = server_task.await;

    storage.consumers.pool().close().await;
    info!("conveyor shutdown complete");
    Ok(())
}

/// Initializes tracing with a console layer and a daily-rotated file layer.
///
/// Files land under the configured log directory with the retention count
/// applied by the appender.
fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("conveyor")
        .filename_suffix("log")
        .max_log_files(config.log_retention)
        .build(&config.log_dir)
        .expect("log directory must be writable");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer().with_target(true).with_ansi(false).with_writer(file_writer);
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(file_layer).with(console_layer).init();

    guard
}

/// Opens the SQLite pool, creating the database file on first start.
async fn open_database(path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open database")?;

    // Verify the connection works before wiring anything onto it.
    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .context("failed to verify database connection")?;

    Ok(pool)
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => {
                error!(error = %error, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C");
        },
        () = terminate => {
            info!("received SIGTERM");
        },
    }
}
