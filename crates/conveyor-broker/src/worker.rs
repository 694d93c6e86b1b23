//! Consumer worker: one connection, one channel, one consume stream.
//!
//! A worker's life is a sequence of sessions. Each session declares topology
//! and pumps deliveries until the connection drops; a 3-second watcher detects
//! the drop and a reconnect loop dials a new session with the same definition.
//! Cancellation ends the worker at the next suspension point; in-flight retry
//! tasks are deliberately left running.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_core::ConsumerSpec;
use conveyor_delivery::{Dispatcher, InboundMessage};

use crate::{
    amqp_uri,
    error::{BrokerError, Result},
    topology, BrokerSettings,
};

/// Delay between dial attempts and before reconnecting after a drop.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(3);
/// Poll interval of the connection watcher.
const WATCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

/// Dependencies shared by every worker.
pub struct WorkerContext {
    /// Broker connection settings.
    pub settings: BrokerSettings,
    /// Shared callback dispatcher.
    pub dispatcher: Arc<Dispatcher>,
}

/// Handle to a running worker, owned by the supervisor.
pub struct WorkerHandle {
    consumer_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// The consumer definition id this worker was started from.
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Cancels the worker and waits for its tasks to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            error!(consumer_id = %self.consumer_id, error = %error, "worker task join failed");
        }
    }
}

/// Channel plus consume stream for one broker session.
struct Session {
    channel: Channel,
    consumer: Consumer,
}

/// A running instance of a consumer definition.
pub struct ConsumerWorker {
    spec: Arc<ConsumerSpec>,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
    worker_no: u32,
}

impl ConsumerWorker {
    /// Dials the broker, declares topology and starts pumping.
    ///
    /// Dial failures are retried indefinitely at 3-second intervals (only
    /// cancellation interrupts them); topology errors are returned so the
    /// supervisor can leave this worker absent.
    ///
    /// # Errors
    ///
    /// `BrokerError::Cancelled` when cancelled mid-dial, or
    /// `BrokerError::Topology` when the session cannot be established.
    pub async fn start(
        spec: ConsumerSpec,
        ctx: Arc<WorkerContext>,
        cancel: CancellationToken,
        worker_no: u32,
    ) -> Result<WorkerHandle> {
        let worker = Self { spec: Arc::new(spec), ctx, cancel: cancel.clone(), worker_no };

        let connection = worker.dial_until_connected().await?;
        let session = worker.establish(&connection).await?;

        info!(
            consumer_id = %worker.spec.id,
            queue_name = %worker.spec.queue_name,
            worker_no,
            "consumer worker subscribed"
        );

        let consumer_id = worker.spec.id.clone();
        let task = tokio::spawn(worker.run(Arc::new(connection), session));

        Ok(WorkerHandle { consumer_id, cancel, task })
    }

    /// Dials until the broker accepts the connection or the worker is
    /// cancelled.
    async fn dial_until_connected(&self) -> Result<Connection> {
        let vhost = self.ctx.settings.vhost_for(&self.spec.vhost);
        let uri = amqp_uri(&self.ctx.settings, vhost);

        loop {
            if self.cancel.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }

            match Connection::connect(&uri, ConnectionProperties::default()).await {
                Ok(connection) => {
                    info!(
                        consumer_id = %self.spec.id,
                        host = %self.ctx.settings.config.host,
                        vhost,
                        "broker connected"
                    );
                    return Ok(connection);
                },
                Err(error) => {
                    error!(
                        consumer_id = %self.spec.id,
                        error = %error,
                        "broker dial failed, retrying in 3s"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err(BrokerError::Cancelled),
                        () = sleep(RECONNECT_DELAY) => {},
                    }
                },
            }
        }
    }

    /// Opens a channel, declares topology and opens the consume stream.
    async fn establish(&self, connection: &Connection) -> Result<Session> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::topology(format!("open channel: {e}")))?;

        topology::declare_for_consumer(&channel, &self.spec).await?;

        let tag = format!("conveyor-{}-{}", self.spec.id, self.worker_no);
        let consumer = channel
            .basic_consume(
                &self.spec.queue_name,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::topology(format!("consume {}: {e}", self.spec.queue_name)))?;

        Ok(Session { channel, consumer })
    }

    /// Session loop: pump until the connection drops, then reconnect with the
    /// same definition. Exits only on cancellation.
    async fn run(self, mut connection: Arc<Connection>, mut session: Session) {
        loop {
            let (signal_tx, mut signal_rx) = mpsc::channel::<String>(1);

            let watcher = tokio::spawn(watch_connection(
                connection.clone(),
                self.spec.name.clone(),
                signal_tx,
                self.cancel.clone(),
            ));

            let channel = session.channel.clone();
            let pump = tokio::spawn(pump(
                self.spec.clone(),
                self.ctx.clone(),
                connection.clone(),
                session.consumer,
                self.cancel.clone(),
            ));

            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = pump.await;
                    let _ = watcher.await;
                    let _ = channel.close(200, "worker stopped").await;
                    let _ = connection.close(200, "worker stopped").await;
                    break;
                },
                signal = signal_rx.recv() => {
                    let _ = pump.await;
                    let _ = watcher.await;

                    // A closed channel means the watcher saw cancellation.
                    let Some(reason) = signal else {
                        let _ = channel.close(200, "worker stopped").await;
                        let _ = connection.close(200, "worker stopped").await;
                        break;
                    };

                    warn!(
                        consumer_id = %self.spec.id,
                        reason = %reason,
                        "connection lost, reconnecting in 3s"
                    );

                    if !self.sleep_cancellable(RECONNECT_DELAY).await {
                        break;
                    }
                    match self.reestablish().await {
                        Some((new_connection, new_session)) => {
                            connection = new_connection;
                            session = new_session;
                        },
                        None => break,
                    }
                },
            }
        }

        info!(consumer_id = %self.spec.id, worker_no = self.worker_no, "consumer worker stopped");
    }

    /// Dials and declares until a fresh session is up, retrying topology
    /// failures at the same cadence as dial failures. `None` means cancelled.
    async fn reestablish(&self) -> Option<(Arc<Connection>, Session)> {
        loop {
            let connection = match self.dial_until_connected().await {
                Ok(connection) => connection,
                Err(_) => return None,
            };

            match self.establish(&connection).await {
                Ok(session) => {
                    info!(
                        consumer_id = %self.spec.id,
                        queue_name = %self.spec.queue_name,
                        "consumer worker resubscribed"
                    );
                    return Some((Arc::new(connection), session));
                },
                Err(error) => {
                    error!(
                        consumer_id = %self.spec.id,
                        error = %error,
                        "topology redeclaration failed, retrying in 3s"
                    );
                    let _ = connection.close(200, "redeclaration failed").await;
                    if !self.sleep_cancellable(RECONNECT_DELAY).await {
                        return None;
                    }
                },
            }
        }
    }

    /// Sleeps unless cancelled first; false means cancelled.
    async fn sleep_cancellable(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(duration) => true,
        }
    }
}

/// Polls the connection's closed flag and posts a single reconnect signal.
async fn watch_connection(
    connection: Arc<Connection>,
    consumer_name: String,
    signal: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(WATCH_INTERVAL) => {
                if !connection.status().connected() {
                    let _ = signal
                        .send(format!("queue {consumer_name} has been disconnected"))
                        .await;
                    return;
                }
            },
        }
    }
}

/// Delivery pump: one iteration per broker delivery.
///
/// The acknowledgement is issued after the initial callback returns; retries
/// run detached inside the dispatcher, so prefetch remains the only
/// backpressure mechanism.
async fn pump(
    spec: Arc<ConsumerSpec>,
    ctx: Arc<WorkerContext>,
    connection: Arc<Connection>,
    mut consumer: Consumer,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            () = cancel.cancelled() => return,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(error)) => {
                    error!(consumer_id = %spec.id, error = %error, "delivery stream error");
                    return;
                },
                None => {
                    debug!(consumer_id = %spec.id, "delivery stream closed");
                    return;
                },
            },
        };

        if !connection.status().connected() {
            // Abandon without ack; the broker redelivers after reconnect.
            return;
        }

        let received_at = Utc::now();
        let message_id = delivery
            .properties
            .message_id()
            .clone()
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let payload = decode_payload(&spec, delivery.data.clone());

        debug!(
            consumer_id = %spec.id,
            queue_name = %spec.queue_name,
            message_id = %message_id,
            payload_len = payload.len(),
            "delivery received"
        );

        ctx.dispatcher
            .dispatch(
                &spec,
                InboundMessage { message_id, payload: Bytes::from(payload), received_at },
            )
            .await;

        if let Err(error) = delivery.ack(BasicAckOptions::default()).await {
            error!(consumer_id = %spec.id, error = %error, "ack failed, ending session");
            return;
        }
    }
}

/// Applies the consumer's base64 policy; a decode failure keeps the original
/// bytes rather than dropping the message.
fn decode_payload(spec: &ConsumerSpec, raw: Vec<u8>) -> Vec<u8> {
    if !spec.auto_decode_base64 {
        return raw;
    }

    match BASE64.decode(raw.trim_ascii()) {
        Ok(decoded) => decoded,
        Err(error) => {
            warn!(
                consumer_id = %spec.id,
                error = %error,
                "base64 decode failed, delivering original payload"
            );
            raw
        },
    }
}
