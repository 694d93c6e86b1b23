//! Callback dispatcher: classify, retry, persist, alert.
//!
//! `dispatch` issues the initial POST and returns as soon as it has, so the
//! caller can acknowledge the broker delivery; the retry schedule runs on a
//! detached task carrying only the values it needs. Retries for independent
//! deliveries overlap freely.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use conveyor_core::{
    storage::Storage, CallbackAck, ConsumerSpec, FailedCallback, RetrySchedule,
};

use crate::{
    access_log::{AccessLog, DeliveryRecord},
    alert::Alerter,
    client::{CallbackClient, CallbackResponse},
    error::DeliveryError,
};

/// One message handed over by a consumer worker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Broker message id, or a generated one when the publisher set none.
    pub message_id: String,
    /// Payload after optional base64 decoding; POSTed bytes-exact.
    pub payload: Bytes,
    /// When the delivery arrived from the broker.
    pub received_at: DateTime<Utc>,
}

/// Outcome of classifying one HTTP exchange against the success contract.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Delivered,
    Failed { status: i64, body: String },
}

/// Invokes callbacks and drives the failure policy.
///
/// Shared by every worker; holds the HTTP client, the store handle for
/// exhausted deliveries, the alerter, and the access-log sink.
pub struct Dispatcher {
    client: CallbackClient,
    storage: Storage,
    alerter: Alerter,
    access_log: Arc<dyn AccessLog>,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared collaborators.
    pub fn new(
        client: CallbackClient,
        storage: Storage,
        alerter: Alerter,
        access_log: Arc<dyn AccessLog>,
    ) -> Self {
        Self { client, storage, alerter, access_log }
    }

    /// Delivers one message to the consumer's callback.
    ///
    /// Returns once the initial POST has returned and the access-log record is
    /// emitted. On failure the alert and the retry schedule run on a detached
    /// task; exhaustion inserts one `url_failed` row with the last status and
    /// body.
    pub async fn dispatch(&self, spec: &ConsumerSpec, message: InboundMessage) {
        let attempt = self.client.post(&spec.callback, message.payload.clone()).await;
        let responded_at = Utc::now();
        let verdict = classify(&attempt);

        self.access_log
            .record(build_record(spec, &message, &attempt, responded_at))
            .await;

        match verdict {
            Verdict::Delivered => {
                debug!(
                    consumer_id = %spec.id,
                    queue_name = %spec.queue_name,
                    callback = %spec.callback,
                    "callback delivered"
                );
            },
            Verdict::Failed { status, body } => {
                warn!(
                    consumer_id = %spec.id,
                    queue_name = %spec.queue_name,
                    callback = %spec.callback,
                    status,
                    "callback failed, scheduling retries"
                );

                let schedule = spec.retry_schedule().unwrap_or_else(|e| {
                    error!(consumer_id = %spec.id, error = %e, "bad stored retry mode, using fallback");
                    RetrySchedule::fallback()
                });

                let task = RetryTask {
                    client: self.client.clone(),
                    storage: self.storage.clone(),
                    url: spec.callback.clone(),
                    payload: message.payload,
                    queue_name: spec.queue_name.clone(),
                    schedule,
                    last_status: status,
                    last_body: body,
                };

                let alerter = self.alerter.clone();
                let spec = spec.clone();
                tokio::spawn(async move {
                    alerter.notify_failure(&spec, task.last_status, &task.last_body).await;
                    task.run().await;
                });
            },
        }
    }

    /// Re-drives a stored failed callback through the fallback schedule.
    ///
    /// The caller is expected to have deleted the row already; on exhaustion
    /// the record is re-inserted with the latest status and body. Runs on a
    /// detached task and returns immediately.
    pub fn retry_failed(&self, record: FailedCallback) {
        let task = RetryTask {
            client: self.client.clone(),
            storage: self.storage.clone(),
            url: record.request_url,
            payload: Bytes::from(record.request_data.into_bytes()),
            queue_name: record.queue_name,
            schedule: RetrySchedule::fallback(),
            last_status: record.response_code,
            last_body: record.response_content,
        };

        tokio::spawn(task.run());
    }
}

/// Detached retry driver for one failed delivery.
///
/// Carries only values; no shared state with the pump that spawned it.
struct RetryTask {
    client: CallbackClient,
    storage: Storage,
    url: String,
    payload: Bytes,
    queue_name: String,
    schedule: RetrySchedule,
    last_status: i64,
    last_body: String,
}

impl RetryTask {
    async fn run(mut self) {
        let delays = self.schedule.delays().to_vec();
        for (attempt, delay) in delays.into_iter().enumerate() {
            tokio::time::sleep(delay).await;

            let result = self.client.post(&self.url, self.payload.clone()).await;
            match classify(&result) {
                Verdict::Delivered => {
                    info!(
                        url = %self.url,
                        queue_name = %self.queue_name,
                        attempt = attempt + 1,
                        "retry delivered"
                    );
                    return;
                },
                Verdict::Failed { status, body } => {
                    warn!(
                        url = %self.url,
                        queue_name = %self.queue_name,
                        attempt = attempt + 1,
                        status,
                        "retry failed"
                    );
                    self.last_status = status;
                    self.last_body = body;
                },
            }
        }

        let body_text = String::from_utf8_lossy(&self.payload);
        if let Err(error) = self
            .storage
            .failed_callbacks
            .insert(&self.url, &body_text, self.last_status, &self.last_body, &self.queue_name)
            .await
        {
            error!(url = %self.url, error = %error, "failed to persist exhausted callback");
        } else {
            error!(
                url = %self.url,
                queue_name = %self.queue_name,
                status = self.last_status,
                "retries exhausted, callback persisted"
            );
        }
    }
}

/// Applies the success contract: HTTP 200 and a body acknowledging with
/// `error_code == 0`. Everything else, including transport errors and
/// malformed bodies, is a failure.
fn classify(result: &Result<CallbackResponse, DeliveryError>) -> Verdict {
    match result {
        Ok(response) if response.status == 200 => {
            match serde_json::from_str::<CallbackAck>(&response.body) {
                Ok(ack) if ack.error_code == 0 => Verdict::Delivered,
                _ => Verdict::Failed { status: 200, body: response.body.clone() },
            }
        },
        Ok(response) => {
            Verdict::Failed { status: i64::from(response.status), body: response.body.clone() }
        },
        Err(error) => Verdict::Failed { status: 0, body: error.to_string() },
    }
}

fn build_record(
    spec: &ConsumerSpec,
    message: &InboundMessage,
    attempt: &Result<CallbackResponse, DeliveryError>,
    responded_at: DateTime<Utc>,
) -> DeliveryRecord {
    let (status, body, error) = match attempt {
        Ok(response) => (i64::from(response.status), response.body.clone(), None),
        Err(e) => (0, String::new(), Some(e.to_string())),
    };

    DeliveryRecord {
        message_id: message.message_id.clone(),
        exchange_name: spec.exchange_name.clone(),
        queue_name: spec.queue_name.clone(),
        routing_key: spec.routing_key.clone(),
        queue_data: String::from_utf8_lossy(&message.payload).into_owned(),
        callback: spec.callback.clone(),
        callback_status_code: status,
        callback_data: body,
        callback_error: error,
        receive_time: message.received_at,
        response_time: responded_at,
    }
}
