//! Per-delivery access-log observer.
//!
//! The dispatcher emits one record per delivery after the initial callback
//! returns. Sinks implement [`AccessLog`]; the shipped implementation writes
//! to the structured log, and implementations must not block the pump.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::client::{CLIENT_NAME, CLIENT_VERSION};

/// One delivery as seen at the callback boundary.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    /// Message id from the broker properties, or a generated one.
    pub message_id: String,
    /// Exchange the consumer is bound to.
    pub exchange_name: String,
    /// Queue the message was consumed from.
    pub queue_name: String,
    /// Routing key of the consumer binding.
    pub routing_key: String,
    /// Payload as delivered to the callback (after base64 decoding).
    pub queue_data: String,
    /// Callback URL.
    pub callback: String,
    /// Status code of the initial attempt; 0 for transport errors.
    pub callback_status_code: i64,
    /// Response body of the initial attempt.
    pub callback_data: String,
    /// Transport error of the initial attempt, when there was no response.
    pub callback_error: Option<String>,
    /// When the delivery arrived from the broker.
    pub receive_time: DateTime<Utc>,
    /// When the initial callback returned.
    pub response_time: DateTime<Utc>,
}

/// Write-only observer for delivery records.
#[async_trait::async_trait]
pub trait AccessLog: Send + Sync + std::fmt::Debug {
    /// Records one delivery. Must return promptly and never propagate errors.
    async fn record(&self, record: DeliveryRecord);
}

/// Observer that discards every record.
#[derive(Debug, Default)]
pub struct NoOpAccessLog;

#[async_trait::async_trait]
impl AccessLog for NoOpAccessLog {
    async fn record(&self, _record: DeliveryRecord) {}
}

/// Observer that writes records to the structured log.
#[derive(Debug, Default)]
pub struct TracingAccessLog;

#[async_trait::async_trait]
impl AccessLog for TracingAccessLog {
    async fn record(&self, record: DeliveryRecord) {
        info!(
            target: "conveyor::access",
            message_id = %record.message_id,
            exchange_name = %record.exchange_name,
            queue_name = %record.queue_name,
            routing_key = %record.routing_key,
            queue_data = %record.queue_data,
            request_client = CLIENT_NAME,
            request_client_version = CLIENT_VERSION,
            callback = %record.callback,
            callback_status_code = record.callback_status_code,
            callback_data = %record.callback_data,
            callback_error = record.callback_error.as_deref().unwrap_or(""),
            receive_time = %record.receive_time.to_rfc3339(),
            response_time = %record.response_time.to_rfc3339(),
            "delivery",
        );
    }
}
