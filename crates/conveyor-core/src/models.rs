//! Domain models for consumer definitions and delivery records.
//!
//! A `ConsumerSpec` is the stored configuration for one queue-to-callback
//! pipeline; everything a worker needs is read from it once at start and never
//! mutated afterwards.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    retry::RetrySchedule,
};

/// Whether a consumer should have live workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerStatus {
    /// Workers are reconciled up to `queue_count`.
    Running,
    /// No workers; the definition is retained.
    Stopped,
}

impl ConsumerStatus {
    /// True when the definition should have live workers.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for ConsumerStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            other => Err(CoreError::invalid(format!("unknown consumer status {other:?}"))),
        }
    }
}

/// Deferred-retry topology attached to a consumer.
///
/// The death queue carries a per-message TTL and dead-letters expired messages
/// back to the consumer's primary exchange and routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathQueueSpec {
    /// Name of the auxiliary queue holding deferred messages.
    #[serde(rename = "x_death_queue_name")]
    pub queue_name: String,
    /// Exchange the death queue is bound to.
    pub bind_exchange: String,
    /// Routing key for the death-queue binding.
    pub bind_routing_key: String,
    /// Message TTL as a human-readable duration (`"30s"`, `"5m"`).
    #[serde(rename = "x_message_ttl")]
    pub ttl: String,
}

impl DeathQueueSpec {
    /// Parses the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the TTL does not parse or is
    /// zero.
    pub fn ttl(&self) -> Result<Duration> {
        let ttl = humantime::parse_duration(self.ttl.trim())
            .map_err(|e| CoreError::invalid(format!("bad death queue TTL {:?}: {e}", self.ttl)))?;
        if ttl.is_zero() {
            return Err(CoreError::invalid("death queue TTL must be positive"));
        }
        Ok(ttl)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_name.is_empty()
            || self.bind_exchange.is_empty()
            || self.bind_routing_key.is_empty()
            || self.ttl.is_empty()
        {
            return Err(CoreError::invalid(
                "death queue requires name, bind exchange, bind routing key and TTL",
            ));
        }
        self.ttl().map(|_| ())
    }
}

/// Stored configuration for one queue-to-callback pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    /// Stable opaque identifier (stringified row id).
    #[serde(default)]
    pub id: String,
    /// Human-readable name, used in logs and alerts.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Queue the worker consumes from.
    pub queue_name: String,
    /// Topic exchange the queue is bound to.
    pub exchange_name: String,
    /// Topic routing pattern for the binding.
    pub routing_key: String,
    /// Virtual host override; empty means the broker-config vhost.
    #[serde(default)]
    pub vhost: String,
    /// Absolute HTTP URL message bodies are POSTed to.
    pub callback: String,
    /// Whether workers should be live.
    pub status: ConsumerStatus,
    /// Broker prefetch window per channel; 0 is coerced to 1 at start.
    #[serde(default)]
    pub qos_prefetch: u16,
    /// Decode the message body from base64 before dispatch.
    #[serde(default)]
    pub auto_decode_base64: bool,
    /// Parallel worker multiplicity on the same queue; 0 is coerced to 1.
    #[serde(default)]
    pub queue_count: u32,
    /// Optional deferred-retry topology.
    #[serde(default)]
    pub death_queue: Option<DeathQueueSpec>,
    /// Comma-separated retry delays; empty means the built-in fallback.
    #[serde(default)]
    pub retry_mode: String,
    /// Chat-robot webhook token for failure alerts.
    #[serde(default)]
    pub alert_token: Option<String>,
}

impl ConsumerSpec {
    /// Validates the definition for storage and worker start.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid("consumer name must not be empty"));
        }
        if self.queue_name.is_empty() {
            return Err(CoreError::invalid("queue name must not be empty"));
        }
        if self.exchange_name.is_empty() {
            return Err(CoreError::invalid("exchange name must not be empty"));
        }
        if !(self.callback.starts_with("http://") || self.callback.starts_with("https://")) {
            return Err(CoreError::invalid(format!(
                "callback {:?} must be an absolute HTTP URL",
                self.callback
            )));
        }
        if let Some(death_queue) = &self.death_queue {
            death_queue.validate()?;
        }
        RetrySchedule::parse(&self.retry_mode)?;
        Ok(())
    }

    /// Prefetch with the stored-zero coercion applied.
    pub fn effective_prefetch(&self) -> u16 {
        self.qos_prefetch.max(1)
    }

    /// Worker multiplicity with the stored-zero coercion applied.
    pub fn effective_queue_count(&self) -> u32 {
        self.queue_count.max(1)
    }

    /// The retry schedule this consumer's failures are driven through.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the stored `retry_mode` is
    /// malformed (possible only for rows written before validation).
    pub fn retry_schedule(&self) -> Result<RetrySchedule> {
        RetrySchedule::resolve(&self.retry_mode)
    }
}

/// Broker connection settings stored in the singleton `rabbitmq_config` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker hostname.
    pub host: String,
    /// AMQP port.
    pub port: u16,
    /// Default virtual host.
    pub vhost: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

/// Durable record of a delivery whose retries were all exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCallback {
    /// Row id.
    pub id: i64,
    /// Callback URL of the original request.
    pub request_url: String,
    /// Body of the original request.
    pub request_data: String,
    /// Status code of the final attempt; 0 for transport errors.
    pub response_code: i64,
    /// Response body of the final attempt.
    pub response_content: String,
    /// Queue the message was consumed from.
    pub queue_name: String,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

/// The success contract a callback must answer with.
///
/// A delivery counts as delivered only when the endpoint returns HTTP 200 and
/// a body deserializing to this with `error_code == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    /// Zero on success; any other value is a failure.
    pub error_code: i64,
    /// Human-readable detail.
    #[serde(default)]
    pub error_msg: String,
}
