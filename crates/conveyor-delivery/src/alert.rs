//! Best-effort failure alerts to a chat-room webhook.
//!
//! A consumer with an alert token gets a markdown notification on every
//! failed initial delivery. Webhook errors are logged and swallowed; alerting
//! never influences the delivery outcome.

use serde_json::json;
use tracing::{debug, warn};

use conveyor_core::ConsumerSpec;

use crate::client::CallbackClient;

/// Default chat-robot endpoint; the token is appended per consumer.
pub const DEFAULT_WEBHOOK_BASE: &str = "https://oapi.dingtalk.com/robot/send";

/// Sends failure notifications to the chat-room webhook.
#[derive(Debug, Clone)]
pub struct Alerter {
    client: CallbackClient,
    webhook_base: String,
}

impl Alerter {
    /// Creates an alerter posting to the given webhook base URL.
    pub fn new(client: CallbackClient, webhook_base: impl Into<String>) -> Self {
        Self { client, webhook_base: webhook_base.into() }
    }

    /// Notifies the consumer's chat room about a failed delivery.
    ///
    /// No-op when the consumer carries no alert token. Errors are logged and
    /// ignored.
    pub async fn notify_failure(&self, spec: &ConsumerSpec, status: i64, response_body: &str) {
        let Some(token) = spec.alert_token.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };

        let title = format!("callback failed: {}", spec.name);
        let content = format!(
            "### callback failed\n\
             - consumer: {} ({})\n\
             - description: {}\n\
             - exchange: {}\n\
             - routing key: {}\n\
             - retry mode: {}\n\
             - status code: {}\n\
             - callback: {}\n\
             - response: {}",
            spec.name,
            spec.id,
            spec.description,
            spec.exchange_name,
            spec.routing_key,
            if spec.retry_mode.is_empty() { "(fallback)" } else { &spec.retry_mode },
            status,
            spec.callback,
            response_body,
        );

        let payload = json!({
            "msgtype": "markdown",
            "markdown": { "title": title, "content": content },
        });

        let url = format!("{}?access_token={}", self.webhook_base, token);
        match self.client.post_json(&url, &payload).await {
            Ok(response) if response.status == 200 => {
                debug!(consumer_id = %spec.id, "failure alert delivered");
            },
            Ok(response) => {
                warn!(
                    consumer_id = %spec.id,
                    status = response.status,
                    body = %response.body,
                    "failure alert rejected by webhook"
                );
            },
            Err(error) => {
                warn!(consumer_id = %spec.id, error = %error, "failure alert failed");
            },
        }
    }
}
