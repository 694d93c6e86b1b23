//! Broker topology declarations.
//!
//! All declarations are idempotent: durable topic exchanges, durable
//! non-exclusive queues, and the death-queue variant carrying dead-letter
//! routing back to the consumer's primary exchange after TTL expiry.

use lapin::{
    options::{
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
        QueueDeleteOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::info;

use conveyor_core::{ConsumerSpec, DeathQueueSpec};

use crate::{amqp_uri, error::BrokerError, BrokerSettings, Result};

/// Declares everything a consumer session needs on its channel.
///
/// Order matters only for the death queue, which must exist before the
/// primary queue starts receiving redeliveries; the primary queue itself is
/// declared plain.
///
/// # Errors
///
/// Returns `BrokerError::Topology` on any failed declaration and
/// `BrokerError::Invalid` when the death-queue TTL cannot be parsed.
pub async fn declare_for_consumer(channel: &Channel, spec: &ConsumerSpec) -> Result<()> {
    channel
        .basic_qos(spec.effective_prefetch(), BasicQosOptions { global: false })
        .await
        .map_err(|e| BrokerError::topology(format!("basic_qos: {e}")))?;

    channel
        .exchange_declare(
            &spec.exchange_name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::topology(format!("exchange {}: {e}", spec.exchange_name)))?;

    if let Some(death_queue) = &spec.death_queue {
        declare_death_queue(channel, spec, death_queue).await?;
    }

    channel
        .queue_declare(
            &spec.queue_name,
            QueueDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::topology(format!("queue {}: {e}", spec.queue_name)))?;

    channel
        .queue_bind(
            &spec.queue_name,
            &spec.exchange_name,
            &spec.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::topology(format!("bind {}: {e}", spec.queue_name)))?;

    Ok(())
}

/// Declares the death queue and its binding.
///
/// The queue dead-letters expired messages back to the consumer's primary
/// exchange and routing key; publishing into it is the caller's business.
pub async fn declare_death_queue(
    channel: &Channel,
    spec: &ConsumerSpec,
    death_queue: &DeathQueueSpec,
) -> Result<()> {
    let ttl = death_queue.ttl()?;
    let ttl_ms = i64::try_from(ttl.as_millis())
        .map_err(|_| BrokerError::Invalid(format!("death queue TTL {:?} overflows", death_queue.ttl)))?;

    let arguments = death_queue_arguments(&spec.exchange_name, &spec.routing_key, ttl_ms);

    channel
        .queue_declare(
            &death_queue.queue_name,
            QueueDeclareOptions { durable: true, ..Default::default() },
            arguments,
        )
        .await
        .map_err(|e| BrokerError::topology(format!("death queue {}: {e}", death_queue.queue_name)))?;

    channel
        .queue_bind(
            &death_queue.queue_name,
            &death_queue.bind_exchange,
            &death_queue.bind_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::topology(format!("bind {}: {e}", death_queue.queue_name)))?;

    info!(
        death_queue = %death_queue.queue_name,
        ttl_ms,
        dead_letter_exchange = %spec.exchange_name,
        "death queue declared"
    );

    Ok(())
}

/// Deletes a consumer's primary queue and, when configured, its death queue.
///
/// Uses a short-lived dedicated connection so deletion works even while the
/// worker is mid-reconnect.
pub async fn delete_consumer_queues(settings: &BrokerSettings, spec: &ConsumerSpec) -> Result<()> {
    let uri = amqp_uri(settings, settings.vhost_for(&spec.vhost));
    let connection = Connection::connect(&uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .queue_delete(&spec.queue_name, QueueDeleteOptions::default())
        .await
        .map_err(|e| BrokerError::topology(format!("delete {}: {e}", spec.queue_name)))?;

    if let Some(death_queue) = &spec.death_queue {
        channel
            .queue_delete(&death_queue.queue_name, QueueDeleteOptions::default())
            .await
            .map_err(|e| {
                BrokerError::topology(format!("delete {}: {e}", death_queue.queue_name))
            })?;
    }

    let _ = connection.close(200, "queue deletion complete").await;
    info!(queue_name = %spec.queue_name, "consumer queues deleted");
    Ok(())
}

/// Arguments configuring dead-letter routing and TTL on the death queue.
fn death_queue_arguments(exchange: &str, routing_key: &str, ttl_ms: i64) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(exchange.into()),
    );
    arguments.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(routing_key.into()),
    );
    arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl_ms));
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn death_queue_arguments_carry_dlx_and_ttl() {
        let arguments = death_queue_arguments("orders", "orders.sync", 30_000);
        let inner = arguments.inner();

        assert_eq!(
            inner.get("x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("orders".into()))
        );
        assert_eq!(
            inner.get("x-dead-letter-routing-key"),
            Some(&AMQPValue::LongString("orders.sync".into()))
        );
        assert_eq!(inner.get("x-message-ttl"), Some(&AMQPValue::LongLongInt(30_000)));
    }

    #[test]
    fn ttl_converts_to_milliseconds() {
        let death_queue = DeathQueueSpec {
            queue_name: "orders.death".to_string(),
            bind_exchange: "orders".to_string(),
            bind_routing_key: "orders.death".to_string(),
            ttl: "90s".to_string(),
        };
        assert_eq!(death_queue.ttl().unwrap().as_millis(), 90_000);
    }
}
