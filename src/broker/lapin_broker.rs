use super::Broker;
use crate::error::Result;
use async_trait::async_trait;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// `Broker` backed by a RabbitMQ-compatible AMQP 0-9-1 server via `lapin`.
///
/// Each queue named in SPEC_FULL.md §6 (`audio.transcribe`, `audio.summarize`)
/// is a durable topic exchange; every worker role then declares its OWN
/// durable queue bound to the shared exchange under its exact routing
/// key(s), rather than one catch-all queue shared by every role. This keeps
/// the "separate worker pools subscribed to distinct named queues" property
/// from §5 while still matching the exchange/routing-key wire contract of
/// §6 — the standard RabbitMQ topic-exchange-with-per-consumer-queue
/// pattern, used here in place of the source system's Celery task-routing
/// table.
pub struct LapinBroker {
    channel: Channel,
}

impl LapinBroker {
    pub async fn connect(broker_url: &str) -> Result<Self> {
        let connection = Connection::connect(broker_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok(LapinBroker { channel })
    }

    /// Declares a topic exchange if it does not already exist. Idempotent.
    pub async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Declares a durable queue bound to `exchange` under each of
    /// `routing_keys`, for a single worker role to consume. A role that
    /// handles more than one message type on the same queue (the summarizer,
    /// per §2/§6) binds it under several exact routing keys rather than a
    /// wildcard, so it never receives traffic meant for another role.
    pub async fn declare_role_queue(
        &self,
        exchange: &str,
        queue: &str,
        routing_keys: &[&str],
    ) -> Result<()> {
        self.declare_exchange(exchange).await?;

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for routing_key in routing_keys {
            self.channel
                .queue_bind(
                    queue,
                    exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(())
    }

    /// Opens a consumer on `queue` with `prefetch` unacknowledged deliveries
    /// in flight at once (SPEC_FULL.md §5: "prefetch of 1 per worker to
    /// avoid head-of-line blocking"). Acks are issued late, after the
    /// handling pipeline stage returns — a worker process that dies mid-task
    /// leaves its delivery unacked, and RabbitMQ requeues it to another
    /// consumer once the connection drops, which is exactly
    /// `reject_on_worker_lost=true`'s effect without any extra code here.
    pub async fn consume(&self, queue: &str, prefetch: u16, consumer_tag: &str) -> Result<Consumer> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    /// Acknowledges a delivery that was either handled successfully or
    /// whose failure is terminal (non-retriable, or retries exhausted) —
    /// the pipeline stage has already persisted the corresponding failed
    /// status before this is called, so there is nothing further to retry.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    /// Rejects a delivery without requeue, e.g. on a message the worker
    /// cannot even deserialize. No retry is useful for a malformed message.
    pub async fn reject(&self, delivery: &Delivery) -> Result<()> {
        delivery
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Retries a retriable failure up to `max_retries` times with a fixed
    /// `backoff` delay, by sleeping then republishing a copy of the message
    /// to the same exchange/routing key with an incremented `x-retry-count`
    /// header, and acking the original delivery. Plain AMQP `nack(requeue:
    /// true)` has no attempt counter, so retry accounting is carried in the
    /// message itself rather than relied upon from the broker. Returns
    /// `true` if the message was requeued, `false` if retries were already
    /// exhausted (caller should treat the failure as terminal).
    pub async fn retry_or_exhaust(
        &self,
        delivery: &Delivery,
        exchange: &str,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<bool> {
        let attempt = retry_count(delivery) + 1;
        if attempt > max_retries {
            return Ok(false);
        }

        debug!(
            "retrying message on {} (attempt {}/{}) after {:?}",
            exchange, attempt, max_retries, backoff
        );
        tokio::time::sleep(backoff).await;

        let mut headers = delivery
            .properties
            .headers()
            .clone()
            .unwrap_or_default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongUInt(attempt));

        let properties = delivery
            .properties
            .clone()
            .with_headers(headers)
            .with_delivery_mode(2);

        self.channel
            .basic_publish(
                exchange,
                &delivery.routing_key,
                BasicPublishOptions::default(),
                &delivery.data,
                properties,
            )
            .await?
            .await?;

        Ok(true)
    }
}

/// Reads the `x-retry-count` header a prior `retry_or_exhaust` call stamped
/// onto a requeued message; absent on a message's first delivery.
fn retry_count(delivery: &Delivery) -> u32 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(&lapin::types::ShortString::from(RETRY_COUNT_HEADER)))
        .and_then(|value| match value {
            AMQPValue::LongUInt(n) => Some(*n),
            AMQPValue::ShortUInt(n) => Some(*n as u32),
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}

#[async_trait]
impl Broker for LapinBroker {
    async fn publish_raw(
        &self,
        queue: &str,
        routing_key: &str,
        message_id: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent, survives broker restart
            .with_content_type("application/json".into());
        if let Some(id) = message_id {
            properties = properties.with_message_id(id.into());
        }

        self.channel
            .basic_publish(queue, routing_key, BasicPublishOptions::default(), &payload, properties)
            .await?
            .await?;

        Ok(())
    }
}

/// Best-effort logging wrapper used by worker loops: swallows the ack/nack
/// error itself (there is no further recovery possible from an ack
/// failure) while still surfacing it to the logs.
pub async fn ack_or_warn(broker: &LapinBroker, delivery: &Delivery, context: &str) {
    if let Err(e) = broker.ack(delivery).await {
        warn!("failed to ack delivery ({}): {}", context, e);
    }
}
