// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable topic-exchange publisher. Best-effort with one retry on a
//! reconnected channel; callers never crash on a `false` return (§4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Name of the durable topic exchange every routing key is published onto.
pub const EXCHANGE_NAME: &str = "cam.events";

/// A single event to publish.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    /// Canonical routing key: `<org>.<service>.<event>.<version>`.
    pub routing_key: String,
    /// JSON payload body.
    pub payload: serde_json::Value,
    /// `x-request-id` / `x-correlation-id` headers, when present upstream.
    pub headers: BTreeMap<String, String>,
}

impl OutboundEvent {
    /// Build an event with no extra headers.
    #[must_use]
    pub fn new(routing_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { routing_key: routing_key.into(), payload, headers: BTreeMap::new() }
    }

    /// Attach `x-request-id`.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.headers.insert("x-request-id".to_string(), id.into());
        self
    }

    /// Attach `x-correlation-id`.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.headers.insert("x-correlation-id".to_string(), id.into());
        self
    }

    fn amqp_headers(&self) -> FieldTable {
        let mut table = FieldTable::default();
        for (k, v) in &self.headers {
            table.insert(
                ShortString::from(k.as_str()),
                AMQPValue::LongString(LongString::from(v.as_str())),
            );
        }
        table
    }
}

/// A durable topic-exchange publisher over a single shared AMQP connection.
///
/// The channel is re-opened under a mutex on failure (§5); publishing never
/// panics or propagates errors to the caller — it returns `false` and logs.
pub struct EventPublisher {
    amqp_url: String,
    channel: Mutex<Option<Channel>>,
}

impl EventPublisher {
    /// Construct a publisher; the connection is opened lazily on first publish.
    #[must_use]
    pub fn new(amqp_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { amqp_url: amqp_url.into(), channel: Mutex::new(None) })
    }

    async fn connect(&self) -> Result<Channel, lapin::Error> {
        let conn =
            Connection::connect(&self.amqp_url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;
        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        // The connection must outlive the channel; lapin channels hold an
        // internal handle back to the connection, but we still need the
        // connection itself kept alive. Leaking it into a background task
        // keeps the process-wide single connection alive for the process
        // lifetime, matching the "one shared channel per process" model.
        tokio::spawn(async move {
            let _ = conn.on_error(|_| {});
        });
        Ok(channel)
    }

    async fn ensure_channel(&self) -> Result<Channel, lapin::Error> {
        let mut guard = self.channel.lock().await;
        if let Some(ch) = guard.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }
        let ch = self.connect().await?;
        *guard = Some(ch.clone());
        Ok(ch)
    }

    async fn invalidate(&self) {
        let mut guard = self.channel.lock().await;
        *guard = None;
    }

    /// Publish `event`. Best-effort: one retry on a freshly reconnected
    /// channel, then logs and returns `false`. Never returns `Err`.
    pub async fn publish(&self, event: &OutboundEvent) -> bool {
        let body = match serde_json::to_vec(&event.payload) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, routing_key = %event.routing_key, "failed to serialize event payload");
                return false;
            }
        };

        for attempt in 1..=2 {
            let channel = match self.ensure_channel().await {
                Ok(ch) => ch,
                Err(e) => {
                    warn!(error = %e, attempt, "failed to obtain AMQP channel");
                    self.invalidate().await;
                    continue;
                }
            };

            let props = BasicProperties::default()
                .with_content_type(ShortString::from("application/json"))
                .with_delivery_mode(2)
                .with_headers(event.amqp_headers());

            match channel
                .basic_publish(
                    EXCHANGE_NAME,
                    &event.routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    props,
                )
                .await
            {
                Ok(_) => {
                    info!(routing_key = %event.routing_key, attempt, "event published");
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, routing_key = %event.routing_key, attempt, "publish failed");
                    self.invalidate().await;
                }
            }
        }
        error!(routing_key = %event.routing_key, "event publish exhausted retries, dropping");
        false
    }
}
