// SPDX-License-Identifier: MIT OR Apache-2.0
//! Consumer-side idempotency and decode-failure handling (§4.6, §5).
//!
//! Consumers subscribe to `platform.workspace.{created,updated,deleted}.v1`
//! and dedupe by `(run_id, event, kind, natural_key)`; a message that fails
//! to decode is acked without requeue to avoid poison-pill loops, and a
//! handler error is logged and the message is still acked (processing is
//! "logs-and-continues", never a redelivery storm).

use std::collections::HashSet;
use std::sync::Mutex;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use serde::Deserialize;
use tracing::{error, warn};

use crate::publisher::EXCHANGE_NAME;

/// The subset of an event envelope a consumer needs for dedupe.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupeKey {
    /// Run id that produced this event, if applicable.
    #[serde(default)]
    pub run_id: String,
    /// Event name segment of the routing key.
    #[serde(default)]
    pub event: String,
    /// Kind id the event concerns, if applicable.
    #[serde(default)]
    pub kind: String,
    /// Natural key the event concerns, if applicable.
    #[serde(default)]
    pub natural_key: String,
}

impl DedupeKey {
    fn tuple(&self) -> (String, String, String, String) {
        (self.run_id.clone(), self.event.clone(), self.kind.clone(), self.natural_key.clone())
    }
}

/// Tracks seen `(run_id, event, kind, natural_key)` tuples in-process so a
/// redelivered at-least-once message is processed at most once.
#[derive(Default)]
pub struct Deduper {
    seen: Mutex<HashSet<(String, String, String, String)>>,
}

impl Deduper {
    /// Create an empty deduper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a key is observed, `false` on repeats.
    pub fn observe(&self, key: &DedupeKey) -> bool {
        let mut seen = self.seen.lock().expect("deduper mutex poisoned");
        seen.insert(key.tuple())
    }

    /// Number of distinct keys observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().expect("deduper mutex poisoned").len()
    }

    /// Whether no keys have been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of processing a single delivery, used only for tests/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Decoded, deduped, and handled without error.
    Handled,
    /// Decoded but already seen; skipped, still acked.
    Duplicate,
    /// Failed to decode as JSON; acked without requeue.
    DecodeFailed,
    /// Decoded and novel, but the handler returned an error; logged, still acked.
    HandlerError,
}

/// Decode `body`, dedupe, and invoke `handle` on first sight. The message is
/// always considered "settled" by the caller regardless of outcome (ack, not
/// nack-with-requeue) to avoid poison-pill redelivery loops.
pub fn process_delivery(
    deduper: &Deduper,
    body: &[u8],
    handle: impl FnOnce(&serde_json::Value) -> Result<(), String>,
) -> ProcessOutcome {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping undecodable event message");
            return ProcessOutcome::DecodeFailed;
        }
    };
    let key: DedupeKey = match serde_json::from_value(value.clone()) {
        Ok(k) => k,
        Err(_) => DedupeKey { run_id: String::new(), event: String::new(), kind: String::new(), natural_key: String::new() },
    };
    if !deduper.observe(&key) {
        return ProcessOutcome::Duplicate;
    }
    match handle(&value) {
        Ok(()) => ProcessOutcome::Handled,
        Err(e) => {
            error!(error = %e, "event handler failed; message still acked");
            ProcessOutcome::HandlerError
        }
    }
}

/// Declare a durable, exclusive queue bound to `routing_keys` on the shared
/// topic exchange and return a consumer over it.
pub async fn subscribe(
    channel: &Channel,
    queue_name: &str,
    routing_keys: &[&str],
) -> Result<Consumer, lapin::Error> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    for rk in routing_keys {
        channel
            .queue_bind(queue_name, EXCHANGE_NAME, rk, QueueBindOptions::default(), FieldTable::default())
            .await?;
    }
    channel
        .basic_consume(queue_name, "cam-consumer", BasicConsumeOptions::default(), FieldTable::default())
        .await
}

/// Drive a consumer to completion, settling every delivery per
/// [`process_delivery`]'s ack-always policy. Returns once the consumer
/// stream ends (connection closed).
pub async fn run_consumer(
    mut consumer: Consumer,
    deduper: &Deduper,
    mut handle: impl FnMut(&serde_json::Value) -> Result<(), String>,
) {
    while let Some(delivery) = consumer.next().await {
        let Ok(delivery) = delivery else { continue };
        let outcome = process_delivery(deduper, &delivery.data, |v| handle(v));
        let ack_result = match outcome {
            ProcessOutcome::DecodeFailed => {
                delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await
            }
            _ => delivery.ack(BasicAckOptions::default()).await,
        };
        if let Err(e) = ack_result {
            error!(error = %e, "failed to settle delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failure_is_reported_distinctly() {
        let deduper = Deduper::new();
        let outcome = process_delivery(&deduper, b"not json", |_| Ok(()));
        assert_eq!(outcome, ProcessOutcome::DecodeFailed);
    }

    #[test]
    fn duplicate_key_is_skipped_on_redelivery() {
        let deduper = Deduper::new();
        let body = br#"{"run_id":"r1","event":"created","kind":"cam.cobol.program","natural_key":"k1"}"#;
        let first = process_delivery(&deduper, body, |_| Ok(()));
        let second = process_delivery(&deduper, body, |_| Ok(()));
        assert_eq!(first, ProcessOutcome::Handled);
        assert_eq!(second, ProcessOutcome::Duplicate);
        assert_eq!(deduper.len(), 1);
    }

    #[test]
    fn handler_error_is_still_settled() {
        let deduper = Deduper::new();
        let body = br#"{"run_id":"r1","event":"created","kind":"k","natural_key":"n"}"#;
        let outcome = process_delivery(&deduper, body, |_| Err("boom".to_string()));
        assert_eq!(outcome, ProcessOutcome::HandlerError);
    }
}
