// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event Bus Adapter (§4.6): a durable topic-exchange publisher with the
//! platform's canonical routing key scheme, plus consumer-side idempotency
//! helpers for at-least-once delivery.
//!
//! Publishing is best-effort: [`publisher::EventPublisher::publish`] never
//! fails the triggering write (§7) — it logs and returns `false`. Consumers
//! dedupe by `(run_id, event, kind, natural_key)` and never requeue a
//! message that failed to decode, to avoid poison-pill loops (§5).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod publisher;
pub mod routing;

pub use consumer::{process_delivery, run_consumer, subscribe, Deduper, ProcessOutcome};
pub use publisher::{EventPublisher, OutboundEvent, EXCHANGE_NAME};
pub use routing::routing_key;

use serde::Serialize;

/// Convenience builder for the `cam.artifact.*.v1` family of events (§6.3).
pub fn artifact_event(
    event: &str,
    workspace_id: &str,
    artifact: &impl Serialize,
) -> OutboundEvent {
    let payload = serde_json::json!({
        "workspace_id": workspace_id,
        "artifact": artifact,
    });
    OutboundEvent::new(routing_key("cam", "artifact", event, "v1"), payload)
}

/// Convenience builder for the `cam.learning-service.*.v1` family of events
/// emitted at run lifecycle boundaries (§6.3, §5 ordering: `started` first,
/// `completed`/`failed` last).
pub fn run_lifecycle_event(event: &str, run_id: &str, workspace_id: &str) -> OutboundEvent {
    let payload = serde_json::json!({
        "run_id": run_id,
        "workspace_id": workspace_id,
    });
    OutboundEvent::new(routing_key("cam", "learning-service", event, "v1"), payload)
}

/// Convenience builder for the `cam.capability.*.v1` family of events.
pub fn capability_event(event: &str, payload: serde_json::Value) -> OutboundEvent {
    OutboundEvent::new(routing_key("cam", "capability", event, "v1"), payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_event_uses_cam_artifact_namespace() {
        let ev = artifact_event("created", "ws_1", &serde_json::json!({"artifact_id": "a1"}));
        assert_eq!(ev.routing_key, "cam.artifact.created.v1");
    }

    #[test]
    fn run_lifecycle_event_carries_run_and_workspace() {
        let ev = run_lifecycle_event("started", "run_1", "ws_1");
        assert_eq!(ev.routing_key, "cam.learning-service.started.v1");
        assert_eq!(ev.payload["run_id"], "run_1");
    }
}
