// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical routing key construction: `<org>.<service>.<event>.<version>`.

/// Build a canonical routing key from its four segments.
///
/// ```
/// use cam_events::routing::routing_key;
/// assert_eq!(routing_key("cam", "artifact", "created", "v1"), "cam.artifact.created.v1");
/// ```
#[must_use]
pub fn routing_key(org: &str, service: &str, event: &str, version: &str) -> String {
    format!("{org}.{service}.{event}.{version}")
}

/// Well-known service segments used across the platform's routing keys.
pub mod service {
    /// Artifact store events.
    pub const ARTIFACT: &str = "artifact";
    /// Capability / pack registry events.
    pub const CAPABILITY: &str = "capability";
    /// Run orchestrator events.
    pub const LEARNING_SERVICE: &str = "learning-service";
}

/// Workspace lifecycle events published by an external platform component
/// and consumed here to drive parent-doc bootstrap.
pub mod workspace_routing_key {
    use super::routing_key;

    /// `platform.workspace.created.v1`
    #[must_use]
    pub fn created() -> String {
        routing_key("platform", "workspace", "created", "v1")
    }
    /// `platform.workspace.updated.v1`
    #[must_use]
    pub fn updated() -> String {
        routing_key("platform", "workspace", "updated", "v1")
    }
    /// `platform.workspace.deleted.v1`
    #[must_use]
    pub fn deleted() -> String {
        routing_key("platform", "workspace", "deleted", "v1")
    }
}
