// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the capability-driven
//! learning platform.
//!
//! Every error raised across the Kind Registry, Artifact Store, Capability
//! Registry, Run Orchestrator, and MCP Invoker carries a [`ErrorCode`] (a
//! machine-readable, stable string tag), a human-readable message, an
//! optional cause chain, and arbitrary key-value context. Use the builder
//! returned by [`CamError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Kind registry: unknown kinds, schema validation, migration.
    Registry,
    /// Artifact store: concurrency, preconditions, not-found.
    Store,
    /// Capability / pack / playbook resolution.
    Capability,
    /// MCP transport (HTTP or STDIO) errors.
    Transport,
    /// Run orchestration and step execution.
    Run,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registry => "registry",
            Self::Store => "store",
            Self::Capability => "capability",
            Self::Transport => "transport",
            Self::Run => "run",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string guaranteed not
/// to change across patch releases. [`ErrorCode::http_status`] gives the
/// stable REST mapping used by `cam-daemon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Registry --
    /// `data` does not conform to the kind's JSON Schema.
    SchemaValidation,
    /// The requested kind id/alias does not resolve.
    UnknownKind,
    /// A migration could not reach the requested target version within the
    /// hop budget.
    MigrationStalled,

    // -- Store --
    /// Workspace or artifact not found (or soft-deleted and
    /// `include_deleted` was not set).
    NotFound,
    /// `If-Match` / `expected_version` precondition failed.
    PreconditionFailed,
    /// A write conflicts with existing unique state (e.g. duplicate pack
    /// `(key, version)`).
    Conflict,

    // -- Capability --
    /// Unknown capability id.
    UnknownCapability,
    /// Unknown capability pack `(key, version)`.
    UnknownPack,
    /// Playbook id not found within a pack.
    PlaybookNotFound,
    /// Tool key not found within a pack's tool table.
    ToolUnknown,

    // -- Transport --
    /// A tool call exceeded its configured timeout.
    TransportTimeout,
    /// The remote tool returned a structured error.
    ToolError,
    /// Tool arguments failed schema validation before dispatch.
    SchemaViolation,
    /// The persistent STDIO child process exited unexpectedly.
    ProcessExited,
    /// Failed to establish a connection (spawn or HTTP connect).
    ConnectFailure,

    // -- Run --
    /// A step failed to produce a required kind and partial failure is not
    /// allowed.
    StepGateFailed,
    /// The run was cancelled before completion.
    RunCancelled,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Generic --
    /// Malformed or semantically invalid request parameters.
    InvalidParams,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SchemaValidation | Self::UnknownKind | Self::MigrationStalled => {
                ErrorCategory::Registry
            }
            Self::NotFound | Self::PreconditionFailed | Self::Conflict => ErrorCategory::Store,
            Self::UnknownCapability
            | Self::UnknownPack
            | Self::PlaybookNotFound
            | Self::ToolUnknown => ErrorCategory::Capability,
            Self::TransportTimeout
            | Self::ToolError
            | Self::SchemaViolation
            | Self::ProcessExited
            | Self::ConnectFailure => ErrorCategory::Transport,
            Self::StepGateFailed | Self::RunCancelled => ErrorCategory::Run,
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::InvalidParams | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation (e.g. `"SCHEMA_VALIDATION"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaValidation => "SCHEMA_VALIDATION",
            Self::UnknownKind => "UNKNOWN_KIND",
            Self::MigrationStalled => "MIGRATION_STALLED",
            Self::NotFound => "NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::Conflict => "CONFLICT",
            Self::UnknownCapability => "UNKNOWN_CAPABILITY",
            Self::UnknownPack => "UNKNOWN_PACK",
            Self::PlaybookNotFound => "PLAYBOOK_NOT_FOUND",
            Self::ToolUnknown => "TOOL_UNKNOWN",
            Self::TransportTimeout => "TRANSPORT_TIMEOUT",
            Self::ToolError => "TOOL_ERROR",
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::ProcessExited => "PROCESS_EXITED",
            Self::ConnectFailure => "CONNECT_FAILURE",
            Self::StepGateFailed => "STEP_GATE_FAILED",
            Self::RunCancelled => "RUN_CANCELLED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::Internal => "INTERNAL",
        }
    }

    /// The stable HTTP status code this error maps to on the REST surface
    /// (§7 of the platform spec).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SchemaValidation | Self::SchemaViolation => 422,
            Self::UnknownKind
            | Self::NotFound
            | Self::UnknownCapability
            | Self::UnknownPack
            | Self::PlaybookNotFound
            | Self::ToolUnknown => 404,
            Self::PreconditionFailed => 412,
            Self::Conflict => 409,
            Self::InvalidParams => 400,
            Self::TransportTimeout
            | Self::ToolError
            | Self::ProcessExited
            | Self::ConnectFailure
            | Self::MigrationStalled
            | Self::StepGateFailed
            | Self::RunCancelled
            | Self::ConfigInvalid
            | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CamError
// ---------------------------------------------------------------------------

/// Unified platform error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// ```
/// use cam_error::{CamError, ErrorCode};
///
/// let err = CamError::new(ErrorCode::TransportTimeout, "timed out after 30 s")
///     .with_context("tool", "parse_tree")
///     .with_context("timeout_ms", 30_000);
/// ```
pub struct CamError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl CamError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Construct the `{"detail": ...}` body used on the REST surface (§7).
    pub fn detail_body(&self) -> serde_json::Value {
        if self.context.is_empty() {
            serde_json::json!({ "detail": self.message })
        } else {
            serde_json::json!({
                "detail": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "context": self.context,
                }
            })
        }
    }
}

impl fmt::Debug for CamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CamError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for CamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`CamError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CamErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&CamError> for CamErrorDto {
    fn from(err: &CamError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<CamErrorDto> for CamError {
    fn from(dto: CamErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::SchemaValidation,
        ErrorCode::UnknownKind,
        ErrorCode::MigrationStalled,
        ErrorCode::NotFound,
        ErrorCode::PreconditionFailed,
        ErrorCode::Conflict,
        ErrorCode::UnknownCapability,
        ErrorCode::UnknownPack,
        ErrorCode::PlaybookNotFound,
        ErrorCode::ToolUnknown,
        ErrorCode::TransportTimeout,
        ErrorCode::ToolError,
        ErrorCode::SchemaViolation,
        ErrorCode::ProcessExited,
        ErrorCode::ConnectFailure,
        ErrorCode::StepGateFailed,
        ErrorCode::RunCancelled,
        ErrorCode::ConfigInvalid,
        ErrorCode::InvalidParams,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = CamError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = CamError::new(ErrorCode::UnknownKind, "no such kind");
        assert_eq!(err.to_string(), "[UNKNOWN_KIND] no such kind");
    }

    #[test]
    fn display_with_context() {
        let err = CamError::new(ErrorCode::TransportTimeout, "timed out")
            .with_context("timeout_ms", 5000);
        let s = err.to_string();
        assert!(s.starts_with("[TRANSPORT_TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
        assert!(s.contains("5000"));
    }

    #[test]
    fn debug_impl() {
        let err = CamError::new(ErrorCode::Conflict, "nope");
        let dbg = format!("{err:?}");
        assert!(dbg.contains("Conflict"));
        assert!(dbg.contains("nope"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = CamError::new(ErrorCode::ConfigInvalid, "init failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn http_status_mapping_matches_spec() {
        assert_eq!(ErrorCode::SchemaValidation.http_status(), 422);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::PreconditionFailed.http_status(), 412);
        assert_eq!(ErrorCode::Conflict.http_status(), 409);
        assert_eq!(ErrorCode::InvalidParams.http_status(), 400);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn detail_body_without_context() {
        let err = CamError::new(ErrorCode::NotFound, "missing artifact");
        assert_eq!(err.detail_body(), serde_json::json!({"detail": "missing artifact"}));
    }

    #[test]
    fn detail_body_with_context() {
        let err = CamError::new(ErrorCode::PreconditionFailed, "version mismatch")
            .with_context("expected", 2)
            .with_context("actual", 3);
        let body = err.detail_body();
        assert_eq!(body["detail"]["code"], "PRECONDITION_FAILED");
        assert_eq!(body["detail"]["context"]["expected"], 2);
    }

    #[test]
    fn registry_codes_categorised() {
        assert_eq!(ErrorCode::SchemaValidation.category(), ErrorCategory::Registry);
        assert_eq!(ErrorCode::UnknownKind.category(), ErrorCategory::Registry);
        assert_eq!(ErrorCode::MigrationStalled.category(), ErrorCategory::Registry);
    }

    #[test]
    fn store_codes_categorised() {
        assert_eq!(ErrorCode::NotFound.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::PreconditionFailed.category(), ErrorCategory::Store);
        assert_eq!(ErrorCode::Conflict.category(), ErrorCategory::Store);
    }

    #[test]
    fn capability_codes_categorised() {
        assert_eq!(ErrorCode::UnknownCapability.category(), ErrorCategory::Capability);
        assert_eq!(ErrorCode::UnknownPack.category(), ErrorCategory::Capability);
        assert_eq!(ErrorCode::PlaybookNotFound.category(), ErrorCategory::Capability);
        assert_eq!(ErrorCode::ToolUnknown.category(), ErrorCategory::Capability);
    }

    #[test]
    fn transport_codes_categorised() {
        assert_eq!(ErrorCode::TransportTimeout.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::ToolError.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::SchemaViolation.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::ProcessExited.category(), ErrorCategory::Transport);
        assert_eq!(ErrorCode::ConnectFailure.category(), ErrorCategory::Transport);
    }

    #[test]
    fn run_codes_categorised() {
        assert_eq!(ErrorCode::StepGateFailed.category(), ErrorCategory::Run);
        assert_eq!(ErrorCode::RunCancelled.category(), ErrorCategory::Run);
    }

    #[test]
    fn builder_with_context_multiple_keys() {
        let err = CamError::new(ErrorCode::TransportTimeout, "timeout")
            .with_context("tool", "parse_tree")
            .with_context("timeout_ms", 30_000)
            .with_context("retries", 3);
        assert_eq!(err.context.len(), 3);
        assert_eq!(err.context["tool"], serde_json::json!("parse_tree"));
    }

    #[test]
    fn builder_with_source() {
        let src = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = CamError::new(ErrorCode::UnknownCapability, "denied").with_source(src);
        assert!(err.source.is_some());
        assert_eq!(err.source.as_ref().unwrap().to_string(), "access denied");
    }

    #[test]
    fn category_shorthand() {
        let err = CamError::new(ErrorCode::ConfigInvalid, "bad");
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::SchemaValidation;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""SCHEMA_VALIDATION""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn error_category_serde_roundtrip() {
        let cat = ErrorCategory::Store;
        let json = serde_json::to_string(&cat).unwrap();
        assert_eq!(json, r#""store""#);
        let back: ErrorCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cat);
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = CamError::new(ErrorCode::ToolError, "tool failed").with_context("tool", "x");
        let dto: CamErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: CamErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn dto_roundtrip_with_source() {
        let src = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = CamError::new(ErrorCode::ProcessExited, "crash").with_source(src);
        let dto: CamErrorDto = (&err).into();
        assert_eq!(dto.source_message.as_deref(), Some("pipe broke"));
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = CamError::new(ErrorCode::NotFound, "missing").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate as_str: {}", code.as_str());
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_display_matches_as_str() {
        for code in ALL_CODES {
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn error_code_count() {
        assert_eq!(ALL_CODES.len(), 20);
    }
}
