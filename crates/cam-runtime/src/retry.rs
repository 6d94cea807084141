// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy for tool-call steps, shared with the MCP Invoker so a step's
//! effective retry/backoff behavior matches what the invoker itself applies
//! at the transport layer.

pub use cam_invoker::{compute_delay, is_retryable, retry_async, RetryConfig, RetryMetadata, RetryOutcome};
