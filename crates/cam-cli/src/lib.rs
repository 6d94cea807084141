// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library surface of the `cam` CLI, split out so integration tests can
//! exercise `config`/`format`/`commands` directly without spawning the
//! binary.

/// Command implementations: REST calls against a daemon and the in-process
/// playbook runner.
pub mod commands;
/// CLI-local configuration (daemon URL, definitions directory).
pub mod config;
/// Output formatting for registry/store/run results.
pub mod format;
