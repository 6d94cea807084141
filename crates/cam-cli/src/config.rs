// SPDX-License-Identifier: MIT OR Apache-2.0
//! CLI-local configuration: which daemon to talk to and where to look for
//! locally-authored kind/pack definitions when running a playbook in-process.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resolved CLI configuration, layered from defaults, an optional
/// `cam-cli.toml`, and `CAM_CLI_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CliConfig {
    /// Base URL of a running `cam-daemon` the `registry`/`store`/`run watch`/
    /// `run cancel` subcommands talk to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_url: Option<String>,
    /// Directory `run start` resolves relative kind/pack file paths against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<String>,
}

/// Errors that can occur while loading or validating a [`CliConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `daemon_url` does not look like an `http(s)://` URL.
    InvalidDaemonUrl {
        /// The offending value.
        url: String,
    },
    /// `definitions_dir` does not exist on disk.
    MissingDefinitionsDir {
        /// The offending path.
        path: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidDaemonUrl { url } => {
                write!(f, "daemon_url '{url}' must start with http:// or https://")
            }
            ConfigError::MissingDefinitionsDir { path } => {
                write!(f, "definitions_dir '{path}' does not exist")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load a [`CliConfig`] from an optional TOML file, then overlay `CAM_CLI_*`
/// environment variables. A missing file is not an error — defaults apply.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CliConfig> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", p.display()))?;
            toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", p.display()))?
        }
        None => CliConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `CAM_CLI_DAEMON_URL`/`CAM_CLI_DEFINITIONS_DIR` overrides in place.
pub fn apply_env_overrides(config: &mut CliConfig) {
    if let Ok(v) = std::env::var("CAM_CLI_DAEMON_URL") {
        config.daemon_url = Some(v);
    }
    if let Ok(v) = std::env::var("CAM_CLI_DEFINITIONS_DIR") {
        config.definitions_dir = Some(v);
    }
}

/// Check the resolved config for problems that would make a later command
/// fail confusingly.
pub fn validate_config(config: &CliConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    if let Some(url) = &config.daemon_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(ConfigError::InvalidDaemonUrl { url: url.clone() });
        }
    }
    if let Some(dir) = &config.definitions_dir {
        if !Path::new(dir).is_dir() {
            errors.push(ConfigError::MissingDefinitionsDir { path: dir.clone() });
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Resolve the daemon base URL: `--daemon-url` flag, else config, else the
/// conventional local default.
#[must_use]
pub fn resolve_daemon_url(flag: Option<String>, config: &CliConfig) -> String {
    flag.or_else(|| config.daemon_url.clone())
        .unwrap_or_else(|| "http://127.0.0.1:8088".to_string())
}

/// Resolve a possibly-relative definitions path against the configured
/// `definitions_dir`, if set.
#[must_use]
pub fn resolve_definitions_path(raw: &str, config: &CliConfig) -> PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match &config.definitions_dir {
        Some(dir) => Path::new(dir).join(p),
        None => p.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_none_returns_defaults() {
        let config = load_config(None).unwrap();
        assert!(config.daemon_url.is_none());
        assert!(config.definitions_dir.is_none());
    }

    #[test]
    fn resolve_daemon_url_prefers_flag_over_config() {
        let config = CliConfig { daemon_url: Some("http://cfg:1".into()), ..Default::default() };
        assert_eq!(resolve_daemon_url(Some("http://flag:2".into()), &config), "http://flag:2");
        assert_eq!(resolve_daemon_url(None, &config), "http://cfg:1");
    }

    #[test]
    fn resolve_daemon_url_falls_back_to_default() {
        let config = CliConfig::default();
        assert_eq!(resolve_daemon_url(None, &config), "http://127.0.0.1:8088");
    }

    #[test]
    fn validate_rejects_non_http_daemon_url() {
        let config = CliConfig { daemon_url: Some("ftp://nope".into()), ..Default::default() };
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::InvalidDaemonUrl { .. })));
    }

    #[test]
    fn validate_rejects_missing_definitions_dir() {
        let config = CliConfig { definitions_dir: Some("/no/such/dir".into()), ..Default::default() };
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::MissingDefinitionsDir { .. })));
    }

    #[test]
    fn resolve_definitions_path_joins_relative() {
        let config = CliConfig { definitions_dir: Some("/defs".into()), ..Default::default() };
        assert_eq!(resolve_definitions_path("pack.json", &config), PathBuf::from("/defs/pack.json"));
    }

    #[test]
    fn resolve_definitions_path_keeps_absolute() {
        let config = CliConfig::default();
        assert_eq!(resolve_definitions_path("/abs/pack.json", &config), PathBuf::from("/abs/pack.json"));
    }
}
