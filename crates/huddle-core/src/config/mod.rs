//! Configuration management for the Huddle suite.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (`~/.huddle/config.toml`)
//! 3. Environment variable overrides (`HUDDLE_` prefix)
//!
//! Peer servers are declared as `[[servers]]` entries; additional peers can
//! be injected per environment with `HUDDLE_SERVER_<NAME>_URL` or
//! `HUDDLE_SERVER_<NAME>_COMMAND`.

mod env_overrides;
mod validation;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_db_path() -> String {
    "~/.huddle/huddle.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    60
}

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Data storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Client pool tunables.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Aggregator tunables and overview sources.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Peer MCP servers available to the pool.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            pool: PoolConfig::default(),
            aggregator: AggregatorConfig::default(),
            logging: LoggingConfig::default(),
            servers: Vec::new(),
        }
    }
}

/// Data storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Client pool tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Overall deadline for one remote tool call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Aggregator tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    /// TTL for cached composites, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Per-fetcher deadline, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// The sources `get-overview` fans out to.
    #[serde(default = "AggregatorConfig::default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl AggregatorConfig {
    fn default_sources() -> Vec<SourceConfig> {
        [
            ("scrum-board", "get-board-snapshot"),
            ("agile-metrics", "get-velocity-summary"),
            ("time-tracker", "get-time-summary"),
            ("log-analyzer", "get-error-summary"),
        ]
        .into_iter()
        .map(|(server, tool)| SourceConfig {
            name: server.to_string(),
            server: server.to_string(),
            tool: tool.to_string(),
        })
        .collect()
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            sources: Self::default_sources(),
        }
    }
}

/// One overview source: a tool call on a peer server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Field name in the composite result.
    pub name: String,
    /// Registered server to call.
    pub server: String,
    /// Tool to invoke.
    pub tool: String,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter level (`trace`..`error`) when `HUDDLE_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One peer MCP server entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Registered name.
    pub name: String,
    /// Transport kind: `stdio`, `http`, or `in-memory`.
    pub transport: String,
    /// Executable for stdio transports.
    pub command: Option<String>,
    /// Arguments for stdio transports.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for stdio transports.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL for streamable HTTP transports.
    pub url: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate. The file must exist.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.to_string(),
                }
            } else {
                ConfigError::InvalidValue {
                    field: "config".to_string(),
                    message: format!("failed to read {path}: {e}"),
                }
            }
        })?;
        let config = toml::from_str(&text).map_err(|e| ConfigError::ParseError { source: e })?;
        Self::finish(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the built-in
    /// defaults. Environment overrides still apply, so a bare
    /// `huddle serve` works out of the box.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Self::finish(Self::default())
        }
    }

    fn finish(mut config: Self) -> Result<Self, ConfigError> {
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.storage.db_path, "~/.huddle/huddle.db");
        assert_eq!(config.pool.call_timeout_secs, 30);
        assert_eq!(config.aggregator.cache_ttl_secs, 60);
        assert_eq!(config.aggregator.sources.len(), 4);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn parses_server_entries_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            db_path = "/tmp/huddle.db"

            [[servers]]
            name = "scrum-board"
            transport = "http"
            url = "http://localhost:4101/mcp"

            [[servers]]
            name = "log-analyzer"
            transport = "stdio"
            command = "log-analyzer-mcp"
            args = ["--db", "/tmp/logs.db"]
            "#,
        )
        .expect("parse");

        assert_eq!(config.storage.db_path, "/tmp/huddle.db");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].transport, "http");
        assert_eq!(config.servers[1].args, vec!["--db", "/tmp/logs.db"]);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope.toml");
        let err = Config::load(&path.to_string_lossy()).expect_err("missing file");
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_or_default_tolerates_a_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope.toml");
        let config = Config::load_or_default(&path.to_string_lossy()).expect("load");
        assert_eq!(config.pool.call_timeout_secs, 30);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "storage = nope").expect("write");
        let err = Config::load(&path.to_string_lossy()).expect_err("parse error");
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
