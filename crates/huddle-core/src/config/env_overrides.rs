//! Environment variable overrides for configuration.

use std::collections::HashMap;
use std::env;

use super::{Config, ServerConfig};
use crate::error::ConfigError;

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Scalar settings use the `HUDDLE_` prefix with double underscores
    /// separating nested keys (e.g. `HUDDLE_POOL__CALL_TIMEOUT_SECS`).
    /// Peer servers are injected with `HUDDLE_SERVER_<NAME>_URL` (streamable
    /// HTTP) or `HUDDLE_SERVER_<NAME>_COMMAND` (stdio); `<NAME>` maps to a
    /// lowercase hyphenated server name, overwriting any file entry.
    pub(super) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("HUDDLE_STORAGE__DB_PATH") {
            self.storage.db_path = val;
        }
        if let Ok(val) = env::var("HUDDLE_LOGGING__LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("HUDDLE_POOL__CALL_TIMEOUT_SECS") {
            self.pool.call_timeout_secs = parse_env_u64("HUDDLE_POOL__CALL_TIMEOUT_SECS", &val)?;
        }
        if let Ok(val) = env::var("HUDDLE_AGGREGATOR__CACHE_TTL_SECS") {
            self.aggregator.cache_ttl_secs =
                parse_env_u64("HUDDLE_AGGREGATOR__CACHE_TTL_SECS", &val)?;
        }
        if let Ok(val) = env::var("HUDDLE_AGGREGATOR__FETCH_TIMEOUT_SECS") {
            self.aggregator.fetch_timeout_secs =
                parse_env_u64("HUDDLE_AGGREGATOR__FETCH_TIMEOUT_SECS", &val)?;
        }

        for (key, value) in env::vars() {
            let Some(rest) = key.strip_prefix("HUDDLE_SERVER_") else {
                continue;
            };
            if let Some(raw_name) = rest.strip_suffix("_URL") {
                self.upsert_server(ServerConfig {
                    name: env_server_name(raw_name),
                    transport: "http".to_string(),
                    command: None,
                    args: Vec::new(),
                    env: HashMap::new(),
                    url: Some(value),
                });
            } else if let Some(raw_name) = rest.strip_suffix("_COMMAND") {
                self.upsert_server(ServerConfig {
                    name: env_server_name(raw_name),
                    transport: "stdio".to_string(),
                    command: Some(value),
                    args: Vec::new(),
                    env: HashMap::new(),
                    url: None,
                });
            }
        }

        Ok(())
    }

    fn upsert_server(&mut self, server: ServerConfig) {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.name == server.name) {
            *existing = server;
        } else {
            self.servers.push(server);
        }
    }
}

fn env_server_name(raw: &str) -> String {
    raw.to_lowercase().replace('_', "-")
}

fn parse_env_u64(var: &str, val: &str) -> Result<u64, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var.to_string(),
        message: format!("'{val}' is not a valid integer"),
    })
}
