//! Configuration validation.
//!
//! Runs after file parsing and environment overrides so that every entry,
//! regardless of where it came from, satisfies the transport invariants:
//! `stdio` requires a command, `http` requires a URL, `in-memory` entries
//! carry neither.

use std::collections::HashSet;

use super::Config;
use crate::error::ConfigError;

impl Config {
    /// Validate the fully-layered configuration.
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.call_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.aggregator.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "aggregator.fetch_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (index, server) in self.servers.iter().enumerate() {
            let field = |suffix: &str| format!("servers[{index}].{suffix}");

            if server.name.is_empty() {
                return Err(ConfigError::MissingField {
                    field: field("name"),
                });
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: field("name"),
                    message: format!("duplicate server name '{}'", server.name),
                });
            }

            match server.transport.as_str() {
                "stdio" => {
                    if server.command.as_deref().unwrap_or("").is_empty() {
                        return Err(ConfigError::MissingField {
                            field: field("command"),
                        });
                    }
                }
                "http" => {
                    if server.url.as_deref().unwrap_or("").is_empty() {
                        return Err(ConfigError::MissingField { field: field("url") });
                    }
                }
                "in-memory" => {}
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: field("transport"),
                        message: format!("unknown transport '{other}', expected stdio, http, or in-memory"),
                    });
                }
            }
        }

        for (index, source) in self.aggregator.sources.iter().enumerate() {
            if source.name.is_empty() || source.server.is_empty() || source.tool.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("aggregator.sources[{index}]"),
                    message: "name, server, and tool must all be set".to_string(),
                });
            }
        }

        Ok(())
    }
}
