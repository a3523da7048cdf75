/// Core library for the Huddle MCP server suite.
///
/// This crate contains the collaboration fabric shared by the suite's
/// domain servers: the in-process event bus, the pooled MCP client layer,
/// the event-triggered workflow engine with its SQLite audit trail, and
/// the TTL-cached aggregation helpers, plus configuration management and
/// shared error types.
pub mod aggregate;
pub mod config;
pub mod error;
pub mod events;
pub mod pool;
pub mod storage;
pub mod workflow;

pub use error::*;

/// Returns the version of the huddle-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
