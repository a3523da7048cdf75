//! Shared application state for the orchestrator MCP server.
//!
//! Bundles the database pool, configuration, event bus, client pool, and
//! workflow engine so that all tool handlers can access them through the
//! server struct.

use std::sync::Arc;

use huddle_core::config::Config;
use huddle_core::events::EventBus;
use huddle_core::pool::ClientPool;
use huddle_core::storage::DbPool;
use huddle_core::workflow::engine::WorkflowEngine;

/// Shared state accessible by all MCP tool handlers.
pub struct AppState {
    /// SQLite connection pool.
    pub db: DbPool,
    /// Loaded and validated configuration.
    pub config: Config,
    /// The suite-wide event bus.
    pub bus: EventBus,
    /// Pooled connections to peer servers.
    pub clients: Arc<ClientPool>,
    /// The workflow engine (already attached to the bus).
    pub engine: WorkflowEngine,
}

/// Thread-safe reference to shared state.
pub type SharedState = Arc<AppState>;
