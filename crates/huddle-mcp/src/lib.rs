//! Orchestrator MCP server for the Huddle suite.
//!
//! Exposes the collaboration fabric as structured MCP tools over stdio:
//! event-triggered workflow management and cross-suite aggregation. Peer
//! domain servers (scrum board, agile metrics, time tracker, log analyzer,
//! ...) are reached through the pooled client layer.

mod requests;
mod server;
mod state;
mod tools;

pub use server::HuddleMcpServer;
pub use state::{AppState, SharedState};

use std::sync::Arc;

use rmcp::transport::stdio;
use rmcp::ServiceExt;

use huddle_core::config::Config;
use huddle_core::events::{EventBus, EventRegistry, EventSchema};
use huddle_core::pool::ClientPool;
use huddle_core::storage;
use huddle_core::workflow::engine::WorkflowEngine;

/// Register the suite's well-known domain events.
///
/// Domain servers co-located in this process may re-register their events
/// with tighter schemas; registration is overwrite-by-name. The loose
/// baseline keeps workflow triggers on these names publishable before any
/// domain server has started.
pub fn register_suite_events(registry: &EventRegistry) {
    let names = [
        "scrum:sprint-started",
        "scrum:sprint-completed",
        "scrum:task-updated",
        "time:entry-logged",
        "incident:created",
        "incident:resolved",
        "quality:gate-failed",
        "log:anomaly-detected",
    ];
    for name in names {
        registry
            .register(name, EventSchema::new())
            .expect("suite event name is valid");
    }
}

/// Build the shared state: database, bus, client pool, and engine.
///
/// The engine is attached to the bus before this returns, so events
/// published by co-located servers trigger workflows immediately.
pub async fn build_state(config: Config) -> anyhow::Result<SharedState> {
    let db = storage::init_db(&config.storage.db_path).await?;

    match storage::cache::purge_expired(&db).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "purged expired cache entries"),
        Err(e) => tracing::warn!(error = %e, "cache purge failed"),
    }

    let registry = Arc::new(EventRegistry::new());
    register_suite_events(&registry);
    let bus = EventBus::new(registry);

    let clients = Arc::new(ClientPool::from_config(&config));
    let engine = WorkflowEngine::new(db.clone(), Arc::clone(&clients), bus.clone());
    engine
        .attach()
        .map_err(|e| anyhow::anyhow!("failed to attach workflow engine: {e}"))?;

    Ok(Arc::new(AppState {
        db,
        config,
        bus,
        clients,
        engine,
    }))
}

/// Run the orchestrator MCP server on stdio transport.
///
/// This is the main entry point called by the CLI `huddle serve`
/// subcommand. It initializes the database and fabric, serves MCP tools
/// over stdin/stdout, and tears the pool down on exit.
pub async fn run_stdio_server(config: Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let server = HuddleMcpServer::new(Arc::clone(&state));

    tracing::info!(
        servers = state.clients.registered_servers().len(),
        "starting Huddle orchestrator on stdio"
    );

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start MCP server: {e}"))?;

    service.waiting().await?;

    // Clean shutdown: cancel in-flight calls, close peers, then the DB.
    state.clients.disconnect_all().await;
    state.db.close().await;

    Ok(())
}
