//! Aggregation tools: suite overview, project summary, and server status.
//!
//! Each tool fans out to peer servers through the client pool, degrades
//! unreachable sources to `{"status": "unavailable"}`, and caches the
//! composite under a TTL. None of them ever returns an error envelope for
//! source failures; only a storage failure on the cache itself does.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, RawContent};
use serde_json::{json, Value};

use huddle_core::aggregate::{aggregate, AggregateParams, Fetcher};
use huddle_core::events::BoxError;
use huddle_core::pool::ClientPool;

use crate::state::SharedState;
use crate::tools::response::ToolResponse;

fn params(state: &SharedState, category: &str, key: &str, force_refresh: bool) -> AggregateParams {
    AggregateParams {
        category: category.to_string(),
        key: key.to_string(),
        ttl: Duration::from_secs(state.config.aggregator.cache_ttl_secs),
        fetch_timeout: Duration::from_secs(state.config.aggregator.fetch_timeout_secs),
        force_refresh,
    }
}

/// Interpret a tool-call envelope as a fetcher result: error envelopes
/// degrade the source, success text is parsed as JSON when possible.
fn envelope_value(envelope: CallToolResult) -> Result<Value, BoxError> {
    let text: String = envelope
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if envelope.is_error == Some(true) {
        return Err(format!("tool returned an error envelope: {text}").into());
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// A fetcher that calls one tool on one peer server.
fn tool_fetcher(
    clients: &Arc<ClientPool>,
    name: &str,
    server: &str,
    tool: &str,
    arguments: Value,
) -> Fetcher {
    let clients = Arc::clone(clients);
    let server = server.to_string();
    let tool = tool.to_string();
    Fetcher::new(name, move || {
        Box::pin(async move {
            let envelope = clients.call_tool(&server, &tool, arguments).await?;
            envelope_value(envelope)
        })
    })
}

/// Cross-suite overview: one composite from every configured source.
pub async fn get_overview(state: &SharedState, force_refresh: bool) -> String {
    let fetchers: Vec<Fetcher> = state
        .config
        .aggregator
        .sources
        .iter()
        .map(|source| {
            tool_fetcher(&state.clients, &source.name, &source.server, &source.tool, json!({}))
        })
        .collect();

    match aggregate(&state.db, params(state, "overview", "default", force_refresh), fetchers).await
    {
        Ok(composite) => ToolResponse::success(composite).to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}

/// Per-project summary: the same sources, asked about one project.
pub async fn get_project_summary(state: &SharedState, project: &str, force_refresh: bool) -> String {
    if project.trim().is_empty() {
        return ToolResponse::validation_error("project must not be empty").to_json();
    }
    let fetchers: Vec<Fetcher> = state
        .config
        .aggregator
        .sources
        .iter()
        .map(|source| {
            tool_fetcher(
                &state.clients,
                &source.name,
                &source.server,
                &source.tool,
                json!({ "project": project }),
            )
        })
        .collect();

    match aggregate(&state.db, params(state, "project-summary", project, force_refresh), fetchers)
        .await
    {
        Ok(composite) => ToolResponse::success(composite).to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}

/// Connectivity probe of every registered server: connect and list tools.
pub async fn get_server_status(state: &SharedState, force_refresh: bool) -> String {
    let fetchers: Vec<Fetcher> = state
        .clients
        .registered_servers()
        .into_iter()
        .map(|(name, transport)| {
            let clients = Arc::clone(&state.clients);
            let server = name.clone();
            Fetcher::new(&name, move || {
                Box::pin(async move {
                    let tools = clients.list_tools(&server).await?;
                    Ok(json!({
                        "status": "connected",
                        "transport": transport,
                        "toolCount": tools.len(),
                    }))
                })
            })
        })
        .collect();

    match aggregate(&state.db, params(state, "server-status", "default", force_refresh), fetchers)
        .await
    {
        Ok(composite) => ToolResponse::success(composite).to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}
