//! Pooled MCP client connections to peer servers.
//!
//! The pool is a registry of peer servers plus a cache of live connections.
//! Registration records how to reach a server (stdio child process,
//! streamable HTTP, or a pre-linked in-memory pair); connections are opened
//! lazily on first use and shared by every caller. Concurrent requests for
//! the same server coalesce into a single connect, and concurrent tool
//! calls multiplex over the single connection (the MCP layer correlates
//! replies by request id), so the pool never serializes calls.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use rmcp::model::{CallToolRequestParams, CallToolResult, ReadResourceRequestParams, ReadResourceResult, Tool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ServerConfig};
use crate::error::PoolError;

/// How to reach one registered server.
#[derive(Debug, Clone)]
pub enum ServerSpec {
    /// Spawn a child process and speak MCP over its stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Connect to a streamable HTTP endpoint.
    Http { url: String },
    /// A linked in-memory pair; attachable only via
    /// [`ClientPool::connect_in_memory_with_transport`].
    InMemory,
}

impl ServerSpec {
    /// Build a spec from a validated configuration entry.
    pub fn from_config(server: &ServerConfig) -> Option<Self> {
        match server.transport.as_str() {
            "stdio" => Some(ServerSpec::Stdio {
                command: server.command.clone()?,
                args: server.args.clone(),
                env: server.env.clone(),
            }),
            "http" => Some(ServerSpec::Http {
                url: server.url.clone()?,
            }),
            "in-memory" => Some(ServerSpec::InMemory),
            _ => None,
        }
    }

    /// The transport label used in status output.
    pub fn transport_name(&self) -> &'static str {
        match self {
            ServerSpec::Stdio { .. } => "stdio",
            ServerSpec::Http { .. } => "http",
            ServerSpec::InMemory => "in-memory",
        }
    }
}

/// One live connection: the invokable peer plus the owning service.
struct Connection {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl Connection {
    fn new(service: RunningService<RoleClient, ()>) -> Arc<Self> {
        Arc::new(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        })
    }

    async fn is_closed(&self) -> bool {
        self.service.lock().await.is_none()
    }

    /// Shut the connection down. Idempotent.
    async fn close(&self, name: &str) {
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            if let Err(e) = service.cancel().await {
                tracing::debug!(server = name, error = %e, "connection shutdown was not clean");
            }
        }
    }
}

type ConnectionCell = Arc<OnceCell<Arc<Connection>>>;

/// Registry plus connection cache over the MCP client role.
pub struct ClientPool {
    servers: RwLock<HashMap<String, ServerSpec>>,
    connections: Mutex<HashMap<String, ConnectionCell>>,
    shutdown: RwLock<CancellationToken>,
    call_timeout: Duration,
}

impl ClientPool {
    /// Create an empty pool with the given per-call deadline.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            shutdown: RwLock::new(CancellationToken::new()),
            call_timeout,
        }
    }

    /// Create a pool and register every server from the configuration.
    pub fn from_config(config: &Config) -> Self {
        let pool = Self::new(Duration::from_secs(config.pool.call_timeout_secs));
        for server in &config.servers {
            match ServerSpec::from_config(server) {
                Some(spec) => pool.register(&server.name, spec),
                None => {
                    tracing::warn!(server = %server.name, "skipping server with incomplete spec");
                }
            }
        }
        pool
    }

    /// Record how to reach a server. Duplicate names overwrite. No I/O.
    pub fn register(&self, name: &str, spec: ServerSpec) {
        self.servers
            .write()
            .expect("pool registry lock poisoned")
            .insert(name.to_string(), spec);
    }

    /// Register several servers at once.
    pub fn register_many(&self, entries: impl IntoIterator<Item = (String, ServerSpec)>) {
        for (name, spec) in entries {
            self.register(&name, spec);
        }
    }

    /// Registered server names with their transports, sorted by name.
    pub fn registered_servers(&self) -> Vec<(String, &'static str)> {
        let servers = self.servers.read().expect("pool registry lock poisoned");
        let mut names: Vec<(String, &'static str)> = servers
            .iter()
            .map(|(name, spec)| (name.clone(), spec.transport_name()))
            .collect();
        names.sort();
        names
    }

    /// Whether a live connection to `name` currently exists.
    pub async fn is_connected(&self, name: &str) -> bool {
        let cell = {
            let conns = self.connections.lock().await;
            conns.get(name).cloned()
        };
        match cell.and_then(|c| c.get().cloned()) {
            Some(conn) => !conn.is_closed().await,
            None => false,
        }
    }

    /// A capability to invoke the named server, connecting lazily.
    ///
    /// Concurrent calls for the same name coalesce: the second caller waits
    /// for and shares the connection opened by the first.
    pub async fn get_client(&self, name: &str) -> Result<Peer<RoleClient>, PoolError> {
        Ok(self.get_connection(name).await?.peer.clone())
    }

    async fn get_connection(&self, name: &str) -> Result<Arc<Connection>, PoolError> {
        let spec = {
            let servers = self.servers.read().expect("pool registry lock poisoned");
            servers.get(name).cloned()
        }
        .ok_or_else(|| PoolError::NotRegistered {
            name: name.to_string(),
        })?;

        let cell = {
            let mut conns = self.connections.lock().await;
            Arc::clone(conns.entry(name.to_string()).or_default())
        };

        let conn = cell
            .get_or_try_init(|| async { open_connection(name, &spec).await })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Invoke `tool` on the named server and return the result envelope.
    ///
    /// The envelope is returned verbatim: a tool-level failure arrives as
    /// `is_error`, not as an `Err`. Errors here are transport-level only
    /// (connection, timeout, or cancellation by shutdown).
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult, PoolError> {
        let conn = self.get_connection(name).await?;
        if conn.is_closed().await {
            return Err(PoolError::TransportClosed {
                name: name.to_string(),
            });
        }

        let params = CallToolRequestParams {
            meta: None,
            name: tool.to_string().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        };

        let cancel = self.shutdown.read().expect("pool shutdown lock poisoned").clone();
        tokio::select! {
            () = cancel.cancelled() => Err(PoolError::Cancelled {
                name: name.to_string(),
            }),
            result = tokio::time::timeout(self.call_timeout, conn.peer.call_tool(params)) => {
                match result {
                    Err(_) => Err(PoolError::Timeout {
                        name: name.to_string(),
                        seconds: self.call_timeout.as_secs(),
                    }),
                    Ok(Ok(envelope)) => Ok(envelope),
                    Ok(Err(e)) => Err(PoolError::Connection {
                        name: name.to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    /// List the tools the named server exposes.
    pub async fn list_tools(&self, name: &str) -> Result<Vec<Tool>, PoolError> {
        let conn = self.get_connection(name).await?;
        conn.peer
            .list_all_tools()
            .await
            .map_err(|e| PoolError::Connection {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Read a resource from the named server.
    pub async fn read_resource(&self, name: &str, uri: &str) -> Result<ReadResourceResult, PoolError> {
        let conn = self.get_connection(name).await?;
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        conn.peer
            .read_resource(params)
            .await
            .map_err(|e| PoolError::Connection {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Close and forget the connection to `name`. Safe when not connected.
    pub async fn disconnect(&self, name: &str) {
        let cell = self.connections.lock().await.remove(name);
        if let Some(cell) = cell {
            if let Some(conn) = cell.get() {
                conn.close(name).await;
            }
        }
    }

    /// Close every connection concurrently and cancel in-flight calls.
    ///
    /// The pool stays usable: registrations survive and later calls open
    /// fresh connections under a fresh cancellation epoch.
    pub async fn disconnect_all(&self) {
        {
            let mut shutdown = self.shutdown.write().expect("pool shutdown lock poisoned");
            shutdown.cancel();
            *shutdown = CancellationToken::new();
        }

        let drained: Vec<(String, ConnectionCell)> =
            self.connections.lock().await.drain().collect();
        join_all(drained.iter().filter_map(|(name, cell)| {
            cell.get().map(|conn| {
                let conn = Arc::clone(conn);
                async move { conn.close(name).await }
            })
        }))
        .await;
    }

    /// Create a linked in-memory transport pair.
    ///
    /// Writes on one endpoint are reads on the other. Serve an MCP server
    /// over one end, then attach the other with
    /// [`connect_in_memory_with_transport`](Self::connect_in_memory_with_transport).
    pub fn create_in_memory_pair() -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(64 * 1024)
    }

    /// Attach the client end of an in-memory pair under `name`.
    ///
    /// The peer end must already be served, or the MCP handshake will hang
    /// until the call deadline. Registers `name` as an in-memory entry and
    /// caches the connection, replacing any previous one.
    pub async fn connect_in_memory_with_transport(
        &self,
        name: &str,
        endpoint: DuplexStream,
    ) -> Result<(), PoolError> {
        let service = ().serve(endpoint).await.map_err(|e| PoolError::Connection {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        self.register(name, ServerSpec::InMemory);

        let cell: ConnectionCell = Arc::default();
        cell.set(Connection::new(service))
            .ok()
            .expect("freshly created cell is empty");

        let previous = self.connections.lock().await.insert(name.to_string(), cell);
        if let Some(previous) = previous {
            if let Some(conn) = previous.get() {
                conn.close(name).await;
            }
        }
        Ok(())
    }
}

/// Open a transport for the server spec and complete the MCP handshake.
async fn open_connection(name: &str, spec: &ServerSpec) -> Result<Arc<Connection>, PoolError> {
    match spec {
        ServerSpec::Stdio { command, args, env } => {
            let mut cmd = tokio::process::Command::new(command);
            cmd.args(args);
            cmd.envs(env);
            let transport = TokioChildProcess::new(cmd).map_err(|e| PoolError::Connection {
                name: name.to_string(),
                message: e.to_string(),
            })?;
            let service = ().serve(transport).await.map_err(|e| PoolError::Connection {
                name: name.to_string(),
                message: e.to_string(),
            })?;
            tracing::info!(server = name, transport = "stdio", "connected to peer server");
            Ok(Connection::new(service))
        }
        ServerSpec::Http { url } => {
            let transport = StreamableHttpClientTransport::from_uri(url.as_str());
            let service = ().serve(transport).await.map_err(|e| PoolError::Connection {
                name: name.to_string(),
                message: e.to_string(),
            })?;
            tracing::info!(server = name, transport = "http", "connected to peer server");
            Ok(Connection::new(service))
        }
        ServerSpec::InMemory => Err(PoolError::TransportMismatch {
            name: name.to_string(),
        }),
    }
}
