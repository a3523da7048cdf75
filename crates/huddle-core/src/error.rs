//! Error types for the Huddle core library.
//!
//! Each subsystem has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from the event bus and event registry.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Publish or subscribe referenced an event name nobody registered.
    #[error("unknown event: {name}")]
    UnknownEvent {
        /// The event name that was not found in the registry.
        name: String,
    },

    /// The event name does not have the `namespace:kind` shape.
    #[error("malformed event name '{name}': {message}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A subscription pattern could not be compiled.
    #[error("invalid event pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// What is wrong with it.
        message: String,
    },

    /// The payload does not match the schema registered for the event.
    #[error("payload for '{name}' violates its schema: {}", violations.join("; "))]
    SchemaViolation {
        /// The event name being published.
        name: String,
        /// Field-level descriptions of every violation found.
        violations: Vec<String>,
    },
}

/// Errors from the client pool and its transports.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was asked for a server nobody registered.
    #[error("server not registered: {name}")]
    NotRegistered {
        /// The server name that was not found.
        name: String,
    },

    /// `get_client` was used on an in-memory entry that must be attached
    /// via `connect_in_memory_with_transport`.
    #[error("server '{name}' uses an in-memory transport; attach it with connect_in_memory_with_transport")]
    TransportMismatch {
        /// The in-memory server name.
        name: String,
    },

    /// The transport could not be established or has died.
    #[error("connection to '{name}' failed: {message}")]
    Connection {
        /// The server the pool was connecting to.
        name: String,
        /// The underlying transport failure.
        message: String,
    },

    /// A request was issued on a connection that has been closed.
    #[error("transport to '{name}' is closed")]
    TransportClosed {
        /// The server whose transport is gone.
        name: String,
    },

    /// The remote call exceeded its deadline.
    #[error("call to '{name}' timed out after {seconds}s")]
    Timeout {
        /// The server being called.
        name: String,
        /// The deadline that was exceeded.
        seconds: u64,
    },

    /// The call was cancelled by pool shutdown.
    #[error("call to '{name}' was cancelled")]
    Cancelled {
        /// The server being called.
        name: String,
    },

    /// The peer rejected the request at the protocol layer.
    #[error("protocol error from '{name}': {message}")]
    Protocol {
        /// The server that rejected the request.
        name: String,
        /// The protocol-level error description.
        message: String,
    },
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A JSON column held text that does not deserialize.
    #[error("corrupt JSON in column '{column}': {message}")]
    CorruptJson {
        /// The column that failed to deserialize.
        column: String,
        /// The serde error text.
        message: String,
    },
}
