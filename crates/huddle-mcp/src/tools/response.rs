//! Unified response envelope for the orchestrator's tools.
//!
//! Every tool wraps its payload inside a [`ToolResponse`] with `success`,
//! `data`, and `error` fields, serialized as the envelope's text content.
//! The shape is protocol-level and carries no workflow assumptions, so
//! peer servers in the suite can reuse it verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable error codes returned by orchestrator tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request failed input validation.
    ValidationError,
    /// The referenced workflow or run does not exist.
    NotFound,
    /// The persistence layer failed.
    DbError,
    /// The engine could not execute or record the run.
    EngineError,
}

impl ErrorCode {
    /// Whether the caller may retry the request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::DbError)
    }
}

/// Structured error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToolError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Whether the caller may retry the request.
    pub retryable: bool,
}

/// Unified envelope returned by orchestrator tools.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// The tool's payload (arbitrary JSON).
    pub data: Value,
    /// Present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    /// Build a success envelope wrapping any serializable payload.
    pub fn success(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            error: None,
        }
    }

    /// Build an error envelope. Retryable flag is derived from the code.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(ToolError {
                code,
                message: message.into(),
                retryable: code.is_retryable(),
            }),
        }
    }

    /// Convenience: validation error (not retryable).
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::error(ErrorCode::ValidationError, message)
    }

    /// Convenience: not found (not retryable).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(ErrorCode::NotFound, message)
    }

    /// Convenience: database error (retryable).
    pub fn db_error(message: impl Into<String>) -> Self {
        Self::error(ErrorCode::DbError, message)
    }

    /// Serialize to the JSON string placed in the envelope's text content.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"serialization: {e}\"}}"))
    }
}
