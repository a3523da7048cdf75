//! Tool implementations behind the MCP router.
//!
//! Each function returns the JSON string placed in the result envelope's
//! text content; the router wraps it in `CallToolResult::success`.

pub mod overview;
pub mod response;
pub mod workflows;
