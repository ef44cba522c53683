/// Crate-wide error type. Three categories per the error handling design:
/// caller error, recoverable degradation (not represented here — those are
/// handled locally and surfaced as `notes` instead of errors), and invariant
/// violation.
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A `ToolCard` failed basic validation (empty id, or id/serverId/toolName mismatch).
    InvalidToolCard { tool_id: String, reason: String },
    /// A public operation received params it cannot act on.
    InvalidParams(String),
    /// An unknown method name reached the dispatcher.
    UnknownMethod(String),
    /// A derived invariant was observed broken. Should never happen; if it
    /// does, the operation aborts without mutating stored state.
    Invariant(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidToolCard { tool_id, reason } => {
                write!(f, "invalid tool card '{}': {}", tool_id, reason)
            }
            CoreError::InvalidParams(msg) => write!(f, "invalid params: {}", msg),
            CoreError::UnknownMethod(method) => write!(f, "unknown method: {}", method),
            CoreError::Invariant(msg) => write!(f, "invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

/// Maps a `CoreError` to the JSON-RPC error code it should be reported as (§6).
pub fn jsonrpc_code(err: &CoreError) -> i64 {
    match err {
        CoreError::InvalidToolCard { .. } | CoreError::InvalidParams(_) => -32602,
        CoreError::UnknownMethod(_) => -32601,
        CoreError::Invariant(_) => -32000,
    }
}
