//! BM25 tool discovery, per-session working-set budgeting, and result
//! reduction for MCP tool routers — the core retrieval engine, transport
//! agnostic.
pub mod catalog;
pub mod error;
pub mod protocol;
pub mod reducer;
pub mod router;
pub mod search;
pub mod tokenizer;
pub mod types;
pub mod working_set;

pub use error::CoreError;
pub use router::RouterCore;

use serde_json::Value;

/// Dispatches one already-parsed request to the matching `RouterCore`
/// method (§6 method surface table). Shared by the stdio binding and
/// integration tests so both exercise the exact same routing logic.
pub fn dispatch(core: &RouterCore, method: &str, params: Value) -> Result<Value, CoreError> {
    match method {
        "catalog.upsertTools" => core.upsert_tools(params),
        "catalog.removeTools" => core.remove_tools(params),
        "catalog.reset" => core.reset_catalog(params),
        "catalog.stats" => core.stats(params),
        "search.query" => core.search_query(params),
        "ws.get" => core.ws_get(params),
        "ws.update" => core.ws_update(params),
        "ws.markUsed" => core.ws_mark_used(params),
        "ws.reset" => core.ws_reset(params),
        "result.reduce" => core.reduce_result(params),
        other => Err(CoreError::UnknownMethod(other.to_string())),
    }
}
