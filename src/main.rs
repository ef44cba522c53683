//! Thin stdio JSON-RPC binding around `RouterCore` (§6 "Binding shape"):
//! read one line, parse, dispatch, write one response line, repeat.
use std::sync::Arc;

use mcp_router_core::protocol::{parse_incoming, IncomingMessage, JsonRpcRequest, JsonRpcResponse};
use mcp_router_core::{dispatch, RouterCore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn error_code_for_parse_failure() -> i64 {
    -32700
}

async fn handle_line(core: &RouterCore, line: &str, out: &mut tokio::io::Stdout) {
    let message = match parse_incoming(line) {
        Ok(m) => m,
        Err(e) => {
            let resp = JsonRpcResponse::error(None, error_code_for_parse_failure(), e.to_string());
            write_response(out, &resp).await;
            return;
        }
    };

    match message {
        IncomingMessage::Single(req) => {
            if let Some(resp) = handle_request(core, req) {
                write_response(out, &resp).await;
            }
        }
        IncomingMessage::Batch(requests) => {
            let mut responses = Vec::new();
            for req in requests {
                if let Some(resp) = handle_request(core, req) {
                    responses.push(resp);
                }
            }
            if !responses.is_empty() {
                let values: Vec<serde_json::Value> = responses
                    .iter()
                    .map(|r| serde_json::to_value(r).unwrap_or(serde_json::Value::Null))
                    .collect();
                let line = serde_json::to_string(&values).unwrap_or_default();
                let _ = out.write_all(line.as_bytes()).await;
                let _ = out.write_all(b"\n").await;
                let _ = out.flush().await;
            }
        }
    }
}

/// Executes one request against `core`. Returns `None` for notifications
/// (no `id`, per §6), which produce no output line.
fn handle_request(core: &RouterCore, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let is_notification = req.id.is_none();
    let result = dispatch(core, &req.method, req.params);

    if is_notification {
        if let Err(e) = &result {
            eprintln!("[mcp-router-stdio][WARN] notification '{}' failed: {}", req.method, e);
        }
        return None;
    }

    let resp = match result {
        Ok(value) => JsonRpcResponse::success(req.id, value),
        Err(err) => JsonRpcResponse::error(req.id, mcp_router_core::error::jsonrpc_code(&err), err.to_string()),
    };
    Some(resp)
}

async fn write_response(out: &mut tokio::io::Stdout, resp: &JsonRpcResponse) {
    let line = serde_json::to_string(resp).unwrap_or_else(|e| {
        let fallback = JsonRpcResponse::error(
            None,
            -32000,
            format!("failed to serialize response: {}", e),
        );
        serde_json::to_string(&fallback).unwrap_or_default()
    });
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.write_all(b"\n").await;
    let _ = out.flush().await;
}

async fn stdio_loop(core: Arc<RouterCore>) {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                handle_line(&core, trimmed, &mut stdout).await;
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("[mcp-router-stdio][ERROR] stdin read failed: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(|s| s.as_str()), Some("--version") | Some("-V")) {
        println!("mcp-router-stdio v{}", VERSION);
        return;
    }

    eprintln!("[mcp-router-stdio][INFO] starting v{}", VERSION);
    let core = Arc::new(RouterCore::new());
    stdio_loop(core).await;
}
