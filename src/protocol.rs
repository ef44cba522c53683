//! JSON-RPC 2.0 message types for the router's external interface (§6).
//! Implemented directly against `serde_json::Value`, matching the reference
//! crate's preference for hand-rolled wire types over a full SDK.
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// One parsed top-level message: either a single request or a batch (§6
/// "Batch requests (JSON array) are supported").
#[derive(Debug)]
pub enum IncomingMessage {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

pub fn parse_incoming(line: &str) -> Result<IncomingMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.is_array() {
        let requests: Vec<JsonRpcRequest> = serde_json::from_value(value)?;
        Ok(IncomingMessage::Batch(requests))
    } else {
        let request: JsonRpcRequest = serde_json::from_value(value)?;
        Ok(IncomingMessage::Single(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"catalog.stats"}"#;
        match parse_incoming(line).unwrap() {
            IncomingMessage::Single(req) => {
                assert_eq!(req.method, "catalog.stats");
                assert_eq!(req.id, Some(json!(1)));
            }
            IncomingMessage::Batch(_) => panic!("expected single"),
        }
    }

    #[test]
    fn parses_batch_request() {
        let line = r#"[{"jsonrpc":"2.0","id":1,"method":"catalog.stats"},{"jsonrpc":"2.0","method":"ws.reset","params":{"sessionId":"s1"}}]"#;
        match parse_incoming(line).unwrap() {
            IncomingMessage::Batch(reqs) => {
                assert_eq!(reqs.len(), 2);
                assert!(reqs[1].id.is_none());
            }
            IncomingMessage::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn notification_has_no_id() {
        let line = r#"{"jsonrpc":"2.0","method":"ws.reset","params":{"sessionId":"s1"}}"#;
        match parse_incoming(line).unwrap() {
            IncomingMessage::Single(req) => assert!(req.id.is_none()),
            IncomingMessage::Batch(_) => panic!("expected single"),
        }
    }

    #[test]
    fn success_response_omits_error_field() {
        let resp = JsonRpcResponse::success(Some(json!(1)), json!({"ok": true}));
        let s = serde_json::to_string(&resp).unwrap();
        assert!(s.contains(r#""result":{"ok":true}"#));
        assert!(!s.contains("error"));
    }

    #[test]
    fn error_response_omits_result_field() {
        let resp = JsonRpcResponse::error(Some(json!(2)), -32601, "unknown method: x".into());
        let s = serde_json::to_string(&resp).unwrap();
        assert!(s.contains(r#""code":-32601"#));
        assert!(!s.contains("\"result\""));
    }
}
