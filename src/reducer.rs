/// Deterministically reduces an arbitrary tool-call result to a byte-capped
/// `{text, structured}` pair (§4.6). Stateless: every call is a pure
/// function of its inputs.
use std::collections::HashSet;

use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct ReducerPolicy {
    pub max_text_bytes: usize,
    pub max_structured_bytes: usize,
    pub max_structured_keys: usize,
    pub max_structured_items: usize,
    pub max_depth: usize,
}

impl Default for ReducerPolicy {
    fn default() -> Self {
        Self {
            max_text_bytes: 12_000,
            max_structured_bytes: 24_000,
            max_structured_keys: 200,
            max_structured_items: 200,
            max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReducedToolResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(rename = "droppedBytes")]
    pub dropped_bytes: u64,
    #[serde(rename = "droppedTokensEstimate")]
    pub dropped_tokens_estimate: u64,
    pub notes: Vec<String>,
}

pub fn reduce(_tool_id: Option<&str>, raw: &Value, policy: &ReducerPolicy) -> ReducedToolResult {
    let mut notes: Vec<String> = Vec::new();
    let (mut text, mut structured) = normalize(raw, &mut notes);

    let is_error = raw
        .as_object()
        .and_then(|o| o.get("isError"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if is_error {
        text = if text.is_empty() {
            "[error]".to_string()
        } else {
            format!("[error] {}", text)
        };
        notes.push("is_error".to_string());
    }

    let mut dropped_bytes: i64 = 0;

    if let Some(value) = structured.take() {
        let pre_bytes = stable_stringify(&value).len();
        let trimmed = trim_structured(&value, 0, policy);
        let trimmed_str = stable_stringify(&trimmed);

        if trimmed_str.len() > policy.max_structured_bytes {
            notes.push("structured_dropped".to_string());
            dropped_bytes += pre_bytes as i64;
            structured = None;
        } else {
            if trimmed_str.len() < pre_bytes {
                notes.push("structured_trimmed".to_string());
            }
            dropped_bytes += pre_bytes as i64 - trimmed_str.len() as i64;
            structured = Some(trimmed);
        }
    }

    let (truncated_text, removed) = truncate_utf8(&text, policy.max_text_bytes);
    if removed > 0 {
        notes.push("text_truncated".to_string());
    }
    dropped_bytes += removed as i64;

    let dropped_bytes = dropped_bytes.max(0) as u64;
    let dropped_tokens_estimate = if dropped_bytes > 0 {
        dropped_bytes.div_ceil(4)
    } else {
        0
    };

    ReducedToolResult {
        text: truncated_text,
        structured,
        dropped_bytes,
        dropped_tokens_estimate,
        notes,
    }
}

/// Step 1: normalize any input shape to a `(text, structured?)` pair.
fn normalize(raw: &Value, notes: &mut Vec<String>) -> (String, Option<Value>) {
    match raw {
        Value::Null => (String::new(), None),
        Value::String(s) => {
            let trimmed = s.trim_start();
            let looks_json = trimmed.starts_with('{') || trimmed.starts_with('[');
            let mut structured = None;
            if looks_json {
                if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                    if parsed.is_object() || parsed.is_array() {
                        structured = Some(parsed);
                        notes.push("parsed_json".to_string());
                    }
                }
            }
            (s.clone(), structured)
        }
        Value::Object(map) => normalize_object(map, notes),
        other => (value_to_string(other), None),
    }
}

fn normalize_object(map: &Map<String, Value>, notes: &mut Vec<String>) -> (String, Option<Value>) {
    let mut structured: Option<Value> = None;

    for key in ["structured", "structuredContent"] {
        if let Some(v) = map.get(key) {
            if v.is_object() {
                structured = Some(v.clone());
                notes.push("structured_preferred".to_string());
                break;
            }
        }
    }

    let mut text: Option<String> = None;

    if let Some(Value::String(s)) = map.get("text") {
        text = Some(s.clone());
    } else if let Some(Value::Array(items)) = map.get("content") {
        let mut parts: Vec<String> = Vec::new();
        for item in items {
            match item {
                Value::String(s) => parts.push(s.clone()),
                Value::Object(o) => {
                    if let Some(Value::String(s)) = o.get("text") {
                        parts.push(s.clone());
                    }
                }
                _ => {}
            }
        }
        if !parts.is_empty() {
            text = Some(parts.join("\n"));
        }
    }

    if structured.is_none() {
        structured = Some(Value::Object(map.clone()));
    }

    let text = text.unwrap_or_else(|| stable_stringify(&Value::Object(map.clone())));

    (text, structured)
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => stable_stringify(v),
    }
}

/// Step 2: recursively trim arrays/objects by `maxStructuredItems` /
/// `maxStructuredKeys`, replacing anything at or past `maxDepth` with the
/// sentinel `"[Truncated]"`.
fn trim_structured(value: &Value, depth: usize, policy: &ReducerPolicy) -> Value {
    if depth >= policy.max_depth {
        if value.is_object() || value.is_array() {
            return Value::String("[Truncated]".to_string());
        }
        return value.clone();
    }

    match value {
        Value::Array(items) => {
            let trimmed: Vec<Value> = items
                .iter()
                .take(policy.max_structured_items)
                .map(|v| trim_structured(v, depth + 1, policy))
                .collect();
            Value::Array(trimmed)
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys.into_iter().take(policy.max_structured_keys) {
                out.insert(key.clone(), trim_structured(&map[key], depth + 1, policy));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Step 3: truncate `text` to `max_bytes` by UTF-8 *character* prefix,
/// never splitting a code point. Returns `(truncated, bytes_removed)`.
fn truncate_utf8(text: &str, max_bytes: usize) -> (String, usize) {
    if text.len() <= max_bytes {
        return (text.to_string(), 0);
    }

    // Binary search over char_indices() boundaries for the largest prefix
    // whose byte length fits within `max_bytes`.
    let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let mut lo = 0usize;
    let mut hi = boundaries.len();
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        let end = boundaries.get(mid).copied().unwrap_or(text.len());
        if end <= max_bytes {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let end = boundaries.get(lo).copied().unwrap_or(0);
    let cut = if lo < boundaries.len() {
        // Prefer including char at `lo` if it still fits; `lo` holds the
        // largest index satisfying the budget already.
        end
    } else {
        text.len()
    };
    let truncated = &text[..cut];
    (truncated.to_string(), text.len() - truncated.len())
}

/// Deterministic serialization (§4.6, §9): lexicographic key order,
/// cycle-safe via an ancestor set (exercised defensively — a `serde_json::Value`
/// cannot itself form a cycle, see SPEC_FULL.md §4.6), non-serializable
/// values fall back to `"[Unserializable]"`.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    let mut ancestors: HashSet<usize> = HashSet::new();
    write_stable(value, &mut out, &mut ancestors);
    out
}

fn write_stable(value: &Value, out: &mut String, ancestors: &mut HashSet<usize>) {
    match value {
        Value::Object(map) => {
            let ptr = map as *const _ as usize;
            if !ancestors.insert(ptr) {
                out.push_str("\"[Circular]\"");
                return;
            }
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_else(|_| "\"[Unserializable]\"".into()));
                out.push(':');
                write_stable(&map[*key], out, ancestors);
            }
            out.push('}');
            ancestors.remove(&ptr);
        }
        Value::Array(items) => {
            let ptr = items as *const _ as usize;
            if !ancestors.insert(ptr) {
                out.push_str("\"[Circular]\"");
                return;
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out, ancestors);
            }
            out.push(']');
            ancestors.remove(&ptr);
        }
        other => {
            out.push_str(&serde_json::to_string(other).unwrap_or_else(|_| "\"[Unserializable]\"".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pure_string_round_trips_under_all_budgets() {
        let input = json!("hello world");
        let result = reduce(None, &input, &ReducerPolicy::default());
        assert_eq!(result.text, "hello world");
        assert_eq!(result.dropped_bytes, 0);
    }

    #[test]
    fn structured_field_preferred_over_content_array() {
        let input = json!({
            "structured": {"b": 2, "a": 1},
            "content": [{"text": "hi"}]
        });
        let result = reduce(None, &input, &ReducerPolicy::default());
        assert_eq!(result.text, "hi");
        assert_eq!(result.structured, Some(json!({"a": 1, "b": 2})));
        assert!(result.notes.contains(&"structured_preferred".to_string()));
    }

    #[test]
    fn long_text_truncates_to_byte_budget() {
        let big = "a".repeat(20_000);
        let input = json!(big);
        let policy = ReducerPolicy::default();
        let result = reduce(None, &input, &policy);
        assert_eq!(result.text.len(), 12_000);
        assert_eq!(result.dropped_bytes, 8_000);
        assert_eq!(result.dropped_tokens_estimate, 2_000);
        assert!(result.notes.contains(&"text_truncated".to_string()));
    }

    #[test]
    fn truncation_never_splits_a_code_point() {
        let text = "é".repeat(10_000); // 2 bytes per char
        let (truncated, _) = truncate_utf8(&text, 12_001);
        assert!(truncated.is_char_boundary(truncated.len()));
        assert!(String::from_utf8(truncated.clone().into_bytes()).is_ok());
        assert!(truncated.len() <= 12_001);
    }

    #[test]
    fn max_depth_zero_truncates_every_non_primitive() {
        let input = json!({"structured": {"a": {"b": 1}}, "text": "t"});
        let policy = ReducerPolicy {
            max_depth: 0,
            ..ReducerPolicy::default()
        };
        let result = reduce(None, &input, &policy);
        assert_eq!(result.structured, Some(json!("[Truncated]")));
    }

    #[test]
    fn is_error_prefixes_text() {
        let input = json!({"isError": true, "text": "boom"});
        let result = reduce(None, &input, &ReducerPolicy::default());
        assert_eq!(result.text, "[error] boom");
        assert!(result.notes.contains(&"is_error".to_string()));
    }

    #[test]
    fn null_input_yields_empty_text() {
        let result = reduce(None, &Value::Null, &ReducerPolicy::default());
        assert_eq!(result.text, "");
        assert_eq!(result.dropped_bytes, 0);
    }

    #[test]
    fn string_that_looks_like_json_is_also_parsed() {
        let input = json!("{\"a\":1}");
        let result = reduce(None, &input, &ReducerPolicy::default());
        assert_eq!(result.text, "{\"a\":1}");
        assert_eq!(result.structured, Some(json!({"a": 1})));
        assert!(result.notes.contains(&"parsed_json".to_string()));
    }

    #[test]
    fn stable_stringify_sorts_keys_and_is_deterministic() {
        let v = json!({"z": 1, "a": 2, "m": {"y": 1, "x": 2}});
        let s1 = stable_stringify(&v);
        let s2 = stable_stringify(&v);
        assert_eq!(s1, s2);
        assert_eq!(s1, r#"{"a":2,"m":{"x":2,"y":1},"z":1}"#);
    }

    #[test]
    fn structured_oversized_after_trim_is_dropped() {
        let mut map = Map::new();
        for i in 0..50 {
            map.insert(format!("key{:03}", i), json!("x".repeat(1000)));
        }
        let input = json!({"structured": Value::Object(map), "text": "ok"});
        let policy = ReducerPolicy {
            max_structured_bytes: 500,
            ..ReducerPolicy::default()
        };
        let result = reduce(None, &input, &policy);
        assert!(result.structured.is_none());
        assert!(result.notes.contains(&"structured_dropped".to_string()));
    }
}
