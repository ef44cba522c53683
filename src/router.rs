/// Façade bundling the four components behind the method surface in §6.
/// Mirrors how the reference `ProxyServer` bundles its `SearchEngine` and
/// config behind `tokio::sync::Mutex` guards held only across the
/// synchronous critical section (§5 "Rust binding note").
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::Catalog;
use crate::error::CoreError;
use crate::reducer::{self, ReducerPolicy};
use crate::search::{Bm25Params, SearchFilters, SearchIndex, SearchMode, SearchQueryInput};
use crate::types::ToolCard;
use crate::working_set::{SystemClock, WorkingSetManager, WorkingSetPolicy, WorkingSetUpdateInput};

pub struct RouterCore {
    catalog: Mutex<Catalog>,
    index: Mutex<SearchIndex>,
    working_set: Mutex<WorkingSetManager>,
}

impl RouterCore {
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(Catalog::new()),
            index: Mutex::new(SearchIndex::new()),
            working_set: Mutex::new(WorkingSetManager::new(
                WorkingSetPolicy::default(),
                Box::new(SystemClock),
            )),
        }
    }

    pub fn upsert_tools(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            tools: Vec<ToolCard>,
        }
        let params: Params = parse_params(params)?;
        let mut catalog = self.catalog.lock().unwrap();
        let count = catalog.upsert_tools(params.tools)?;
        Ok(json!({ "count": count }))
    }

    pub fn remove_tools(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "toolIds")]
            tool_ids: Vec<String>,
        }
        let params: Params = parse_params(params)?;
        let mut catalog = self.catalog.lock().unwrap();
        let removed = catalog.remove_tools(&params.tool_ids);
        Ok(json!({ "count": removed }))
    }

    pub fn reset_catalog(&self, _params: Value) -> Result<Value, CoreError> {
        let mut catalog = self.catalog.lock().unwrap();
        catalog.reset();
        Ok(json!({}))
    }

    pub fn stats(&self, _params: Value) -> Result<Value, CoreError> {
        let catalog = self.catalog.lock().unwrap();
        Ok(serde_json::to_value(catalog.stats()).map_err(|e| CoreError::Invariant(e.to_string()))?)
    }

    pub fn search_query(&self, params: Value) -> Result<Value, CoreError> {
        let input = parse_search_query_input(params)?;
        let catalog = self.catalog.lock().unwrap();
        let snapshot = catalog.snapshot();
        let mut index = self.index.lock().unwrap();
        index.ensure_built(&snapshot);
        let result = index.query(&snapshot, &input);
        Ok(serde_json::to_value(result).map_err(|e| CoreError::Invariant(e.to_string()))?)
    }

    pub fn ws_get(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "sessionId")]
            session_id: String,
        }
        let params: Params = parse_params(params)?;
        let mut ws = self.working_set.lock().unwrap();
        let state = ws.get(&params.session_id);
        Ok(serde_json::to_value(state).map_err(|e| CoreError::Invariant(e.to_string()))?)
    }

    pub fn ws_update(&self, params: Value) -> Result<Value, CoreError> {
        let input = parse_ws_update_input(params)?;
        let catalog = self.catalog.lock().unwrap();
        let mut index = self.index.lock().unwrap();
        let mut ws = self.working_set.lock().unwrap();
        let result = ws.update(input, &catalog, &mut index);
        Ok(serde_json::to_value(result).map_err(|e| CoreError::Invariant(e.to_string()))?)
    }

    pub fn ws_mark_used(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "sessionId")]
            session_id: String,
            #[serde(rename = "toolId")]
            tool_id: String,
        }
        let params: Params = parse_params(params)?;
        let mut ws = self.working_set.lock().unwrap();
        ws.mark_used(&params.session_id, &params.tool_id);
        Ok(json!({}))
    }

    pub fn ws_reset(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "sessionId")]
            session_id: String,
        }
        let params: Params = parse_params(params)?;
        let mut ws = self.working_set.lock().unwrap();
        ws.reset(&params.session_id);
        Ok(json!({}))
    }

    pub fn reduce_result(&self, params: Value) -> Result<Value, CoreError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "toolId", default)]
            tool_id: Option<String>,
            #[serde(rename = "rawResult")]
            raw_result: Value,
            #[serde(default)]
            policy: Option<RawPolicy>,
        }
        #[derive(Deserialize, Default)]
        struct RawPolicy {
            #[serde(rename = "maxTextBytes")]
            max_text_bytes: Option<usize>,
            #[serde(rename = "maxStructuredBytes")]
            max_structured_bytes: Option<usize>,
            #[serde(rename = "maxStructuredKeys")]
            max_structured_keys: Option<usize>,
            #[serde(rename = "maxStructuredItems")]
            max_structured_items: Option<usize>,
            #[serde(rename = "maxDepth")]
            max_depth: Option<usize>,
        }
        let params: Params = parse_params(params)?;
        let mut policy = ReducerPolicy::default();
        if let Some(p) = params.policy {
            if let Some(v) = p.max_text_bytes {
                policy.max_text_bytes = v;
            }
            if let Some(v) = p.max_structured_bytes {
                policy.max_structured_bytes = v;
            }
            if let Some(v) = p.max_structured_keys {
                policy.max_structured_keys = v;
            }
            if let Some(v) = p.max_structured_items {
                policy.max_structured_items = v;
            }
            if let Some(v) = p.max_depth {
                policy.max_depth = v;
            }
        }
        let result = reducer::reduce(params.tool_id.as_deref(), &params.raw_result, &policy);
        Ok(serde_json::to_value(result).map_err(|e| CoreError::Invariant(e.to_string()))?)
    }
}

impl Default for RouterCore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, CoreError> {
    serde_json::from_value(params).map_err(|e| CoreError::InvalidParams(e.to_string()))
}

fn parse_search_query_input(params: Value) -> Result<SearchQueryInput, CoreError> {
    #[derive(Deserialize, Default)]
    struct RawFilters {
        #[serde(rename = "serverIds", default)]
        server_ids: Vec<String>,
        #[serde(rename = "sideEffects", default)]
        side_effects: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
    }
    #[derive(Deserialize, Default)]
    struct RawParams {
        k1: Option<f64>,
        b: Option<f64>,
        #[serde(rename = "exactMatchBoost")]
        exact_match_boost: Option<f64>,
        #[serde(rename = "prefixMatchBoost")]
        prefix_match_boost: Option<f64>,
        #[serde(rename = "popularityBoost")]
        popularity_boost: Option<f64>,
        #[serde(rename = "minScore")]
        min_score: Option<f64>,
    }
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        query: String,
        #[serde(rename = "topK", default)]
        top_k: Option<usize>,
        #[serde(default)]
        mode: Option<String>,
        #[serde(default)]
        filters: RawFilters,
        #[serde(default)]
        params: RawParams,
    }

    let raw: Raw = parse_params(params)?;
    let mode = match raw.mode.as_deref() {
        None | Some("bm25") => SearchMode::Bm25,
        Some("regex") => SearchMode::Regex,
        Some(other) => return Err(CoreError::InvalidParams(format!("unknown search mode '{}'", other))),
    };

    let mut bm25 = Bm25Params::default();
    if let Some(v) = raw.params.k1 {
        bm25.k1 = v;
    }
    if let Some(v) = raw.params.b {
        bm25.b = v;
    }
    if let Some(v) = raw.params.exact_match_boost {
        bm25.exact_match_boost = v;
    }
    if let Some(v) = raw.params.prefix_match_boost {
        bm25.prefix_match_boost = v;
    }
    if let Some(v) = raw.params.popularity_boost {
        bm25.popularity_boost = v;
    }
    if let Some(v) = raw.params.min_score {
        bm25.min_score = v;
    }

    Ok(SearchQueryInput {
        query: raw.query,
        top_k: raw.top_k.unwrap_or(crate::search::DEFAULT_TOP_K),
        mode,
        filters: SearchFilters {
            server_ids: raw.filters.server_ids,
            side_effects: raw.filters.side_effects,
            tags: raw.filters.tags,
        },
        params: bm25,
    })
}

fn parse_ws_update_input(params: Value) -> Result<WorkingSetUpdateInput, CoreError> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default)]
        query: String,
        #[serde(rename = "budgetTokens")]
        budget_tokens: u64,
        #[serde(rename = "topK", default)]
        top_k: Option<usize>,
        #[serde(default)]
        pin: Vec<String>,
        #[serde(default)]
        unpin: Vec<String>,
        #[serde(default)]
        mode: Option<String>,
    }
    let raw: Raw = parse_params(params)?;
    let mode = match raw.mode.as_deref() {
        None | Some("bm25") => SearchMode::Bm25,
        Some("regex") => SearchMode::Regex,
        Some(other) => return Err(CoreError::InvalidParams(format!("unknown search mode '{}'", other))),
    };
    Ok(WorkingSetUpdateInput {
        session_id: raw.session_id,
        query: raw.query,
        budget_tokens: raw.budget_tokens,
        top_k: raw.top_k,
        pin: raw.pin,
        unpin: raw.unpin,
        mode,
    })
}
