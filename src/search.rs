/// Field-weighted BM25 index plus a regex scanner, multiplexed by
/// `SearchMode` (§4.3, §4.4, §9). The index is rebuilt wholesale whenever
/// the observed catalog snapshot version changes — full rebuild is
/// acceptable up to ~10^4 tools and keeps this module simple.
use std::collections::HashMap;

use regex::RegexBuilder;
use serde::Serialize;

use crate::tokenizer::{normalize_for_match, tokenize};
use crate::types::{CatalogSnapshot, SearchField, ToolSearchDoc, ALL_FIELDS};

pub const DEFAULT_K1: f64 = 1.2;
pub const DEFAULT_B: f64 = 0.75;
pub const DEFAULT_EXACT_MATCH_BOOST: f64 = 1.5;
pub const DEFAULT_PREFIX_MATCH_BOOST: f64 = 0.4;
pub const DEFAULT_POPULARITY_BOOST: f64 = 0.05;
pub const DEFAULT_MIN_SCORE: f64 = 0.0;
pub const DEFAULT_TOP_K: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct FieldWeights {
    pub name: f64,
    pub title: f64,
    pub synonyms: f64,
    pub description: f64,
    pub arg_names: f64,
    pub arg_descs: f64,
    pub tags: f64,
    pub examples: f64,
    pub server_id: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            name: 4.0,
            title: 2.0,
            synonyms: 2.5,
            description: 1.8,
            arg_names: 1.4,
            arg_descs: 1.2,
            tags: 1.2,
            examples: 0.9,
            server_id: 0.2,
        }
    }
}

impl FieldWeights {
    fn weight(&self, field: SearchField) -> f64 {
        match field {
            SearchField::Name => self.name,
            SearchField::Title => self.title,
            SearchField::Synonyms => self.synonyms,
            SearchField::Description => self.description,
            SearchField::ArgNames => self.arg_names,
            SearchField::ArgDescs => self.arg_descs,
            SearchField::Tags => self.tags,
            SearchField::Examples => self.examples,
            SearchField::ServerId => self.server_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub exact_match_boost: f64,
    pub prefix_match_boost: f64,
    pub popularity_boost: f64,
    pub min_score: f64,
    pub field_weights: FieldWeights,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            exact_match_boost: DEFAULT_EXACT_MATCH_BOOST,
            prefix_match_boost: DEFAULT_PREFIX_MATCH_BOOST,
            popularity_boost: DEFAULT_POPULARITY_BOOST,
            min_score: DEFAULT_MIN_SCORE,
            field_weights: FieldWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum SearchMode {
    #[default]
    Bm25,
    Regex,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub server_ids: Vec<String>,
    pub side_effects: Vec<String>,
    pub tags: Vec<String>,
}

impl SearchFilters {
    fn passes(&self, card: &crate::types::ToolCard) -> bool {
        if !self.server_ids.is_empty() {
            let sid = card.server_id.to_lowercase();
            if !self.server_ids.iter().any(|s| s.to_lowercase() == sid) {
                return false;
            }
        }
        if !self.side_effects.is_empty() {
            let effect = format!("{:?}", card.side_effect).to_lowercase();
            if !self.side_effects.iter().any(|s| s.to_lowercase() == effect) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let wanted: Vec<String> = self.tags.iter().map(|t| t.to_lowercase()).collect();
            let has = card
                .tags
                .iter()
                .any(|t| wanted.contains(&t.to_lowercase()));
            if !has {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchQueryInput {
    pub query: String,
    pub top_k: usize,
    pub mode: SearchMode,
    pub filters: SearchFilters,
    pub params: Bm25Params,
}

impl Default for SearchQueryInput {
    fn default() -> Self {
        Self {
            query: String::new(),
            top_k: DEFAULT_TOP_K,
            mode: SearchMode::default(),
            filters: SearchFilters::default(),
            params: Bm25Params::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredHit {
    #[serde(rename = "toolId")]
    pub tool_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidates {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQueryResult {
    pub hits: Vec<ScoredHit>,
    pub candidates: Candidates,
}

struct FieldIndex {
    tf: HashMap<String, f64>,
    length: f64,
}

struct DocEntry {
    tool_id: String,
    fields: HashMap<SearchField, FieldIndex>,
    unique_tokens: std::collections::HashSet<String>,
}

/// Lazily-rebuilt BM25 index. Tracks the last catalog version it was built
/// from; `ensure_built` rebuilds wholesale on mismatch (§4.3 "Rebuild
/// trigger").
#[derive(Default)]
pub struct SearchIndex {
    docs: Vec<DocEntry>,
    tool_ids: Vec<String>,
    df: HashMap<String, usize>,
    avg_field_len: HashMap<SearchField, f64>,
    built_version: Option<u64>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_built(&mut self, snapshot: &CatalogSnapshot) {
        if self.built_version == Some(snapshot.version) {
            return;
        }
        self.rebuild(snapshot);
        self.built_version = Some(snapshot.version);
        eprintln!(
            "[mcp-router-core][INFO] search index rebuilt: {} tools (snapshot v{})",
            self.docs.len(),
            snapshot.version
        );
    }

    fn rebuild(&mut self, snapshot: &CatalogSnapshot) {
        self.docs.clear();
        self.tool_ids.clear();
        self.df.clear();
        self.avg_field_len.clear();

        let mut tool_ids: Vec<&String> = snapshot.docs.keys().collect();
        tool_ids.sort();

        let mut field_len_totals: HashMap<SearchField, f64> = HashMap::new();

        for tool_id in tool_ids {
            let doc: &ToolSearchDoc = &snapshot.docs[tool_id];
            let mut fields = HashMap::new();
            let mut unique_tokens = std::collections::HashSet::new();

            for &field in ALL_FIELDS.iter() {
                let text = doc.field(field);
                let terms = tokenize(text);
                let mut tf: HashMap<String, f64> = HashMap::new();
                for term in &terms {
                    *tf.entry(term.clone()).or_insert(0.0) += 1.0;
                    unique_tokens.insert(term.clone());
                }
                let length = terms.len() as f64;
                *field_len_totals.entry(field).or_insert(0.0) += length;
                fields.insert(field, FieldIndex { tf, length });
            }

            for term in &unique_tokens {
                *self.df.entry(term.clone()).or_insert(0) += 1;
            }

            self.tool_ids.push(tool_id.clone());
            self.docs.push(DocEntry {
                tool_id: tool_id.clone(),
                fields,
                unique_tokens,
            });
        }

        let n = self.docs.len() as f64;
        for &field in ALL_FIELDS.iter() {
            let total = field_len_totals.get(&field).copied().unwrap_or(0.0);
            let avg = if n > 0.0 { total / n } else { 0.0 };
            self.avg_field_len.insert(field, avg);
        }
    }

    fn idf(&self, term: &str, n: f64) -> Option<f64> {
        let df = *self.df.get(term)? as f64;
        if df <= 0.0 {
            return None;
        }
        Some(((n - df + 0.5) / (df + 0.5) + 1.0).ln())
    }

    pub fn query(&self, snapshot: &CatalogSnapshot, input: &SearchQueryInput) -> SearchQueryResult {
        match input.mode {
            SearchMode::Bm25 => self.query_bm25(snapshot, input),
            SearchMode::Regex => self.query_regex(snapshot, input),
        }
    }

    fn query_bm25(&self, snapshot: &CatalogSnapshot, input: &SearchQueryInput) -> SearchQueryResult {
        let before = self.docs.len();

        let passing: Vec<&DocEntry> = self
            .docs
            .iter()
            .filter(|d| {
                snapshot
                    .tools
                    .get(&d.tool_id)
                    .map(|card| input.filters.passes(card))
                    .unwrap_or(false)
            })
            .collect();

        let query_trimmed = input.query.trim();
        let query_terms = tokenize(query_trimmed);

        if query_terms.is_empty() {
            return SearchQueryResult {
                hits: Vec::new(),
                candidates: Candidates {
                    before,
                    after: 0,
                },
            };
        }

        let mut query_counts: HashMap<String, f64> = HashMap::new();
        for t in &query_terms {
            *query_counts.entry(t.clone()).or_insert(0.0) += 1.0;
        }

        let n = self.docs.len() as f64;
        let params = &input.params;
        let query_norm = normalize_for_match(query_trimmed);

        let mut scored: Vec<(f64, &str)> = Vec::new();

        for doc in &passing {
            let mut score = 0.0;

            for (term, qtf) in &query_counts {
                let idf = match self.idf(term, n) {
                    Some(v) => v,
                    None => continue,
                };
                let qtf_weight = 1.0 + qtf.ln();

                for &field in ALL_FIELDS.iter() {
                    let field_weight = params.field_weights.weight(field);
                    if field_weight == 0.0 {
                        continue;
                    }
                    let fidx = &doc.fields[&field];
                    let tf = match fidx.tf.get(term) {
                        Some(v) if *v > 0.0 => *v,
                        _ => continue,
                    };
                    let avg_len = {
                        let a = *self.avg_field_len.get(&field).unwrap_or(&0.0);
                        if a > 0.0 {
                            a
                        } else {
                            1.0
                        }
                    };
                    let denom = tf + params.k1 * (1.0 - params.b + params.b * (fidx.length / avg_len));
                    let bm25_tf = if denom > 0.0 {
                        tf * (params.k1 + 1.0) / denom
                    } else {
                        0.0
                    };
                    score += field_weight * idf * qtf_weight * bm25_tf;
                }
            }

            if !query_norm.is_empty() {
                let tool_doc = &snapshot.docs[&doc.tool_id];
                let doc_name_norm = normalize_for_match(&tool_doc.name);
                if doc_name_norm == query_norm {
                    score += params.exact_match_boost;
                } else if doc_name_norm.starts_with(&query_norm) {
                    score += params.prefix_match_boost;
                }
            }

            if let Some(card) = snapshot.tools.get(&doc.tool_id) {
                if let Some(pop) = card.popularity {
                    score += (1.0 + pop.max(0.0)).ln() * params.popularity_boost;
                }
            }

            scored.push((score, doc.tool_id.as_str()));
        }

        let after_thresholding: Vec<(f64, &str)> = scored
            .into_iter()
            .filter(|(s, _)| *s > params.min_score)
            .collect();

        let after = after_thresholding.len();
        let hits = top_k_sorted(after_thresholding, input.top_k);

        SearchQueryResult {
            hits,
            candidates: Candidates { before, after },
        }
    }

    fn query_regex(&self, snapshot: &CatalogSnapshot, input: &SearchQueryInput) -> SearchQueryResult {
        let before = self.docs.len();

        let pattern = input.query.trim();
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| {
                RegexBuilder::new(&regex::escape(pattern))
                    .case_insensitive(true)
                    .build()
                    .expect("escaped literal always compiles")
            });

        let mut scored: Vec<(f64, &str)> = Vec::new();

        for doc in &self.docs {
            let card = match snapshot.tools.get(&doc.tool_id) {
                Some(c) => c,
                None => continue,
            };
            if !input.filters.passes(card) {
                continue;
            }
            let search_doc = &snapshot.docs[&doc.tool_id];

            let name_hit = regex.is_match(&search_doc.name);
            let title_hit = regex.is_match(&search_doc.title);
            let desc_hit = regex.is_match(&search_doc.description);

            if !(name_hit || title_hit || desc_hit) {
                continue;
            }

            let score = 2.0 * (name_hit as u8 as f64)
                + 1.5 * (title_hit as u8 as f64)
                + 1.0 * (desc_hit as u8 as f64);
            scored.push((score, doc.tool_id.as_str()));
        }

        let after = scored.len();
        let hits = top_k_sorted(scored, input.top_k);

        SearchQueryResult {
            hits,
            candidates: Candidates { before, after },
        }
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

/// Sort descending by score, tie-break ascending by `toolId`, then take the
/// first `top_k`. `top_k == 0` (or negative in looser bindings) yields no
/// hits but the caller still gets `candidates.after`.
fn top_k_sorted(mut scored: Vec<(f64, &str)>, top_k: usize) -> Vec<ScoredHit> {
    scored.sort_by(|a, b| match b.0.partial_cmp(&a.0) {
        Some(std::cmp::Ordering::Equal) | None => a.1.cmp(b.1),
        Some(other) => other,
    });

    scored
        .into_iter()
        .take(top_k)
        .map(|(score, tool_id)| ScoredHit {
            tool_id: tool_id.to_string(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::types::ToolCard;

    fn card(id: &str, name: &str, server: &str, desc: &str) -> ToolCard {
        ToolCard {
            tool_id: id.to_string(),
            tool_name: name.to_string(),
            server_id: server.to_string(),
            title: None,
            description: Some(desc.to_string()),
            tags: vec![],
            synonyms: vec![],
            auth_hint: vec![],
            args: vec![],
            examples: vec![],
            side_effect: Default::default(),
            open_world_hint: None,
            idempotent_hint: None,
            cost_hint: None,
            popularity: None,
        }
    }

    fn built_slack_catalog() -> (Catalog, SearchIndex) {
        let mut cat = Catalog::new();
        cat.upsert_tools(vec![
            card(
                "slack:post_message",
                "post_message",
                "slack",
                "Post a message to a Slack channel",
            ),
            card(
                "slack:search_messages",
                "search_messages",
                "slack",
                "Search for messages across Slack channels",
            ),
        ])
        .unwrap();
        let mut idx = SearchIndex::new();
        idx.ensure_built(&cat.snapshot());
        (cat, idx)
    }

    #[test]
    fn exact_name_match_boosts_top_hit() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "post_message".into(),
            top_k: 2,
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert_eq!(result.hits[0].tool_id, "slack:post_message");
        let gap = result.hits[0].score - result.hits[1].score;
        assert!(
            gap >= DEFAULT_EXACT_MATCH_BOOST - DEFAULT_PREFIX_MATCH_BOOST,
            "gap {} too small",
            gap
        );
    }

    #[test]
    fn filtering_by_server_id_excludes_all() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "message".into(),
            filters: SearchFilters {
                server_ids: vec!["other".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert!(result.hits.is_empty());
        assert_eq!(result.candidates.before, 2);
        assert_eq!(result.candidates.after, 0);
    }

    #[test]
    fn top_k_zero_returns_no_hits_but_reports_candidates() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "message".into(),
            top_k: 0,
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert!(result.hits.is_empty());
        assert!(result.candidates.after > 0);
    }

    #[test]
    fn empty_query_returns_no_hits_not_an_error() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "".into(),
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert!(result.hits.is_empty());
    }

    #[test]
    fn bm25_scoring_is_stable_across_repeated_queries() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "slack message".into(),
            ..Default::default()
        };
        let r1 = idx.query(&snap, &input);
        let r2 = idx.query(&snap, &input);
        assert_eq!(r1.hits.len(), r2.hits.len());
        for (a, b) in r1.hits.iter().zip(r2.hits.iter()) {
            assert_eq!(a.tool_id, b.tool_id);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn regex_mode_matches_name_title_description() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "^post_".into(),
            mode: SearchMode::Regex,
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].tool_id, "slack:post_message");
    }

    #[test]
    fn regex_mode_falls_back_to_literal_on_bad_pattern() {
        let (cat, idx) = built_slack_catalog();
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "post_message(".into(),
            mode: SearchMode::Regex,
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].tool_id, "slack:post_message");
    }

    #[test]
    fn tie_break_orders_by_tool_id_ascending() {
        let mut cat = Catalog::new();
        cat.upsert_tools(vec![
            card("b:identical", "identical", "b", "identical tool"),
            card("a:identical", "identical", "a", "identical tool"),
        ])
        .unwrap();
        let mut idx = SearchIndex::new();
        idx.ensure_built(&cat.snapshot());
        let snap = cat.snapshot();
        let input = SearchQueryInput {
            query: "identical".into(),
            ..Default::default()
        };
        let result = idx.query(&snap, &input);
        assert_eq!(result.hits[0].score, result.hits[1].score);
        assert_eq!(result.hits[0].tool_id, "a:identical");
        assert_eq!(result.hits[1].tool_id, "b:identical");
    }

    #[test]
    fn rebuild_triggers_on_version_change() {
        let mut cat = Catalog::new();
        let mut idx = SearchIndex::new();
        idx.ensure_built(&cat.snapshot());
        assert_eq!(idx.doc_count(), 0);
        cat.upsert_tools(vec![card("slack:post_message", "post_message", "slack", "post")])
            .unwrap();
        idx.ensure_built(&cat.snapshot());
        assert_eq!(idx.doc_count(), 1);
    }
}
