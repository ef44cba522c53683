/// Per-session working-set manager: pinning, TTL expiry, max-entries cap,
/// and token-budget eviction, with deterministic tie-break orders (§4.5).
use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::search::{SearchIndex, SearchMode, SearchQueryInput};
use crate::types::ToolCard;

/// Injectable time source so eviction/TTL logic is deterministic in tests
/// (§9 "Clock injection"). Mirrors how the reference proxy's health monitor
/// is driven by a real interval but can be swapped for a fake one in tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A fake clock for tests: time only advances when told to.
pub struct FakeClock {
    now: std::sync::atomic::AtomicU64,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingSetEntry {
    #[serde(rename = "toolId")]
    pub tool_id: String,
    pub pinned: bool,
    #[serde(rename = "lastUsedAt")]
    pub last_used_at: u64,
    #[serde(rename = "lastSelectedAt")]
    pub last_selected_at: u64,
    #[serde(rename = "ttlMs", skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(rename = "tokenCost")]
    pub token_cost: u64,
    #[serde(rename = "scoreHint", skip_serializing_if = "Option::is_none")]
    pub score_hint: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingSetState {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub entries: HashMap<String, WorkingSetEntry>,
    #[serde(rename = "budgetTokens")]
    pub budget_tokens: u64,
    #[serde(rename = "usedTokens")]
    pub used_tokens: u64,
}

impl WorkingSetState {
    fn new(session_id: &str, default_budget: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            entries: HashMap::new(),
            budget_tokens: default_budget,
            used_tokens: 0,
        }
    }

    fn recompute_used(&mut self) {
        self.used_tokens = self.entries.values().map(|e| e.token_cost).sum();
    }
}

#[derive(Debug, Clone)]
pub struct WorkingSetPolicy {
    pub default_budget_tokens: u64,
    pub default_ttl_ms: Option<u64>,
    pub max_entries: usize,
    pub default_unknown_token_cost: u64,
}

impl Default for WorkingSetPolicy {
    fn default() -> Self {
        Self {
            default_budget_tokens: 4000,
            default_ttl_ms: Some(30 * 60 * 1000),
            max_entries: 0,
            default_unknown_token_cost: 120,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkingSetUpdateInput {
    pub session_id: String,
    pub query: String,
    pub budget_tokens: u64,
    pub top_k: Option<usize>,
    pub pin: Vec<String>,
    pub unpin: Vec<String>,
    pub mode: SearchMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkingSetUpdateResult {
    #[serde(rename = "selectedToolIds")]
    pub selected_tool_ids: Vec<String>,
    #[serde(rename = "addedToolIds")]
    pub added_tool_ids: Vec<String>,
    #[serde(rename = "removedToolIds")]
    pub removed_tool_ids: Vec<String>,
    #[serde(rename = "budgetUsed")]
    pub budget_used: u64,
    #[serde(rename = "budgetTotal")]
    pub budget_total: u64,
}

/// `ceil(utf8_len / 4) + 12`, floored at 8 (§4.5 "Token cost estimate").
/// Unknown tool ids get the configured default via `estimate_for_unknown`.
pub fn estimate_tool_tokens(card: &ToolCard) -> u64 {
    let mut text = String::new();
    text.push_str(&card.tool_id);
    text.push(' ');
    text.push_str(&card.tool_name);
    if let Some(t) = &card.title {
        text.push(' ');
        text.push_str(t);
    }
    if let Some(d) = &card.description {
        text.push(' ');
        text.push_str(d);
    }
    for group in [&card.tags, &card.synonyms, &card.auth_hint] {
        for item in group {
            text.push(' ');
            text.push_str(item);
        }
    }
    for arg in &card.args {
        text.push(' ');
        text.push_str(&arg.name);
        if let Some(d) = &arg.description {
            text.push(' ');
            text.push_str(d);
        }
    }
    for ex in &card.examples {
        text.push(' ');
        text.push_str(&ex.query);
        if let Some(h) = &ex.call_hint {
            text.push(' ');
            text.push_str(h);
        }
    }
    text.push(' ');
    text.push_str(&format!("{:?}", card.side_effect).to_lowercase());
    if let Some(c) = card.cost_hint {
        text.push(' ');
        text.push_str(&format!("{:?}", c).to_lowercase());
    }

    let bytes = text.len() as u64;
    let estimate = bytes.div_ceil(4);
    (estimate + 12).max(8)
}

pub struct WorkingSetManager {
    states: HashMap<String, WorkingSetState>,
    policy: WorkingSetPolicy,
    clock: Box<dyn Clock>,
}

impl WorkingSetManager {
    pub fn new(policy: WorkingSetPolicy, clock: Box<dyn Clock>) -> Self {
        Self {
            states: HashMap::new(),
            policy,
            clock,
        }
    }

    /// Defensive copy: the caller's mutation must never affect stored state.
    pub fn get(&mut self, session_id: &str) -> WorkingSetState {
        self.states
            .entry(session_id.to_string())
            .or_insert_with(|| WorkingSetState::new(session_id, self.policy.default_budget_tokens))
            .clone()
    }

    pub fn reset(&mut self, session_id: &str) {
        self.states.remove(session_id);
    }

    pub fn mark_used(&mut self, session_id: &str, tool_id: &str) {
        let now = self.clock.now_ms();
        let state = self
            .states
            .entry(session_id.to_string())
            .or_insert_with(|| WorkingSetState::new(session_id, self.policy.default_budget_tokens));

        let entry = state.entries.entry(tool_id.to_string()).or_insert_with(|| WorkingSetEntry {
            tool_id: tool_id.to_string(),
            pinned: false,
            last_used_at: 0,
            last_selected_at: 0,
            ttl_ms: self.policy.default_ttl_ms,
            token_cost: self.policy.default_unknown_token_cost,
            score_hint: None,
        });
        entry.last_used_at = now;
        entry.last_selected_at = now;
        state.recompute_used();
    }

    /// Executes the nine steps of §4.5 in order.
    pub fn update(
        &mut self,
        input: WorkingSetUpdateInput,
        catalog: &Catalog,
        index: &mut SearchIndex,
    ) -> WorkingSetUpdateResult {
        let now = self.clock.now_ms();
        let snapshot = catalog.snapshot();
        index.ensure_built(&snapshot);

        let state = self
            .states
            .entry(input.session_id.clone())
            .or_insert_with(|| WorkingSetState::new(&input.session_id, self.policy.default_budget_tokens));

        // 1. Resolve session.
        state.budget_tokens = input.budget_tokens;

        let mut added: Vec<String> = Vec::new();
        let mut removed: Vec<String> = Vec::new();

        // 2. Apply pins.
        for tool_id in &input.pin {
            if let Some(entry) = state.entries.get_mut(tool_id) {
                entry.pinned = true;
                entry.last_selected_at = now;
            } else {
                let token_cost = snapshot
                    .tools
                    .get(tool_id)
                    .map(estimate_tool_tokens)
                    .unwrap_or(self.policy.default_unknown_token_cost);
                state.entries.insert(
                    tool_id.clone(),
                    WorkingSetEntry {
                        tool_id: tool_id.clone(),
                        pinned: true,
                        last_used_at: 0,
                        last_selected_at: now,
                        ttl_ms: self.policy.default_ttl_ms,
                        token_cost,
                        score_hint: None,
                    },
                );
                added.push(tool_id.clone());
            }
        }

        // 3. Apply unpins.
        for tool_id in &input.unpin {
            if let Some(entry) = state.entries.get_mut(tool_id) {
                entry.pinned = false;
            }
        }

        // 4. Expire by TTL.
        let mut expired: Vec<String> = Vec::new();
        for (tool_id, entry) in state.entries.iter() {
            if entry.pinned {
                continue;
            }
            if let Some(ttl) = entry.ttl_ms {
                if ttl > 0 {
                    let last_activity = entry.last_used_at.max(entry.last_selected_at);
                    if now.saturating_sub(last_activity) > ttl {
                        expired.push(tool_id.clone());
                    }
                }
            }
        }
        for tool_id in expired {
            state.entries.remove(&tool_id);
            eprintln!(
                "[mcp-router-core][INFO] working set {}: ttl expired {}",
                input.session_id, tool_id
            );
            removed.push(tool_id);
        }

        // 5. Query the search engine (no filters at this layer).
        let top_k = input.top_k.unwrap_or(crate::search::DEFAULT_TOP_K);
        let query_input = SearchQueryInput {
            query: input.query.clone(),
            top_k,
            mode: input.mode,
            ..Default::default()
        };
        let result = index.query(&snapshot, &query_input);

        for hit in &result.hits {
            if let Some(entry) = state.entries.get_mut(&hit.tool_id) {
                entry.last_selected_at = now;
                entry.score_hint = Some(hit.score);
            } else {
                let token_cost = snapshot
                    .tools
                    .get(&hit.tool_id)
                    .map(estimate_tool_tokens)
                    .unwrap_or(self.policy.default_unknown_token_cost);
                state.entries.insert(
                    hit.tool_id.clone(),
                    WorkingSetEntry {
                        tool_id: hit.tool_id.clone(),
                        pinned: false,
                        last_used_at: 0,
                        last_selected_at: now,
                        ttl_ms: self.policy.default_ttl_ms,
                        token_cost,
                        score_hint: Some(hit.score),
                    },
                );
                added.push(hit.tool_id.clone());
            }
        }

        // 6. Enforce max-entries cap.
        if self.policy.max_entries > 0 {
            while state.entries.len() > self.policy.max_entries {
                match pick_eviction_candidate(state) {
                    Some(tool_id) => {
                        state.entries.remove(&tool_id);
                        eprintln!(
                            "[mcp-router-core][INFO] working set {}: evicted {} (max-entries cap {})",
                            input.session_id, tool_id, self.policy.max_entries
                        );
                        removed.push(tool_id);
                    }
                    None => break,
                }
            }
        }

        // 7. Enforce budget.
        state.recompute_used();
        while state.used_tokens > state.budget_tokens {
            match pick_eviction_candidate(state) {
                Some(tool_id) => {
                    if let Some(entry) = state.entries.remove(&tool_id) {
                        state.used_tokens = state.used_tokens.saturating_sub(entry.token_cost);
                    }
                    eprintln!(
                        "[mcp-router-core][INFO] working set {}: evicted {} (budget {}/{})",
                        input.session_id, tool_id, state.used_tokens, state.budget_tokens
                    );
                    removed.push(tool_id);
                }
                None => break,
            }
        }

        // 8. Compute selectedToolIds in selection order.
        let mut selected: Vec<&WorkingSetEntry> = state.entries.values().collect();
        selected.sort_by(|a, b| selection_order(a, b));
        let selected_tool_ids: Vec<String> = selected.iter().map(|e| e.tool_id.clone()).collect();

        // 9. Finalize.
        state.recompute_used();
        let removed_set: std::collections::HashSet<&String> = removed.iter().collect();
        added.retain(|id| !removed_set.contains(id));

        added.sort();
        added.dedup();
        let mut removed_sorted = removed;
        removed_sorted.sort();
        removed_sorted.dedup();

        WorkingSetUpdateResult {
            selected_tool_ids,
            added_tool_ids: added,
            removed_tool_ids: removed_sorted,
            budget_used: state.used_tokens,
            budget_total: state.budget_tokens,
        }
    }
}

/// Eviction-candidate ranking (§4.5): non-pinned only; ascending
/// `lastSelectedAt`, then `lastUsedAt`, then `scoreHint` (absent = 0).
/// Returns the worst (first-to-evict) candidate.
///
/// Final tie-break: when every prior key ties, the *larger* toolId is
/// evicted (equivalently: the lexicographically smaller id survives a
/// full tie) — this follows the worked eviction scenario (§8 #3: "with
/// tie, lexicographically smaller toolId" is the one left selected),
/// which takes precedence over the abbreviated "toolId asc" shorthand in
/// the ranking's prose; see DESIGN.md.
fn pick_eviction_candidate(state: &WorkingSetState) -> Option<String> {
    state
        .entries
        .values()
        .filter(|e| !e.pinned)
        .min_by(|a, b| {
            a.last_selected_at
                .cmp(&b.last_selected_at)
                .then(a.last_used_at.cmp(&b.last_used_at))
                .then(
                    a.score_hint
                        .unwrap_or(0.0)
                        .partial_cmp(&b.score_hint.unwrap_or(0.0))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.tool_id.cmp(&a.tool_id))
        })
        .map(|e| e.tool_id.clone())
}

/// Selection order (§4.5): pinned first, then descending
/// `lastSelectedAt`, `lastUsedAt`, `scoreHint`, then `toolId` ascending.
fn selection_order(a: &WorkingSetEntry, b: &WorkingSetEntry) -> std::cmp::Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then(b.last_selected_at.cmp(&a.last_selected_at))
        .then(b.last_used_at.cmp(&a.last_used_at))
        .then(
            b.score_hint
                .unwrap_or(0.0)
                .partial_cmp(&a.score_hint.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal),
        )
        .then(a.tool_id.cmp(&b.tool_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCard;

    fn card(id: &str, name: &str, server: &str) -> ToolCard {
        ToolCard {
            tool_id: id.to_string(),
            tool_name: name.to_string(),
            server_id: server.to_string(),
            title: None,
            description: Some(format!("do {}", name)),
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

    fn manager(clock: FakeClock) -> (WorkingSetManager, Catalog, SearchIndex) {
        let mgr = WorkingSetManager::new(WorkingSetPolicy::default(), Box::new(clock));
        (mgr, Catalog::new(), SearchIndex::new())
    }

    #[test]
    fn get_creates_empty_state_with_default_budget() {
        let clock = FakeClock::new(1000);
        let (mut mgr, _cat, _idx) = manager(clock);
        let state = mgr.get("s1");
        assert_eq!(state.entries.len(), 0);
        assert_eq!(state.budget_tokens, WorkingSetPolicy::default().default_budget_tokens);
    }

    #[test]
    fn get_returns_defensive_copy() {
        let clock = FakeClock::new(1000);
        let (mut mgr, _cat, _idx) = manager(clock);
        let mut state = mgr.get("s1");
        state.budget_tokens = 99999;
        let state2 = mgr.get("s1");
        assert_ne!(state2.budget_tokens, 99999);
    }

    #[test]
    fn used_tokens_always_equals_sum_of_costs() {
        let clock = FakeClock::new(1000);
        let (mut mgr, mut cat, mut idx) = manager(clock);
        cat.upsert_tools(vec![card("a:a", "a", "a"), card("b:b", "b", "b")])
            .unwrap();

        let result = mgr.update(
            WorkingSetUpdateInput {
                session_id: "s1".into(),
                query: "a".into(),
                budget_tokens: 10_000,
                ..Default::default()
            },
            &cat,
            &mut idx,
        );
        let state = mgr.get("s1");
        let sum: u64 = state.entries.values().map(|e| e.token_cost).sum();
        assert_eq!(state.used_tokens, sum);
        assert_eq!(result.budget_used, sum);
    }

    #[test]
    fn eviction_respects_budget_and_tie_break() {
        let clock = FakeClock::new(1000);
        let mgr = WorkingSetManager::new(
            WorkingSetPolicy {
                default_budget_tokens: 300,
                ..WorkingSetPolicy::default()
            },
            Box::new(clock),
        );
        let mut mgr = mgr;
        let mut cat = Catalog::new();
        let mut idx = SearchIndex::new();

        cat.upsert_tools(vec![
            card("a:tool", "tool", "a"),
            card("b:tool", "tool", "b"),
        ])
        .unwrap();

        // Force both hits to have identical cost so only tie-break and
        // lastSelectedAt decide survival; both are selected by the same
        // query in the same update call so lastSelectedAt ties too.
        let result = mgr.update(
            WorkingSetUpdateInput {
                session_id: "s1".into(),
                query: "tool".into(),
                budget_tokens: {
                    let costs: Vec<u64> = cat
                        .snapshot()
                        .tools
                        .values()
                        .map(estimate_tool_tokens)
                        .collect();
                    costs[0] + 1
                },
                ..Default::default()
            },
            &cat,
            &mut idx,
        );

        assert_eq!(result.selected_tool_ids.len(), 1);
        assert_eq!(result.selected_tool_ids[0], "a:tool");
        assert_eq!(result.removed_tool_ids, vec!["b:tool".to_string()]);
        assert!(result.budget_used <= result.budget_total);
    }

    #[test]
    fn pinning_overrides_eviction_and_allows_overflow() {
        let clock = FakeClock::new(1000);
        let mut mgr = WorkingSetManager::new(WorkingSetPolicy::default(), Box::new(clock));
        let mut cat = Catalog::new();
        let mut idx = SearchIndex::new();
        cat.upsert_tools(vec![card("a:tool", "tool", "a"), card("b:tool", "tool", "b")])
            .unwrap();

        mgr.update(
            WorkingSetUpdateInput {
                session_id: "s1".into(),
                query: "".into(),
                budget_tokens: 10_000,
                pin: vec!["a:tool".into()],
                ..Default::default()
            },
            &cat,
            &mut idx,
        );

        let cost = estimate_tool_tokens(cat.get_tool("a:tool").unwrap());
        let result = mgr.update(
            WorkingSetUpdateInput {
                session_id: "s1".into(),
                query: "tool".into(),
                budget_tokens: cost.saturating_sub(1).max(1),
                ..Default::default()
            },
            &cat,
            &mut idx,
        );

        assert!(result.selected_tool_ids.contains(&"a:tool".to_string()));
        let state = mgr.get("s1");
        assert!(state.entries.get("a:tool").unwrap().pinned);
        assert!(result.budget_used >= result.budget_total);
    }

    #[test]
    fn ttl_expires_non_pinned_entries_lazily() {
        let clock = FakeClock::new(1000);
        let mut mgr = WorkingSetManager::new(
            WorkingSetPolicy {
                default_ttl_ms: Some(500),
                ..WorkingSetPolicy::default()
            },
            Box::new(clock),
        );
        let mut cat = Catalog::new();
        let mut idx = SearchIndex::new();
        cat.upsert_tools(vec![card("a:tool", "tool", "a")]).unwrap();

        mgr.mark_used("s1", "a:tool");

        // Advance time on a fresh fake clock passed via a second manager is
        // awkward since the clock is owned; instead exercise TTL through a
        // manager constructed with a clock we can advance externally.
        let clock2 = std::sync::Arc::new(FakeClock::new(1000));
        struct SharedClock(std::sync::Arc<FakeClock>);
        impl Clock for SharedClock {
            fn now_ms(&self) -> u64 {
                self.0.now_ms()
            }
        }
        let mut mgr2 = WorkingSetManager::new(
            WorkingSetPolicy {
                default_ttl_ms: Some(500),
                ..WorkingSetPolicy::default()
            },
            Box::new(SharedClock(clock2.clone())),
        );
        mgr2.mark_used("s2", "a:tool");
        clock2.advance(1000);
        let result = mgr2.update(
            WorkingSetUpdateInput {
                session_id: "s2".into(),
                query: "".into(),
                budget_tokens: 10_000,
                ..Default::default()
            },
            &cat,
            &mut idx,
        );
        assert!(result.removed_tool_ids.contains(&"a:tool".to_string()));
        let _ = mgr; // keep first manager alive/used to avoid unused warning
    }

    #[test]
    fn mark_used_does_not_rerun_eviction() {
        let clock = FakeClock::new(1000);
        let mut mgr = WorkingSetManager::new(
            WorkingSetPolicy {
                default_budget_tokens: 1,
                ..WorkingSetPolicy::default()
            },
            Box::new(clock),
        );
        mgr.mark_used("s1", "unknown:tool");
        let state = mgr.get("s1");
        assert!(state.entries.contains_key("unknown:tool"));
        assert!(state.used_tokens > state.budget_tokens);
    }

    #[test]
    fn token_cost_for_known_tool_is_at_least_eight() {
        let c = card("a:b", "b", "a");
        assert!(estimate_tool_tokens(&c) >= 8);
    }
}
