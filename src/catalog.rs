/// In-memory catalog of `ToolCard`s, keyed by `toolId`. Owns derivation of
/// `ToolSearchDoc`s and the monotonic snapshot version (§4.1).
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;
use crate::types::{CatalogSnapshot, ToolCard, ToolSearchDoc};

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CatalogStats {
    pub tools: usize,
    #[serde(rename = "indexSize")]
    pub index_size: usize,
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
}

pub struct Catalog {
    tools: HashMap<String, ToolCard>,
    docs: HashMap<String, ToolSearchDoc>,
    version: u64,
    updated_at: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            docs: HashMap::new(),
            version: 0,
            updated_at: 0,
        }
    }

    /// Insert or overwrite entries by `toolId`; rebuild each affected
    /// `ToolSearchDoc`. Bumps `version` only if at least one entry changed.
    /// Rejects the whole batch (no partial application) if any card fails
    /// validation — see §4.1.
    pub fn upsert_tools(&mut self, tools: Vec<ToolCard>) -> Result<usize, CoreError> {
        for card in &tools {
            card.validate().map_err(|reason| CoreError::InvalidToolCard {
                tool_id: card.tool_id.clone(),
                reason,
            })?;
        }

        let mut changed = false;
        for card in tools.iter() {
            let doc = ToolSearchDoc::from_card(card);
            self.docs.insert(card.tool_id.clone(), doc);
            self.tools.insert(card.tool_id.clone(), card.clone());
            changed = true;
        }

        if changed {
            self.version += 1;
            self.updated_at = now_millis();
            eprintln!(
                "[mcp-router-core][INFO] catalog upsert: {} tools, version -> {}",
                tools.len(),
                self.version
            );
        }

        debug_assert_eq!(self.tools.len(), self.docs.len());
        Ok(tools.len())
    }

    /// Delete matching entries. Bumps `version` only if >=1 key was present.
    pub fn remove_tools(&mut self, tool_ids: &[String]) -> usize {
        let mut removed = 0;
        for id in tool_ids {
            if self.tools.remove(id).is_some() {
                self.docs.remove(id);
                removed += 1;
            }
        }
        if removed > 0 {
            self.version += 1;
            self.updated_at = now_millis();
            eprintln!(
                "[mcp-router-core][INFO] catalog remove: {} tools, version -> {}",
                removed, self.version
            );
        }
        removed
    }

    /// Clear everything. Bumps `version` only if the store was non-empty.
    pub fn reset(&mut self) {
        if !self.tools.is_empty() {
            self.tools.clear();
            self.docs.clear();
            self.version += 1;
            self.updated_at = now_millis();
            eprintln!(
                "[mcp-router-core][INFO] catalog reset, version -> {}",
                self.version
            );
        }
    }

    pub fn stats(&self) -> CatalogStats {
        debug_assert_eq!(self.tools.len(), self.docs.len());
        CatalogStats {
            tools: self.tools.len(),
            index_size: self.docs.len(),
            updated_at: self.updated_at,
        }
    }

    pub fn get_tool(&self, tool_id: &str) -> Option<&ToolCard> {
        self.tools.get(tool_id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Copy-on-write snapshot. Cheap enough for catalogs up to ~10^4 tools
    /// (§5, §9) and trivially consistent since it is built from one
    /// already-consistent `&self` borrow.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            version: self.version,
            updated_at: self.updated_at,
            tools: self.tools.clone(),
            docs: self.docs.clone(),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
