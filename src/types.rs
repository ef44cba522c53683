/// Catalog data model: `ToolCard` (caller-supplied) and `ToolSearchDoc`
/// (derived, pure function of a `ToolCard`) per the data model spec.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    None,
    Read,
    Write,
    Destructive,
}

impl Default for SideEffect {
    fn default() -> Self {
        SideEffect::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostHint {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolArg {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "typeHint")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolExample {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "callHint")]
    pub call_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCard {
    #[serde(rename = "toolId")]
    pub tool_id: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default, rename = "authHint")]
    pub auth_hint: Vec<String>,
    #[serde(default)]
    pub args: Vec<ToolArg>,
    #[serde(default)]
    pub examples: Vec<ToolExample>,
    #[serde(default, rename = "sideEffect")]
    pub side_effect: SideEffect,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "openWorldHint")]
    pub open_world_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "idempotentHint")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "costHint")]
    pub cost_hint: Option<CostHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
}

impl ToolCard {
    /// Basic validation: non-empty id, and `toolId == "{serverId}:{toolName}"`.
    pub fn validate(&self) -> Result<(), String> {
        if self.tool_id.is_empty() {
            return Err("toolId must not be empty".into());
        }
        if self.server_id.is_empty() || self.tool_name.is_empty() {
            return Err("serverId and toolName must not be empty".into());
        }
        let expected = format!("{}:{}", self.server_id, self.tool_name);
        if self.tool_id != expected {
            return Err(format!(
                "toolId '{}' does not match serverId:toolName '{}'",
                self.tool_id, expected
            ));
        }
        Ok(())
    }
}

/// Derived, per-tool search document. Nine textual fields, always
/// re-derived on upsert — never hand-edited.
#[derive(Debug, Clone, Default)]
pub struct ToolSearchDoc {
    pub name: String,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub synonyms: String,
    pub arg_names: String,
    pub arg_descs: String,
    pub examples: String,
    pub server_id: String,
}

impl ToolSearchDoc {
    pub fn from_card(card: &ToolCard) -> Self {
        let arg_names = card
            .args
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let arg_descs = card
            .args
            .iter()
            .filter_map(|a| a.description.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        let examples = card
            .examples
            .iter()
            .map(|e| {
                let mut s = e.query.clone();
                if let Some(hint) = &e.call_hint {
                    s.push(' ');
                    s.push_str(hint);
                }
                s
            })
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            name: card.tool_name.clone(),
            title: card.title.clone().unwrap_or_default(),
            description: card.description.clone().unwrap_or_default(),
            tags: card.tags.join(" "),
            synonyms: card.synonyms.join(" "),
            arg_names,
            arg_descs,
            examples,
            server_id: card.server_id.clone(),
        }
    }

    /// Field accessor, used by the BM25 indexer to iterate fields generically.
    pub fn field(&self, name: SearchField) -> &str {
        match name {
            SearchField::Name => &self.name,
            SearchField::Title => &self.title,
            SearchField::Description => &self.description,
            SearchField::Tags => &self.tags,
            SearchField::Synonyms => &self.synonyms,
            SearchField::ArgNames => &self.arg_names,
            SearchField::ArgDescs => &self.arg_descs,
            SearchField::Examples => &self.examples,
            SearchField::ServerId => &self.server_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Name,
    Title,
    Description,
    Tags,
    Synonyms,
    ArgNames,
    ArgDescs,
    Examples,
    ServerId,
}

pub const ALL_FIELDS: [SearchField; 9] = [
    SearchField::Name,
    SearchField::Title,
    SearchField::Description,
    SearchField::Tags,
    SearchField::Synonyms,
    SearchField::ArgNames,
    SearchField::ArgDescs,
    SearchField::Examples,
    SearchField::ServerId,
];

/// Immutable catalog view. `tools` and `docs` always share the same key set.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub updated_at: u64,
    pub tools: HashMap<String, ToolCard>,
    pub docs: HashMap<String, ToolSearchDoc>,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            updated_at: 0,
            tools: HashMap::new(),
            docs: HashMap::new(),
        }
    }
}
