use crate::model::{EntitySlots, EntityType, Id, Record};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Entities already mapped to existing records are left alone
    #[default]
    Merge,
    /// Every selected entity is (re)written, reusing pre-mapped ids
    Replace,
}

fn default_true() -> bool {
    true
}

/// What the operator asked for when applying a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOptions {
    pub target_story_id: Id,

    #[serde(default)]
    pub mode: MergeMode,

    /// Per-type inclusion lists; a type missing from the map is applied in full
    #[serde(default)]
    pub selection: BTreeMap<EntityType, Vec<Id>>,

    /// Template-local id to real id, seeded before creation
    #[serde(default)]
    pub id_map: HashMap<Id, Id>,

    /// Field overrides per template-local id. An `id` key overrides the generated id.
    #[serde(default)]
    pub entity_overrides: HashMap<Id, Map<String, Value>>,

    /// Populate relationship fields; when false they stay empty
    #[serde(default = "default_true")]
    pub merge_relationships: bool,

    #[serde(default)]
    pub variable_values: HashMap<String, Value>,

    /// Unresolved placeholders fail the run instead of being left in place
    #[serde(default)]
    pub strict_variables: bool,

    /// Delete the records written by this run if persisting fails part way
    #[serde(default)]
    pub rollback_on_failure: bool,
}

impl ApplyOptions {
    pub fn new(target_story_id: impl Into<Id>) -> Self {
        Self {
            target_story_id: target_story_id.into(),
            mode: MergeMode::default(),
            selection: BTreeMap::new(),
            id_map: HashMap::new(),
            entity_overrides: HashMap::new(),
            merge_relationships: true,
            variable_values: HashMap::new(),
            strict_variables: false,
            rollback_on_failure: false,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variable_values.insert(name.into(), value);
        self
    }

    pub fn with_selection(mut self, entity_type: EntityType, ids: &[&str]) -> Self {
        self.selection
            .insert(entity_type, ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// True when the entity passes the caller's selection
    pub fn is_selected(&self, entity_type: EntityType, template_id: &str) -> bool {
        match self.selection.get(&entity_type) {
            Some(ids) => ids.iter().any(|id| id == template_id),
            None => true,
        }
    }
}

/// A relationship value that matched no record created in the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedReference {
    pub entity_type: EntityType,
    pub record_id: Id,
    pub field: String,
    pub value: String,
}

/// Outcome of one application run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub id_map: BTreeMap<Id, Id>,
    pub created: EntitySlots<Record>,
    pub warnings: Vec<String>,
    #[serde(default)]
    pub unresolved_references: Vec<UnresolvedReference>,
}

impl ApplicationResult {
    pub fn new() -> Self {
        Self {
            success: false,
            error: None,
            id_map: BTreeMap::new(),
            created: EntitySlots::default(),
            warnings: Vec::new(),
            unresolved_references: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.error = Some(message.into());
        result
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    /// One-line summary for the operator, e.g. "created 1 group, 2 characters"
    pub fn summary(&self) -> String {
        if !self.success {
            return format!(
                "Template application failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        let counts = EntityType::ALL
            .into_iter()
            .filter(|t| !self.created.get(*t).is_empty())
            .map(|t| format!("{} {}", self.created.get(t).len(), t.slot_name()))
            .join(", ");
        if counts.is_empty() {
            "Template applied: nothing created".to_string()
        } else {
            format!("Template applied: created {}", counts)
        }
    }
}

impl Default for ApplicationResult {
    fn default() -> Self {
        Self::new()
    }
}
