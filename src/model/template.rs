use crate::model::{EntitySlots, EntityType, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A reusable bundle of pre-authored, cross-referenced story-world records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default = "default_editable")]
    pub is_editable: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub entities: EntitySlots<TemplateEntity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<TemplateVariable>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<TemplatePlaceholder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,
}

fn default_editable() -> bool {
    true
}

impl Template {
    pub fn new(id: impl Into<Id>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version: "1.0.0".to_string(),
            category: "custom".to_string(),
            genre: "fantasy".to_string(),
            tags: Vec::new(),
            author: None,
            is_built_in: false,
            is_editable: true,
            usage_count: 0,
            created_at: Some(Utc::now()),
            updated_at: None,
            entities: EntitySlots::default(),
            variables: Vec::new(),
            placeholders: Vec::new(),
            metadata: None,
        }
    }

    /// Template entity with the given template-local id, in any slot
    pub fn find_entity(&self, template_id: &str) -> Option<(EntityType, &TemplateEntity)> {
        self.entities
            .iter()
            .find(|(_, entity)| entity.template_id == template_id)
    }
}

/// A partial record inside a bundle, tagged with its template-local id.
///
/// Fields come either as a raw document fragment (`yamlContent` + `markdownContent`)
/// or as decomposed keys plus the legacy `customFields` / `sectionContent` maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntity {
    #[serde(default)]
    pub template_id: Id,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_content: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// The encoding a template entity arrived in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityEncoding<'a> {
    Document {
        attributes: &'a str,
        body: &'a str,
    },
    Decomposed {
        fields: &'a Map<String, Value>,
        custom_fields: Option<&'a Map<String, Value>>,
        section_content: Option<&'a BTreeMap<String, String>>,
    },
}

impl TemplateEntity {
    pub fn new(template_id: impl Into<Id>) -> Self {
        Self {
            template_id: template_id.into(),
            yaml_content: None,
            markdown_content: None,
            custom_fields: None,
            section_content: None,
            fields: Map::new(),
        }
    }

    /// Builder-style helper for decomposed entities
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn encoding(&self) -> EntityEncoding<'_> {
        match &self.yaml_content {
            Some(attributes) => EntityEncoding::Document {
                attributes,
                body: self.markdown_content.as_deref().unwrap_or(""),
            },
            None => EntityEncoding::Decomposed {
                fields: &self.fields,
                custom_fields: self.custom_fields.as_ref(),
                section_content: self.section_content.as_ref(),
            },
        }
    }
}

/// The five recognized variable kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Text,
    Number,
    Boolean,
    Select,
    Date,
}

impl std::str::FromStr for VariableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(VariableType::Text),
            "number" => Ok(VariableType::Number),
            "boolean" => Ok(VariableType::Boolean),
            "select" => Ok(VariableType::Select),
            "date" => Ok(VariableType::Date),
            _ => Err(format!("Unknown variable type: {}", s)),
        }
    }
}

/// A named placeholder that can be filled in when the bundle is applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Kept as text so that unknown kinds can be reported by validation
    #[serde(rename = "type", default = "default_variable_type")]
    pub variable_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_in: Vec<VariableUsage>,
}

fn default_variable_type() -> String {
    "text".to_string()
}

impl TemplateVariable {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            variable_type: default_variable_type(),
            description: None,
            default_value: None,
            options: Vec::new(),
            used_in: Vec::new(),
        }
    }

    pub fn kind(&self) -> Result<VariableType, String> {
        self.variable_type.parse()
    }
}

/// Where a variable appears: (record type, template-local id, field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUsage {
    pub entity_type: EntityType,
    pub entity_template_id: Id,
    pub field: String,
}

/// A field the operator is expected to fill in on a specific entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePlaceholder {
    pub entity_template_id: Id,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Regular expression the filled-in value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Display-oriented metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub entity_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
}
