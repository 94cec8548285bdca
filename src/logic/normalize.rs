use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::{relationship_field, relationship_fields, EntityEncoding, EntityType, Id, TemplateEntity};

/// Attribute table and named sections extracted from a raw document fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecomposedDocument {
    pub attributes: Map<String, Value>,
    pub sections: BTreeMap<String, String>,
}

/// Splits a serialized document into attributes and named sections
pub trait DocumentDecomposer: Send + Sync {
    fn decompose(&self, attributes: &str, body: &str) -> Result<DecomposedDocument>;
}

/// YAML attribute block plus a markdown body sectioned by `## ` headings.
/// Text before the first heading is kept under `Body`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterDecomposer;

impl FrontmatterDecomposer {
    fn parse_attributes(attributes: &str) -> Result<Map<String, Value>> {
        let block: String = attributes
            .lines()
            .filter(|line| line.trim() != "---")
            .collect::<Vec<_>>()
            .join("\n");
        if block.trim().is_empty() {
            return Ok(Map::new());
        }

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&block).context("attribute block is not valid YAML")?;
        match serde_json::to_value(yaml).context("attribute block cannot be represented as JSON")? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(anyhow!(
                "attribute block must be a mapping, found {}",
                json_kind(&other)
            )),
        }
    }

    fn parse_sections(body: &str) -> BTreeMap<String, String> {
        let mut sections = BTreeMap::new();
        let mut current = "Body".to_string();
        let mut buffer: Vec<&str> = Vec::new();

        for line in body.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                Self::flush(&mut sections, &current, &buffer);
                current = heading.trim().to_string();
                buffer.clear();
            } else {
                buffer.push(line);
            }
        }
        Self::flush(&mut sections, &current, &buffer);
        sections
    }

    fn flush(sections: &mut BTreeMap<String, String>, heading: &str, lines: &[&str]) {
        let content = lines.join("\n").trim().to_string();
        if heading == "Body" && content.is_empty() {
            return;
        }
        sections.insert(heading.to_string(), content);
    }
}

impl DocumentDecomposer for FrontmatterDecomposer {
    fn decompose(&self, attributes: &str, body: &str) -> Result<DecomposedDocument> {
        Ok(DecomposedDocument {
            attributes: Self::parse_attributes(attributes)?,
            sections: Self::parse_sections(body),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// A template entity in its single canonical shape, whatever encoding it came in
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntity {
    pub template_id: Id,
    pub entity_type: EntityType,
    pub name: String,
    /// Plain attributes
    pub fields: Map<String, Value>,
    pub sections: BTreeMap<String, String>,
    /// Raw relationship values, keyed by relationship field name
    pub links: Map<String, Value>,
}

impl NormalizedEntity {
    /// Merge operator-supplied overrides. `id` is ignored here; it drives id assignment.
    pub fn apply_overrides(&mut self, overrides: &Map<String, Value>) {
        for (key, value) in overrides {
            match key.as_str() {
                "id" | "templateId" => {}
                "name" => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                    }
                }
                _ if relationship_field(self.entity_type, key).is_some() => {
                    self.links.insert(key.clone(), value.clone());
                }
                _ => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Resolve an entity's encoding into the canonical shape
pub fn normalize_entity(
    entity_type: EntityType,
    entity: &TemplateEntity,
    decomposer: &dyn DocumentDecomposer,
) -> Result<NormalizedEntity> {
    let (mut fields, sections) = match entity.encoding() {
        EntityEncoding::Document { attributes, body } => {
            let doc = decomposer.decompose(attributes, body).with_context(|| {
                format!(
                    "failed to decompose {} '{}'",
                    entity_type, entity.template_id
                )
            })?;
            (doc.attributes, doc.sections)
        }
        EntityEncoding::Decomposed {
            fields,
            custom_fields,
            section_content,
        } => {
            let mut merged = fields.clone();
            // Legacy custom attributes only fill gaps
            if let Some(custom) = custom_fields {
                for (key, value) in custom {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            (merged, section_content.cloned().unwrap_or_default())
        }
    };

    fields.remove("id");
    fields.remove("templateId");

    let name = match fields.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name,
        _ => fields
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| entity.template_id.clone()),
    };

    let mut links = Map::new();
    for field in relationship_fields(entity_type) {
        if let Some(value) = fields.remove(field.name) {
            links.insert(field.name.to_string(), value);
        }
    }

    Ok(NormalizedEntity {
        template_id: entity.template_id.clone(),
        entity_type,
        name,
        fields,
        sections,
        links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decomposed_entity_normalizes() {
        let mut entity = TemplateEntity::new("C1")
            .with_field("name", json!("Mira Vex"))
            .with_field("age", json!(31))
            .with_field("groups", json!(["G1"]))
            .with_field("locations", json!(["Ashford Manor"]));
        let mut custom = Map::new();
        custom.insert("alias".to_string(), json!("The Cat"));
        custom.insert("age".to_string(), json!(99));
        entity.custom_fields = Some(custom);
        let mut sections = BTreeMap::new();
        sections.insert("Backstory".to_string(), "Raised on the docks.".to_string());
        entity.section_content = Some(sections);

        let normalized =
            normalize_entity(EntityType::Character, &entity, &FrontmatterDecomposer).unwrap();

        assert_eq!(normalized.name, "Mira Vex");
        assert_eq!(normalized.fields["age"], json!(31));
        assert_eq!(normalized.fields["alias"], json!("The Cat"));
        assert!(!normalized.fields.contains_key("groups"));
        assert_eq!(normalized.links["groups"], json!(["G1"]));
        assert_eq!(normalized.links["locations"], json!(["Ashford Manor"]));
        assert_eq!(normalized.sections["Backstory"], "Raised on the docks.");
    }

    #[test]
    fn test_document_entity_normalizes_to_same_shape() {
        let mut entity = TemplateEntity::new("L1");
        entity.yaml_content = Some(
            "---\nname: Ashford Manor\nparentLocation: L0\nclimate: damp\n---".to_string(),
        );
        entity.markdown_content = Some(
            "Intro line\n\n## Description\nA crumbling estate.\n\n## History\nBuilt in 1203."
                .to_string(),
        );

        let normalized =
            normalize_entity(EntityType::Location, &entity, &FrontmatterDecomposer).unwrap();

        assert_eq!(normalized.name, "Ashford Manor");
        assert_eq!(normalized.fields["climate"], json!("damp"));
        assert_eq!(normalized.links["parentLocation"], json!("L0"));
        assert_eq!(normalized.sections["Description"], "A crumbling estate.");
        assert_eq!(normalized.sections["History"], "Built in 1203.");
        assert_eq!(normalized.sections["Body"], "Intro line");
    }

    #[test]
    fn test_invalid_attribute_block_is_an_error() {
        let mut entity = TemplateEntity::new("X1");
        entity.yaml_content = Some("- just\n- a list".to_string());
        let err = normalize_entity(EntityType::Item, &entity, &FrontmatterDecomposer).unwrap_err();
        assert!(format!("{:#}", err).contains("X1"));
    }

    #[test]
    fn test_missing_name_falls_back_to_template_id() {
        let entity = TemplateEntity::new("E7").with_field("date", json!("Year 12"));
        let normalized =
            normalize_entity(EntityType::Event, &entity, &FrontmatterDecomposer).unwrap();
        assert_eq!(normalized.name, "E7");
    }

    #[test]
    fn test_overrides_route_to_fields_and_links() {
        let entity = TemplateEntity::new("I1").with_field("name", json!("Dagger"));
        let mut normalized =
            normalize_entity(EntityType::Item, &entity, &FrontmatterDecomposer).unwrap();

        let mut overrides = Map::new();
        overrides.insert("name".to_string(), json!("Silver Dagger"));
        overrides.insert("currentOwner".to_string(), json!("C1"));
        overrides.insert("value".to_string(), json!(40));
        overrides.insert("id".to_string(), json!("fixed"));
        normalized.apply_overrides(&overrides);

        assert_eq!(normalized.name, "Silver Dagger");
        assert_eq!(normalized.links["currentOwner"], json!("C1"));
        assert_eq!(normalized.fields["value"], json!(40));
        assert!(!normalized.fields.contains_key("id"));
    }
}
