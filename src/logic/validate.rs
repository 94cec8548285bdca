use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::logic::normalize::{normalize_entity, DocumentDecomposer, FrontmatterDecomposer};
use crate::logic::substitute::VariableSubstitution;
use crate::model::{relationship_fields, EntityType, Id, RelationshipValue, Template, VariableType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenReference {
    pub entity_type: EntityType,
    pub entity_id: Id,
    pub reference_type: String,
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub broken_references: Vec<BrokenReference>,
}

impl TemplateValidationResult {
    fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            broken_references: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }

    fn merge(&mut self, other: TemplateValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.broken_references.extend(other.broken_references);
        self.is_valid = self.errors.is_empty();
    }
}

/// Structural and referential checks over a bundle
pub struct TemplateValidator;

impl TemplateValidator {
    pub fn validate(template: &Template) -> TemplateValidationResult {
        Self::validate_with(template, &FrontmatterDecomposer)
    }

    pub fn validate_with(
        template: &Template,
        decomposer: &dyn DocumentDecomposer,
    ) -> TemplateValidationResult {
        let mut result = Self::validate_structure(template);
        result.merge(Self::validate_references(template, decomposer));
        result
    }

    /// Checks that never look inside entity contents: required fields, template
    /// ids, placeholders, variables and declared entity types
    pub fn validate_structure(template: &Template) -> TemplateValidationResult {
        let mut result = TemplateValidationResult::new();

        Self::check_required_fields(template, &mut result);
        let ids = Self::collect_template_ids(template, &mut result);
        Self::check_placeholders(template, &ids, &mut result);
        Self::check_variables(template, &mut result);
        Self::check_entity_types(template, &mut result);

        result.is_valid = result.errors.is_empty();
        result
    }

    /// Reads every entity (decomposing raw documents) and checks where its
    /// relationship fields point
    pub fn validate_references(
        template: &Template,
        decomposer: &dyn DocumentDecomposer,
    ) -> TemplateValidationResult {
        let mut result = TemplateValidationResult::new();
        let ids: HashSet<Id> = template
            .entities
            .iter()
            .map(|(_, entity)| entity.template_id.clone())
            .collect();

        Self::check_references(template, &ids, decomposer, &mut result);

        result.is_valid = result.errors.is_empty();
        result
    }

    fn check_required_fields(template: &Template, result: &mut TemplateValidationResult) {
        let required = [
            ("id", &template.id),
            ("name", &template.name),
            ("version", &template.version),
            ("category", &template.category),
            ("genre", &template.genre),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                result.error(format!("Template is missing required field '{}'", field));
            }
        }
    }

    /// Every template-local id in the bundle. Empty and duplicate ids are errors.
    fn collect_template_ids(
        template: &Template,
        result: &mut TemplateValidationResult,
    ) -> HashSet<Id> {
        let mut ids = HashSet::new();
        let mut duplicates = BTreeSet::new();

        for (entity_type, entity) in template.entities.iter() {
            if entity.template_id.trim().is_empty() {
                result.error(format!(
                    "A {} entity has no templateId and cannot be mapped",
                    entity_type
                ));
                continue;
            }
            if !ids.insert(entity.template_id.clone()) {
                duplicates.insert(entity.template_id.clone());
            }
        }

        for id in duplicates {
            result.error(format!("Duplicate templateId '{}' in template", id));
        }
        ids
    }

    fn check_references(
        template: &Template,
        ids: &HashSet<Id>,
        decomposer: &dyn DocumentDecomposer,
        result: &mut TemplateValidationResult,
    ) {
        for (entity_type, entity) in template.entities.iter() {
            let normalized = match normalize_entity(entity_type, entity, decomposer) {
                Ok(normalized) => normalized,
                Err(e) => {
                    let message = format!(
                        "Entity '{}' could not be read: {:#}",
                        entity.template_id, e
                    );
                    let has_placeholders = entity
                        .yaml_content
                        .as_deref()
                        .is_some_and(VariableSubstitution::has_variables);
                    if has_placeholders {
                        result.warnings.push(format!(
                            "{} (it contains variables and is read again once they are filled in)",
                            message
                        ));
                    } else {
                        result.error(message);
                    }
                    continue;
                }
            };

            for field in relationship_fields(entity_type) {
                let Some(raw) = normalized.links.get(field.name) else {
                    continue;
                };
                let decoded = RelationshipValue::decode(field.shape, raw);
                for entry in &decoded.rejected {
                    result.warnings.push(format!(
                        "{} '{}' has an unreadable {} entry: {}",
                        entity_type, entity.template_id, field.name, entry
                    ));
                }
                let Some(value) = decoded.value else {
                    continue;
                };
                for target in value.targets() {
                    if !ids.contains(target) {
                        result.broken_references.push(BrokenReference {
                            entity_type,
                            entity_id: entity.template_id.clone(),
                            reference_type: field.name.to_string(),
                            target_id: target.to_string(),
                        });
                    }
                }
            }
        }

        if !result.broken_references.is_empty() {
            result.warnings.push(format!(
                "Found {} broken reference(s); unresolved references are kept as their original text when the template is applied",
                result.broken_references.len()
            ));
        }
    }

    fn check_placeholders(
        template: &Template,
        ids: &HashSet<Id>,
        result: &mut TemplateValidationResult,
    ) {
        for placeholder in &template.placeholders {
            if !ids.contains(&placeholder.entity_template_id) {
                result.error(format!(
                    "Placeholder references unknown entity '{}'",
                    placeholder.entity_template_id
                ));
            }
            if placeholder.field.trim().is_empty() {
                result.error(format!(
                    "Placeholder on entity '{}' has no field",
                    placeholder.entity_template_id
                ));
            }
            if let Some(pattern) = &placeholder.validation {
                if let Err(e) = Regex::new(pattern) {
                    result.error(format!(
                        "Placeholder '{}.{}' has an invalid validation pattern: {}",
                        placeholder.entity_template_id, placeholder.field, e
                    ));
                }
            }
        }
    }

    fn check_variables(template: &Template, result: &mut TemplateValidationResult) {
        let mut seen = HashSet::new();
        for variable in &template.variables {
            if !seen.insert(variable.name.as_str()) {
                result.error(format!("Duplicate variable name '{}'", variable.name));
            }

            match variable.kind() {
                Ok(VariableType::Select) if variable.options.is_empty() => {
                    result.error(format!(
                        "Select variable '{}' must declare at least one option",
                        variable.name
                    ));
                }
                Ok(_) => {}
                Err(_) => result.error(format!(
                    "Variable '{}' has unknown type '{}'",
                    variable.name, variable.variable_type
                )),
            }

            for usage in &variable.used_in {
                match template.find_entity(&usage.entity_template_id) {
                    None => result.warnings.push(format!(
                        "Variable '{}' is used in unknown entity '{}'",
                        variable.name, usage.entity_template_id
                    )),
                    Some((actual, _)) if actual != usage.entity_type => {
                        result.warnings.push(format!(
                            "Variable '{}' names {} '{}' but that entity is a {}",
                            variable.name, usage.entity_type, usage.entity_template_id, actual
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }

    /// Declared entity types vs. the slots that actually hold entities
    fn check_entity_types(template: &Template, result: &mut TemplateValidationResult) {
        let Some(metadata) = &template.metadata else {
            return;
        };
        let declared: BTreeSet<EntityType> = metadata.entity_types.iter().copied().collect();
        let present: BTreeSet<EntityType> = template.entities.present_types().into_iter().collect();

        for missing in declared.difference(&present) {
            result.warnings.push(format!(
                "Metadata declares {} entities but the template has none",
                missing
            ));
        }
        for undeclared in present.difference(&declared) {
            result.warnings.push(format!(
                "Template contains {} entities not declared in metadata",
                undeclared
            ));
        }
    }
}
