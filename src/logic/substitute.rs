use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use crate::model::TemplateVariable;

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("variable pattern is valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionOptions {
    /// Report unresolved placeholders as errors instead of warnings
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionResult<T> {
    pub value: T,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl<T> SubstitutionResult<T> {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Declared variables lacking a supplied value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCheck {
    pub is_valid: bool,
    pub missing: Vec<String>,
}

/// Replaces `{{name}}` placeholders throughout arbitrarily nested JSON values
pub struct VariableSubstitution;

impl VariableSubstitution {
    /// Substitute every placeholder in `value`, returning a new value.
    /// The input is never modified.
    pub fn substitute(
        value: &Value,
        values: &HashMap<String, Value>,
        options: SubstitutionOptions,
    ) -> SubstitutionResult<Value> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let value = Self::substitute_value(value, values, options, &mut warnings, &mut errors);
        SubstitutionResult {
            value,
            warnings,
            errors,
        }
    }

    pub fn substitute_str(
        text: &str,
        values: &HashMap<String, Value>,
        options: SubstitutionOptions,
    ) -> SubstitutionResult<String> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let value = Self::substitute_text(text, values, options, &mut warnings, &mut errors);
        SubstitutionResult {
            value,
            warnings,
            errors,
        }
    }

    fn substitute_value(
        value: &Value,
        values: &HashMap<String, Value>,
        options: SubstitutionOptions,
        warnings: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Value {
        match value {
            Value::String(text) => {
                Value::String(Self::substitute_text(text, values, options, warnings, errors))
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| Self::substitute_value(item, values, options, warnings, errors))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        (
                            key.clone(),
                            Self::substitute_value(item, values, options, warnings, errors),
                        )
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn substitute_text(
        text: &str,
        values: &HashMap<String, Value>,
        options: SubstitutionOptions,
        warnings: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> String {
        if !Self::has_variables(text) {
            return text.to_string();
        }

        VARIABLE_PATTERN
            .replace_all(text, |caps: &Captures| {
                let name = &caps[1];
                match values.get(name) {
                    Some(value) => Self::coerce(name, value, warnings),
                    None => {
                        if options.strict {
                            errors.push(format!("Missing value for variable '{}'", name));
                        } else {
                            warnings.push(format!("Unresolved variable '{}' left in place", name));
                        }
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Render a variable value as text
    fn coerce(name: &str, value: &Value, warnings: &mut Vec<String>) -> String {
        match value {
            Value::Null => {
                warnings.push(format!(
                    "Variable '{}' has no value, substituted with empty text",
                    name
                ));
                String::new()
            }
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => {
                warnings.push(format!(
                    "Variable '{}' is an object, substituted with its JSON form",
                    name
                ));
                value.to_string()
            }
        }
    }

    /// Distinct placeholder names anywhere in the tree
    pub fn extract_variables(value: &Value) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        Self::collect_variables(value, &mut names);
        names
    }

    fn collect_variables(value: &Value, names: &mut BTreeSet<String>) {
        match value {
            Value::String(text) => {
                names.extend(
                    VARIABLE_PATTERN
                        .captures_iter(text)
                        .map(|caps| caps[1].to_string()),
                );
            }
            Value::Array(items) => items.iter().for_each(|v| Self::collect_variables(v, names)),
            Value::Object(map) => map.values().for_each(|v| Self::collect_variables(v, names)),
            _ => {}
        }
    }

    pub fn has_variables(text: &str) -> bool {
        VARIABLE_PATTERN.is_match(text)
    }

    /// Number of placeholder occurrences (not distinct names)
    pub fn count_variables(text: &str) -> usize {
        VARIABLE_PATTERN.find_iter(text).count()
    }

    /// Report declared variables without a supplied value. Informative only;
    /// substitution still runs.
    pub fn validate_variables(
        declared: &[TemplateVariable],
        values: &HashMap<String, Value>,
    ) -> VariableCheck {
        let missing: Vec<String> = declared
            .iter()
            .filter(|v| values.get(&v.name).map_or(true, Value::is_null))
            .map(|v| v.name.clone())
            .collect();
        VariableCheck {
            is_valid: missing.is_empty(),
            missing,
        }
    }

    /// Declared defaults overlaid with the caller's values
    pub fn effective_values(
        declared: &[TemplateVariable],
        supplied: &HashMap<String, Value>,
    ) -> HashMap<String, Value> {
        let mut values: HashMap<String, Value> = declared
            .iter()
            .filter_map(|v| v.default_value.clone().map(|d| (v.name.clone(), d)))
            .collect();
        values.extend(supplied.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }
}
