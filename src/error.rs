use crate::model::{EntityType, Id};
use thiserror::Error;

/// Failures that abort a template application run
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The bundle failed structural checks; nothing was created
    #[error("Template validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Strict substitution found placeholders without values
    #[error("Variable substitution failed: {}", .0.join("; "))]
    Substitution(Vec<String>),

    /// A record could not be prepared; nothing was persisted
    #[error("Failed to create {entity_type} '{template_id}': {cause:#}")]
    Creation {
        entity_type: EntityType,
        template_id: Id,
        cause: anyhow::Error,
    },

    /// Storage rejected a write; records saved before the failure remain
    #[error("Failed to save {entity_type} '{record_id}': {cause:#}")]
    Persist {
        entity_type: EntityType,
        record_id: Id,
        cause: anyhow::Error,
    },

    #[error("Variable substitution produced an unreadable template: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TemplateResult<T> = Result<T, TemplateError>;
