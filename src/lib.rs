pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use error::{TemplateError, TemplateResult};

pub use logic::{
    TemplateApplicator, TemplateValidationResult, TemplateValidator, VariableSubstitution,
};

pub use model::*;

pub use store::{FileStore, MemoryStore, RecordStore, Store, TemplateStore};
