use crate::model::{EntityType, Id, Record, Template};
use anyhow::Result;

/// Document storage for story-world records
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Write a fully populated record, replacing any record with the same id
    async fn save_record(&self, entity_type: EntityType, record: &Record) -> Result<()>;
    async fn get_record(&self, story_id: &Id, entity_type: EntityType, id: &Id) -> Result<Option<Record>>;
    async fn list_records(&self, story_id: &Id, entity_type: EntityType) -> Result<Vec<Record>>;
    async fn delete_record(&self, story_id: &Id, entity_type: EntityType, id: &Id) -> Result<bool>;
}

/// Storage for template bundles at rest
#[async_trait::async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: &Id) -> Result<Option<Template>>;
    async fn list_templates(&self) -> Result<Vec<Template>>;
    async fn upsert_template(&self, template: Template) -> Result<()>;
    /// Bump the usage counter of a stored template. Unknown ids are not an error.
    async fn increment_template_usage(&self, id: &Id) -> Result<()>;
}

pub trait Store: RecordStore + TemplateStore + Send + Sync {}
impl<T: RecordStore + TemplateStore + Send + Sync> Store for T {}
