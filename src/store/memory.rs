use crate::model::{EntityType, Id, Record, Template};
use crate::store::traits::{RecordStore, TemplateStore};
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

type RecordKey = (Id, EntityType, Id);

/// In-process store, used by tests and the CLI's dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKey, Record>>,
    templates: RwLock<HashMap<Id, Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        let store = Self::new();
        {
            let mut map = store.templates.write();
            for template in templates {
                map.insert(template.id.clone(), template);
            }
        }
        store
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Usage counter of a stored template, if the template is known
    pub fn template_usage(&self, id: &str) -> Option<u64> {
        self.templates.read().get(id).map(|t| t.usage_count)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn save_record(&self, entity_type: EntityType, record: &Record) -> Result<()> {
        let key = (record.story_id.clone(), entity_type, record.id.clone());
        self.records.write().insert(key, record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        story_id: &Id,
        entity_type: EntityType,
        id: &Id,
    ) -> Result<Option<Record>> {
        let key = (story_id.clone(), entity_type, id.clone());
        Ok(self.records.read().get(&key).cloned())
    }

    async fn list_records(&self, story_id: &Id, entity_type: EntityType) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|((story, t, _), _)| story == story_id && *t == entity_type)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete_record(&self, story_id: &Id, entity_type: EntityType, id: &Id) -> Result<bool> {
        let key = (story_id.clone(), entity_type, id.clone());
        Ok(self.records.write().remove(&key).is_some())
    }
}

#[async_trait::async_trait]
impl TemplateStore for MemoryStore {
    async fn get_template(&self, id: &Id) -> Result<Option<Template>> {
        Ok(self.templates.read().get(id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> = self.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn upsert_template(&self, template: Template) -> Result<()> {
        self.templates.write().insert(template.id.clone(), template);
        Ok(())
    }

    async fn increment_template_usage(&self, id: &Id) -> Result<()> {
        if let Some(template) = self.templates.write().get_mut(id) {
            template.usage_count += 1;
            template.updated_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_round_trip_and_delete() {
        let store = MemoryStore::new();
        let record = Record::new(
            "loc-1".to_string(),
            EntityType::Location,
            "story-1".to_string(),
            "Ashford Manor".to_string(),
        );

        store.save_record(EntityType::Location, &record).await.unwrap();
        assert_eq!(store.record_count(), 1);

        let story = "story-1".to_string();
        let fetched = store
            .get_record(&story, EntityType::Location, &record.id)
            .await
            .unwrap();
        assert_eq!(fetched, Some(record.clone()));
        assert!(store
            .list_records(&story, EntityType::Character)
            .await
            .unwrap()
            .is_empty());

        assert!(store
            .delete_record(&story, EntityType::Location, &record.id)
            .await
            .unwrap());
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_usage_counter() {
        let store = MemoryStore::with_templates([Template::new("tpl-1", "Starter")]);
        store
            .increment_template_usage(&"tpl-1".to_string())
            .await
            .unwrap();
        store
            .increment_template_usage(&"unknown".to_string())
            .await
            .unwrap();
        assert_eq!(store.template_usage("tpl-1"), Some(1));
        assert_eq!(store.list_templates().await.unwrap().len(), 1);
    }
}
