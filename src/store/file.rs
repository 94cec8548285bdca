use crate::model::{EntityType, Id, Record, Template};
use crate::store::traits::{RecordStore, TemplateStore};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// One JSON document per record under `<root>/stories/<story>/<slot>/<id>.json`,
/// templates under `<root>/templates/<id>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_dir(&self, story_id: &str, entity_type: EntityType) -> Result<PathBuf> {
        Ok(self
            .root
            .join("stories")
            .join(safe_segment(story_id)?)
            .join(entity_type.slot_name()))
    }

    fn record_path(&self, story_id: &str, entity_type: EntityType, id: &str) -> Result<PathBuf> {
        Ok(self
            .record_dir(story_id, entity_type)?
            .join(format!("{}.json", safe_segment(id)?)))
    }

    fn template_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("templates")
            .join(format!("{}.json", safe_segment(id)?)))
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn read_dir_json<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };

        let mut values = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(value) = Self::read_json(&path).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

/// Ids become file names; refuse anything that could escape the store root
fn safe_segment(id: &str) -> Result<&str> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(anyhow!("'{}' cannot be used as a storage key", id));
    }
    Ok(id)
}

#[async_trait::async_trait]
impl RecordStore for FileStore {
    async fn save_record(&self, entity_type: EntityType, record: &Record) -> Result<()> {
        let path = self.record_path(&record.story_id, entity_type, &record.id)?;
        Self::write_json(&path, record).await
    }

    async fn get_record(
        &self,
        story_id: &Id,
        entity_type: EntityType,
        id: &Id,
    ) -> Result<Option<Record>> {
        let record: Option<Record> =
            Self::read_json(&self.record_path(story_id, entity_type, id)?).await?;
        Ok(record.map(|mut record| {
            record.conform_relationships();
            record
        }))
    }

    async fn list_records(&self, story_id: &Id, entity_type: EntityType) -> Result<Vec<Record>> {
        let mut records: Vec<Record> =
            Self::read_dir_json(&self.record_dir(story_id, entity_type)?).await?;
        records.iter_mut().for_each(Record::conform_relationships);
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete_record(&self, story_id: &Id, entity_type: EntityType, id: &Id) -> Result<bool> {
        let path = self.record_path(story_id, entity_type, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

#[async_trait::async_trait]
impl TemplateStore for FileStore {
    async fn get_template(&self, id: &Id) -> Result<Option<Template>> {
        Self::read_json(&self.template_path(id)?).await
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        let mut templates: Vec<Template> =
            Self::read_dir_json(&self.root.join("templates")).await?;
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn upsert_template(&self, template: Template) -> Result<()> {
        let path = self.template_path(&template.id)?;
        Self::write_json(&path, &template).await
    }

    async fn increment_template_usage(&self, id: &Id) -> Result<()> {
        let Some(mut template) = self.get_template(id).await? else {
            return Ok(());
        };
        template.usage_count += 1;
        template.updated_at = Some(chrono::Utc::now());
        self.upsert_template(template).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationshipValue;

    #[tokio::test]
    async fn test_records_are_written_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let record = Record::new(
            "ms-1".to_string(),
            EntityType::MagicSystem,
            "story-1".to_string(),
            "Runecraft".to_string(),
        );

        store.save_record(EntityType::MagicSystem, &record).await.unwrap();
        assert!(dir
            .path()
            .join("stories/story-1/magicSystems/ms-1.json")
            .exists());

        let story = "story-1".to_string();
        let listed = store.list_records(&story, EntityType::MagicSystem).await.unwrap();
        assert_eq!(listed, vec![record.clone()]);
        assert!(store
            .list_records(&story, EntityType::Scene)
            .await
            .unwrap()
            .is_empty());

        assert!(store
            .delete_record(&story, EntityType::MagicSystem, &record.id)
            .await
            .unwrap());
        assert!(!store
            .delete_record(&story, EntityType::MagicSystem, &record.id)
            .await
            .unwrap());

        let mut character = Record::new(
            "c-1".to_string(),
            EntityType::Character,
            "story-1".to_string(),
            "Mira Vex".to_string(),
        );
        character.relationships = crate::logic::empty_relationships(EntityType::Character);
        assert_eq!(
            character.relationship("relationships"),
            Some(&RelationshipValue::Typed(Vec::new()))
        );

        store.save_record(EntityType::Character, &character).await.unwrap();
        let read_back = store
            .get_record(&story, EntityType::Character, &character.id)
            .await
            .unwrap();
        assert_eq!(read_back, Some(character.clone()));
        let listed = store.list_records(&story, EntityType::Character).await.unwrap();
        assert_eq!(listed, vec![character]);
    }

    #[tokio::test]
    async fn test_template_usage_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .upsert_template(Template::new("tpl-1", "Starter"))
            .await
            .unwrap();

        let id = "tpl-1".to_string();
        store.increment_template_usage(&id).await.unwrap();
        store.increment_template_usage(&id).await.unwrap();

        let template = store.get_template(&id).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 2);
    }

    #[tokio::test]
    async fn test_path_traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let record = Record::new(
            "../escape".to_string(),
            EntityType::Item,
            "story-1".to_string(),
            "Key".to_string(),
        );
        assert!(store.save_record(EntityType::Item, &record).await.is_err());
    }
}
