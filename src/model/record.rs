use crate::model::{default_timestamp, relationship_fields, EntityType, Id, RelationshipValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A story-world record as handed to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Id,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub story_id: Id,
    pub name: String,

    /// Plain (non-relationship) attributes
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Named markdown sections of the record's body
    #[serde(default)]
    pub sections: BTreeMap<String, String>,

    /// Relationship fields, keyed by field name
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipValue>,

    /// Template-local id this record was instantiated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Id>,

    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: Id, entity_type: EntityType, story_id: Id, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type,
            story_id,
            name,
            fields: Map::new(),
            sections: BTreeMap::new(),
            relationships: BTreeMap::new(),
            template_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn relationship(&self, field: &str) -> Option<&RelationshipValue> {
        self.relationships.get(field)
    }

    /// References held by a relationship field of any shape (typed entries
    /// unwrap to their target, memberships to the member name), empty if absent
    pub fn relationship_ids(&self, field: &str) -> Vec<&str> {
        self.relationships
            .get(field)
            .map(RelationshipValue::targets)
            .unwrap_or_default()
    }

    pub fn has_relationships(&self) -> bool {
        self.relationships.values().any(|v| !v.is_empty())
    }

    /// Bring relationship values read back from storage into the shape their
    /// field declares for this record's type
    pub fn conform_relationships(&mut self) {
        for field in relationship_fields(self.entity_type) {
            if let Some(value) = self.relationships.remove(field.name) {
                self.relationships
                    .insert(field.name.to_string(), value.conform(field.shape));
            }
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_camel_case() {
        let mut record = Record::new(
            "r-1".to_string(),
            EntityType::MagicSystem,
            "story-1".to_string(),
            "Runecraft".to_string(),
        );
        record.relationships.insert(
            "linkedCharacters".to_string(),
            RelationshipValue::Ids(vec!["c-1".to_string()]),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "magicSystem");
        assert_eq!(json["storyId"], "story-1");
        assert_eq!(json["relationships"]["linkedCharacters"][0], "c-1");
        assert!(json.get("templateId").is_none());

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.relationship_ids("linkedCharacters"), vec!["c-1"]);
        assert!(back.has_relationships());
    }

    #[test]
    fn test_empty_lists_read_back_in_declared_shape() {
        let mut record = Record::new(
            "g-1".to_string(),
            EntityType::Group,
            "story-1".to_string(),
            "Thieves Guild".to_string(),
        );
        record
            .relationships
            .insert("members".to_string(), RelationshipValue::Members(Vec::new()));
        record
            .relationships
            .insert("groupRelationships".to_string(), RelationshipValue::Typed(Vec::new()));
        record
            .relationships
            .insert("territories".to_string(), RelationshipValue::Ids(Vec::new()));

        let json = serde_json::to_value(&record).unwrap();
        let mut back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back.relationships["members"], RelationshipValue::Ids(Vec::new()));

        back.conform_relationships();
        assert_eq!(back, record);
    }

    #[test]
    fn test_relationship_ids_unwrap_typed_and_membership_values() {
        let record: Record = serde_json::from_value(serde_json::json!({
            "id": "g-1",
            "type": "group",
            "storyId": "story-1",
            "name": "Thieves Guild",
            "relationships": {
                "members": [{"name": "chr-1", "rank": "Master"}],
                "groupRelationships": [{"target": "grp-2", "type": "rival"}],
                "parentGroup": "grp-0"
            }
        }))
        .unwrap();

        assert_eq!(record.relationship_ids("members"), vec!["chr-1"]);
        assert_eq!(record.relationship_ids("groupRelationships"), vec!["grp-2"]);
        assert_eq!(record.relationship_ids("parentGroup"), vec!["grp-0"]);
        assert!(record.relationship_ids("territories").is_empty());
    }
}
