use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::{
    relationship_fields, EntityType, Membership, RelationshipValue, ResolutionContext,
    TypedRelationship,
};

/// Relationship fields of one record after rewriting, plus the references that
/// matched nothing and were kept as literal strings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkResolution {
    pub relationships: BTreeMap<String, RelationshipValue>,
    /// (field, original value)
    pub unresolved: Vec<(String, String)>,
    /// (field, entry) for entries that could not be read as a reference at all
    pub rejected: Vec<(String, Value)>,
}

/// Relationship fields of a freshly created record: empty lists, absent singles
pub fn empty_relationships(entity_type: EntityType) -> BTreeMap<String, RelationshipValue> {
    relationship_fields(entity_type)
        .iter()
        .filter_map(|field| {
            RelationshipValue::empty(field.shape).map(|empty| (field.name.to_string(), empty))
        })
        .collect()
}

/// Rewrite every relationship field of a record from template references to real ids.
/// Reads the identifier tables only.
pub fn resolve_links(
    entity_type: EntityType,
    links: &Map<String, Value>,
    ctx: &ResolutionContext,
) -> LinkResolution {
    let mut resolution = LinkResolution::default();

    for field in relationship_fields(entity_type) {
        let decoded = match links.get(field.name) {
            Some(raw) => {
                let decoded = RelationshipValue::decode(field.shape, raw);
                resolution.rejected.extend(
                    decoded
                        .rejected
                        .into_iter()
                        .map(|entry| (field.name.to_string(), entry)),
                );
                decoded.value
            }
            None => RelationshipValue::empty(field.shape),
        };
        let Some(value) = decoded else {
            continue;
        };

        let mut resolve = |reference: &str| -> String {
            match ctx.lookup(field.namespace, reference) {
                Some(real_id) => real_id.clone(),
                None => {
                    resolution
                        .unresolved
                        .push((field.name.to_string(), reference.to_string()));
                    reference.to_string()
                }
            }
        };

        let resolved = match value {
            RelationshipValue::Ids(ids) => {
                RelationshipValue::Ids(ids.iter().map(|id| resolve(id)).collect())
            }
            RelationshipValue::Typed(typed) => RelationshipValue::Typed(
                typed
                    .into_iter()
                    .map(|link| TypedRelationship {
                        target: resolve(&link.target),
                        ..link
                    })
                    .collect(),
            ),
            RelationshipValue::Members(members) => RelationshipValue::Members(
                members
                    .into_iter()
                    .map(|member| Membership {
                        name: resolve(&member.name),
                        ..member
                    })
                    .collect(),
            ),
            RelationshipValue::Single(id) => RelationshipValue::Single(resolve(&id)),
        };

        resolution
            .relationships
            .insert(field.name.to_string(), resolved);
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ResolutionContext {
        let mut ctx = ResolutionContext::new();
        ctx.record_group("G1", "Thieves Guild", "grp-1");
        ctx.record("C1", "Mira Vex", "chr-1");
        ctx.record("L1", "Ashford Manor", "loc-1");
        ctx
    }

    fn links(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_character_links_resolve_per_namespace() {
        let ctx = context();
        let resolution = resolve_links(
            EntityType::Character,
            &links(json!({
                "groups": ["G1", "Thieves Guild"],
                "locations": ["Ashford Manor", "L1", "Nowhere"],
                "relationships": [{"target": "C1", "type": "sibling", "label": "twin"}]
            })),
            &ctx,
        );

        let rels = &resolution.relationships;
        // group names are not looked up in the group namespace
        assert_eq!(
            rels["groups"],
            RelationshipValue::Ids(vec!["grp-1".to_string(), "Thieves Guild".to_string()])
        );
        assert_eq!(
            rels["locations"],
            RelationshipValue::Ids(vec![
                "loc-1".to_string(),
                "loc-1".to_string(),
                "Nowhere".to_string()
            ])
        );
        assert_eq!(
            rels["relationships"],
            RelationshipValue::Typed(vec![TypedRelationship {
                target: "chr-1".to_string(),
                relationship_type: "sibling".to_string(),
                label: Some("twin".to_string()),
                extra: Map::new(),
            }])
        );
        assert_eq!(rels["events"], RelationshipValue::Ids(Vec::new()));
        assert_eq!(
            resolution.unresolved,
            vec![
                ("locations".to_string(), "Nowhere".to_string()),
                ("groups".to_string(), "Thieves Guild".to_string())
            ]
        );
    }

    #[test]
    fn test_single_reference_absent_stays_absent() {
        let ctx = context();
        let resolution = resolve_links(
            EntityType::Location,
            &links(json!({"parentLocation": "L1"})),
            &ctx,
        );
        assert_eq!(
            resolution.relationships["parentLocation"],
            RelationshipValue::Single("loc-1".to_string())
        );

        let resolution = resolve_links(EntityType::Location, &Map::new(), &ctx);
        assert!(!resolution.relationships.contains_key("parentLocation"));
        assert_eq!(resolution.relationships["groups"], RelationshipValue::Ids(Vec::new()));
    }

    #[test]
    fn test_members_resolve_by_display_name_only() {
        let ctx = context();
        let resolution = resolve_links(
            EntityType::Group,
            &links(json!({
                "members": [{"name": "Mira Vex", "rank": "Master"}, {"name": "C1"}],
                "parentGroup": "G1"
            })),
            &ctx,
        );

        match &resolution.relationships["members"] {
            RelationshipValue::Members(members) => {
                assert_eq!(members[0].name, "chr-1");
                assert_eq!(members[0].rank.as_deref(), Some("Master"));
                assert_eq!(members[1].name, "C1");
            }
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(
            resolution.relationships["parentGroup"],
            RelationshipValue::Single("grp-1".to_string())
        );
    }

    #[test]
    fn test_empty_relationships_skip_singles() {
        let empty = empty_relationships(EntityType::Item);
        assert!(empty.contains_key("pastOwners"));
        assert!(!empty.contains_key("currentOwner"));
        assert!(empty.values().all(RelationshipValue::is_empty));
    }

    #[test]
    fn test_unreadable_entries_are_reported() {
        let ctx = context();
        let resolution = resolve_links(
            EntityType::Character,
            &links(json!({
                "relationships": [{"target": "C1", "type": "rival", "label": 3}, {"type": "ally"}],
                "locations": [true, "L1"]
            })),
            &ctx,
        );

        let Some(RelationshipValue::Typed(typed)) = resolution.relationships.get("relationships")
        else {
            panic!("relationships missing");
        };
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].target, "chr-1");
        assert_eq!(typed[0].label.as_deref(), Some("3"));
        assert_eq!(
            resolution.relationships["locations"],
            RelationshipValue::Ids(vec!["loc-1".to_string()])
        );
        assert_eq!(
            resolution.rejected,
            vec![
                ("relationships".to_string(), json!({"type": "ally"})),
                ("locations".to_string(), json!(true)),
            ]
        );
    }
}
