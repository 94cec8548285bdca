use crate::model::Template;
use crate::store::traits::TemplateStore;
use anyhow::{Context, Result};
use serde_json::json;

pub const THIEVES_GUILD_TEMPLATE_ID: &str = "thieves-guild-starter";

/// A small heist setting: two rival factions, their members, a manor and a job
/// gone wrong. Exercises every relationship shape and both entity encodings.
pub fn thieves_guild_template() -> Result<Template> {
    let bundle = json!({
        "id": THIEVES_GUILD_TEMPLATE_ID,
        "name": "Thieves Guild Starter",
        "description": "A guild of thieves, the watch that hunts them, and the heist that started it all",
        "version": "1.0.0",
        "category": "faction",
        "genre": "fantasy",
        "tags": ["heist", "urban", "intrigue"],
        "author": "system",
        "isBuiltIn": true,
        "isEditable": false,
        "entities": {
            "groups": [
                {
                    "templateId": "G1",
                    "name": "Thieves Guild",
                    "groupType": "criminal",
                    "members": [
                        {"name": "Mira Vex", "rank": "Guildmaster"},
                        {"name": "{{heroName}}", "rank": "Initiate"}
                    ],
                    "territories": ["L2"],
                    "sectionContent": {"Description": "Operates from the cellars beneath {{townName}}."}
                },
                {
                    "templateId": "G2",
                    "name": "{{townName}} Watch",
                    "groupType": "military",
                    "groupRelationships": [{"target": "G1", "type": "rival", "label": "sworn enemies"}],
                    "territories": ["L1"]
                }
            ],
            "characters": [
                {
                    "templateId": "C1",
                    "name": "{{heroName}}",
                    "role": "protagonist",
                    "groups": ["G1"],
                    "locations": ["L1"],
                    "relationships": [{"target": "C2", "type": "mentor"}],
                    "sectionContent": {"Backstory": "An orphan of {{townName}} with quick hands."}
                },
                {
                    "templateId": "C2",
                    "name": "Mira Vex",
                    "role": "mentor",
                    "groups": ["G1"],
                    "locations": ["Ashford Manor"],
                    "customFields": {"alias": "The Cat"}
                }
            ],
            "locations": [
                {
                    "templateId": "L1",
                    "name": "{{townName}}",
                    "locationType": "city"
                },
                {
                    "templateId": "L2",
                    "yamlContent": "name: Ashford Manor\nlocationType: estate\nparentLocation: L1\ngroups:\n  - G1\n",
                    "markdownContent": "## Description\nA crumbling estate on the edge of {{townName}}.\n\n## Secrets\nA vault lies beneath the chapel."
                }
            ],
            "items": [
                {
                    "templateId": "I1",
                    "name": "Guild Signet",
                    "itemType": "ring",
                    "currentOwner": "C2",
                    "currentLocation": "L2",
                    "pastOwners": []
                }
            ],
            "events": [
                {
                    "templateId": "E1",
                    "name": "The Ashford Heist",
                    "date": "Autumn, Year 12",
                    "characters": ["C1", "C2"],
                    "location": "L2",
                    "items": ["I1"],
                    "groups": ["G1", "G2"]
                }
            ],
            "chapters": [
                {
                    "templateId": "CH1",
                    "name": "Chapter One: Initiation",
                    "linkedCharacters": ["C1"],
                    "linkedEvents": ["E1"]
                }
            ],
            "scenes": [
                {
                    "templateId": "S1",
                    "name": "Night at the Manor",
                    "chapter": "CH1",
                    "linkedCharacters": ["C1", "C2"],
                    "linkedLocations": ["L2"],
                    "groups": ["G1"]
                }
            ]
        },
        "variables": [
            {
                "name": "heroName",
                "displayName": "Hero name",
                "type": "text",
                "defaultValue": "Aria",
                "usedIn": [
                    {"entityType": "character", "entityTemplateId": "C1", "field": "name"},
                    {"entityType": "group", "entityTemplateId": "G1", "field": "members"}
                ]
            },
            {
                "name": "townName",
                "displayName": "Town",
                "type": "text",
                "defaultValue": "Ashford",
                "usedIn": [
                    {"entityType": "location", "entityTemplateId": "L1", "field": "name"}
                ]
            }
        ],
        "metadata": {
            "entityTypes": ["group", "character", "location", "item", "event", "chapter", "scene"],
            "entityCount": 10,
            "setting": "Port city",
            "era": "Late medieval"
        }
    });

    serde_json::from_value(bundle).context("seed template is malformed")
}

pub async fn load_seed_data<S: TemplateStore>(store: &S) -> Result<()> {
    store.upsert_template(thieves_guild_template()?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::TemplateValidator;

    #[test]
    fn test_seed_template_is_valid() {
        let template = thieves_guild_template().unwrap();
        assert_eq!(template.entities.len(), 10);

        let result = TemplateValidator::validate(&template);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        // members and one location are referenced by display name
        let targets: Vec<_> = result
            .broken_references
            .iter()
            .map(|r| r.target_id.as_str())
            .collect();
        assert_eq!(targets, vec!["Ashford Manor", "Mira Vex", "{{heroName}}"]);
    }
}
