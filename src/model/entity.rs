use serde::{Deserialize, Serialize};

/// The eleven record types a story world is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Character,
    Location,
    Event,
    Item,
    Group,
    Culture,
    Economy,
    MagicSystem,
    Chapter,
    Scene,
    Reference,
}

impl EntityType {
    pub const ALL: [EntityType; 11] = [
        EntityType::Character,
        EntityType::Location,
        EntityType::Event,
        EntityType::Item,
        EntityType::Group,
        EntityType::Culture,
        EntityType::Economy,
        EntityType::MagicSystem,
        EntityType::Chapter,
        EntityType::Scene,
        EntityType::Reference,
    ];

    /// Name of the bundle slot (and result list) holding records of this type
    pub fn slot_name(&self) -> &'static str {
        match self {
            EntityType::Character => "characters",
            EntityType::Location => "locations",
            EntityType::Event => "events",
            EntityType::Item => "items",
            EntityType::Group => "groups",
            EntityType::Culture => "cultures",
            EntityType::Economy => "economies",
            EntityType::MagicSystem => "magicSystems",
            EntityType::Chapter => "chapters",
            EntityType::Scene => "scenes",
            EntityType::Reference => "references",
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, EntityType::Group)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            EntityType::Character => "character",
            EntityType::Location => "location",
            EntityType::Event => "event",
            EntityType::Item => "item",
            EntityType::Group => "group",
            EntityType::Culture => "culture",
            EntityType::Economy => "economy",
            EntityType::MagicSystem => "magicSystem",
            EntityType::Chapter => "chapter",
            EntityType::Scene => "scene",
            EntityType::Reference => "reference",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    /// Accepts both the singular type name and the plural slot name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        EntityType::ALL
            .into_iter()
            .find(|t| {
                t.to_string().eq_ignore_ascii_case(wanted)
                    || t.slot_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// One list per record type. Used both for the entities of a bundle and for the
/// records created by an application run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitySlots<T> {
    pub characters: Vec<T>,
    pub locations: Vec<T>,
    pub events: Vec<T>,
    pub items: Vec<T>,
    pub groups: Vec<T>,
    pub cultures: Vec<T>,
    pub economies: Vec<T>,
    pub magic_systems: Vec<T>,
    pub chapters: Vec<T>,
    pub scenes: Vec<T>,
    pub references: Vec<T>,
}

impl<T> Default for EntitySlots<T> {
    fn default() -> Self {
        Self {
            characters: Vec::new(),
            locations: Vec::new(),
            events: Vec::new(),
            items: Vec::new(),
            groups: Vec::new(),
            cultures: Vec::new(),
            economies: Vec::new(),
            magic_systems: Vec::new(),
            chapters: Vec::new(),
            scenes: Vec::new(),
            references: Vec::new(),
        }
    }
}

impl<T> EntitySlots<T> {
    pub fn get(&self, entity_type: EntityType) -> &Vec<T> {
        match entity_type {
            EntityType::Character => &self.characters,
            EntityType::Location => &self.locations,
            EntityType::Event => &self.events,
            EntityType::Item => &self.items,
            EntityType::Group => &self.groups,
            EntityType::Culture => &self.cultures,
            EntityType::Economy => &self.economies,
            EntityType::MagicSystem => &self.magic_systems,
            EntityType::Chapter => &self.chapters,
            EntityType::Scene => &self.scenes,
            EntityType::Reference => &self.references,
        }
    }

    pub fn get_mut(&mut self, entity_type: EntityType) -> &mut Vec<T> {
        match entity_type {
            EntityType::Character => &mut self.characters,
            EntityType::Location => &mut self.locations,
            EntityType::Event => &mut self.events,
            EntityType::Item => &mut self.items,
            EntityType::Group => &mut self.groups,
            EntityType::Culture => &mut self.cultures,
            EntityType::Economy => &mut self.economies,
            EntityType::MagicSystem => &mut self.magic_systems,
            EntityType::Chapter => &mut self.chapters,
            EntityType::Scene => &mut self.scenes,
            EntityType::Reference => &mut self.references,
        }
    }

    /// Iterate every entry together with its type, in `EntityType::ALL` order
    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &T)> + '_ {
        EntityType::ALL
            .into_iter()
            .flat_map(move |t| self.get(t).iter().map(move |item| (t, item)))
    }

    /// Types whose slot holds at least one entry
    pub fn present_types(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|t| !self.get(*t).is_empty())
            .collect()
    }

    pub fn len(&self) -> usize {
        EntityType::ALL.iter().map(|t| self.get(*t).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
