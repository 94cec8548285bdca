use crate::model::{is_blank, EntityType, Id};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a relationship field stores its references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipShape {
    /// A list of bare identifiers
    IdList,
    /// A list of `{ target, type, label? }` records
    TypedList,
    /// A single optional identifier
    Single,
    /// A list of `{ name, rank?, ... }` membership records
    Membership,
}

/// Which identifier table a reference is looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefNamespace {
    /// Template-local ids of any type, then display names
    General,
    /// Template-local ids of groups only
    Groups,
    /// Display names only
    Names,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipField {
    pub name: &'static str,
    pub shape: RelationshipShape,
    pub namespace: RefNamespace,
}

impl RelationshipField {
    const fn new(name: &'static str, shape: RelationshipShape, namespace: RefNamespace) -> Self {
        Self {
            name,
            shape,
            namespace,
        }
    }

    const fn list(name: &'static str) -> Self {
        Self::new(name, RelationshipShape::IdList, RefNamespace::General)
    }

    const fn typed(name: &'static str) -> Self {
        Self::new(name, RelationshipShape::TypedList, RefNamespace::General)
    }

    const fn single(name: &'static str) -> Self {
        Self::new(name, RelationshipShape::Single, RefNamespace::General)
    }

    const fn group_list(name: &'static str) -> Self {
        Self::new(name, RelationshipShape::IdList, RefNamespace::Groups)
    }
}

const GROUPS: RelationshipField = RelationshipField::group_list("groups");
const CONNECTIONS: RelationshipField = RelationshipField::typed("connections");

const CHARACTER_FIELDS: &[RelationshipField] = &[
    RelationshipField::typed("relationships"),
    RelationshipField::list("locations"),
    RelationshipField::list("events"),
    GROUPS,
    CONNECTIONS,
];

const LOCATION_FIELDS: &[RelationshipField] = &[
    RelationshipField::single("parentLocation"),
    GROUPS,
    CONNECTIONS,
];

const EVENT_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("characters"),
    RelationshipField::single("location"),
    RelationshipField::list("items"),
    GROUPS,
    RelationshipField::list("dependencies"),
    CONNECTIONS,
];

const ITEM_FIELDS: &[RelationshipField] = &[
    RelationshipField::single("currentOwner"),
    RelationshipField::list("pastOwners"),
    RelationshipField::single("currentLocation"),
    RelationshipField::list("pastLocations"),
    RelationshipField::list("associatedEvents"),
    GROUPS,
    CONNECTIONS,
];

const GROUP_FIELDS: &[RelationshipField] = &[
    RelationshipField::new("members", RelationshipShape::Membership, RefNamespace::Names),
    RelationshipField::list("territories"),
    RelationshipField::list("linkedEvents"),
    RelationshipField::new("parentGroup", RelationshipShape::Single, RefNamespace::Groups),
    RelationshipField::group_list("subgroups"),
    RelationshipField::new(
        "groupRelationships",
        RelationshipShape::TypedList,
        RefNamespace::Groups,
    ),
];

const CULTURE_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("relatedCultures"),
    RelationshipField::single("parentCulture"),
    GROUPS,
    CONNECTIONS,
];

const ECONOMY_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("linkedCultures"),
    RelationshipField::list("linkedEvents"),
    GROUPS,
    CONNECTIONS,
];

const MAGIC_SYSTEM_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedCultures"),
    RelationshipField::list("linkedEvents"),
    RelationshipField::list("linkedItems"),
    GROUPS,
    CONNECTIONS,
];

const CHAPTER_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedEvents"),
    RelationshipField::list("linkedItems"),
    GROUPS,
];

const SCENE_FIELDS: &[RelationshipField] = &[
    RelationshipField::single("chapter"),
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedEvents"),
    RelationshipField::list("linkedItems"),
    GROUPS,
];

const REFERENCE_FIELDS: &[RelationshipField] = &[
    RelationshipField::list("linkedCharacters"),
    RelationshipField::list("linkedLocations"),
    RelationshipField::list("linkedEvents"),
    RelationshipField::list("linkedItems"),
    GROUPS,
    CONNECTIONS,
];

/// The relationship-bearing fields of a record type
pub fn relationship_fields(entity_type: EntityType) -> &'static [RelationshipField] {
    match entity_type {
        EntityType::Character => CHARACTER_FIELDS,
        EntityType::Location => LOCATION_FIELDS,
        EntityType::Event => EVENT_FIELDS,
        EntityType::Item => ITEM_FIELDS,
        EntityType::Group => GROUP_FIELDS,
        EntityType::Culture => CULTURE_FIELDS,
        EntityType::Economy => ECONOMY_FIELDS,
        EntityType::MagicSystem => MAGIC_SYSTEM_FIELDS,
        EntityType::Chapter => CHAPTER_FIELDS,
        EntityType::Scene => SCENE_FIELDS,
        EntityType::Reference => REFERENCE_FIELDS,
    }
}

pub fn relationship_field(entity_type: EntityType, name: &str) -> Option<&'static RelationshipField> {
    relationship_fields(entity_type).iter().find(|f| f.name == name)
}

fn default_relationship_type() -> String {
    "related".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedRelationship {
    pub target: Id,
    #[serde(rename = "type", default = "default_relationship_type")]
    pub relationship_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Any other keys the entry carried
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// Display name of the member (resolved to a real id once linked)
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A populated relationship field on a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipValue {
    Ids(Vec<Id>),
    Typed(Vec<TypedRelationship>),
    Members(Vec<Membership>),
    Single(Id),
}

/// Outcome of decoding a raw template value. `rejected` holds the non-empty
/// entries that could not be read as a reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRelationship {
    pub value: Option<RelationshipValue>,
    pub rejected: Vec<Value>,
}

impl RelationshipValue {
    /// The value a freshly created record carries before linking.
    /// Single references have no empty form and stay absent.
    pub fn empty(shape: RelationshipShape) -> Option<Self> {
        match shape {
            RelationshipShape::IdList => Some(RelationshipValue::Ids(Vec::new())),
            RelationshipShape::TypedList => Some(RelationshipValue::Typed(Vec::new())),
            RelationshipShape::Membership => Some(RelationshipValue::Members(Vec::new())),
            RelationshipShape::Single => None,
        }
    }

    /// Leniently decode a raw template value into the given shape.
    /// Blank entries are dropped; everything else is either kept as a reference
    /// or reported in `rejected`.
    pub fn decode(shape: RelationshipShape, raw: &Value) -> DecodedRelationship {
        let mut rejected = Vec::new();
        let value = match shape {
            RelationshipShape::IdList => Some(RelationshipValue::Ids(decode_items(
                raw,
                reference_item,
                &mut rejected,
            ))),
            RelationshipShape::TypedList => Some(RelationshipValue::Typed(decode_items(
                raw,
                typed_item,
                &mut rejected,
            ))),
            RelationshipShape::Membership => Some(RelationshipValue::Members(decode_items(
                raw,
                membership_item,
                &mut rejected,
            ))),
            RelationshipShape::Single => {
                let mut found = None;
                for item in as_items(raw) {
                    match reference_item(item) {
                        Item::Decoded(id) => {
                            found = Some(RelationshipValue::Single(id));
                            break;
                        }
                        Item::Empty => {}
                        Item::Rejected => rejected.push(item.clone()),
                    }
                }
                found
            }
        };
        DecodedRelationship { value, rejected }
    }

    pub fn from_template_value(shape: RelationshipShape, raw: &Value) -> Option<Self> {
        Self::decode(shape, raw).value
    }

    /// Re-read a stored value in its declared shape. Untagged deserialization
    /// cannot tell an empty typed or membership list from an empty id list.
    pub fn conform(self, shape: RelationshipShape) -> Self {
        let matches = matches!(
            (&self, shape),
            (RelationshipValue::Ids(_), RelationshipShape::IdList)
                | (RelationshipValue::Typed(_), RelationshipShape::TypedList)
                | (RelationshipValue::Members(_), RelationshipShape::Membership)
                | (RelationshipValue::Single(_), RelationshipShape::Single)
        );
        if matches {
            return self;
        }
        let raw = match serde_json::to_value(&self) {
            Ok(raw) => raw,
            Err(_) => return self,
        };
        match Self::decode(shape, &raw).value {
            Some(value) => value,
            None => self,
        }
    }

    /// Every reference this value points at (typed records unwrap to `target`,
    /// memberships to `name`)
    pub fn targets(&self) -> Vec<&str> {
        match self {
            RelationshipValue::Ids(ids) => ids.iter().map(String::as_str).collect(),
            RelationshipValue::Typed(links) => links.iter().map(|l| l.target.as_str()).collect(),
            RelationshipValue::Members(members) => {
                members.iter().map(|m| m.name.as_str()).collect()
            }
            RelationshipValue::Single(id) => vec![id.as_str()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RelationshipValue::Ids(ids) => ids.is_empty(),
            RelationshipValue::Typed(links) => links.is_empty(),
            RelationshipValue::Members(members) => members.is_empty(),
            RelationshipValue::Single(id) => id.is_empty(),
        }
    }
}

enum Item<T> {
    Decoded(T),
    Empty,
    Rejected,
}

fn as_items(raw: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match raw {
        Value::Array(items) => Box::new(items.iter()),
        Value::Null => Box::new(std::iter::empty()),
        other => Box::new(std::iter::once(other)),
    }
}

fn decode_items<T>(raw: &Value, decode: fn(&Value) -> Item<T>, rejected: &mut Vec<Value>) -> Vec<T> {
    let mut decoded = Vec::new();
    for item in as_items(raw) {
        match decode(item) {
            Item::Decoded(value) => decoded.push(value),
            Item::Empty => {}
            Item::Rejected => rejected.push(item.clone()),
        }
    }
    decoded
}

/// A bare reference: text or a number
fn key_text(value: &Value) -> Item<String> {
    if is_blank(value) {
        return Item::Empty;
    }
    match value {
        Value::String(s) => Item::Decoded(s.trim().to_string()),
        Value::Number(n) => Item::Decoded(n.to_string()),
        _ => Item::Rejected,
    }
}

/// Optional descriptive field, coerced to text whatever its JSON type
fn optional_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn reference_item(value: &Value) -> Item<String> {
    match value {
        Value::Object(map) if !map.is_empty() => {
            match map.get("target").or_else(|| map.get("id")) {
                Some(key) => key_text(key),
                None => Item::Rejected,
            }
        }
        other => key_text(other),
    }
}

fn typed_item(value: &Value) -> Item<TypedRelationship> {
    let Value::Object(map) = value else {
        return match key_text(value) {
            Item::Decoded(target) => Item::Decoded(TypedRelationship {
                target,
                relationship_type: default_relationship_type(),
                label: None,
                extra: Map::new(),
            }),
            Item::Empty => Item::Empty,
            Item::Rejected => Item::Rejected,
        };
    };
    if map.is_empty() {
        return Item::Empty;
    }

    let key = if map.contains_key("target") { "target" } else { "id" };
    let target = match map.get(key).map(key_text) {
        Some(Item::Decoded(target)) => target,
        Some(Item::Empty) => return Item::Empty,
        _ => return Item::Rejected,
    };

    let mut extra = map.clone();
    for known in [key, "type", "label"] {
        extra.remove(known);
    }
    Item::Decoded(TypedRelationship {
        target,
        relationship_type: optional_text(map.get("type"))
            .unwrap_or_else(default_relationship_type),
        label: optional_text(map.get("label")),
        extra,
    })
}

fn membership_item(value: &Value) -> Item<Membership> {
    let Value::Object(map) = value else {
        return match key_text(value) {
            Item::Decoded(name) => Item::Decoded(Membership {
                name,
                rank: None,
                role: None,
                since: None,
                extra: Map::new(),
            }),
            Item::Empty => Item::Empty,
            Item::Rejected => Item::Rejected,
        };
    };
    if map.is_empty() {
        return Item::Empty;
    }

    let name = match map.get("name").map(key_text) {
        Some(Item::Decoded(name)) => name,
        Some(Item::Empty) => return Item::Empty,
        _ => return Item::Rejected,
    };

    let mut extra = map.clone();
    for known in ["name", "rank", "role", "since"] {
        extra.remove(known);
    }
    Item::Decoded(Membership {
        name,
        rank: optional_text(map.get("rank")),
        role: optional_text(map.get("role")),
        since: optional_text(map.get("since")),
        extra,
    })
}
