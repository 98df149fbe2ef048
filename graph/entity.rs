/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Map entities: nodes, ways and relations.
//!
//! Entities are immutable values. Every edit produces a new value with an
//! incremented `version`; older values stay reachable from older graphs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use euclid::default::{Point2D, Vector2D};
use serde::{Deserialize, Serialize};

/// Geographic location (`x` = longitude, `y` = latitude).
pub type Loc = Point2D<f64>;

/// Offset applied to locations when pasting.
pub type LocOffset = Vector2D<f64>;

/// Entity tags. Ordered so serialized output is stable.
pub type Tags = BTreeMap<String, String>;

/// Tag keys that don't make an entity "interesting" on their own.
const UNINTERESTING_TAGS: &[&str] = &["attribution", "created_by", "source", "odbl"];

/// Tag keys that turn a closed way into an area.
const AREA_KEYS: &[&str] = &[
    "amenity", "building", "indoor", "landuse", "leisure", "natural", "room", "shop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A point.
    Node,
    /// A line or path over an ordered list of nodes.
    Way,
    /// A grouping of other entities with roles.
    Relation,
}

impl EntityKind {
    pub fn prefix(self) -> char {
        match self {
            EntityKind::Node => 'n',
            EntityKind::Way => 'w',
            EntityKind::Relation => 'r',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'n' => Some(EntityKind::Node),
            'w' => Some(EntityKind::Way),
            'r' => Some(EntityKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Way => f.write_str("way"),
            EntityKind::Relation => f.write_str("relation"),
        }
    }
}

/// Stable entity identity.
///
/// Positive numbers come from the remote API; negative numbers are allocated
/// locally for entities created in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    kind: EntityKind,
    number: i64,
}

impl EntityId {
    pub const fn new(kind: EntityKind, number: i64) -> Self {
        Self { kind, number }
    }

    pub const fn node(number: i64) -> Self {
        Self::new(EntityKind::Node, number)
    }

    pub const fn way(number: i64) -> Self {
        Self::new(EntityKind::Way, number)
    }

    pub const fn relation(number: i64) -> Self {
        Self::new(EntityKind::Relation, number)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    /// True for ids allocated locally (not yet known to the remote API).
    pub fn is_new(&self) -> bool {
        self.number < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityIdError(pub String);

impl fmt::Display for ParseEntityIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity id '{}'", self.0)
    }
}

impl std::error::Error for ParseEntityIdError {}

impl FromStr for EntityId {
    type Err = ParseEntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .and_then(EntityKind::from_prefix)
            .ok_or_else(|| ParseEntityIdError(s.to_string()))?;
        let number = chars
            .as_str()
            .parse::<i64>()
            .map_err(|_| ParseEntityIdError(s.to_string()))?;
        if number == 0 {
            return Err(ParseEntityIdError(s.to_string()));
        }
        Ok(Self { kind, number })
    }
}

impl TryFrom<String> for EntityId {
    type Error = ParseEntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// Relation member with its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: EntityId,
    #[serde(default)]
    pub role: String,
}

impl Member {
    pub fn new(id: EntityId, role: impl Into<String>) -> Self {
        Self {
            id,
            role: role.into(),
        }
    }
}

/// Kind-specific geometry reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Node { loc: Loc },
    Way { nodes: Vec<EntityId> },
    Relation { members: Vec<Member> },
}

/// A versioned map feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    data: EntityData,
    tags: Tags,
    version: u64,
    levels: Vec<f64>,
}

impl Entity {
    /// A new node at version 1.
    pub fn node(id: EntityId, loc: Loc) -> Self {
        Self::with_data(id, EntityData::Node { loc })
    }

    /// A new way at version 1.
    pub fn way(id: EntityId, nodes: Vec<EntityId>) -> Self {
        Self::with_data(id, EntityData::Way { nodes })
    }

    /// A new relation at version 1.
    pub fn relation(id: EntityId, members: Vec<Member>) -> Self {
        Self::with_data(id, EntityData::Relation { members })
    }

    fn with_data(id: EntityId, data: EntityData) -> Self {
        Self {
            id,
            data,
            tags: Tags::new(),
            version: 1,
            levels: Vec::new(),
        }
    }

    /// Builder: set tags without bumping the version.
    pub fn tagged<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.levels = levels_from_tags(&self.tags);
        self
    }

    /// Builder: set the version without any other change.
    pub fn at_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.id.kind()
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Levels this entity participates in, sorted and deduplicated.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn loc(&self) -> Option<Loc> {
        match &self.data {
            EntityData::Node { loc } => Some(*loc),
            _ => None,
        }
    }

    /// Ordered node ids of a way; empty for other kinds.
    pub fn nodes(&self) -> &[EntityId] {
        match &self.data {
            EntityData::Way { nodes } => nodes,
            _ => &[],
        }
    }

    /// Members of a relation; empty for other kinds.
    pub fn members(&self) -> &[Member] {
        match &self.data {
            EntityData::Relation { members } => members,
            _ => &[],
        }
    }

    /// Distinct ids this entity references (way nodes or relation members).
    pub fn child_ids(&self) -> BTreeSet<EntityId> {
        match &self.data {
            EntityData::Node { .. } => BTreeSet::new(),
            EntityData::Way { nodes } => nodes.iter().copied().collect(),
            EntityData::Relation { members } => members.iter().map(|m| m.id).collect(),
        }
    }

    pub fn is_closed(&self) -> bool {
        let nodes = self.nodes();
        nodes.len() > 2 && nodes.first() == nodes.last()
    }

    /// Closed way whose tags describe an area.
    pub fn is_area(&self) -> bool {
        if self.kind() != EntityKind::Way || !self.is_closed() {
            return false;
        }
        match self.tag("area") {
            Some("yes") => true,
            Some("no") => false,
            _ => AREA_KEYS.iter().any(|key| self.tags.contains_key(*key)),
        }
    }

    pub fn has_interesting_tags(&self) -> bool {
        self.tags
            .keys()
            .any(|key| !UNINTERESTING_TAGS.contains(&key.as_str()) && !key.starts_with("tiger:"))
    }

    /// Moved copy of a node, one version later.
    pub fn with_loc(&self, loc: Loc) -> Self {
        let mut next = self.bumped();
        if let EntityData::Node { loc: current } = &mut next.data {
            *current = loc;
        }
        next
    }

    /// Copy with replaced tags, one version later.
    pub fn with_tags(&self, tags: Tags) -> Self {
        let mut next = self.bumped();
        next.levels = levels_from_tags(&tags);
        next.tags = tags;
        next
    }

    /// Copy of a way with a new node list, one version later.
    pub fn with_nodes(&self, nodes: Vec<EntityId>) -> Self {
        let mut next = self.bumped();
        if let EntityData::Way { nodes: current } = &mut next.data {
            *current = nodes;
        }
        next
    }

    /// Copy of a relation with a new member list, one version later.
    pub fn with_members(&self, members: Vec<Member>) -> Self {
        let mut next = self.bumped();
        if let EntityData::Relation { members: current } = &mut next.data {
            *current = members;
        }
        next
    }

    /// Fresh copy under `id` with references remapped and node locations
    /// shifted by `offset`. Unmapped references are kept as-is.
    pub fn copied(
        &self,
        id: EntityId,
        remap: &BTreeMap<EntityId, EntityId>,
        offset: LocOffset,
    ) -> Self {
        let lookup = |child: &EntityId| remap.get(child).copied().unwrap_or(*child);
        let data = match &self.data {
            EntityData::Node { loc } => EntityData::Node { loc: *loc + offset },
            EntityData::Way { nodes } => EntityData::Way {
                nodes: nodes.iter().map(lookup).collect(),
            },
            EntityData::Relation { members } => EntityData::Relation {
                members: members
                    .iter()
                    .map(|m| Member::new(lookup(&m.id), m.role.clone()))
                    .collect(),
            },
        };
        Self {
            id,
            data,
            tags: self.tags.clone(),
            version: 1,
            levels: self.levels.clone(),
        }
    }

    fn bumped(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next
    }
}

/// Loose entity shape shared by the remote and persisted record formats.
pub(crate) struct EntityParts<'a> {
    pub id: &'a str,
    pub loc: Option<[f64; 2]>,
    pub nodes: Option<&'a [String]>,
    pub members: Option<Vec<(&'a str, &'a str)>>,
    pub tags: &'a Tags,
    pub version: u64,
}

impl EntityParts<'_> {
    /// Validate the record shape and build an entity, or explain what's wrong.
    pub(crate) fn build(self) -> Result<Entity, String> {
        let id: EntityId = self.id.parse().map_err(|e: ParseEntityIdError| e.to_string())?;
        let data = match id.kind() {
            EntityKind::Node => {
                let [x, y] = self.loc.ok_or("node without location")?;
                if !x.is_finite() || !y.is_finite() {
                    return Err("node location is not finite".to_string());
                }
                EntityData::Node {
                    loc: Loc::new(x, y),
                }
            },
            EntityKind::Way => {
                let raw = self.nodes.ok_or("way without node list")?;
                let mut nodes = Vec::with_capacity(raw.len());
                for child in raw {
                    let child: EntityId = child.parse().map_err(|e: ParseEntityIdError| e.to_string())?;
                    if child.kind() != EntityKind::Node {
                        return Err(format!("way references non-node {child}"));
                    }
                    nodes.push(child);
                }
                EntityData::Way { nodes }
            },
            EntityKind::Relation => {
                let raw = self.members.ok_or("relation without member list")?;
                let mut members = Vec::with_capacity(raw.len());
                for (member, role) in raw {
                    let member: EntityId =
                        member.parse().map_err(|e: ParseEntityIdError| e.to_string())?;
                    members.push(Member::new(member, role));
                }
                EntityData::Relation { members }
            },
        };
        Ok(Entity {
            id,
            data,
            levels: levels_from_tags(self.tags),
            tags: self.tags.clone(),
            version: self.version,
        })
    }
}

fn levels_from_tags(tags: &Tags) -> Vec<f64> {
    tags.get("level")
        .map(|value| parse_levels(value))
        .unwrap_or_default()
}

/// Parse a `level` tag value.
///
/// Accepts `;`-separated numbers and integer ranges such as `-1-2`.
/// Unparseable parts are dropped.
pub fn parse_levels(value: &str) -> Vec<f64> {
    const MAX_RANGE: u64 = 256;

    let mut levels = Vec::new();
    for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        if let Ok(level) = part.parse::<f64>() {
            if level.is_finite() {
                levels.push(level);
            }
            continue;
        }
        // Range separator is the first '-' after a possible leading sign.
        let Some((split, _)) = part.char_indices().skip(1).find(|(_, c)| *c == '-') else {
            continue;
        };
        let (Ok(lo), Ok(hi)) = (
            part[..split].trim().parse::<i64>(),
            part[split + 1..].trim().parse::<i64>(),
        ) else {
            continue;
        };
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if hi.abs_diff(lo) > MAX_RANGE {
            continue;
        }
        levels.extend((lo..=hi).map(|l| l as f64));
    }
    levels.sort_by(f64::total_cmp);
    levels.dedup();
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", vec![0.0])]
    #[case("1;2", vec![1.0, 2.0])]
    #[case("2;1;2", vec![1.0, 2.0])]
    #[case("-1", vec![-1.0])]
    #[case("0.5", vec![0.5])]
    #[case("1-3", vec![1.0, 2.0, 3.0])]
    #[case("-1-1", vec![-1.0, 0.0, 1.0])]
    #[case("3-1", vec![1.0, 2.0, 3.0])]
    #[case("roof", vec![])]
    #[case("1;roof;2", vec![1.0, 2.0])]
    #[case("", vec![])]
    #[case("-9223372036854775808-9223372036854775807", vec![])]
    #[case("0-300", vec![])]
    fn test_parse_levels(#[case] input: &str, #[case] expected: Vec<f64>) {
        assert_eq!(parse_levels(input), expected);
    }

    #[test]
    fn test_entity_id_roundtrip_through_string() {
        for id in [EntityId::node(1), EntityId::way(-3), EntityId::relation(42)] {
            let text = id.to_string();
            assert_eq!(text.parse::<EntityId>().unwrap(), id);
        }
        assert_eq!(EntityId::way(-3).to_string(), "w-3");
    }

    #[test]
    fn test_entity_id_rejects_bad_input() {
        assert!("x1".parse::<EntityId>().is_err());
        assert!("n".parse::<EntityId>().is_err());
        assert!("n0".parse::<EntityId>().is_err());
        assert!("nabc".parse::<EntityId>().is_err());
        assert!("".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_entity_id_serializes_as_string() {
        let json = serde_json::to_string(&EntityId::node(-7)).unwrap();
        assert_eq!(json, "\"n-7\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityId::node(-7));
    }

    #[test]
    fn test_edits_bump_version_and_keep_original() {
        let node = Entity::node(EntityId::node(1), Loc::new(1.0, 2.0));
        let moved = node.with_loc(Loc::new(3.0, 4.0));
        assert_eq!(node.version(), 1);
        assert_eq!(moved.version(), 2);
        assert_eq!(node.loc(), Some(Loc::new(1.0, 2.0)));
        assert_eq!(moved.loc(), Some(Loc::new(3.0, 4.0)));
    }

    #[test]
    fn test_levels_follow_tags() {
        let node = Entity::node(EntityId::node(1), Loc::zero()).tagged([("level", "1;2")]);
        assert_eq!(node.levels(), &[1.0, 2.0]);
        let retagged = node.with_tags(Tags::new());
        assert!(retagged.levels().is_empty());
    }

    #[test]
    fn test_is_area_requires_closed_way_and_area_tags() {
        let ring = vec![
            EntityId::node(1),
            EntityId::node(2),
            EntityId::node(3),
            EntityId::node(1),
        ];
        let building = Entity::way(EntityId::way(1), ring.clone()).tagged([("building", "yes")]);
        assert!(building.is_area());
        let untagged = Entity::way(EntityId::way(2), ring.clone());
        assert!(!untagged.is_area());
        let opted_out = Entity::way(EntityId::way(3), ring).tagged([("building", "yes"), ("area", "no")]);
        assert!(!opted_out.is_area());
        let open = Entity::way(EntityId::way(4), vec![EntityId::node(1), EntityId::node(2)])
            .tagged([("building", "yes")]);
        assert!(!open.is_area());
    }

    #[test]
    fn test_parts_reject_malformed_shapes() {
        let tags = Tags::new();
        let node_without_loc = EntityParts {
            id: "n1",
            loc: None,
            nodes: None,
            members: None,
            tags: &tags,
            version: 1,
        };
        assert!(node_without_loc.build().is_err());

        let bad_children = vec!["w2".to_string()];
        let way_with_way_child = EntityParts {
            id: "w1",
            loc: None,
            nodes: Some(&bad_children),
            members: None,
            tags: &tags,
            version: 1,
        };
        assert!(way_with_way_child.build().is_err());

        let children = vec!["n1".to_string(), "n2".to_string()];
        let way = EntityParts {
            id: "w1",
            loc: None,
            nodes: Some(&children),
            members: None,
            tags: &tags,
            version: 4,
        }
        .build()
        .unwrap();
        assert_eq!(way.nodes(), &[EntityId::node(1), EntityId::node(2)]);
        assert_eq!(way.version(), 4);
    }
}
