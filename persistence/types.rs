/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Serializable types for history persistence.

use serde::{Deserialize, Serialize};

use crate::graph::{Entity, EntityData, Tags};
use crate::graph::entity::EntityParts;

/// Bumped whenever the stored layout changes incompatibly.
pub const DELTA_FORMAT_VERSION: u32 = 1;

/// Persisted relation member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMember {
    pub id: String,
    #[serde(default)]
    pub role: String,
}

/// Persisted entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<PersistedMember>>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    pub version: u64,
}

impl From<&Entity> for PersistedEntity {
    fn from(entity: &Entity) -> Self {
        let (loc, nodes, members) = match entity.data() {
            EntityData::Node { loc } => (Some([loc.x, loc.y]), None, None),
            EntityData::Way { nodes } => (
                None,
                Some(nodes.iter().map(ToString::to_string).collect()),
                None,
            ),
            EntityData::Relation { members } => (
                None,
                None,
                Some(
                    members
                        .iter()
                        .map(|m| PersistedMember {
                            id: m.id.to_string(),
                            role: m.role.clone(),
                        })
                        .collect(),
                ),
            ),
        };
        Self {
            id: entity.id().to_string(),
            loc,
            nodes,
            members,
            tags: entity.tags().clone(),
            version: entity.version(),
        }
    }
}

impl TryFrom<&PersistedEntity> for Entity {
    type Error = RestoreError;

    fn try_from(record: &PersistedEntity) -> Result<Self, Self::Error> {
        EntityParts {
            id: &record.id,
            loc: record.loc,
            nodes: record.nodes.as_deref(),
            members: record
                .members
                .as_ref()
                .map(|members| members.iter().map(|m| (m.id.as_str(), m.role.as_str())).collect()),
            tags: &record.tags,
            version: record.version,
        }
        .build()
        .map_err(|reason| RestoreError::InvalidEntity {
            id: record.id.clone(),
            reason,
        })
    }
}

/// One history checkpoint, as overlay entries against the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    /// Indices into `HistoryDelta::entities`.
    #[serde(default)]
    pub modified: Vec<usize>,
    /// Ids deleted relative to the base.
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Next local ids to hand out, stored as the (negative) numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedNextIds {
    pub node: i64,
    pub way: i64,
    pub relation: i64,
}

impl Default for PersistedNextIds {
    fn default() -> Self {
        Self {
            node: -1,
            way: -1,
            relation: -1,
        }
    }
}

/// The minimal state needed to rebuild a history stack over a fresh base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDelta {
    pub version: u32,
    /// Every distinct local entity value referenced by the stack.
    pub entities: Vec<PersistedEntity>,
    /// Base versions of entities touched locally, so restore can recreate
    /// the base they were edited against.
    #[serde(default)]
    pub base_entities: Vec<PersistedEntity>,
    pub stack: Vec<PersistedCheckpoint>,
    #[serde(default)]
    pub next_ids: PersistedNextIds,
    pub index: usize,
}

/// Errors rebuilding a history from a stored delta.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreError {
    UnsupportedVersion(u32),
    InvalidEntity { id: String, reason: String },
    InvalidCheckpoint(String),
}

impl std::fmt::Display for RestoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreError::UnsupportedVersion(v) => {
                write!(f, "Unsupported history format version {v}")
            },
            RestoreError::InvalidEntity { id, reason } => {
                write!(f, "Invalid stored entity {id}: {reason}")
            },
            RestoreError::InvalidCheckpoint(e) => write!(f, "Invalid stored checkpoint: {e}"),
        }
    }
}

impl std::error::Error for RestoreError {}
