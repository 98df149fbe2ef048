/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Entity-level difference between two graph snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::entity::{Entity, EntityId};
use super::extent::Extent;
use super::Graph;

/// One entity's state on both sides of a difference.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub base: Option<Arc<Entity>>,
    pub head: Option<Arc<Entity>>,
}

/// Changes grouped the way an upload would need them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub modified: Vec<Arc<Entity>>,
    pub created: Vec<Arc<Entity>>,
    pub deleted: Vec<Arc<Entity>>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Difference from `base` to `head`.
///
/// Graphs sharing one base only need their local overlays compared; graphs
/// on different bases fall back to comparing every entity.
#[derive(Debug, Clone)]
pub struct Difference {
    base: Graph,
    head: Graph,
    changes: BTreeMap<EntityId, EntityChange>,
}

impl Difference {
    pub fn between(base: &Graph, head: &Graph) -> Self {
        let mut changes = BTreeMap::new();
        if !Graph::ptr_eq(base, head) {
            let candidates: BTreeSet<EntityId> = if base.shares_base_with(head) {
                base.local_entries()
                    .chain(head.local_entries())
                    .map(|(id, _)| *id)
                    .collect()
            } else {
                base.entities()
                    .chain(head.entities())
                    .map(|entity| entity.id())
                    .chain(
                        base.local_entries()
                            .chain(head.local_entries())
                            .map(|(id, _)| *id),
                    )
                    .collect()
            };
            for id in candidates {
                let before = base.get(&id);
                let after = head.get(&id);
                if !same(before, after) {
                    changes.insert(
                        id,
                        EntityChange {
                            base: before.cloned(),
                            head: after.cloned(),
                        },
                    );
                }
            }
        }
        Self {
            base: base.clone(),
            head: head.clone(),
            changes,
        }
    }

    pub fn base(&self) -> &Graph {
        &self.base
    }

    pub fn head(&self) -> &Graph {
        &self.head
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityChange> {
        self.changes.get(id)
    }

    /// Changed ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.changes.keys()
    }

    pub fn modified(&self) -> Vec<Arc<Entity>> {
        self.changes
            .values()
            .filter(|c| c.base.is_some())
            .filter_map(|c| c.head.clone())
            .collect()
    }

    pub fn created(&self) -> Vec<Arc<Entity>> {
        self.changes
            .values()
            .filter(|c| c.base.is_none())
            .filter_map(|c| c.head.clone())
            .collect()
    }

    /// Deleted entities, as they were in the base.
    pub fn deleted(&self) -> Vec<Arc<Entity>> {
        self.changes
            .values()
            .filter(|c| c.head.is_none())
            .filter_map(|c| c.base.clone())
            .collect()
    }

    pub fn summary(&self) -> Changes {
        Changes {
            modified: self.modified(),
            created: self.created(),
            deleted: self.deleted(),
        }
    }

    /// Changed ids plus everything whose geometry depends on them: ways over
    /// changed nodes and every relation above those, on either side.
    pub fn complete(&self) -> BTreeSet<EntityId> {
        let mut ids = BTreeSet::new();
        for id in self.changes.keys() {
            for graph in [&self.base, &self.head] {
                ids.extend(graph.dependent_ids(id));
            }
        }
        ids
    }

    /// Region touched by the change, covering both sides.
    pub fn extent(&self) -> Option<Extent> {
        self.changes
            .values()
            .flat_map(|change| {
                let before = change.base.as_ref().and_then(|e| self.base.extent(e));
                let after = change.head.as_ref().and_then(|e| self.head.extent(e));
                [before, after]
            })
            .flatten()
            .reduce(|acc, next| acc.union(&next))
    }
}

fn same(a: Option<&Arc<Entity>>, b: Option<&Arc<Entity>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
        _ => false,
    }
}
