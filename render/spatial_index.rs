/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Spatial index for extent queries against the current graph.
//!
//! Entities are indexed by the bounding box of their resolved geometry so the
//! rendering layer can ask "what intersects this viewport" with an R*-tree
//! range query instead of a full entity scan. The tree follows the graph it
//! was last synced with and is patched incrementally from the difference
//! between that graph and the one being queried.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rstar::{AABB, RTree, RTreeObject};

use crate::graph::{Difference, Entity, EntityId, Extent, Graph};

/// An entity entry stored in the R*-tree.
#[derive(Debug, Clone, PartialEq)]
struct IndexedEntity {
    envelope: AABB<[f64; 2]>,
    id: EntityId,
}

impl RTreeObject for IndexedEntity {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn envelope_of(extent: &Extent) -> AABB<[f64; 2]> {
    AABB::from_corners([extent.min.x, extent.min.y], [extent.max.x, extent.max.y])
}

/// Incrementally maintained entity index.
#[derive(Default)]
pub(crate) struct EntityTree {
    tree: RTree<IndexedEntity>,
    envelopes: HashMap<EntityId, AABB<[f64; 2]>>,
    head: Option<Graph>,
}

impl EntityTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries; the next query rebuilds from scratch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Entities of `graph` whose extent intersects `extent`, sorted by id.
    pub fn intersects(&mut self, extent: &Extent, graph: &Graph) -> Vec<Arc<Entity>> {
        self.sync(graph);
        let mut ids: Vec<EntityId> = self
            .tree
            .locate_in_envelope_intersecting(&envelope_of(extent))
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        ids.iter().filter_map(|id| graph.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Fold freshly merged base entities into an index already synced with
    /// the pre-merge graph. Parents of merged entities are refreshed too,
    /// since their geometry may now resolve further.
    pub fn rebase(&mut self, ids: &[EntityId], graph: &Graph) {
        if self.head.is_none() {
            return;
        }
        let mut affected = BTreeSet::new();
        for id in ids {
            affected.extend(graph.dependent_ids(id));
        }
        for id in &affected {
            self.remove(id);
            self.insert(graph, id);
        }
        self.head = Some(graph.clone());
    }

    pub fn sync(&mut self, graph: &Graph) {
        match &self.head {
            Some(head) if Graph::ptr_eq(head, graph) => {},
            Some(head) if head.shares_base_with(graph) => {
                let diff = Difference::between(head, graph);
                for id in diff.complete() {
                    self.remove(&id);
                    self.insert(graph, &id);
                }
            },
            _ => self.rebuild(graph),
        }
        self.head = Some(graph.clone());
    }

    fn rebuild(&mut self, graph: &Graph) {
        self.envelopes.clear();
        let entries: Vec<_> = graph
            .entities()
            .filter_map(|entity| {
                let envelope = envelope_of(&graph.extent(entity)?);
                self.envelopes.insert(entity.id(), envelope);
                Some(IndexedEntity {
                    envelope,
                    id: entity.id(),
                })
            })
            .collect();
        self.tree = RTree::bulk_load(entries);
    }

    fn remove(&mut self, id: &EntityId) {
        if let Some(envelope) = self.envelopes.remove(id) {
            self.tree.remove(&IndexedEntity { envelope, id: *id });
        }
    }

    fn insert(&mut self, graph: &Graph, id: &EntityId) {
        let Some(entity) = graph.get(id) else {
            return;
        };
        let Some(extent) = graph.extent(entity) else {
            return;
        };
        let envelope = envelope_of(&extent);
        self.envelopes.insert(*id, envelope);
        self.tree.insert(IndexedEntity { envelope, id: *id });
    }
}
