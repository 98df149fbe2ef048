/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Graph data structures for the map editor.
//!
//! Core structures:
//! - `Graph`: immutable snapshot of entities plus a parents index
//! - `GraphBase`: remote-loaded state shared by every snapshot of a history
//! - `GraphDelta`: a batch of changed/removed entities applied in one step
//!
//! A `Graph` is a shared base (`Arc<GraphBase>`) plus a copy-on-write local
//! overlay holding edited entities and tombstones. Deriving a new graph only
//! copies the overlay; entity values are shared through `Arc`.

pub mod difference;
pub mod entity;
pub mod extent;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub use difference::{Changes, Difference};
pub use entity::{Entity, EntityData, EntityId, EntityKind, Loc, LocOffset, Member, Tags};
pub use extent::Extent;

/// Child id → ids of entities referencing it.
type ParentIndex = HashMap<EntityId, HashSet<EntityId>>;

/// Errors from graph lookups and edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Referenced entity is absent (deleted, or not loaded yet).
    NotFound(EntityId),
    /// Entity exists but is of a kind the operation can't handle.
    WrongKind { id: EntityId, expected: EntityKind },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NotFound(id) => write!(f, "entity {id} not found"),
            GraphError::WrongKind { id, expected } => {
                write!(f, "entity {id} is not a {expected}")
            },
        }
    }
}

impl std::error::Error for GraphError {}

/// How an entity renders, derived from its kind, tags and parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Standalone node.
    Point,
    /// Node that belongs to at least one way.
    Vertex,
    Line,
    Area,
    Relation,
}

/// Remote-loaded entities shared by every graph derived from the same history.
#[derive(Debug, Clone, Default)]
pub struct GraphBase {
    entities: HashMap<EntityId, Arc<Entity>>,
    parent_ways: ParentIndex,
    parent_rels: ParentIndex,
}

impl GraphBase {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    fn link(&mut self, entity: &Entity) -> BTreeSet<EntityId> {
        let parent = entity.id();
        let index = match entity.kind() {
            EntityKind::Node => return BTreeSet::new(),
            EntityKind::Way => &mut self.parent_ways,
            EntityKind::Relation => &mut self.parent_rels,
        };
        let children = entity.child_ids();
        for child in &children {
            index.entry(*child).or_default().insert(parent);
        }
        children
    }

    fn unlink(&mut self, entity: &Entity) -> BTreeSet<EntityId> {
        let parent = entity.id();
        let index = match entity.kind() {
            EntityKind::Node => return BTreeSet::new(),
            EntityKind::Way => &mut self.parent_ways,
            EntityKind::Relation => &mut self.parent_rels,
        };
        let children = entity.child_ids();
        for child in &children {
            if let Some(parents) = index.get_mut(child) {
                parents.remove(&parent);
                if parents.is_empty() {
                    index.remove(child);
                }
            }
        }
        children
    }
}

/// Local edits on top of a base: entities (or tombstones) plus parents
/// overrides for every child whose parent set differs from the base.
#[derive(Debug, Clone, Default)]
struct Overlay {
    entities: HashMap<EntityId, Option<Arc<Entity>>>,
    parent_ways: ParentIndex,
    parent_rels: ParentIndex,
}

/// A batch of changes applied with `Graph::replace`.
#[derive(Debug, Clone, Default)]
pub struct GraphDelta {
    pub changed: Vec<Entity>,
    pub removed: Vec<EntityId>,
}

/// Immutable snapshot of the entity graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    base: Arc<GraphBase>,
    local: Arc<Overlay>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph whose base holds `entities` (no local edits).
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut base = GraphBase::default();
        for entity in entities {
            let entity = Arc::new(entity);
            base.link(&entity);
            base.entities.insert(entity.id(), entity);
        }
        Self {
            base: Arc::new(base),
            local: Arc::default(),
        }
    }

    /// Graph holding only the shared base of `self`, without local edits.
    pub fn base_graph(&self) -> Graph {
        Graph {
            base: Arc::clone(&self.base),
            local: Arc::default(),
        }
    }

    pub fn base(&self) -> &GraphBase {
        &self.base
    }

    /// Entity for `id`, or `NotFound` if absent or deleted.
    pub fn entity(&self, id: &EntityId) -> Result<&Arc<Entity>, GraphError> {
        self.get(id).ok_or(GraphError::NotFound(*id))
    }

    /// Entity for `id` if present.
    pub fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        match self.local.entities.get(id) {
            Some(slot) => slot.as_ref(),
            None => self.base.entities.get(id),
        }
    }

    pub fn has_entity(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Nodes of a way, in order.
    pub fn child_nodes(&self, way: &Entity) -> Result<Vec<Arc<Entity>>, GraphError> {
        if way.kind() != EntityKind::Way {
            return Err(GraphError::WrongKind {
                id: way.id(),
                expected: EntityKind::Way,
            });
        }
        way.nodes()
            .iter()
            .map(|id| self.entity(id).cloned())
            .collect()
    }

    /// Ids of ways referencing `id`, sorted.
    pub fn parent_way_ids(&self, id: &EntityId) -> Vec<EntityId> {
        Self::sorted(
            self.local
                .parent_ways
                .get(id)
                .or_else(|| self.base.parent_ways.get(id)),
        )
    }

    /// Ids of relations referencing `id`, sorted.
    pub fn parent_relation_ids(&self, id: &EntityId) -> Vec<EntityId> {
        Self::sorted(
            self.local
                .parent_rels
                .get(id)
                .or_else(|| self.base.parent_rels.get(id)),
        )
    }

    pub fn parent_ways(&self, id: &EntityId) -> Vec<Arc<Entity>> {
        self.parent_way_ids(id)
            .iter()
            .filter_map(|parent| self.get(parent).cloned())
            .collect()
    }

    pub fn parent_relations(&self, id: &EntityId) -> Vec<Arc<Entity>> {
        self.parent_relation_ids(id)
            .iter()
            .filter_map(|parent| self.get(parent).cloned())
            .collect()
    }

    /// `id` plus every entity whose geometry depends on it: its parent ways
    /// and all relations above either, through any depth of nesting.
    /// Membership cycles are walked once.
    pub fn dependent_ids(&self, id: &EntityId) -> BTreeSet<EntityId> {
        let mut found = BTreeSet::new();
        let mut pending = vec![*id];
        pending.extend(self.parent_way_ids(id));
        while let Some(next) = pending.pop() {
            if found.insert(next) {
                pending.extend(self.parent_relation_ids(&next));
            }
        }
        found
    }

    /// Every live entity, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> + '_ {
        let base = self
            .base
            .entities
            .iter()
            .filter(|(id, _)| !self.local.entities.contains_key(id))
            .map(|(_, entity)| entity);
        let local = self.local.entities.values().flatten();
        base.chain(local)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entities().next().is_none()
    }

    /// Local overlay entries: `Some` for edited entities, `None` for deletions.
    pub fn local_entries(&self) -> impl Iterator<Item = (&EntityId, Option<&Arc<Entity>>)> + '_ {
        self.local
            .entities
            .iter()
            .map(|(id, slot)| (id, slot.as_ref()))
    }

    pub fn geometry(&self, id: &EntityId) -> Result<GeometryKind, GraphError> {
        let entity = self.entity(id)?;
        Ok(match entity.kind() {
            EntityKind::Node if self.parent_way_ids(id).is_empty() => GeometryKind::Point,
            EntityKind::Node => GeometryKind::Vertex,
            EntityKind::Way if entity.is_area() => GeometryKind::Area,
            EntityKind::Way => GeometryKind::Line,
            EntityKind::Relation if entity.tag("type") == Some("multipolygon") => {
                GeometryKind::Area
            },
            EntityKind::Relation => GeometryKind::Relation,
        })
    }

    /// Bounding box of an entity's resolvable geometry.
    ///
    /// Missing children are skipped; `None` when nothing resolves.
    pub fn extent(&self, entity: &Entity) -> Option<Extent> {
        let mut visited = HashSet::new();
        self.extent_inner(entity, &mut visited)
    }

    fn extent_inner(&self, entity: &Entity, visited: &mut HashSet<EntityId>) -> Option<Extent> {
        if !visited.insert(entity.id()) {
            return None;
        }
        match entity.data() {
            EntityData::Node { loc } => Some(Extent::from_point(*loc)),
            EntityData::Way { nodes } => Extent::from_points(
                nodes
                    .iter()
                    .filter_map(|id| self.get(id))
                    .filter_map(|node| node.loc()),
            ),
            EntityData::Relation { members } => members
                .iter()
                .filter_map(|member| self.get(&member.id))
                .filter_map(|member| self.extent_inner(member, visited))
                .reduce(|acc, next| acc.union(&next)),
        }
    }

    /// New graph with `id` set to `entity`, or deleted when `None`.
    pub fn update(&self, id: EntityId, entity: Option<Entity>) -> Graph {
        debug_assert!(entity.as_ref().is_none_or(|e| e.id() == id));
        self.apply([(id, entity.map(Arc::new))])
    }

    /// New graph with `entity` inserted or replaced.
    pub fn replace_entity(&self, entity: Entity) -> Graph {
        self.update(entity.id(), Some(entity))
    }

    /// New graph without `id`.
    pub fn remove(&self, id: &EntityId) -> Graph {
        self.update(*id, None)
    }

    /// New graph from `base_graph` plus a batch of changes, copying the
    /// overlay once and adjusting only the affected parents entries.
    pub fn replace(base_graph: &Graph, delta: GraphDelta) -> Graph {
        let changed = delta
            .changed
            .into_iter()
            .map(|entity| (entity.id(), Some(Arc::new(entity))));
        let removed = delta.removed.into_iter().map(|id| (id, None));
        base_graph.apply(changed.chain(removed))
    }

    /// True when both graphs are the same snapshot.
    pub fn ptr_eq(a: &Graph, b: &Graph) -> bool {
        Arc::ptr_eq(&a.base, &b.base) && Arc::ptr_eq(&a.local, &b.local)
    }

    pub fn shares_base_with(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }

    /// Same local edits as `edits`, re-derived on top of `self`'s base.
    pub fn with_edits_of(&self, edits: &Graph) -> Graph {
        self.base_graph().apply(
            edits
                .local
                .entities
                .iter()
                .map(|(id, slot)| (*id, slot.clone())),
        )
    }

    pub(crate) fn apply(
        &self,
        changes: impl IntoIterator<Item = (EntityId, Option<Arc<Entity>>)>,
    ) -> Graph {
        let mut overlay = Overlay::clone(&self.local);
        for (id, next) in changes {
            let previous = match overlay.entities.get(&id) {
                Some(slot) => slot.clone(),
                None => self.base.entities.get(&id).cloned(),
            };
            self.adjust_parents(&mut overlay, previous.as_deref(), next.as_deref());
            overlay.entities.insert(id, next);
        }
        Graph {
            base: Arc::clone(&self.base),
            local: Arc::new(overlay),
        }
    }

    /// Move `parent` between child parent-sets according to how its member
    /// list changed. Untouched children keep their base/override entries.
    fn adjust_parents(&self, overlay: &mut Overlay, previous: Option<&Entity>, next: Option<&Entity>) {
        let Some(subject) = next.or(previous) else {
            return;
        };
        let parent = subject.id();
        let (local_index, base_index) = match subject.kind() {
            EntityKind::Node => return,
            EntityKind::Way => (&mut overlay.parent_ways, &self.base.parent_ways),
            EntityKind::Relation => (&mut overlay.parent_rels, &self.base.parent_rels),
        };
        let before = previous.map(Entity::child_ids).unwrap_or_default();
        let after = next.map(Entity::child_ids).unwrap_or_default();

        for child in before.difference(&after) {
            local_index
                .entry(*child)
                .or_insert_with(|| base_index.get(child).cloned().unwrap_or_default())
                .remove(&parent);
        }
        for child in after.difference(&before) {
            local_index
                .entry(*child)
                .or_insert_with(|| base_index.get(child).cloned().unwrap_or_default())
                .insert(parent);
        }
    }

    /// Fold remote `entities` into the base shared by `graphs`.
    ///
    /// Without `force`, entities already in the base are left alone so the
    /// fold is idempotent. Local overlays are never touched, so local edits
    /// and deletions win. Returns the ids that were written to the base.
    pub(crate) fn rebase(
        graphs: &mut [&mut Graph],
        entities: Vec<Arc<Entity>>,
        force: bool,
    ) -> Vec<EntityId> {
        let Some(first) = graphs.first() else {
            return Vec::new();
        };
        let mut base = GraphBase::clone(&first.base);
        let mut written = Vec::new();
        let mut touched_children = BTreeSet::new();

        for entity in entities {
            let id = entity.id();
            if let Some(existing) = base.entities.get(&id).cloned() {
                if !force || *existing == *entity {
                    continue;
                }
                touched_children.extend(base.unlink(&existing));
            }
            touched_children.extend(base.link(&entity));
            base.entities.insert(id, entity);
            written.push(id);
        }

        if written.is_empty() {
            return written;
        }

        let base = Arc::new(base);
        for graph in graphs.iter_mut() {
            graph.base = Arc::clone(&base);
            graph.refresh_parent_overrides(&touched_children);
        }
        written
    }

    /// Recompute local parents overrides for children whose base parents
    /// changed: locally edited parents decide their own membership, all
    /// other parents come from the base.
    fn refresh_parent_overrides(&mut self, children: &BTreeSet<EntityId>) {
        let needs_refresh = children.iter().any(|child| {
            self.local.parent_ways.contains_key(child) || self.local.parent_rels.contains_key(child)
        });
        if !needs_refresh {
            return;
        }
        let base = Arc::clone(&self.base);
        let overlay = Arc::make_mut(&mut self.local);
        let local_entities = &overlay.entities;
        for (local_index, base_index) in [
            (&mut overlay.parent_ways, &base.parent_ways),
            (&mut overlay.parent_rels, &base.parent_rels),
        ] {
            for child in children {
                let Some(parents) = local_index.get_mut(child) else {
                    continue;
                };
                parents.retain(|parent| local_entities.contains_key(parent));
                if let Some(base_parents) = base_index.get(child) {
                    parents.extend(
                        base_parents
                            .iter()
                            .filter(|parent| !local_entities.contains_key(parent)),
                    );
                }
            }
        }
    }

    fn sorted(ids: Option<&HashSet<EntityId>>) -> Vec<EntityId> {
        let mut ids: Vec<_> = ids.into_iter().flatten().copied().collect();
        ids.sort();
        ids
    }
}
