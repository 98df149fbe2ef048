/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Edits: pure graph → graph transformations.
//!
//! An `Action` never mutates its input; it returns a new `Graph` or a
//! `GraphError` that leaves the caller's state untouched. An `Edit` bundles
//! one or more actions with the annotation shown in undo/redo UI.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::graph::{
    Entity, EntityId, EntityKind, Graph, GraphDelta, GraphError, Loc, LocOffset, Member, Tags,
};

/// A single atomic graph transformation.
pub trait Action {
    fn apply(&self, graph: &Graph) -> Result<Graph, GraphError>;
}

impl<F> Action for F
where
    F: Fn(&Graph) -> Result<Graph, GraphError>,
{
    fn apply(&self, graph: &Graph) -> Result<Graph, GraphError> {
        self(graph)
    }
}

/// One or more actions applied in sequence, plus an optional annotation.
///
/// Unannotated edits become intermediate checkpoints that undo/redo skip.
pub struct Edit {
    actions: Vec<Box<dyn Action>>,
    annotation: Option<String>,
}

impl Edit {
    pub fn new(action: impl Action + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
            annotation: None,
        }
    }

    pub fn then(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn annotate(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub(crate) fn into_annotation(self) -> Option<String> {
        self.annotation
    }

    /// Run every action in order; the first failure aborts the whole edit.
    pub fn apply(&self, graph: &Graph) -> Result<Graph, GraphError> {
        self.actions
            .iter()
            .try_fold(graph.clone(), |current, action| action.apply(&current))
    }
}

impl fmt::Debug for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edit")
            .field("actions", &self.actions.len())
            .field("annotation", &self.annotation)
            .finish()
    }
}

fn expect_kind(entity: &Entity, expected: EntityKind) -> Result<(), GraphError> {
    if entity.kind() == expected {
        Ok(())
    } else {
        Err(GraphError::WrongKind {
            id: entity.id(),
            expected,
        })
    }
}

/// Does nothing; useful as an annotated marker checkpoint.
pub fn noop() -> impl Action {
    |graph: &Graph| -> Result<Graph, GraphError> { Ok(graph.clone()) }
}

/// Insert a new entity (or replace one with the same id).
pub fn add_entity(entity: Entity) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> { Ok(graph.replace_entity(entity.clone())) }
}

pub fn move_node(id: EntityId, loc: Loc) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let node = graph.entity(&id)?;
        expect_kind(node, EntityKind::Node)?;
        Ok(graph.replace_entity(node.with_loc(loc)))
    }
}

pub fn change_tags(id: EntityId, tags: Tags) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let entity = graph.entity(&id)?;
        Ok(graph.replace_entity(entity.with_tags(tags.clone())))
    }
}

/// Insert `node` into `way` at `index` (appended when `None` or past the end).
pub fn add_vertex(way: EntityId, node: EntityId, index: Option<usize>) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let vertex = graph.entity(&node)?;
        expect_kind(vertex, EntityKind::Node)?;
        let target = graph.entity(&way)?;
        expect_kind(target, EntityKind::Way)?;
        let mut nodes = target.nodes().to_vec();
        let at = index.unwrap_or(nodes.len()).min(nodes.len());
        nodes.insert(at, node);
        Ok(graph.replace_entity(target.with_nodes(nodes)))
    }
}

/// Delete a node, pulling it out of parent ways and relations.
///
/// Ways left with fewer than two distinct nodes are deleted as well.
pub fn delete_node(id: EntityId) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let node = graph.entity(&id)?;
        expect_kind(node, EntityKind::Node)?;
        let mut next = graph.clone();
        for parent in graph.parent_ways(&id) {
            let nodes = without_node(parent.nodes(), &id);
            let distinct: BTreeSet<_> = nodes.iter().collect();
            next = if distinct.len() < 2 {
                remove_way(&next, &parent.id())?
            } else {
                next.replace_entity(parent.with_nodes(nodes))
            };
        }
        next = detach_from_relations(&next, &id);
        Ok(next.remove(&id))
    }
}

/// Delete a way and any of its nodes that become orphaned and carry no
/// interesting tags.
pub fn delete_way(id: EntityId) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let way = graph.entity(&id)?;
        expect_kind(way, EntityKind::Way)?;
        remove_way(graph, &id)
    }
}

fn remove_way(graph: &Graph, id: &EntityId) -> Result<Graph, GraphError> {
    let way = graph.entity(id)?.clone();
    let mut next = detach_from_relations(graph, id).remove(id);
    for child in way.child_ids() {
        let Some(node) = next.get(&child).cloned() else {
            continue;
        };
        let orphaned = next.parent_way_ids(&child).is_empty()
            && next.parent_relation_ids(&child).is_empty();
        if orphaned && !node.has_interesting_tags() {
            next = next.remove(&child);
        }
    }
    Ok(next)
}

/// Drop `id` from every parent relation; relations left empty are deleted.
fn detach_from_relations(graph: &Graph, id: &EntityId) -> Graph {
    let mut next = graph.clone();
    for relation in graph.parent_relations(id) {
        let members: Vec<Member> = relation
            .members()
            .iter()
            .filter(|m| m.id != *id)
            .cloned()
            .collect();
        next = if members.is_empty() {
            detach_from_relations(&next, &relation.id()).remove(&relation.id())
        } else {
            next.replace_entity(relation.with_members(members))
        };
    }
    next
}

fn without_node(nodes: &[EntityId], id: &EntityId) -> Vec<EntityId> {
    let mut kept: Vec<EntityId> = nodes.iter().filter(|n| *n != id).copied().collect();
    // Removing a repeated node can leave adjacent duplicates behind.
    kept.dedup();
    kept
}

/// Plan a deep copy of `ids` out of `source`: every referenced way node and
/// relation member that resolves in `source` gets a fresh id from `allocate`.
pub fn copy_plan(
    ids: &[EntityId],
    source: &Graph,
    mut allocate: impl FnMut(EntityKind) -> EntityId,
) -> Result<BTreeMap<EntityId, EntityId>, GraphError> {
    let mut plan = BTreeMap::new();
    let mut pending: Vec<EntityId> = ids.iter().rev().copied().collect();
    while let Some(id) = pending.pop() {
        if plan.contains_key(&id) {
            continue;
        }
        let entity = source.entity(&id)?;
        plan.insert(id, allocate(id.kind()));
        pending.extend(
            entity
                .child_ids()
                .into_iter()
                .filter(|child| source.has_entity(child) && !plan.contains_key(child)),
        );
    }
    Ok(plan)
}

/// Paste the entities of `plan` from `source` into the target graph,
/// shifted by `offset`. The source snapshot is used for geometry, so edits
/// made after the copy don't affect what gets pasted.
pub fn copy_entities(
    plan: BTreeMap<EntityId, EntityId>,
    source: Graph,
    offset: LocOffset,
) -> impl Action {
    move |graph: &Graph| -> Result<Graph, GraphError> {
        let copies = plan
            .iter()
            .map(|(original, copy)| {
                source
                    .entity(original)
                    .map(|entity| entity.copied(*copy, &plan, offset))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Graph::replace(
            graph,
            GraphDelta {
                changed: copies,
                removed: Vec::new(),
            },
        ))
    }
}
