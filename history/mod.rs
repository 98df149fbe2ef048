/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Undo/redo history over graph snapshots.
//!
//! The history is a stack of checkpoints plus a cursor. Every checkpoint's
//! graph shares one `GraphBase`; remote loads are folded into that base for
//! the whole stack at once, so local edits survive re-fetches untouched.
//!
//! History never persists anything itself. It exports a `HistoryDelta` for
//! the persistence bridge and can rebuild its stack from one.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::actions::Edit;
use crate::connection::{MalformedRemoteData, RemoteEntity};
use crate::graph::entity::ParseEntityIdError;
use crate::graph::{
    Changes, Difference, Entity, EntityId, EntityKind, Extent, Graph, GraphError,
};
use crate::persistence::types::{
    DELTA_FORMAT_VERSION, HistoryDelta, PersistedCheckpoint, PersistedEntity, PersistedNextIds,
    RestoreError,
};
use crate::render::EntityTree;

/// One entry of the history stack.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    graph: Graph,
    annotation: Option<String>,
    tag: Option<String>,
}

impl Checkpoint {
    fn base(graph: Graph) -> Self {
        Self {
            graph,
            annotation: None,
            tag: None,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Description of the edit that produced this checkpoint.
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    CleanAtBase,
    DirtyWithLocalEdits,
}

/// Outcome of folding a batch of remote records into the base.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Entities newly written to the base.
    pub merged: Vec<EntityId>,
    /// Valid records skipped because the base already had them, or because
    /// they were deleted upstream.
    pub ignored: usize,
    pub malformed: Vec<MalformedRemoteData>,
    /// Region covered by the load, when known.
    pub extent: Option<Extent>,
}

/// Lowest counter a restored history may carry. Leaves room for every
/// later allocation without wrapping.
const MIN_LOCAL_ID: i64 = i64::MIN / 2;

/// Hands out negative ids for locally created entities.
///
/// Counters survive `History::reset`, so an id is never reused in a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IdAllocator {
    next: PersistedNextIds,
}

impl IdAllocator {
    fn allocate(&mut self, kind: EntityKind) -> EntityId {
        let slot = match kind {
            EntityKind::Node => &mut self.next.node,
            EntityKind::Way => &mut self.next.way,
            EntityKind::Relation => &mut self.next.relation,
        };
        let id = EntityId::new(kind, *slot);
        *slot = slot.saturating_sub(1);
        id
    }

    fn check(stored: &PersistedNextIds) -> Result<(), RestoreError> {
        for (kind, counter) in [
            ("node", stored.node),
            ("way", stored.way),
            ("relation", stored.relation),
        ] {
            if counter < MIN_LOCAL_ID {
                return Err(RestoreError::InvalidCheckpoint(format!(
                    "{kind} id counter {counter} out of range"
                )));
            }
        }
        Ok(())
    }

    /// Never move a counter back towards zero.
    fn restore(&mut self, stored: PersistedNextIds) {
        self.next.node = self.next.node.min(stored.node).min(-1);
        self.next.way = self.next.way.min(stored.way).min(-1);
        self.next.relation = self.next.relation.min(stored.relation).min(-1);
    }
}

/// Undo/redo stack of graph snapshots.
pub struct History {
    stack: Vec<Checkpoint>,
    index: usize,
    tree: RefCell<EntityTree>,
    ids: IdAllocator,
    checkpoints: HashMap<String, (Vec<Checkpoint>, usize)>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self {
            stack: vec![Checkpoint::base(Graph::new())],
            index: 0,
            tree: RefCell::new(EntityTree::new()),
            ids: IdAllocator::default(),
            checkpoints: HashMap::new(),
        }
    }

    /// Current graph.
    pub fn graph(&self) -> &Graph {
        &self.stack[self.index].graph
    }

    /// Graph at index 0.
    pub fn base(&self) -> &Graph {
        &self.stack[0].graph
    }

    pub fn stack(&self) -> &[Checkpoint] {
        &self.stack
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of checkpoints below the cursor.
    pub fn undo_depth(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> HistoryState {
        if self.index == 0 {
            HistoryState::CleanAtBase
        } else {
            HistoryState::DirtyWithLocalEdits
        }
    }

    pub fn allocate_id(&mut self, kind: EntityKind) -> EntityId {
        self.ids.allocate(kind)
    }

    /// Apply `edit` to the current graph and push the result, dropping any
    /// redo-able checkpoints. On error the history is left unchanged.
    pub fn perform(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let previous = self.graph().clone();
        let graph = edit.apply(&previous)?;
        self.stack.truncate(self.index + 1);
        self.stack.push(Checkpoint {
            graph,
            annotation: edit.into_annotation(),
            tag: None,
        });
        self.index += 1;
        Ok(Difference::between(&previous, self.graph()))
    }

    /// Apply `edit` to the current graph and replace the current checkpoint
    /// with the result. Undo depth is unchanged; the redo tail is dropped.
    pub fn replace(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let source = self.graph().clone();
        self.replace_current(edit, &source)
    }

    /// Replace the current checkpoint with `edit` applied to the previous
    /// checkpoint's graph. At the base there is no previous checkpoint, so
    /// the edit applies to the base graph itself.
    pub fn overwrite(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let source = self.stack[self.index.saturating_sub(1)].graph.clone();
        self.replace_current(edit, &source)
    }

    fn replace_current(&mut self, edit: Edit, source: &Graph) -> Result<Difference, GraphError> {
        let previous = self.graph().clone();
        let graph = edit.apply(source)?;
        self.stack.truncate(self.index + 1);
        self.stack[self.index] = Checkpoint {
            graph,
            annotation: edit.into_annotation(),
            tag: None,
        };
        Ok(Difference::between(&previous, self.graph()))
    }

    /// Discard the current checkpoint (and any redo tail) and step back.
    pub fn pop(&mut self) -> Option<Difference> {
        if self.index == 0 {
            debug!("History pop ignored at base");
            return None;
        }
        let previous = self.graph().clone();
        self.stack.truncate(self.index);
        self.index -= 1;
        Some(Difference::between(&previous, self.graph()))
    }

    /// Step back to the previous annotated checkpoint, or to the base.
    pub fn undo(&mut self) -> Option<Difference> {
        if self.index == 0 {
            debug!("Nothing to undo");
            return None;
        }
        let previous = self.graph().clone();
        while self.index > 0 {
            self.index -= 1;
            if self.stack[self.index].annotation.is_some() {
                break;
            }
        }
        Some(Difference::between(&previous, self.graph()))
    }

    /// Step forward to the next annotated checkpoint. Unannotated
    /// checkpoints past the last annotated one are never redone.
    pub fn redo(&mut self) -> Option<Difference> {
        let Some(offset) = self.stack[self.index + 1..]
            .iter()
            .position(|checkpoint| checkpoint.annotation.is_some())
        else {
            debug!("Nothing to redo");
            return None;
        };
        let previous = self.graph().clone();
        self.index += offset + 1;
        Some(Difference::between(&previous, self.graph()))
    }

    /// Annotation of the edit `undo` would revert.
    pub fn undo_annotation(&self) -> Option<&str> {
        self.stack[1..=self.index]
            .iter()
            .rev()
            .find_map(Checkpoint::annotation)
    }

    /// Annotation of the edit `redo` would reapply.
    pub fn redo_annotation(&self) -> Option<&str> {
        self.stack[self.index + 1..]
            .iter()
            .find_map(Checkpoint::annotation)
    }

    /// Fold remote records into the base of every checkpoint.
    ///
    /// Malformed records are logged and skipped. Records for entities the
    /// base already holds are ignored, which makes repeated or reordered
    /// loads harmless. Local edits and deletions always win.
    pub fn merge(&mut self, remote: Vec<RemoteEntity>, extent: Option<Extent>) -> MergeReport {
        let mut report = MergeReport {
            extent,
            ..MergeReport::default()
        };
        let mut entities = Vec::with_capacity(remote.len());
        for record in &remote {
            if !record.visible {
                report.ignored += 1;
                continue;
            }
            match record.to_entity() {
                Ok(entity) => entities.push(Arc::new(entity)),
                Err(e) => {
                    warn!("{e}; skipping record");
                    report.malformed.push(e);
                },
            }
        }
        let valid = entities.len();

        let tree = self.tree.get_mut();
        tree.sync(&self.stack[self.index].graph);
        let mut graphs: Vec<&mut Graph> = self.stack.iter_mut().map(|c| &mut c.graph).collect();
        report.merged = Graph::rebase(&mut graphs, entities, false);
        report.ignored += valid - report.merged.len();
        if !report.merged.is_empty() {
            tree.rebase(&report.merged, &self.stack[self.index].graph);
        }
        if report.extent.is_none() {
            let base = self.base();
            report.extent = report
                .merged
                .iter()
                .filter_map(|id| base.get(id))
                .filter_map(|entity| base.extent(entity))
                .reduce(|acc, next| acc.union(&next));
        }
        debug!(
            "Merged {} remote entities ({} ignored, {} malformed)",
            report.merged.len(),
            report.ignored,
            report.malformed.len()
        );
        report
    }

    /// Difference between the base and the current graph.
    pub fn difference(&self) -> Difference {
        Difference::between(self.base(), self.graph())
    }

    pub fn changes(&self) -> Changes {
        self.difference().summary()
    }

    pub fn has_changes(&self) -> bool {
        !self.difference().is_empty()
    }

    /// Entities of the current graph intersecting `extent`.
    pub fn intersects(&self, extent: &Extent) -> Vec<Arc<Entity>> {
        self.tree
            .borrow_mut()
            .intersects(extent, &self.stack[self.index].graph)
    }

    /// Back to a single empty base. Id counters are kept.
    pub fn reset(&mut self) {
        self.stack = vec![Checkpoint::base(Graph::new())];
        self.index = 0;
        self.tree.get_mut().reset();
        self.checkpoints.clear();
    }

    /// Remember the current stack under `tag`.
    pub fn checkpoint(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        self.stack[self.index].tag = Some(tag.clone());
        self.checkpoints
            .insert(tag, (self.stack.clone(), self.index));
    }

    /// Restore the stack saved under `tag`, carried over to the current base
    /// so remote data merged since then is kept. Returns false for unknown
    /// tags.
    pub fn reset_to_checkpoint(&mut self, tag: &str) -> bool {
        let Some((saved, index)) = self.checkpoints.get(tag) else {
            debug!("No history checkpoint named '{tag}'");
            return false;
        };
        let base = self.base().base_graph();
        self.stack = saved
            .iter()
            .map(|checkpoint| Checkpoint {
                graph: base.with_edits_of(&checkpoint.graph),
                ..checkpoint.clone()
            })
            .collect();
        self.index = *index;
        true
    }

    /// The state needed to rebuild this stack, or `None` when there is
    /// nothing worth saving.
    pub fn to_delta(&self) -> Option<HistoryDelta> {
        if !self.has_changes() {
            return None;
        }
        let mut entities = Vec::new();
        let mut positions: HashMap<*const Entity, usize> = HashMap::new();
        let mut touched = BTreeSet::new();
        let mut stack = Vec::with_capacity(self.stack.len());

        for checkpoint in &self.stack {
            let mut entries: Vec<_> = checkpoint.graph.local_entries().collect();
            entries.sort_by_key(|(id, _)| **id);
            let mut persisted = PersistedCheckpoint {
                annotation: checkpoint.annotation.clone(),
                tag: checkpoint.tag.clone(),
                ..PersistedCheckpoint::default()
            };
            for (id, slot) in entries {
                touched.insert(*id);
                match slot {
                    // Values shared between checkpoints are stored once.
                    Some(entity) => {
                        let position = *positions.entry(Arc::as_ptr(entity)).or_insert_with(|| {
                            entities.push(PersistedEntity::from(entity.as_ref()));
                            entities.len() - 1
                        });
                        persisted.modified.push(position);
                    },
                    None => persisted.deleted.push(id.to_string()),
                }
            }
            stack.push(persisted);
        }

        let base = self.base().base();
        let base_entities = touched
            .iter()
            .filter_map(|id| base.get(id))
            .map(|entity| PersistedEntity::from(entity.as_ref()))
            .collect();

        Some(HistoryDelta {
            version: DELTA_FORMAT_VERSION,
            entities,
            base_entities,
            stack,
            next_ids: self.ids.next,
            index: self.index,
        })
    }

    /// Rebuild the stack from `delta` on top of the current base.
    ///
    /// Stored base entities are forced into the base so restored edits apply
    /// to the versions they were made against. On error nothing changes.
    pub fn from_delta(&mut self, delta: &HistoryDelta) -> Result<(), RestoreError> {
        if delta.version != DELTA_FORMAT_VERSION {
            return Err(RestoreError::UnsupportedVersion(delta.version));
        }
        if delta.index >= delta.stack.len() {
            return Err(RestoreError::InvalidCheckpoint(format!(
                "cursor {} outside stack of {}",
                delta.index,
                delta.stack.len()
            )));
        }
        IdAllocator::check(&delta.next_ids)?;
        let entities = delta
            .entities
            .iter()
            .map(|record| Entity::try_from(record).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let base_entities = delta
            .base_entities
            .iter()
            .map(|record| Entity::try_from(record).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let base = self.base().base_graph();
        let mut stack = Vec::with_capacity(delta.stack.len());
        for checkpoint in &delta.stack {
            let mut changes = Vec::with_capacity(checkpoint.modified.len() + checkpoint.deleted.len());
            for &position in &checkpoint.modified {
                let entity = entities.get(position).ok_or_else(|| {
                    RestoreError::InvalidCheckpoint(format!("entity index {position} out of range"))
                })?;
                changes.push((entity.id(), Some(Arc::clone(entity))));
            }
            for raw in &checkpoint.deleted {
                let id: EntityId = raw.parse().map_err(|e: ParseEntityIdError| {
                    RestoreError::InvalidCheckpoint(e.to_string())
                })?;
                changes.push((id, None));
            }
            stack.push(Checkpoint {
                graph: base.apply(changes),
                annotation: checkpoint.annotation.clone(),
                tag: checkpoint.tag.clone(),
            });
        }
        let mut graphs: Vec<&mut Graph> = stack.iter_mut().map(|c| &mut c.graph).collect();
        Graph::rebase(&mut graphs, base_entities, true);

        self.stack = stack;
        self.index = delta.index;
        self.ids.restore(delta.next_ids);
        self.tree.get_mut().reset();
        info!(
            "Restored history: {} checkpoints, cursor at {}",
            self.stack.len(),
            self.index
        );
        Ok(())
    }
}
