/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The editor coordinator.
//!
//! `Context` owns the history, the persistence bridge, the connection, the
//! active mode and the level cursor, and is the single read/write surface the
//! rest of the editor talks to. Only `History` derives graphs; only `Context`
//! changes mode and level.
//!
//! Every history mutator is wrapped so it schedules a debounced save and
//! notifies `change` listeners. Remote results arrive on a channel and are
//! folded in by `process_loads` (called from `tick`).

pub mod debounce;
pub mod events;
pub mod mode;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, info, warn};

use crate::actions::{self, Edit};
use crate::config::EditorConfig;
use crate::connection::{
    Connection, ConnectionError, LoadOutcome, LoadReply, LoadResult, RequestId, Viewport,
};
use crate::graph::{
    Changes, Difference, Entity, EntityId, EntityKind, Extent, GeometryKind, Graph, GraphError,
    LocOffset,
};
use crate::history::History;
use crate::persistence::types::RestoreError;
use crate::persistence::{KeyValueStore, PersistenceBridge, SELECTION_KEY, StorageError};
use debounce::Debouncer;
use events::{ContextEvent, EventBus};
use mode::{BROWSE, BrowseMode, Mode, SAVE, SelectMode};

/// Returned by `save` while unsaved edits remain.
pub const UNSAVED_CHANGES: &str = "You have unsaved changes.";

const DEBUG_FLAGS: &[&str] = &["tile", "collision", "imagery", "imperial", "drive_left"];

/// Rendering surface the coordinator can steer.
pub trait MapSurface {
    fn pan(&mut self, by: LocOffset);

    fn zoom_to(&mut self, extent: &Extent);
}

/// Surface that ignores every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl MapSurface for NullSurface {
    fn pan(&mut self, _by: LocOffset) {}

    fn zoom_to(&mut self, _extent: &Extent) {}
}

/// Per-request completion hook, run after the result has been merged.
pub type LoadCallback = Box<dyn FnOnce(&mut Context, &Result<LoadResult, ConnectionError>)>;

pub struct Context {
    config: EditorConfig,
    history: History,
    bridge: PersistenceBridge,
    connection: Box<dyn Connection>,
    surface: Box<dyn MapSurface>,
    events: EventBus,
    mode: Box<dyn Mode>,
    debounce: Debouncer,
    level: f64,
    available_levels: Vec<f64>,
    copy_ids: Vec<EntityId>,
    copy_graph: Graph,
    in_intro: bool,
    min_editable_zoom: u8,
    debug_flags: BTreeMap<String, bool>,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
    next_request: u64,
    callbacks: HashMap<RequestId, LoadCallback>,
    /// Entity to select once it is present in the graph.
    pending_select: Option<EntityId>,
}

impl Context {
    pub fn new(
        config: EditorConfig,
        store: Box<dyn KeyValueStore>,
        mut connection: Box<dyn Connection>,
    ) -> Self {
        let (tx, rx) = unbounded();
        connection.set_tile_zoom(config.min_editable_zoom);
        Self {
            bridge: PersistenceBridge::new(store, config.instance.clone()),
            debounce: Debouncer::new(config.save_debounce()),
            min_editable_zoom: config.min_editable_zoom,
            config,
            history: History::new(),
            connection,
            surface: Box::new(NullSurface),
            events: EventBus::new(),
            mode: Box::new(BrowseMode),
            level: 0.0,
            available_levels: vec![0.0],
            copy_ids: Vec::new(),
            copy_graph: Graph::new(),
            in_intro: false,
            debug_flags: DEBUG_FLAGS
                .iter()
                .map(|flag| (flag.to_string(), false))
                .collect(),
            tx,
            rx,
            next_request: 0,
            callbacks: HashMap::new(),
            pending_select: None,
        }
    }

    /// Build from configuration, opening the store it names.
    pub fn from_config(
        config: EditorConfig,
        connection: Box<dyn Connection>,
    ) -> Result<Self, StorageError> {
        let store = config.open_store()?;
        Ok(Self::new(config, store, connection))
    }

    pub fn with_surface(mut self, surface: Box<dyn MapSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn bridge(&self) -> &PersistenceBridge {
        &self.bridge
    }

    // Graph reads

    pub fn graph(&self) -> &Graph {
        self.history.graph()
    }

    pub fn has_entity(&self, id: &EntityId) -> bool {
        self.graph().has_entity(id)
    }

    pub fn entity(&self, id: &EntityId) -> Result<&Arc<Entity>, GraphError> {
        self.graph().entity(id)
    }

    pub fn child_nodes(&self, way: &Entity) -> Result<Vec<Arc<Entity>>, GraphError> {
        self.graph().child_nodes(way)
    }

    pub fn geometry(&self, id: &EntityId) -> Result<GeometryKind, GraphError> {
        self.graph().geometry(id)
    }

    pub fn intersects(&self, extent: &Extent) -> Vec<Arc<Entity>> {
        self.history.intersects(extent)
    }

    pub fn has_changes(&self) -> bool {
        self.history.has_changes()
    }

    pub fn difference(&self) -> Difference {
        self.history.difference()
    }

    pub fn changes(&self) -> Changes {
        self.history.changes()
    }

    pub fn allocate_id(&mut self, kind: EntityKind) -> EntityId {
        self.history.allocate_id(kind)
    }

    // History writes

    pub fn perform(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let difference = self.history.perform(edit)?;
        self.after_edit(true);
        Ok(difference)
    }

    pub fn replace(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let difference = self.history.replace(edit)?;
        self.after_edit(true);
        Ok(difference)
    }

    pub fn overwrite(&mut self, edit: Edit) -> Result<Difference, GraphError> {
        let difference = self.history.overwrite(edit)?;
        self.after_edit(true);
        Ok(difference)
    }

    pub fn pop(&mut self) -> Option<Difference> {
        let difference = self.history.pop();
        self.after_edit(difference.is_some());
        difference
    }

    pub fn undo(&mut self) -> Option<Difference> {
        let difference = self.history.undo();
        self.after_edit(difference.is_some());
        difference
    }

    pub fn redo(&mut self) -> Option<Difference> {
        let difference = self.history.redo();
        self.after_edit(difference.is_some());
        difference
    }

    fn after_edit(&mut self, changed: bool) {
        self.debounce.schedule();
        if changed {
            self.update_available_levels();
            self.events.dispatch(&ContextEvent::Change);
        }
    }

    // Persistence

    /// Persist now. Skipped during the intro walkthrough and while the save
    /// mode is active. Returns the unsaved-changes message when edits remain.
    pub fn save(&mut self) -> Option<&'static str> {
        if self.in_intro || self.mode.id() == SAVE {
            return None;
        }
        self.debounce.cancel();
        let delta = self.history.to_delta();
        self.bridge.save(delta.as_ref());
        delta.map(|_| UNSAVED_CHANGES)
    }

    pub fn is_save_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Drop all editing state: pending save, in-flight loads and history.
    pub fn flush(&mut self) {
        self.debounce.cancel();
        self.connection.flush();
        while self.rx.try_recv().is_ok() {}
        self.callbacks.clear();
        self.pending_select = None;
        self.history.reset();
        self.update_available_levels();
        self.events.dispatch(&ContextEvent::Change);
        info!("Flushed editor state");
    }

    /// Rebuild history from the saved delta. Returns false when nothing
    /// was saved.
    pub fn restore(&mut self) -> Result<bool, RestoreError> {
        let Some(delta) = self.bridge.restore() else {
            return Ok(false);
        };
        self.history.from_delta(&delta)?;
        self.update_available_levels();
        self.events.dispatch(&ContextEvent::Change);
        Ok(true)
    }

    pub fn has_restorable_changes(&self) -> bool {
        self.bridge.has_saved()
    }

    pub fn clear_saved(&mut self) {
        self.bridge.clear_saved();
    }

    /// Raw storage access for host settings.
    pub fn storage(&self, key: &str) -> Option<String> {
        self.bridge.storage(key)
    }

    pub fn set_storage(&mut self, key: &str, value: Option<&str>) {
        self.bridge.set_storage(key, value);
    }

    /// Remember the current level (and selection) for the next session.
    pub fn store_level(&mut self) {
        let selection = self.selected_ids().first().copied();
        self.bridge.store_level(self.level, selection);
    }

    /// Drive time-based work: drain finished loads, select a pending entity
    /// once it has arrived, and run the debounced save when due.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.process_loads();
        self.select_pending_if_loaded();
        if self.debounce.poll(now) {
            self.save();
        }
    }

    // Connection

    fn next_reply(&mut self) -> LoadReply {
        self.next_request += 1;
        LoadReply::new(RequestId(self.next_request), self.tx.clone())
    }

    pub fn load_tiles(
        &mut self,
        viewport: &Viewport,
        dimensions: [u32; 2],
        callback: Option<LoadCallback>,
    ) -> RequestId {
        let reply = self.next_reply();
        let request = reply.request();
        if let Some(callback) = callback {
            self.callbacks.insert(request, callback);
        }
        self.connection.load_tiles(viewport, dimensions, reply);
        request
    }

    pub fn load_entity(&mut self, id: EntityId, callback: Option<LoadCallback>) -> RequestId {
        let reply = self.next_reply();
        let request = reply.request();
        if let Some(callback) = callback {
            self.callbacks.insert(request, callback);
        }
        self.connection.load_entity(id, reply);
        request
    }

    /// Merge every completed load, in arrival order, then run its callback.
    pub fn process_loads(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let outcome = match self.rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            processed += 1;
            match &outcome.result {
                Ok(result) => {
                    let report = self.history.merge(result.data.clone(), result.extent);
                    if !report.merged.is_empty() {
                        self.update_available_levels();
                        self.events.dispatch(&ContextEvent::Change);
                    }
                },
                Err(e) => warn!("Load {:?} failed: {e}", outcome.request),
            }
            if let Some(callback) = self.callbacks.remove(&outcome.request) {
                callback(self, &outcome.result);
            }
        }
        processed
    }

    /// Load `id` (zooming to it when `zoom_to`), and select it once it is
    /// present. Entering any mode other than browse first cancels the
    /// selection; a later call replaces an earlier one.
    pub fn zoom_to_entity(&mut self, id: EntityId, zoom_to: bool) {
        if zoom_to {
            let callback: LoadCallback = Box::new(move |context, result| {
                if result.is_err() {
                    return;
                }
                let extent = context
                    .graph()
                    .get(&id)
                    .and_then(|entity| context.graph().extent(entity));
                if let Some(extent) = extent {
                    context.surface.zoom_to(&extent);
                }
            });
            self.load_entity(id, Some(callback));
        }
        if let Some(previous) = self.pending_select.replace(id) {
            debug!("Replacing pending selection of {previous} with {id}");
        }
    }

    pub fn pending_selection(&self) -> Option<EntityId> {
        self.pending_select
    }

    fn select_pending_if_loaded(&mut self) {
        let Some(id) = self.pending_select else {
            return;
        };
        if !self.has_entity(&id) {
            return;
        }
        self.pending_select = None;
        self.enter(Box::new(SelectMode::new(vec![id])));
    }

    pub fn min_editable_zoom(&self) -> u8 {
        self.min_editable_zoom
    }

    pub fn set_min_editable_zoom(&mut self, zoom: u8) {
        self.min_editable_zoom = zoom;
        self.connection.set_tile_zoom(zoom);
    }

    // Modes

    pub fn mode(&self) -> &dyn Mode {
        self.mode.as_ref()
    }

    /// Exit the current mode, then enter `mode`, notifying listeners of each.
    pub fn enter(&mut self, mut mode: Box<dyn Mode>) {
        self.mode.exit();
        self.events.dispatch(&ContextEvent::Exit {
            mode: self.mode.id().to_string(),
        });
        mode.enter();
        self.mode = mode;
        if self.mode.id() != BROWSE
            && let Some(id) = self.pending_select.take()
        {
            debug!("Cancelled pending selection of {id}");
        }
        self.events.dispatch(&ContextEvent::Enter {
            mode: self.mode.id().to_string(),
        });
    }

    pub fn selected_ids(&self) -> Vec<EntityId> {
        self.mode
            .selected_ids()
            .map(<[EntityId]>::to_vec)
            .unwrap_or_default()
    }

    // Events

    pub fn on(&mut self, key: &str, listener: impl FnMut(&ContextEvent) + 'static) {
        self.events.on(key, listener);
    }

    pub fn off(&mut self, key: &str) {
        self.events.off(key);
    }

    // Surface

    pub fn pan(&mut self, by: LocOffset) {
        self.surface.pan(by);
    }

    pub fn zoom_to(&mut self, extent: &Extent) {
        self.surface.zoom_to(extent);
    }

    // Levels

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn available_levels(&self) -> &[f64] {
        &self.available_levels
    }

    pub fn has_levels_defined(&self, id: &EntityId) -> bool {
        self.graph()
            .get(id)
            .is_some_and(|entity| !entity.levels().is_empty())
    }

    /// Recompute the sorted set of levels in the current graph (always
    /// including 0), then apply any level stored for restore.
    pub fn update_available_levels(&mut self) {
        let mut levels = vec![0.0];
        for entity in self.history.graph().entities() {
            levels.extend_from_slice(entity.levels());
        }
        levels.sort_by(f64::total_cmp);
        levels.dedup();
        self.available_levels = levels;
        self.update_level_from_storage();
    }

    /// Apply a stored level once it becomes available. The stored selection
    /// is only consumed when the level actually changes.
    fn update_level_from_storage(&mut self) {
        let Some(stored) = self.bridge.stored_level() else {
            return;
        };
        if !self.available_levels.contains(&stored) {
            return;
        }
        if stored != self.level {
            self.set_level(stored);
            if self.bridge.storage(SELECTION_KEY).is_some() {
                let selection = self.bridge.stored_selection();
                self.bridge.clear_stored_selection();
                match selection {
                    Some(id) => self.zoom_to_entity(id, true),
                    None => debug!("Dropping unreadable stored selection"),
                }
            }
        }
        self.bridge.clear_stored_level();
    }

    fn level_position(&self) -> Option<usize> {
        self.available_levels.iter().position(|l| *l == self.level)
    }

    pub fn level_up(&mut self) {
        let next = self.level_position().map_or(0, |position| position + 1);
        if let Some(level) = self.available_levels.get(next).copied() {
            self.set_level(level);
        }
    }

    pub fn level_down(&mut self) {
        if let Some(position) = self.level_position()
            && position > 0
        {
            let level = self.available_levels[position - 1];
            self.set_level(level);
        }
    }

    /// Move to `level` if it is available and differs from the current one;
    /// re-enters browse mode and notifies `levelchange` listeners.
    pub fn set_level(&mut self, level: f64) {
        if level == self.level || !self.available_levels.contains(&level) {
            debug!("Ignoring level change to {level}");
            return;
        }
        self.level = level;
        self.enter(Box::new(BrowseMode));
        self.surface.pan(LocOffset::zero());
        self.events.dispatch(&ContextEvent::LevelChange { level });
    }

    // Copy/paste

    /// Snapshot `ids` together with the current graph for a later paste.
    pub fn copy_ids(&mut self, ids: Vec<EntityId>) {
        self.copy_graph = self.graph().clone();
        self.copy_ids = ids;
    }

    pub fn copied_ids(&self) -> &[EntityId] {
        &self.copy_ids
    }

    pub fn copy_graph(&self) -> &Graph {
        &self.copy_graph
    }

    /// Paste fresh copies of the copied entities, shifted by `offset`, and
    /// select them. Geometry comes from the graph as it was at copy time.
    pub fn paste(&mut self, offset: LocOffset) -> Result<Option<Difference>, GraphError> {
        if self.copy_ids.is_empty() {
            return Ok(None);
        }
        let history = &mut self.history;
        let plan = actions::copy_plan(&self.copy_ids, &self.copy_graph, |kind| {
            history.allocate_id(kind)
        })?;
        let pasted: Vec<EntityId> = self
            .copy_ids
            .iter()
            .filter_map(|id| plan.get(id).copied())
            .collect();
        let edit = Edit::new(actions::copy_entities(
            plan,
            self.copy_graph.clone(),
            offset,
        ))
        .annotate(format!("Pasted {} features.", pasted.len()));
        let difference = self.perform(edit)?;
        self.enter(Box::new(SelectMode::new(pasted)));
        Ok(Some(difference))
    }

    // Debug

    pub fn in_intro(&self) -> bool {
        self.in_intro
    }

    pub fn set_in_intro(&mut self, in_intro: bool) {
        self.in_intro = in_intro;
    }

    pub fn debug_flags(&self) -> &BTreeMap<String, bool> {
        &self.debug_flags
    }

    pub fn debug(&self, flag: &str) -> bool {
        self.debug_flags.get(flag).copied().unwrap_or(false)
    }

    pub fn set_debug(&mut self, flag: &str, value: bool) {
        self.debug_flags.insert(flag.to_string(), value);
        self.events.dispatch(&ContextEvent::Change);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("mode", &self.mode.id())
            .field("level", &self.level)
            .field("history_len", &self.history.len())
            .field("history_index", &self.history.index())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
