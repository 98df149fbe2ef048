/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Boundary to the remote map API.
//!
//! A `Connection` fetches tiles and single entities and answers through a
//! `LoadReply`, which posts a `LoadOutcome` onto the coordinator's channel.
//! Completion order between overlapping requests is not guaranteed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crossbeam_channel::Sender;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::graph::entity::EntityParts;
use crate::graph::{Entity, EntityId, EntityKind, Extent, Loc, Tags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// The visible map region a tile load is issued for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub extent: Extent,
    pub zoom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMember {
    #[serde(rename = "ref")]
    pub id: String,
    #[serde(default)]
    pub role: String,
}

/// One entity record as delivered by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<RemoteMember>>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub version: Option<u64>,
    /// `false` for entities deleted upstream.
    #[serde(default = "visible_default")]
    pub visible: bool,
}

fn visible_default() -> bool {
    true
}

impl RemoteEntity {
    pub fn node(id: &str, loc: [f64; 2]) -> Self {
        Self {
            id: id.to_string(),
            loc: Some(loc),
            nodes: None,
            members: None,
            tags: Tags::new(),
            version: Some(1),
            visible: true,
        }
    }

    pub fn way(id: &str, nodes: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            loc: None,
            nodes: Some(nodes.iter().map(|n| n.to_string()).collect()),
            members: None,
            tags: Tags::new(),
            version: Some(1),
            visible: true,
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Validate the record and turn it into an entity.
    pub fn to_entity(&self) -> Result<Entity, MalformedRemoteData> {
        EntityParts {
            id: &self.id,
            loc: self.loc,
            nodes: self.nodes.as_deref(),
            members: self
                .members
                .as_ref()
                .map(|members| members.iter().map(|m| (m.id.as_str(), m.role.as_str())).collect()),
            tags: &self.tags,
            version: self.version.unwrap_or(1),
        }
        .build()
        .map_err(|reason| MalformedRemoteData {
            id: self.id.clone(),
            reason,
        })
    }

    /// Raw ids this record references, way nodes then relation members.
    fn child_ids(&self) -> impl Iterator<Item = &str> + '_ {
        let nodes = self.nodes.iter().flatten().map(String::as_str);
        let members = self.members.iter().flatten().map(|m| m.id.as_str());
        nodes.chain(members)
    }
}

/// A remote record that failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRemoteData {
    pub id: String,
    pub reason: String,
}

impl fmt::Display for MalformedRemoteData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed remote entity '{}': {}", self.id, self.reason)
    }
}

impl std::error::Error for MalformedRemoteData {}

/// Payload of a successful load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    pub data: Vec<RemoteEntity>,
    pub extent: Option<Extent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    NotFound(EntityId),
    Network(String),
    /// The connection was flushed before the request completed.
    Cancelled,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NotFound(id) => write!(f, "Remote entity {id} not found"),
            ConnectionError::Network(e) => write!(f, "Network error: {e}"),
            ConnectionError::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub request: RequestId,
    pub result: Result<LoadResult, ConnectionError>,
}

/// Completion handle for one request.
#[derive(Debug)]
pub struct LoadReply {
    request: RequestId,
    tx: Sender<LoadOutcome>,
}

impl LoadReply {
    pub(crate) fn new(request: RequestId, tx: Sender<LoadOutcome>) -> Self {
        Self { request, tx }
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    pub fn send(self, result: Result<LoadResult, ConnectionError>) {
        let outcome = LoadOutcome {
            request: self.request,
            result,
        };
        if self.tx.send(outcome).is_err() {
            debug!("Dropping load result for {:?}: receiver gone", self.request);
        }
    }
}

/// Remote data source consumed by the coordinator.
pub trait Connection {
    fn load_tiles(&mut self, viewport: &Viewport, dimensions: [u32; 2], reply: LoadReply);

    fn load_entity(&mut self, id: EntityId, reply: LoadReply);

    /// Abandon in-flight requests and cached tiles.
    fn flush(&mut self) {}

    fn set_tile_zoom(&mut self, _zoom: u8) {}
}

#[derive(Debug, Default)]
struct StaticState {
    /// Keyed by the raw record id so malformed records are served too.
    records: BTreeMap<String, RemoteEntity>,
    held: Option<Vec<(LoadReply, Result<LoadResult, ConnectionError>)>>,
    flushes: usize,
    tile_zoom: Option<u8>,
}

/// Connection serving a fixed in-memory record set.
///
/// Clones share state, so a caller can keep a handle to release held
/// replies after the coordinator has taken ownership of the connection.
#[derive(Debug, Clone, Default)]
pub struct StaticConnection {
    state: Rc<RefCell<StaticState>>,
}

impl StaticConnection {
    pub fn new(records: impl IntoIterator<Item = RemoteEntity>) -> Self {
        let connection = Self::default();
        connection.insert(records);
        connection
    }

    /// Add or replace records.
    pub fn insert(&self, records: impl IntoIterator<Item = RemoteEntity>) {
        let mut state = self.state.borrow_mut();
        for record in records {
            state.records.insert(record.id.clone(), record);
        }
    }

    /// Queue replies instead of answering immediately.
    pub fn hold(&self) {
        self.state.borrow_mut().held.get_or_insert_with(Vec::new);
    }

    /// Answer every held reply, most recent request first, and stop holding.
    pub fn release_reversed(&self) -> usize {
        let held = self.state.borrow_mut().held.take().unwrap_or_default();
        let count = held.len();
        for (reply, result) in held.into_iter().rev() {
            reply.send(result);
        }
        count
    }

    pub fn flushes(&self) -> usize {
        self.state.borrow().flushes
    }

    pub fn tile_zoom(&self) -> Option<u8> {
        self.state.borrow().tile_zoom
    }

    fn answer(&self, reply: LoadReply, result: Result<LoadResult, ConnectionError>) {
        let reply = {
            let mut state = self.state.borrow_mut();
            match state.held.as_mut() {
                Some(held) => {
                    held.push((reply, result));
                    return;
                },
                None => reply,
            }
        };
        reply.send(result);
    }

    fn tile_records(state: &StaticState, extent: &Extent) -> Vec<RemoteEntity> {
        let inside = |loc: &[f64; 2]| extent.contains(Loc::new(loc[0], loc[1]));
        let mut ids: BTreeSet<&str> = state
            .records
            .values()
            .filter(|record| record.loc.as_ref().is_some_and(inside))
            .map(|record| record.id.as_str())
            .collect();
        // Ways touching the tile come with all of their nodes; relations
        // come along when they reference anything already included.
        let ways: Vec<&RemoteEntity> = state
            .records
            .values()
            .filter(|record| record.nodes.is_some())
            .filter(|record| record.child_ids().any(|child| ids.contains(child)))
            .collect();
        for way in ways {
            ids.insert(way.id.as_str());
            ids.extend(way.child_ids());
        }
        let relations: Vec<&str> = state
            .records
            .values()
            .filter(|record| record.members.is_some())
            .filter(|record| record.child_ids().any(|child| ids.contains(child)))
            .map(|record| record.id.as_str())
            .collect();
        ids.extend(relations);
        ids.iter()
            .filter_map(|id| state.records.get(*id).cloned())
            .collect()
    }
}

impl Connection for StaticConnection {
    fn load_tiles(&mut self, viewport: &Viewport, _dimensions: [u32; 2], reply: LoadReply) {
        let data = Self::tile_records(&self.state.borrow(), &viewport.extent);
        let result = LoadResult {
            data,
            extent: Some(viewport.extent),
        };
        self.answer(reply, Ok(result));
    }

    fn load_entity(&mut self, id: EntityId, reply: LoadReply) {
        let result = {
            let state = self.state.borrow();
            match state.records.get(&id.to_string()) {
                Some(record) => {
                    let mut data = vec![record.clone()];
                    if id.kind() == EntityKind::Way {
                        data.extend(
                            record
                                .child_ids()
                                .filter_map(|child| state.records.get(child).cloned()),
                        );
                    }
                    Ok(LoadResult { data, extent: None })
                },
                None => Err(ConnectionError::NotFound(id)),
            }
        };
        self.answer(reply, result);
    }

    fn flush(&mut self) {
        let mut state = self.state.borrow_mut();
        state.flushes += 1;
        if let Some(held) = state.held.as_mut() {
            held.clear();
        }
    }

    fn set_tile_zoom(&mut self, zoom: u8) {
        self.state.borrow_mut().tile_zoom = Some(zoom);
    }
}
