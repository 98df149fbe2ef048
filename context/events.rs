/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Coordinator event stream.
//!
//! Listeners register under `"<kind>.<tag>"`, e.g. `"change.counter"`.
//! Registering the same key again replaces the earlier listener, and
//! removing a key that isn't registered is a no-op.
//!
//! Every key belongs to callers. The coordinator registers nothing here:
//! the selection pending from `Context::zoom_to_entity` is held as
//! coordinator state and dropped when a mode other than browse is entered.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;

/// Notification emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Enter { mode: String },
    Exit { mode: String },
    /// The current graph (or something drawn from it) changed.
    Change,
    LevelChange { level: f64 },
}

impl ContextEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ContextEvent::Enter { .. } => EventKind::Enter,
            ContextEvent::Exit { .. } => EventKind::Exit,
            ContextEvent::Change => EventKind::Change,
            ContextEvent::LevelChange { .. } => EventKind::LevelChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Enter,
    Exit,
    Change,
    LevelChange,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
            EventKind::Change => "change",
            EventKind::LevelChange => "levelchange",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "enter" => Some(EventKind::Enter),
            "exit" => Some(EventKind::Exit),
            "change" => Some(EventKind::Change),
            "levelchange" => Some(EventKind::LevelChange),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Listener = Box<dyn FnMut(&ContextEvent)>;

/// Observer registry keyed by event kind plus subscriber tag.
#[derive(Default)]
pub struct EventBus {
    listeners: BTreeMap<(EventKind, String), Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_key(key: &str) -> Option<(EventKind, String)> {
        let (kind, tag) = key.split_once('.').unwrap_or((key, ""));
        Some((EventKind::from_name(kind)?, tag.to_string()))
    }

    /// Register `listener` under `key`. Unknown event names are logged and
    /// ignored.
    pub fn on(&mut self, key: &str, listener: impl FnMut(&ContextEvent) + 'static) {
        match Self::parse_key(key) {
            Some(slot) => {
                self.listeners.insert(slot, Box::new(listener));
            },
            None => warn!("Ignoring listener for unknown event '{key}'"),
        }
    }

    /// Remove the listener under `key`, if any.
    pub fn off(&mut self, key: &str) {
        if let Some(slot) = Self::parse_key(key) {
            self.listeners.remove(&slot);
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        Self::parse_key(key).is_some_and(|slot| self.listeners.contains_key(&slot))
    }

    /// Call every listener for the event's kind, in tag order.
    pub fn dispatch(&mut self, event: &ContextEvent) {
        let kind = event.kind();
        for ((_, _), listener) in self
            .listeners
            .range_mut((kind, String::new())..)
            .take_while(|((k, _), _)| *k == kind)
        {
            listener(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.listeners
                    .keys()
                    .map(|(kind, tag)| format!("{kind}.{tag}")),
            )
            .finish()
    }
}
