/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Core of a map editor: an immutable entity graph with structural sharing,
//! a transactional undo/redo history that absorbs remote loads, local
//! persistence of unsaved work, and the coordinator that ties them to modes,
//! levels and a data connection.

pub mod actions;
pub mod config;
pub mod connection;
pub mod context;
pub mod graph;
pub mod history;
pub mod persistence;
mod render;

pub use config::EditorConfig;
pub use context::Context;
pub use graph::{Entity, EntityId, Graph};
pub use history::History;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
