/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Read-side support for the rendering layer.
//!
//! The surface itself lives outside this crate; what it needs from the core
//! is a fast "entities in this viewport" query over the current graph.

mod spatial_index;

pub(crate) use spatial_index::EntityTree;
