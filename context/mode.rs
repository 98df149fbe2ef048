/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Interaction modes.
//!
//! Exactly one mode is active at a time. The coordinator calls `exit` on
//! the old mode before `enter` on the new one; the concrete gesture handling
//! lives with the host.

use log::debug;

use crate::graph::EntityId;

pub const BROWSE: &str = "browse";
pub const SELECT: &str = "select";
pub const SAVE: &str = "save";

pub trait Mode {
    fn id(&self) -> &str;

    fn enter(&mut self) {}

    fn exit(&mut self) {}

    /// Entities this mode operates on, if it has a selection at all.
    fn selected_ids(&self) -> Option<&[EntityId]> {
        None
    }
}

/// Neutral mode: pan, zoom, nothing selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowseMode;

impl Mode for BrowseMode {
    fn id(&self) -> &str {
        BROWSE
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectMode {
    ids: Vec<EntityId>,
    active: bool,
}

impl SelectMode {
    pub fn new(ids: Vec<EntityId>) -> Self {
        Self { ids, active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Mode for SelectMode {
    fn id(&self) -> &str {
        SELECT
    }

    fn enter(&mut self) {
        debug!("Selecting {} entities", self.ids.len());
        self.active = true;
    }

    fn exit(&mut self) {
        self.active = false;
    }

    fn selected_ids(&self) -> Option<&[EntityId]> {
        Some(&self.ids)
    }
}

/// Upload in progress; autosave is suspended while active.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveMode;

impl Mode for SaveMode {
    fn id(&self) -> &str {
        SAVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mode_tracks_activity() {
        let mut mode = SelectMode::new(vec![EntityId::node(1)]);
        assert_eq!(mode.id(), SELECT);
        mode.enter();
        assert!(mode.is_active());
        assert_eq!(mode.selected_ids(), Some(&[EntityId::node(1)][..]));
        mode.exit();
        assert!(!mode.is_active());
    }

    #[test]
    fn test_browse_has_no_selection() {
        assert!(BrowseMode.selected_ids().is_none());
    }
}
