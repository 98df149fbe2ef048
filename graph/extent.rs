/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Geographic bounding boxes.

use euclid::default::Box2D;
use serde::{Deserialize, Serialize};

use super::entity::Loc;

/// Axis-aligned bounding region in lon/lat space.
///
/// Unlike `Box2D::intersects`, comparisons here are inclusive so that a
/// point lying exactly on an edge (or a zero-size extent of a single node)
/// counts as intersecting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min: Loc,
    pub max: Loc,
}

impl Extent {
    /// Build from two corners in any order.
    pub fn new(a: Loc, b: Loc) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_point(loc: Loc) -> Self {
        Self { min: loc, max: loc }
    }

    /// Smallest extent covering all `locs`, or `None` when empty.
    pub fn from_points(locs: impl IntoIterator<Item = Loc>) -> Option<Self> {
        locs.into_iter()
            .map(Self::from_point)
            .reduce(|acc, next| acc.union(&next))
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, loc: Loc) -> bool {
        loc.x >= self.min.x && loc.x <= self.max.x && loc.y >= self.min.y && loc.y <= self.max.y
    }

    pub fn center(&self) -> Loc {
        self.to_box2d().center()
    }

    /// Grow by `amount` on every side.
    pub fn padded(&self, amount: f64) -> Extent {
        self.to_box2d().inflate(amount, amount).into()
    }

    pub fn to_box2d(&self) -> Box2D<f64> {
        Box2D::new(self.min, self.max)
    }
}

impl From<Box2D<f64>> for Extent {
    fn from(b: Box2D<f64>) -> Self {
        Extent::new(b.min, b.max)
    }
}
