//! Per-cell visitation and threat marks.
//!
//! Each cell moves through `Unvisited -> VisitedSafe -> VisitedThreat`.
//! `VisitedThreat` is absorbing, so any sequence of observe/threat
//! notifications for a cell ends in the same mark no matter the order or
//! how often each one repeats: threat if a threat was ever reported,
//! safe if only observations were.

use serde::{Deserialize, Serialize};

use crate::{
    Position,
    map::{Grid, GridError},
};

/// Overlay state of a single cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellMark {
    #[default]
    Unvisited,
    VisitedSafe,
    VisitedThreat,
}

/// A visual marker change produced by a transition.
///
/// The overlay never draws anything itself; a view binds these changes to
/// whatever representation it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerChange {
    PlaceSafe,
    PlaceThreat,
    /// The existing safe marker is removed and a threat marker takes its place.
    ReplaceSafeWithThreat,
}

/// Tracks the [`CellMark`] of every cell in the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    marks: Grid<CellMark>,
    visited: usize,
    threats: usize,
}

impl Overlay {
    pub fn new(width: usize, height: usize) -> Result<Self, GridError> {
        Ok(Overlay {
            marks: Grid::new(width, height)?,
            visited: 0,
            threats: 0,
        })
    }

    pub fn mark(&self, pos: Position) -> Option<CellMark> {
        self.marks.get(pos).copied()
    }

    pub fn marks(&self) -> &Grid<CellMark> {
        &self.marks
    }

    /// Number of distinct cells that have ever left `Unvisited`.
    pub fn visited_count(&self) -> usize {
        self.visited
    }

    pub fn threat_count(&self) -> usize {
        self.threats
    }

    /// Returns every cell to `Unvisited`.
    pub fn clear(&mut self) {
        self.marks.fill(CellMark::Unvisited);
        self.visited = 0;
        self.threats = 0;
    }

    /// Records that `pos` was observed and found safe.
    ///
    /// Only an unvisited cell changes; safe and threat cells keep their mark.
    /// Out-of-bounds positions are ignored.
    pub fn observe(&mut self, pos: Position) -> Option<MarkerChange> {
        let cell = self.marks.get_mut(pos)?;
        match *cell {
            CellMark::Unvisited => {
                *cell = CellMark::VisitedSafe;
                self.visited += 1;
                Some(MarkerChange::PlaceSafe)
            }
            CellMark::VisitedSafe | CellMark::VisitedThreat => None,
        }
    }

    /// Records that `pos` holds a threat.
    ///
    /// Out-of-bounds positions are ignored.
    pub fn mark_threat(&mut self, pos: Position) -> Option<MarkerChange> {
        let cell = self.marks.get_mut(pos)?;
        let change = match *cell {
            CellMark::Unvisited => {
                self.visited += 1;
                MarkerChange::PlaceThreat
            }
            CellMark::VisitedSafe => MarkerChange::ReplaceSafeWithThreat,
            CellMark::VisitedThreat => return None,
        };
        *cell = CellMark::VisitedThreat;
        self.threats += 1;
        Some(change)
    }
}
