use serde::{Deserialize, Serialize};

pub mod map;
pub mod overlay;
pub mod playback;
pub mod protocol;
pub mod stats;
pub mod world;

/// Unique identifier for drones within an episode.
pub type EntityId = u32;

/// Represents a 2D grid coordinate.
///
/// On the wire a position is a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl From<[usize; 2]> for Position {
    fn from([x, y]: [usize; 2]) -> Self {
        Position { x, y }
    }
}

impl From<Position> for [usize; 2] {
    fn from(pos: Position) -> Self {
        [pos.x, pos.y]
    }
}
