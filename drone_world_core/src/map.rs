use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({x}, {y}) are out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    #[error("Grid dimensions ({width}, {height}) overflow the addressable cell count")]
    TooLarge { width: usize, height: usize },
}

/// A bounded 2D grid addressed by [`Position`].
///
/// Cells are stored in a flat vector using row-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a grid of the given size with every cell set to `T::default()`.
    pub fn new(width: usize, height: usize) -> Result<Self, GridError>
    where
        T: Default + Clone,
    {
        let size = width
            .checked_mul(height)
            .ok_or(GridError::TooLarge { width, height })?;
        Ok(Grid {
            width,
            height,
            cells: vec![T::default(); size],
        })
    }

    /// Creates a grid whose cells are produced by `f(position)`, visited in row-major order.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Result<Self, GridError>
    where
        F: FnMut(Position) -> T,
    {
        let size = width
            .checked_mul(height)
            .ok_or(GridError::TooLarge { width, height })?;
        let mut cells = Vec::with_capacity(size);
        for y in 0..height {
            for x in 0..width {
                cells.push(f(Position { x, y }));
            }
        }
        Ok(Grid {
            width,
            height,
            cells,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn contains(&self, pos: Position) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    #[inline]
    fn index_of(&self, pos: Position) -> Option<usize> {
        self.contains(pos).then(|| pos.y * self.width + pos.x)
    }

    pub fn get(&self, pos: Position) -> Option<&T> {
        let idx = self.index_of(pos)?;
        self.cells.get(idx)
    }

    pub fn get_mut(&mut self, pos: Position) -> Option<&mut T> {
        let idx = self.index_of(pos)?;
        self.cells.get_mut(idx)
    }

    /// Sets the value of the cell at `pos`.
    ///
    /// Returns `Err(GridError::OutOfBounds)` if the position is outside the grid.
    pub fn set(&mut self, pos: Position, value: T) -> Result<(), GridError> {
        let index = self.index_of(pos).ok_or(GridError::OutOfBounds {
            x: pos.x,
            y: pos.y,
            width: self.width,
            height: self.height,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        self.cells.fill(value);
    }

    /// Returns an iterator that yields `(position, &T)` for each cell in row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(index, cell)| {
            let pos = Position {
                x: index % width,
                y: index / width,
            };
            (pos, cell)
        })
    }

    /// Returns every in-bounds position within Chebyshev distance `radius` of `center`.
    ///
    /// The square is clamped to the grid, so cells near an edge yield fewer positions.
    /// A center outside the grid still yields the in-bounds part of its square.
    pub fn neighborhood(&self, center: Position, radius: usize) -> impl Iterator<Item = Position> {
        let x_min = center.x.saturating_sub(radius);
        let y_min = center.y.saturating_sub(radius);
        let x_max = center.x.saturating_add(radius).min(self.width.saturating_sub(1));
        let y_max = center.y.saturating_add(radius).min(self.height.saturating_sub(1));
        let empty = self.width == 0 || self.height == 0;

        (y_min..=y_max)
            .flat_map(move |y| (x_min..=x_max).map(move |x| Position { x, y }))
            .filter(move |_| !empty)
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, pos: Position) -> &Self::Output {
        match self.index_of(pos) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                pos.x, pos.y, self.width, self.height
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, pos: Position) -> &mut Self::Output {
        let (width, height) = (self.width, self.height);
        match self.index_of(pos) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                pos.x, pos.y, width, height
            ),
        }
    }
}
