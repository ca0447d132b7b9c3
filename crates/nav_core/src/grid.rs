//! Dense navcell grids.
//!
//! The passability grid stores one [`NavcellData`] bitmask per navcell, one
//! bit per passability class. A set bit means "impassable for that class".

use serde::{Deserialize, Serialize};

use crate::math::{Fixed, Vec2Fixed};

/// Per-navcell passability bitmask. Bit `n` set = impassable for class `n`.
pub type NavcellData = u16;

/// Number of passability classes a navcell can describe.
pub const MAX_PASS_CLASSES: usize = NavcellData::BITS as usize;

/// Side length of a navcell in world units.
pub const NAVCELL_SIZE_INT: i32 = 1;
/// Side length of a navcell as a fixed-point value.
pub const NAVCELL_SIZE: Fixed = Fixed::from_bits(1 << 32);
/// Side length of a terrain tile in world units.
pub const TERRAIN_TILE_SIZE: i32 = 4;
/// Navcells along one side of a terrain tile.
pub const NAVCELLS_PER_TERRAIN_TILE: i32 = TERRAIN_TILE_SIZE / NAVCELL_SIZE_INT;

/// Row-major 2D array addressed by `(i, j)` = `(column, row)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Grid<T> {
    width: u16,
    height: u16,
    data: Vec<T>,
}

impl<T: Copy + Default> Grid<T> {
    /// Create a grid filled with `T::default()`.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); usize::from(width) * usize::from(height)],
        }
    }

    /// Grid width in cells.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    #[inline]
    fn index(&self, i: u16, j: u16) -> usize {
        debug_assert!(i < self.width && j < self.height, "cell ({i}, {j}) out of bounds");
        usize::from(j) * usize::from(self.width) + usize::from(i)
    }

    /// Read a cell.
    #[inline]
    #[must_use]
    pub fn get(&self, i: u16, j: u16) -> T {
        self.data[self.index(i, j)]
    }

    /// Read a cell given signed coordinates, returning `None` outside the grid.
    #[must_use]
    pub fn get_checked(&self, i: i32, j: i32) -> Option<T> {
        if i < 0 || j < 0 || i >= i32::from(self.width) || j >= i32::from(self.height) {
            return None;
        }
        Some(self.get(i as u16, j as u16))
    }

    /// Write a cell.
    #[inline]
    pub fn set(&mut self, i: u16, j: u16, value: T) {
        let idx = self.index(i, j);
        self.data[idx] = value;
    }

    /// Mutable access to a cell.
    #[inline]
    pub fn get_mut(&mut self, i: u16, j: u16) -> &mut T {
        let idx = self.index(i, j);
        &mut self.data[idx]
    }

    /// Reset every cell to `T::default()`.
    pub fn reset(&mut self) {
        self.data.fill(T::default());
    }

    /// Raw row-major cell data.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Copy + Default + PartialEq> Grid<T> {
    /// Whether any cell differs from `T::default()`.
    #[must_use]
    pub fn any_set(&self) -> bool {
        let zero = T::default();
        self.data.iter().any(|&v| v != zero)
    }
}

impl Grid<bool> {
    /// Set every cell that is set in `other`.
    pub fn union_with(&mut self, other: &Self) {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a |= b;
        }
    }
}

/// Summary of which navcells changed since the last consumer pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridUpdateInformation {
    /// Something changed.
    pub dirty: bool,
    /// So much changed that consumers should rebuild everything.
    pub globally_dirty: bool,
    /// Per-navcell dirty flags, meaningful when `dirty && !globally_dirty`.
    pub dirtiness_grid: Grid<bool>,
}

impl GridUpdateInformation {
    /// Fold `other` into `self` and reset `other`.
    pub fn merge_and_clear(&mut self, other: &mut Self) {
        let was_dirty = self.dirty;
        self.dirty |= other.dirty;
        self.globally_dirty |= other.globally_dirty;

        if !was_dirty {
            std::mem::swap(&mut self.dirtiness_grid, &mut other.dirtiness_grid);
        } else if self.dirty && !self.globally_dirty {
            self.dirtiness_grid.union_with(&other.dirtiness_grid);
        }

        other.clean();
    }

    /// Mark everything clean without reallocating.
    pub fn clean(&mut self) {
        self.dirty = false;
        self.globally_dirty = false;
        self.dirtiness_grid.reset();
    }
}

/// Navcell containing the point, clamped to the grid.
#[must_use]
pub fn nearest_navcell(pos: Vec2Fixed, width: u16, height: u16) -> (u16, u16) {
    let clamp = |v: Fixed, max: u16| -> u16 {
        let cell = (v / NAVCELL_SIZE).floor().to_num::<i32>();
        cell.clamp(0, i32::from(max.saturating_sub(1))) as u16
    };
    (clamp(pos.x, width), clamp(pos.y, height))
}

/// World-space centre of a navcell.
#[must_use]
pub fn navcell_center(i: u16, j: u16) -> Vec2Fixed {
    let half = NAVCELL_SIZE / Fixed::from_num(2);
    Vec2Fixed::new(
        Fixed::from_num(i) * NAVCELL_SIZE + half,
        Fixed::from_num(j) * NAVCELL_SIZE + half,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_get_set_reset() {
        let mut grid: Grid<NavcellData> = Grid::new(4, 3);
        grid.set(3, 2, 0b101);
        assert_eq!(grid.get(3, 2), 0b101);
        assert!(grid.any_set());
        grid.reset();
        assert!(!grid.any_set());
    }

    #[test]
    fn test_get_checked_bounds() {
        let grid: Grid<u8> = Grid::new(2, 2);
        assert_eq!(grid.get_checked(1, 1), Some(0));
        assert_eq!(grid.get_checked(-1, 0), None);
        assert_eq!(grid.get_checked(0, 2), None);
    }

    #[test]
    fn test_nearest_navcell_clamps() {
        let pos = Vec2Fixed::new(Fixed::from_num(-3), Fixed::from_num(100));
        assert_eq!(nearest_navcell(pos, 10, 10), (0, 9));
        let pos = Vec2Fixed::new(Fixed::from_num(4.5), Fixed::from_num(2.99));
        assert_eq!(nearest_navcell(pos, 10, 10), (4, 2));
    }

    #[test]
    fn test_merge_and_clear_swaps_when_clean() {
        let mut dst = GridUpdateInformation {
            dirtiness_grid: Grid::new(4, 4),
            ..Default::default()
        };
        let mut src = GridUpdateInformation {
            dirty: true,
            globally_dirty: false,
            dirtiness_grid: Grid::new(4, 4),
        };
        src.dirtiness_grid.set(1, 1, true);

        dst.merge_and_clear(&mut src);

        assert!(dst.dirty);
        assert!(dst.dirtiness_grid.get(1, 1));
        assert!(!src.dirty);
        assert!(!src.dirtiness_grid.any_set());
    }

    #[test]
    fn test_merge_and_clear_unions_when_dirty() {
        let mut dst = GridUpdateInformation {
            dirty: true,
            globally_dirty: false,
            dirtiness_grid: Grid::new(4, 4),
        };
        dst.dirtiness_grid.set(0, 0, true);
        let mut src = GridUpdateInformation {
            dirty: true,
            globally_dirty: false,
            dirtiness_grid: Grid::new(4, 4),
        };
        src.dirtiness_grid.set(3, 3, true);

        dst.merge_and_clear(&mut src);

        assert!(dst.dirtiness_grid.get(0, 0));
        assert!(dst.dirtiness_grid.get(3, 3));
    }
}
