//! Passability classes.
//!
//! A class names a kind of mover ("default", "large", "ship") and owns one
//! bit of every navcell. Terrain decides the bit through [`PassabilityClass::is_passable`],
//! obstructions decide it according to [`ObstructionHandling`].

use serde::{Deserialize, Serialize};

use crate::config::PassabilityClassDef;
use crate::grid::{nearest_navcell, Grid, NavcellData, NAVCELL_SIZE};
use crate::math::{Fixed, Vec2Fixed};

/// Bitmask selecting one or more passability classes.
pub type PassClass = NavcellData;

/// How obstructions are rasterized for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstructionHandling {
    /// Only terrain matters (used for e.g. territory or vision classes).
    None,
    /// Shapes flagged as blocking pathfinding are drawn with class clearance.
    #[default]
    Pathfinding,
    /// Shapes flagged as blocking foundations are drawn without clearance.
    Foundation,
}

/// A resolved passability class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassabilityClass {
    /// Human readable name.
    pub name: String,
    /// Single-bit mask of this class.
    pub mask: PassClass,
    /// Radius of free space a mover of this class needs.
    pub clearance: Fixed,
    /// Obstruction rasterization mode.
    pub obstructions: ObstructionHandling,
    min_depth: Fixed,
    max_depth: Fixed,
    max_slope: Fixed,
    min_shore: Fixed,
    max_shore: Fixed,
}

impl PassabilityClass {
    /// Build the class occupying bit `index`.
    #[must_use]
    pub fn from_def(def: &PassabilityClassDef, index: usize) -> Self {
        Self {
            name: def.name.clone(),
            mask: 1 << index,
            clearance: def.clearance,
            obstructions: def.obstructions,
            min_depth: def.min_water_depth.unwrap_or(Fixed::MIN),
            max_depth: def.max_water_depth.unwrap_or(Fixed::MAX),
            max_slope: def.max_terrain_slope.unwrap_or(Fixed::MAX),
            min_shore: def.min_shore_distance.unwrap_or(Fixed::MIN),
            max_shore: def.max_shore_distance.unwrap_or(Fixed::MAX),
        }
    }

    /// Whether terrain with these properties is passable.
    ///
    /// Depth and shore bounds are inclusive, the slope bound is strict.
    #[must_use]
    pub fn is_passable(&self, water_depth: Fixed, slope: Fixed, shore_distance: Fixed) -> bool {
        (self.min_depth <= water_depth && water_depth <= self.max_depth)
            && slope < self.max_slope
            && (self.min_shore <= shore_distance && shore_distance <= self.max_shore)
    }

    /// Largest finite shore-distance bound, or `None` when shore distance
    /// does not matter to this class.
    #[must_use]
    pub fn shore_reach(&self) -> Option<Fixed> {
        let bounds = [
            (self.min_shore != Fixed::MIN).then_some(self.min_shore),
            (self.max_shore != Fixed::MAX).then_some(self.max_shore),
        ];
        bounds.into_iter().flatten().max().map(|b| b.max(Fixed::ZERO))
    }

    /// Clearance rounded up to whole navcells, used for grid dilation.
    #[must_use]
    pub fn clearance_in_navcells(&self) -> u16 {
        self.clearance.ceil().to_num::<i32>().clamp(0, i32::from(u16::MAX)) as u16
    }
}

/// Whether a navcell is passable for every class in `class`.
#[inline]
#[must_use]
pub fn is_passable(data: NavcellData, class: PassClass) -> bool {
    data & class == 0
}

/// Whether a unit of `class` can walk the straight segment `a -> b` on the grid.
///
/// Steps through every navcell the segment touches. Starting on impassable
/// cells is tolerated until the segment first reaches a passable one, so a
/// unit that was pushed into an obstruction can still walk out of it.
#[must_use]
pub fn check_line_movement(
    a: Vec2Fixed,
    b: Vec2Fixed,
    class: PassClass,
    grid: &Grid<NavcellData>,
) -> bool {
    let (w, h) = (grid.width(), grid.height());
    if w == 0 || h == 0 {
        return false;
    }
    let (i0, j0) = nearest_navcell(a, w, h);
    let (i1, j1) = nearest_navcell(b, w, h);
    let di: i32 = (i32::from(i1) - i32::from(i0)).signum();
    let dj: i32 = (i32::from(j1) - i32::from(j0)).signum();
    let perp = (b - a).perpendicular();

    let (mut i, mut j) = (i32::from(i0), i32::from(j0));
    let mut on_impassable = !is_passable(grid.get(i0, j0), class);
    loop {
        if is_passable(grid.get(i as u16, j as u16), class) {
            on_impassable = false;
        } else if !on_impassable {
            return false;
        }

        if i == i32::from(i1) && j == i32::from(j1) {
            return true;
        }
        if di == 0 || i == i32::from(i1) {
            j += dj;
            continue;
        }
        if dj == 0 || j == i32::from(j1) {
            i += di;
            continue;
        }

        // Decide between the horizontal and vertical neighbour by which side
        // of the segment the shared cell edge lies on.
        let xa = Fixed::from_num(i) * NAVCELL_SIZE;
        let xb = Fixed::from_num(i + 1) * NAVCELL_SIZE;
        let zj = Fixed::from_num(j + (dj + 1) / 2) * NAVCELL_SIZE;
        let dota = (Vec2Fixed::new(xa, zj) - a).dot(perp);
        let dotb = (Vec2Fixed::new(xb, zj) - a).dot(perp);
        if (dota < Fixed::ZERO && dotb < Fixed::ZERO) || (dota > Fixed::ZERO && dotb > Fixed::ZERO) {
            i += di;
        } else {
            j += dj;
        }
    }
}
