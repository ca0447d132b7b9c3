//! Terrain sampling and passability baking.
//!
//! Terrain is sampled at tile resolution (slope) and at navcell centres
//! (ground and water level). The baker turns those samples into a
//! [`Grid<NavcellData>`] with one impassable bit per class, masks the area
//! outside the playable map and finally dilates impassable cells by each
//! class's clearance.

use crate::error::{NavError, Result};
use crate::grid::{navcell_center, Grid, NavcellData, NAVCELLS_PER_TERRAIN_TILE, TERRAIN_TILE_SIZE};
use crate::math::{Fixed, Vec2Fixed};
use crate::passability::{PassClass, PassabilityClass};

/// Shore distance assigned to tiles that are far from any water.
const SHORE_FAR: u16 = 32767;

/// Source of terrain heights, water levels and slopes.
pub trait TerrainSampler: Send + Sync {
    /// Number of terrain tiles along each side of the (square) map.
    fn tiles_per_side(&self) -> u16;

    /// Ground height at a world position.
    fn ground_level(&self, pos: Vec2Fixed) -> Fixed;

    /// Water surface height at a world position.
    fn water_level(&self, pos: Vec2Fixed) -> Fixed;

    /// Slope of tile `(i, j)`.
    fn slope(&self, i: u16, j: u16) -> Fixed;

    /// Navcells along each side of the map.
    fn navcells_per_side(&self) -> u16 {
        self.tiles_per_side()
            .saturating_mul(NAVCELLS_PER_TERRAIN_TILE as u16)
    }
}

/// Heightmap terrain with vertex heights and a flat water plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightmapTerrain {
    tiles: u16,
    heights: Vec<Fixed>,
    water_level: Fixed,
}

impl HeightmapTerrain {
    /// Flat terrain at `height` with no water above it.
    #[must_use]
    pub fn flat(tiles: u16, height: Fixed) -> Self {
        let verts = usize::from(tiles) + 1;
        Self {
            tiles,
            heights: vec![height; verts * verts],
            water_level: Fixed::ZERO,
        }
    }

    /// Terrain from `(tiles + 1)²` row-major vertex heights.
    pub fn from_heights(tiles: u16, heights: Vec<Fixed>, water_level: Fixed) -> Result<Self> {
        let verts = usize::from(tiles) + 1;
        if heights.len() != verts * verts {
            return Err(NavError::InvalidState(format!(
                "heightmap for {tiles} tiles needs {} vertices, got {}",
                verts * verts,
                heights.len()
            )));
        }
        Ok(Self {
            tiles,
            heights,
            water_level,
        })
    }

    fn vertex(&self, i: u16, j: u16) -> Fixed {
        let verts = usize::from(self.tiles) + 1;
        let i = usize::from(i.min(self.tiles));
        let j = usize::from(j.min(self.tiles));
        self.heights[j * verts + i]
    }

    /// Set the height of vertex `(i, j)`.
    pub fn set_vertex_height(&mut self, i: u16, j: u16, height: Fixed) {
        let verts = usize::from(self.tiles) + 1;
        if i <= self.tiles && j <= self.tiles {
            self.heights[usize::from(j) * verts + usize::from(i)] = height;
        }
    }

    /// Set every vertex of tiles `[i0, i1) × [j0, j1)` to `height`.
    pub fn raise_tiles(&mut self, i0: u16, j0: u16, i1: u16, j1: u16, height: Fixed) {
        for j in j0..=j1.min(self.tiles) {
            for i in i0..=i1.min(self.tiles) {
                self.set_vertex_height(i, j, height);
            }
        }
    }

    /// Move the water plane.
    pub fn set_water_level(&mut self, level: Fixed) {
        self.water_level = level;
    }
}

impl TerrainSampler for HeightmapTerrain {
    fn tiles_per_side(&self) -> u16 {
        self.tiles
    }

    fn ground_level(&self, pos: Vec2Fixed) -> Fixed {
        let tile = Fixed::from_num(TERRAIN_TILE_SIZE);
        let max = Fixed::from_num(self.tiles);
        let x = (pos.x / tile).clamp(Fixed::ZERO, max);
        let z = (pos.y / tile).clamp(Fixed::ZERO, max);
        let i = x.floor().to_num::<i32>().min(i32::from(self.tiles).saturating_sub(1)).max(0) as u16;
        let j = z.floor().to_num::<i32>().min(i32::from(self.tiles).saturating_sub(1)).max(0) as u16;
        let fx = x - Fixed::from_num(i);
        let fz = z - Fixed::from_num(j);

        let h00 = self.vertex(i, j);
        let h10 = self.vertex(i + 1, j);
        let h01 = self.vertex(i, j + 1);
        let h11 = self.vertex(i + 1, j + 1);
        let top = h00 + (h10 - h00) * fx;
        let bottom = h01 + (h11 - h01) * fx;
        top + (bottom - top) * fz
    }

    fn water_level(&self, _pos: Vec2Fixed) -> Fixed {
        self.water_level
    }

    fn slope(&self, i: u16, j: u16) -> Fixed {
        let corners = [
            self.vertex(i, j),
            self.vertex(i + 1, j),
            self.vertex(i, j + 1),
            self.vertex(i + 1, j + 1),
        ];
        let (mut lo, mut hi) = (corners[0], corners[0]);
        for &h in &corners[1..] {
            lo = lo.min(h);
            hi = hi.max(h);
        }
        (hi - lo) / Fixed::from_num(TERRAIN_TILE_SIZE)
    }
}

fn tile_center(i: u16, j: u16) -> Vec2Fixed {
    let tile = Fixed::from_num(TERRAIN_TILE_SIZE);
    let half = tile / Fixed::from_num(2);
    Vec2Fixed::new(
        Fixed::from_num(i) * tile + half,
        Fixed::from_num(j) * tile + half,
    )
}

/// Per-tile distance to the nearest shore, in tiles.
///
/// Land next to water is 0 and grows by one per tile inland. Water tiles stay
/// at 0 unless `expand_on_water`, in which case distances also grow seaward.
#[must_use]
pub fn compute_shore_grid(terrain: &dyn TerrainSampler, expand_on_water: bool) -> Grid<u16> {
    let n = terrain.tiles_per_side();
    ShoreWindow::compute(terrain, expand_on_water, 0, 0, n, n).grid
}

/// Shore distances of the tiles `[ti0, ti1) x [tj0, tj1)`.
///
/// Only water inside the window is seen, so a tile's distance is exact as
/// long as it is smaller than the tile's distance to the window border.
struct ShoreWindow {
    grid: Grid<u16>,
    ti0: u16,
    tj0: u16,
}

impl ShoreWindow {
    fn compute(terrain: &dyn TerrainSampler, expand_on_water: bool, ti0: u16, tj0: u16, ti1: u16, tj1: u16) -> Self {
        let (w, h) = (ti1.saturating_sub(ti0), tj1.saturating_sub(tj0));
        let mut water: Grid<bool> = Grid::new(w, h);
        for j in 0..h {
            for i in 0..w {
                let c = tile_center(ti0 + i, tj0 + j);
                water.set(i, j, terrain.water_level(c) > terrain.ground_level(c));
            }
        }

        let mut shore: Grid<u16> = Grid::new(w, h);
        for j in 0..h {
            for i in 0..w {
                if water.get(i, j) {
                    if expand_on_water {
                        shore.set(i, j, SHORE_FAR);
                    }
                    continue;
                }
                let mut next_to_water = false;
                for dj in -1..=1 {
                    for di in -1..=1 {
                        if water.get_checked(i32::from(i) + di, i32::from(j) + dj) == Some(true) {
                            next_to_water = true;
                        }
                    }
                }
                shore.set(i, j, if next_to_water { 0 } else { SHORE_FAR });
            }
        }

        let relax = |shore: &mut Grid<u16>, i: u16, j: u16, prev: u16| {
            if expand_on_water || !water.get(i, j) {
                let cur = shore.get(i, j);
                shore.set(i, j, cur.min(prev.saturating_add(1)));
            }
        };
        for j in 0..h {
            for i in 1..w {
                let prev = shore.get(i - 1, j);
                relax(&mut shore, i, j, prev);
            }
            for i in (0..w.saturating_sub(1)).rev() {
                let prev = shore.get(i + 1, j);
                relax(&mut shore, i, j, prev);
            }
        }
        for i in 0..w {
            for j in 1..h {
                let prev = shore.get(i, j - 1);
                relax(&mut shore, i, j, prev);
            }
            for j in (0..h.saturating_sub(1)).rev() {
                let prev = shore.get(i, j + 1);
                relax(&mut shore, i, j, prev);
            }
        }

        Self { grid: shore, ti0, tj0 }
    }

    fn get(&self, ti: u16, tj: u16) -> u16 {
        self.grid
            .get_checked(i32::from(ti) - i32::from(self.ti0), i32::from(tj) - i32::from(self.tj0))
            .unwrap_or(0)
    }
}

/// Dilate the cells impassable for `mask` by `clearance` navcells in every
/// direction (a Minkowski sum with a square).
pub fn expand_impassable_cells(grid: &mut Grid<NavcellData>, clearance: u16, mask: PassClass) {
    if clearance == 0 {
        return;
    }
    let (w, h) = (grid.width(), grid.height());
    let c = i32::from(clearance);

    // Horizontal pass: a sliding count of blocked cells within the window.
    let mut horizontal: Grid<bool> = Grid::new(w, h);
    for j in 0..h {
        let blocked = |i: i32| -> i32 {
            i32::from(grid.get_checked(i, i32::from(j)).is_some_and(|d| d & mask != 0))
        };
        let mut count: i32 = (0..=c).map(blocked).sum();
        for i in 0..i32::from(w) {
            horizontal.set(i as u16, j, count > 0);
            count -= blocked(i - c);
            count += blocked(i + c + 1);
        }
    }

    for i in 0..w {
        let blocked = |j: i32| -> i32 {
            i32::from(horizontal.get_checked(i32::from(i), j) == Some(true))
        };
        let mut count: i32 = (0..=c).map(blocked).sum();
        for j in 0..i32::from(h) {
            if count > 0 {
                *grid.get_mut(i, j as u16) |= mask;
            }
            count -= blocked(j - c);
            count += blocked(j + c + 1);
        }
    }
}

/// Half-open box of navcells `[i0, i1) x [j0, j1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavcellRect {
    /// First column.
    pub i0: u16,
    /// First row.
    pub j0: u16,
    /// One past the last column.
    pub i1: u16,
    /// One past the last row.
    pub j1: u16,
}

impl NavcellRect {
    /// Whether the box holds no cell.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.i0 >= self.i1 || self.j0 >= self.j1
    }
}

/// Converts terrain samples into a per-class passability grid.
#[derive(Debug, Clone, Copy)]
pub struct TerrainPassabilityBaker<'a> {
    classes: &'a [PassabilityClass],
    map_edge_tiles: u16,
    circular: bool,
}

impl<'a> TerrainPassabilityBaker<'a> {
    /// Create a baker for the given classes and playable area.
    #[must_use]
    pub fn new(classes: &'a [PassabilityClass], map_edge_tiles: u16, circular: bool) -> Self {
        Self {
            classes,
            map_edge_tiles,
            circular,
        }
    }

    /// Bake the whole map, including the edge mask and clearance dilation.
    #[must_use]
    pub fn bake(&self, terrain: &dyn TerrainSampler) -> Grid<NavcellData> {
        let n = terrain.navcells_per_side();
        let tiles = terrain.tiles_per_side();
        let shore = ShoreWindow::compute(terrain, false, 0, 0, tiles, tiles);
        let mut grid = Grid::new(n, n);
        for j in 0..n {
            for i in 0..n {
                grid.set(i, j, self.raw_cell(terrain, &shore, i, j, n, n));
            }
        }

        for class in self.classes {
            expand_impassable_cells(&mut grid, class.clearance_in_navcells(), class.mask);
        }
        tracing::debug!(navcells = n, classes = self.classes.len(), "baked terrain passability");
        grid
    }

    /// Re-bake after tiles `[i0, i1] x [j0, j1]` changed.
    ///
    /// The tiles plus a one-tile margin are resampled and everything within
    /// the widest clearance of them is re-dilated, so the result matches a
    /// full [`Self::bake`]. Classes bounded by shore distance widen the
    /// margin by the largest bound. Returns the navcells that were rewritten.
    pub fn bake_region(
        &self,
        terrain: &dyn TerrainSampler,
        grid: &mut Grid<NavcellData>,
        i0: u16,
        j0: u16,
        i1: u16,
        j1: u16,
    ) -> NavcellRect {
        let (w, h) = (grid.width(), grid.height());
        let per_tile = NAVCELLS_PER_TERRAIN_TILE;
        let tiles = i32::from(terrain.tiles_per_side());
        let clearance = self
            .classes
            .iter()
            .map(PassabilityClass::clearance_in_navcells)
            .max()
            .map_or(0, i32::from);

        // Water edits move shore distances up to the largest bound plus the
        // tile next to the water.
        let shore_tiles = self
            .classes
            .iter()
            .filter_map(PassabilityClass::shore_reach)
            .max()
            .map_or(0, |reach| {
                (reach / Fixed::from_num(per_tile))
                    .ceil()
                    .to_num::<i64>()
                    .clamp(0, i64::from(tiles)) as i32
                    + 1
            });

        let margin = 1 + shore_tiles;
        let changed = [
            (i32::from(i0) - margin) * per_tile,
            (i32::from(j0) - margin) * per_tile,
            (i32::from(i1) + 1 + margin) * per_tile,
            (i32::from(j1) + 1 + margin) * per_tile,
        ];
        let grow = |by: i32| NavcellRect {
            i0: (changed[0] - by).clamp(0, i32::from(w)) as u16,
            j0: (changed[1] - by).clamp(0, i32::from(h)) as u16,
            i1: (changed[2] + by).clamp(0, i32::from(w)) as u16,
            j1: (changed[3] + by).clamp(0, i32::from(h)) as u16,
        };
        // Cells whose dilated value can change, and the raw cells that feed them.
        let out = grow(clearance);
        let src = grow(clearance * 2);
        if out.is_empty() {
            return out;
        }

        let to_tile = |cell: u16, upper: bool| -> u16 {
            let cell = i32::from(cell);
            let t = if upper {
                (cell + per_tile - 1) / per_tile + shore_tiles
            } else {
                cell / per_tile - shore_tiles
            };
            t.clamp(0, tiles) as u16
        };
        let shore = ShoreWindow::compute(
            terrain,
            false,
            to_tile(src.i0, false),
            to_tile(src.j0, false),
            to_tile(src.i1, true),
            to_tile(src.j1, true),
        );

        let mut local: Grid<NavcellData> = Grid::new(src.i1 - src.i0, src.j1 - src.j0);
        for j in src.j0..src.j1 {
            for i in src.i0..src.i1 {
                local.set(i - src.i0, j - src.j0, self.raw_cell(terrain, &shore, i, j, w, h));
            }
        }
        for class in self.classes {
            expand_impassable_cells(&mut local, class.clearance_in_navcells(), class.mask);
        }
        for j in out.j0..out.j1 {
            for i in out.i0..out.i1 {
                grid.set(i, j, local.get(i - src.i0, j - src.j0));
            }
        }

        tracing::trace!(i0 = out.i0, j0 = out.j0, i1 = out.i1, j1 = out.j1, "re-baked terrain region");
        out
    }

    /// Undilated passability of navcell `(i, j)` on a `w` x `h` grid.
    fn raw_cell(&self, terrain: &dyn TerrainSampler, shore: &ShoreWindow, i: u16, j: u16, w: u16, h: u16) -> NavcellData {
        if self.is_off_world(i32::from(i), i32::from(j), i32::from(w), i32::from(h)) {
            return self.classes.iter().fold(0, |m, c| m | c.mask);
        }

        let per_tile = NAVCELLS_PER_TERRAIN_TILE as u16;
        let center = navcell_center(i, j);
        let (ti, tj) = (i / per_tile, j / per_tile);
        let depth = terrain.water_level(center) - terrain.ground_level(center);
        let slope = terrain.slope(ti, tj);
        let shore_dist = Fixed::from_num(shore.get(ti, tj)).saturating_mul(Fixed::from_num(NAVCELLS_PER_TERRAIN_TILE));

        let mut data: NavcellData = 0;
        for class in self.classes {
            if !class.is_passable(depth, slope, shore_dist) {
                data |= class.mask;
            }
        }
        data
    }

    fn is_off_world(&self, i: i32, j: i32, w: i32, h: i32) -> bool {
        let edge = i32::from(self.map_edge_tiles) * NAVCELLS_PER_TERRAIN_TILE;
        if self.circular {
            let limit = i64::from(w - 2 * edge) * i64::from(h - 2 * edge);
            let di = i64::from(2 * i + 1 - w);
            let dj = i64::from(2 * j + 1 - h);
            return di * di + dj * dj >= limit;
        }
        i < edge || i > w - edge || j < edge || j > h - edge
    }
}
