//! Coarse region graph over the passability grid.
//!
//! The map is cut into square chunks. Inside each chunk the passable navcells
//! of a class are flood-filled (4-connected) into regions, and regions in
//! neighbouring chunks that touch across the chunk border are linked. The
//! connected components of that graph ("global regions") answer reachability
//! questions without running a grid search.
//!
//! 4-connectivity matches the long-range search, which never cuts corners:
//! any diagonal step it takes is also reachable through an orthogonal pair.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::goal::PathGoal;
use crate::grid::{navcell_center, Grid, NavcellData};
use crate::math::{Fixed, Vec2Fixed};
use crate::passability::{is_passable, ObstructionHandling, PassClass, PassabilityClass};

/// Side length of a chunk in navcells.
pub const CHUNK_SIZE: u16 = 96;

/// A region: one connected passable area inside one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId {
    /// Chunk column.
    pub ci: u16,
    /// Chunk row.
    pub cj: u16,
    /// Region number inside the chunk, starting at 1.
    pub r: u16,
}

/// Inclusive navcell bounds of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    i0: u16,
    j0: u16,
    i1: u16,
    j1: u16,
}

impl Bounds {
    fn single(i: u16, j: u16) -> Self {
        Self {
            i0: i,
            j0: j,
            i1: i,
            j1: j,
        }
    }

    fn include(&mut self, i: u16, j: u16) {
        self.i0 = self.i0.min(i);
        self.j0 = self.j0.min(j);
        self.i1 = self.i1.max(i);
        self.j1 = self.j1.max(j);
    }
}

#[derive(Debug, Clone, Default)]
struct Chunk {
    /// Region number per navcell of the chunk, 0 = impassable.
    regions: Grid<u16>,
    bounds: Vec<Bounds>,
}

#[derive(Debug, Clone)]
struct ClassGraph {
    mask: PassClass,
    pathfinding: bool,
    chunks: Vec<Chunk>,
    edges: BTreeMap<RegionId, BTreeSet<RegionId>>,
    global: BTreeMap<RegionId, u32>,
    components: BTreeMap<u32, Vec<RegionId>>,
}

/// Region graph for every passability class.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalPathfinder {
    width: u16,
    height: u16,
    chunks_w: u16,
    chunks_h: u16,
    graphs: BTreeMap<PassClass, ClassGraph>,
}

impl HierarchicalPathfinder {
    /// An empty graph; call [`Self::recompute`] before querying.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every class from scratch.
    pub fn recompute(&mut self, grid: &Grid<NavcellData>, classes: &[PassabilityClass]) {
        self.width = grid.width();
        self.height = grid.height();
        self.chunks_w = self.width.div_ceil(CHUNK_SIZE);
        self.chunks_h = self.height.div_ceil(CHUNK_SIZE);
        self.graphs.clear();

        for class in classes {
            let mut graph = ClassGraph {
                mask: class.mask,
                pathfinding: class.obstructions == ObstructionHandling::Pathfinding,
                chunks: Vec::with_capacity(usize::from(self.chunks_w) * usize::from(self.chunks_h)),
                edges: BTreeMap::new(),
                global: BTreeMap::new(),
                components: BTreeMap::new(),
            };
            for cj in 0..self.chunks_h {
                for ci in 0..self.chunks_w {
                    graph.chunks.push(self.build_chunk(grid, class.mask, ci, cj));
                }
            }
            self.link_graph(&mut graph, grid);
            self.graphs.insert(class.mask, graph);
        }
        tracing::debug!(
            classes = self.graphs.len(),
            chunks = usize::from(self.chunks_w) * usize::from(self.chunks_h),
            "recomputed hierarchical regions"
        );
    }

    /// Rebuild only the chunks containing a dirty navcell.
    ///
    /// Falls back to nothing when the graph was never built for this size;
    /// callers recompute on size changes.
    pub fn update(&mut self, grid: &Grid<NavcellData>, dirtiness: &Grid<bool>) {
        if grid.width() != self.width || grid.height() != self.height {
            return;
        }
        let mut dirty_chunks = BTreeSet::new();
        for j in 0..dirtiness.height().min(self.height) {
            for i in 0..dirtiness.width().min(self.width) {
                if dirtiness.get(i, j) {
                    dirty_chunks.insert((i / CHUNK_SIZE, j / CHUNK_SIZE));
                }
            }
        }
        if dirty_chunks.is_empty() {
            return;
        }

        let masks: Vec<PassClass> = self.graphs.keys().copied().collect();
        for mask in masks {
            let Some(mut graph) = self.graphs.remove(&mask) else {
                continue;
            };
            for &(ci, cj) in &dirty_chunks {
                let index = self.chunk_index(ci, cj);
                graph.chunks[index] = self.build_chunk(grid, mask, ci, cj);
            }
            self.link_graph(&mut graph, grid);
            self.graphs.insert(mask, graph);
        }
        tracing::trace!(chunks = dirty_chunks.len(), "updated hierarchical regions");
    }

    /// Class masks tracked, split into (pathfinding, non-pathfinding).
    #[must_use]
    pub fn pass_class_masks(&self) -> (PassClass, PassClass) {
        self.graphs.values().fold((0, 0), |(p, n), g| {
            if g.pathfinding {
                (p | g.mask, n)
            } else {
                (p, n | g.mask)
            }
        })
    }

    fn chunk_index(&self, ci: u16, cj: u16) -> usize {
        usize::from(cj) * usize::from(self.chunks_w) + usize::from(ci)
    }

    fn chunk_origin(ci: u16, cj: u16) -> (u16, u16) {
        (ci * CHUNK_SIZE, cj * CHUNK_SIZE)
    }

    fn build_chunk(&self, grid: &Grid<NavcellData>, mask: PassClass, ci: u16, cj: u16) -> Chunk {
        let (oi, oj) = Self::chunk_origin(ci, cj);
        let w = CHUNK_SIZE.min(self.width - oi);
        let h = CHUNK_SIZE.min(self.height - oj);
        let mut regions: Grid<u16> = Grid::new(w, h);
        let mut bounds = Vec::new();
        let mut queue = VecDeque::new();

        for lj in 0..h {
            for li in 0..w {
                if regions.get(li, lj) != 0 || !is_passable(grid.get(oi + li, oj + lj), mask) {
                    continue;
                }
                let id = bounds.len() as u16 + 1;
                let mut b = Bounds::single(oi + li, oj + lj);
                regions.set(li, lj, id);
                queue.push_back((li, lj));

                while let Some((qi, qj)) = queue.pop_front() {
                    b.include(oi + qi, oj + qj);
                    let neighbours = [
                        (i32::from(qi) + 1, i32::from(qj)),
                        (i32::from(qi) - 1, i32::from(qj)),
                        (i32::from(qi), i32::from(qj) + 1),
                        (i32::from(qi), i32::from(qj) - 1),
                    ];
                    for (ni, nj) in neighbours {
                        if regions.get_checked(ni, nj) != Some(0) {
                            continue;
                        }
                        let (ni, nj) = (ni as u16, nj as u16);
                        if is_passable(grid.get(oi + ni, oj + nj), mask) {
                            regions.set(ni, nj, id);
                            queue.push_back((ni, nj));
                        }
                    }
                }
                bounds.push(b);
            }
        }
        Chunk { regions, bounds }
    }

    fn region_in(&self, graph: &ClassGraph, i: u16, j: u16) -> Option<RegionId> {
        if i >= self.width || j >= self.height {
            return None;
        }
        let (ci, cj) = (i / CHUNK_SIZE, j / CHUNK_SIZE);
        let chunk = &graph.chunks[self.chunk_index(ci, cj)];
        let r = chunk.regions.get(i % CHUNK_SIZE, j % CHUNK_SIZE);
        (r != 0).then_some(RegionId { ci, cj, r })
    }

    fn link_graph(&self, graph: &mut ClassGraph, grid: &Grid<NavcellData>) {
        let mut pairs = Vec::new();
        for ci in 1..self.chunks_w {
            let i = ci * CHUNK_SIZE;
            for j in 0..self.height {
                pairs.push(((i - 1, j), (i, j)));
            }
        }
        for cj in 1..self.chunks_h {
            let j = cj * CHUNK_SIZE;
            for i in 0..self.width {
                pairs.push(((i, j - 1), (i, j)));
            }
        }

        let mut links = Vec::new();
        for ((ai, aj), (bi, bj)) in pairs {
            if !is_passable(grid.get(ai, aj), graph.mask) || !is_passable(grid.get(bi, bj), graph.mask) {
                continue;
            }
            if let (Some(a), Some(b)) = (self.region_in(graph, ai, aj), self.region_in(graph, bi, bj)) {
                links.push((a, b));
            }
        }
        graph.edges.clear();
        for (a, b) in links {
            graph.edges.entry(a).or_default().insert(b);
            graph.edges.entry(b).or_default().insert(a);
        }

        graph.global.clear();
        graph.components.clear();
        let mut next_component = 1u32;
        for (index, chunk) in graph.chunks.iter().enumerate() {
            let ci = (index % usize::from(self.chunks_w)) as u16;
            let cj = (index / usize::from(self.chunks_w)) as u16;
            for r in 1..=chunk.bounds.len() as u16 {
                let start = RegionId { ci, cj, r };
                if graph.global.contains_key(&start) {
                    continue;
                }
                let component = next_component;
                next_component += 1;
                let mut members = Vec::new();
                let mut queue = VecDeque::from([start]);
                graph.global.insert(start, component);
                while let Some(region) = queue.pop_front() {
                    members.push(region);
                    for &next in graph.edges.get(&region).into_iter().flatten() {
                        if !graph.global.contains_key(&next) {
                            graph.global.insert(next, component);
                            queue.push_back(next);
                        }
                    }
                }
                members.sort_unstable();
                graph.components.insert(component, members);
            }
        }
    }

    /// Region containing navcell `(i, j)` for `class`, if passable.
    #[must_use]
    pub fn get_region(&self, i: u16, j: u16, class: PassClass) -> Option<RegionId> {
        let graph = self.graphs.get(&class)?;
        self.region_in(graph, i, j)
    }

    /// Connected-component id of navcell `(i, j)`; 0 when impassable or unknown.
    #[must_use]
    pub fn get_global_region(&self, i: u16, j: u16, class: PassClass) -> u32 {
        self.graphs
            .get(&class)
            .and_then(|g| self.region_in(g, i, j).and_then(|r| g.global.get(&r).copied()))
            .unwrap_or(0)
    }

    /// Whether two navcells are mutually reachable.
    #[must_use]
    pub fn are_connected(&self, a: (u16, u16), b: (u16, u16), class: PassClass) -> bool {
        let ga = self.get_global_region(a.0, a.1, class);
        ga != 0 && ga == self.get_global_region(b.0, b.1, class)
    }

    fn cells_of<'a>(
        &self,
        graph: &'a ClassGraph,
        region: RegionId,
    ) -> impl Iterator<Item = (u16, u16)> + 'a {
        let chunk = &graph.chunks[self.chunk_index(region.ci, region.cj)];
        let b = chunk.bounds[usize::from(region.r - 1)];
        (b.j0..=b.j1).flat_map(move |j| {
            (b.i0..=b.i1).filter_map(move |i| {
                (chunk.regions.get(i % CHUNK_SIZE, j % CHUNK_SIZE) == region.r).then_some((i, j))
            })
        })
    }

    fn region_rect(graph: &ClassGraph, chunk_index: usize, r: u16) -> (Vec2Fixed, Vec2Fixed) {
        let b = graph.chunks[chunk_index].bounds[usize::from(r - 1)];
        (
            Vec2Fixed::from_ints(i32::from(b.i0), i32::from(b.j0)),
            Vec2Fixed::from_ints(i32::from(b.i1) + 1, i32::from(b.j1) + 1),
        )
    }

    fn start_component(&self, graph: &ClassGraph, i0: u16, j0: u16) -> u32 {
        let (i, j) = self.find_nearest_passable_navcell(i0, j0, graph.mask);
        self.region_in(graph, i, j)
            .and_then(|r| graph.global.get(&r).copied())
            .unwrap_or(0)
    }

    /// First navcell of the component that satisfies the goal.
    fn reachable_goal_navcell(&self, graph: &ClassGraph, component: u32, goal: &PathGoal) -> Option<(u16, u16)> {
        let regions = graph.components.get(&component)?;
        for &region in regions {
            let (min, max) = Self::region_rect(graph, self.chunk_index(region.ci, region.cj), region.r);
            if !goal.rect_contains_goal(min, max) {
                continue;
            }
            if let Some(cell) = self
                .cells_of(graph, region)
                .find(|&(i, j)| goal.navcell_contains_goal(i, j))
            {
                return Some(cell);
            }
        }
        None
    }

    /// Whether some navcell satisfying `goal` is reachable from `(i0, j0)`.
    ///
    /// An impassable start is first moved to its nearest passable navcell.
    #[must_use]
    pub fn is_goal_reachable(&self, i0: u16, j0: u16, goal: &PathGoal, class: PassClass) -> bool {
        let Some(graph) = self.graphs.get(&class) else {
            return false;
        };
        let component = self.start_component(graph, i0, j0);
        component != 0 && self.reachable_goal_navcell(graph, component, goal).is_some()
    }

    /// Replace an unreachable goal with a point goal at the reachable navcell
    /// closest to it. Returns whether the goal was changed.
    pub fn make_goal_reachable(&self, i0: u16, j0: u16, goal: &mut PathGoal, class: PassClass) -> bool {
        let Some(graph) = self.graphs.get(&class) else {
            return false;
        };
        let component = self.start_component(graph, i0, j0);
        if component == 0 || self.reachable_goal_navcell(graph, component, goal).is_some() {
            return false;
        }
        let Some(regions) = graph.components.get(&component) else {
            return false;
        };

        let mut best: Option<(Fixed, (u16, u16))> = None;
        for &region in regions {
            for (i, j) in self.cells_of(graph, region) {
                let dist = goal.distance_to_point(navcell_center(i, j));
                if best.map_or(true, |(d, cell)| dist < d || (dist == d && (j, i) < (cell.1, cell.0))) {
                    best = Some((dist, (i, j)));
                }
            }
        }
        let Some((_, (i, j))) = best else {
            return false;
        };
        let maxdist = goal.maxdist;
        *goal = PathGoal {
            maxdist,
            ..PathGoal::point(navcell_center(i, j))
        };
        true
    }

    /// Nearest navcell to `(i, j)` passable for `class`, by Euclidean
    /// distance with ties broken by scan order. Returns the input when no
    /// passable navcell exists.
    #[must_use]
    pub fn find_nearest_passable_navcell(&self, i: u16, j: u16, class: PassClass) -> (u16, u16) {
        let Some(graph) = self.graphs.get(&class) else {
            return (i, j);
        };
        if self.region_in(graph, i, j).is_some() {
            return (i, j);
        }
        let max_radius = i32::from(self.width.max(self.height));
        let (ci, cj) = (i32::from(i), i32::from(j));
        let mut best: Option<(i64, (u16, u16))> = None;

        for radius in 1..=max_radius {
            // Every cell on ring `radius` is at least `radius` away.
            if let Some((d2, _)) = best {
                if i64::from(radius) * i64::from(radius) > d2 {
                    break;
                }
            }
            for dj in -radius..=radius {
                for di in -radius..=radius {
                    if di.abs() != radius && dj.abs() != radius {
                        continue;
                    }
                    let (ni, nj) = (ci + di, cj + dj);
                    if ni < 0 || nj < 0 || ni >= i32::from(self.width) || nj >= i32::from(self.height) {
                        continue;
                    }
                    if self.region_in(graph, ni as u16, nj as u16).is_none() {
                        continue;
                    }
                    let d2 = i64::from(di * di + dj * dj);
                    if best.map_or(true, |(bd, _)| d2 < bd) {
                        best = Some((d2, (ni as u16, nj as u16)));
                    }
                }
            }
        }
        best.map_or((i, j), |(_, cell)| cell)
    }

    /// Number of regions in the graph of `class`.
    #[must_use]
    pub fn region_count(&self, class: PassClass) -> usize {
        self.graphs.get(&class).map_or(0, |g| g.global.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassabilityClassDef;
    use crate::goal::GoalKind;

    fn class() -> Vec<PassabilityClass> {
        vec![PassabilityClass::from_def(
            &PassabilityClassDef {
                name: "default".into(),
                obstructions: ObstructionHandling::Pathfinding,
                ..PassabilityClassDef::default()
            },
            0,
        )]
    }

    /// 200x200 open grid with a vertical wall at column 150 that has a gap
    /// only when `gap` is set.
    fn walled(gap: bool) -> Grid<NavcellData> {
        let mut grid = Grid::new(200, 200);
        for j in 0..200 {
            if gap && (100..103).contains(&j) {
                continue;
            }
            grid.set(150, j, 1);
        }
        grid
    }

    fn goal_at(i: i32, j: i32) -> PathGoal {
        PathGoal::point(Vec2Fixed::from_ints(i, j) + Vec2Fixed::new(Fixed::from_num(0.5), Fixed::from_num(0.5)))
    }

    #[test]
    fn test_open_map_is_one_component() {
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(&Grid::new(200, 200), &class());
        assert_eq!(hier.region_count(1), 9);
        assert!(hier.are_connected((0, 0), (199, 199), 1));
    }

    #[test]
    fn test_wall_splits_components() {
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(&walled(false), &class());
        assert!(!hier.are_connected((10, 10), (180, 10), 1));
        assert!(!hier.is_goal_reachable(10, 10, &goal_at(180, 10), 1));
        assert!(hier.is_goal_reachable(10, 10, &goal_at(140, 190), 1));
    }

    #[test]
    fn test_update_reconnects_after_gap_opens() {
        let mut hier = HierarchicalPathfinder::new();
        let grid = walled(false);
        hier.recompute(&grid, &class());

        let opened = walled(true);
        let mut dirty = Grid::new(200, 200);
        dirty.set(150, 101, true);
        hier.update(&opened, &dirty);
        assert!(hier.are_connected((10, 10), (180, 10), 1));
    }

    #[test]
    fn test_make_goal_reachable_moves_goal_to_wall() {
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(&walled(false), &class());
        let mut goal = goal_at(180, 50);
        goal.maxdist = Fixed::from_num(11);
        assert!(hier.make_goal_reachable(10, 50, &mut goal, 1));
        assert_eq!(goal.kind, GoalKind::Point);
        assert_eq!(goal.center, goal_at(149, 50).center);
        assert_eq!(goal.maxdist, Fixed::from_num(11));

        let mut reachable = goal_at(20, 20);
        assert!(!hier.make_goal_reachable(10, 50, &mut reachable, 1));
    }

    #[test]
    fn test_nearest_passable_navcell() {
        let mut grid: Grid<NavcellData> = Grid::new(20, 20);
        for j in 5..10 {
            for i in 5..10 {
                grid.set(i, j, 1);
            }
        }
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(&grid, &class());
        assert_eq!(hier.find_nearest_passable_navcell(6, 7, 1), (4, 7));
        assert_eq!(hier.find_nearest_passable_navcell(1, 1, 1), (1, 1));
    }

    #[test]
    fn test_pass_class_masks_split() {
        let defs = [
            PassabilityClassDef {
                name: "walk".into(),
                obstructions: ObstructionHandling::Pathfinding,
                ..PassabilityClassDef::default()
            },
            PassabilityClassDef {
                name: "build".into(),
                obstructions: ObstructionHandling::Foundation,
                ..PassabilityClassDef::default()
            },
        ];
        let classes: Vec<_> = defs.iter().enumerate().map(|(i, d)| PassabilityClass::from_def(d, i)).collect();
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(&Grid::new(10, 10), &classes);
        assert_eq!(hier.pass_class_masks(), (0b01, 0b10));
    }
}
