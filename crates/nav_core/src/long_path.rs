//! Long-range grid search.
//!
//! An 8-directional A* over navcells with an octile heuristic and no corner
//! cutting. Reachability is decided up front by the hierarchical graph, so
//! an unreachable goal costs a region walk instead of a full grid flood.
//! The raw navcell chain is then straightened into widely spaced waypoints.
//!
//! All costs are integers and the open set breaks ties on `(f, h, index)`,
//! which makes the result independent of heap implementation details.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::goal::{GoalKind, PathGoal, WaypointPath};
use crate::grid::{navcell_center, nearest_navcell, Grid, NavcellData, NAVCELL_SIZE};
use crate::hierarchical::HierarchicalPathfinder;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::passability::{check_line_movement, is_passable, PassClass};

/// Cost of an orthogonal step.
const COST_STRAIGHT: u64 = 65_536;
/// Cost of a diagonal step, sqrt(2) * [`COST_STRAIGHT`].
const COST_DIAGONAL: u64 = 92_682;

/// Cross products below this count as collinear when straightening.
const STRAIGHT_TOLERANCE: Fixed = Fixed::from_bits(100 << 16);

/// A disc the search must avoid, on top of the grid's own obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularRegion {
    /// Centre of the disc.
    pub center: Vec2Fixed,
    /// Radius of the disc.
    #[serde(with = "fixed_serde")]
    pub radius: Fixed,
}

impl CircularRegion {
    /// Whether navcell `(i, j)`'s lower corner lies inside the disc.
    fn covers(&self, i: u16, j: u16) -> bool {
        let corner = Vec2Fixed::new(
            Fixed::from_num(i) * NAVCELL_SIZE,
            Fixed::from_num(j) * NAVCELL_SIZE,
        );
        (corner - self.center).compare_length(self.radius).is_le()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    f: u64,
    h: u64,
    g: u64,
    index: u32,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (f, h, index).
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn octile(i: u16, j: u16, gi: u16, gj: u16) -> u64 {
    let di = u64::from(i.abs_diff(gi));
    let dj = u64::from(j.abs_diff(gj));
    let diag = di.min(dj);
    (di + dj - 2 * diag) * COST_STRAIGHT + diag * COST_DIAGONAL
}

/// Read-only view used to compute long paths.
///
/// Holds only shared references, so one view can serve many worker threads.
#[derive(Debug, Clone, Copy)]
pub struct LongPathfinder<'a> {
    grid: &'a Grid<NavcellData>,
    hier: &'a HierarchicalPathfinder,
}

impl<'a> LongPathfinder<'a> {
    /// Create a view over a grid and its region graph.
    #[must_use]
    pub fn new(grid: &'a Grid<NavcellData>, hier: &'a HierarchicalPathfinder) -> Self {
        Self { grid, hier }
    }

    /// Compute a path from `start` to `goal`.
    ///
    /// Returns an empty path when the goal is unreachable for `class`.
    #[must_use]
    pub fn compute_path(&self, start: Vec2Fixed, goal: &PathGoal, class: PassClass) -> WaypointPath {
        let (w, h) = (self.grid.width(), self.grid.height());
        if w == 0 || h == 0 {
            return WaypointPath::default();
        }
        let (si, sj) = nearest_navcell(start, w, h);
        if !self.hier.is_goal_reachable(si, sj, goal, class) {
            tracing::trace!(?start, kind = ?goal.kind, "long path goal unreachable");
            return WaypointPath::default();
        }
        let (i0, j0) = self.hier.find_nearest_passable_navcell(si, sj, class);
        let passable = |i: u16, j: u16| is_passable(self.grid.get(i, j), class);
        let mut path = search(w, h, &passable, i0, j0, start, goal);
        improve_path_waypoints(&mut path, self.grid, class, goal.maxdist, start);
        path
    }

    /// Compute a path that additionally treats every navcell inside
    /// `excluded` as impassable.
    ///
    /// The region graph does not know about the exclusions, so an
    /// unreachable goal yields the path to the closest explored navcell.
    #[must_use]
    pub fn compute_path_excluding(
        &self,
        start: Vec2Fixed,
        goal: &PathGoal,
        class: PassClass,
        excluded: &[CircularRegion],
    ) -> WaypointPath {
        let (w, h) = (self.grid.width(), self.grid.height());
        if w == 0 || h == 0 {
            return WaypointPath::default();
        }
        let mut special: Grid<NavcellData> = Grid::new(w, h);
        for j in 0..h {
            for i in 0..w {
                let blocked = !is_passable(self.grid.get(i, j), class)
                    || excluded.iter().any(|region| region.covers(i, j));
                special.set(i, j, NavcellData::from(blocked));
            }
        }
        let (i0, j0) = nearest_navcell(start, w, h);
        let passable = |i: u16, j: u16| special.get(i, j) == 0;
        let mut path = search(w, h, &passable, i0, j0, start, goal);
        improve_path_waypoints(&mut path, &special, 1, goal.maxdist, start);
        path
    }
}

/// A* from navcell `(i0, j0)` until a navcell satisfying `goal` is closed.
///
/// When the goal is never reached the path leads to the explored navcell with
/// the lowest heuristic; when that is the start itself the path is empty.
fn search(
    w: u16,
    h: u16,
    passable: &dyn Fn(u16, u16) -> bool,
    i0: u16,
    j0: u16,
    start: Vec2Fixed,
    goal: &PathGoal,
) -> WaypointPath {
    if goal.navcell_contains_goal(i0, j0) {
        let target = if goal.kind == GoalKind::Point {
            goal.center
        } else {
            goal.nearest_point_on_goal(start)
        };
        return WaypointPath::new(vec![target]);
    }

    let (gi, gj) = nearest_navcell(goal.nearest_point_on_goal(start), w, h);
    let width = usize::from(w);
    let cells = width * usize::from(h);
    let index = |i: u16, j: u16| usize::from(j) * width + usize::from(i);
    let coords = |idx: usize| ((idx % width) as u16, (idx / width) as u16);

    let mut cost = vec![u64::MAX; cells];
    let mut pred = vec![u32::MAX; cells];
    let mut closed = vec![false; cells];
    let mut open = BinaryHeap::new();

    let start_idx = index(i0, j0);
    let start_h = octile(i0, j0, gi, gj);
    cost[start_idx] = 0;
    open.push(OpenNode {
        f: start_h,
        h: start_h,
        g: 0,
        index: start_idx as u32,
    });
    let (mut best, mut best_h) = (start_idx, start_h);
    let mut reached = false;

    let step = |i: u16, j: u16, di: i32, dj: i32| -> Option<(u16, u16)> {
        let ni = i32::from(i) + di;
        let nj = i32::from(j) + dj;
        if ni < 0 || nj < 0 || ni >= i32::from(w) || nj >= i32::from(h) {
            return None;
        }
        let (ni, nj) = (ni as u16, nj as u16);
        passable(ni, nj).then_some((ni, nj))
    };

    while let Some(node) = open.pop() {
        let idx = node.index as usize;
        if closed[idx] || node.g != cost[idx] {
            continue;
        }
        closed[idx] = true;
        let (i, j) = coords(idx);
        if goal.navcell_contains_goal(i, j) {
            best = idx;
            reached = true;
            break;
        }

        let left = step(i, j, -1, 0).is_some();
        let right = step(i, j, 1, 0).is_some();
        let down = step(i, j, 0, -1).is_some();
        let up = step(i, j, 0, 1).is_some();
        let moves = [
            (-1, -1, left && down),
            (1, -1, right && down),
            (-1, 1, left && up),
            (1, 1, right && up),
            (-1, 0, left),
            (1, 0, right),
            (0, -1, down),
            (0, 1, up),
        ];
        for (di, dj, allowed) in moves {
            if !allowed {
                continue;
            }
            let Some((ni, nj)) = step(i, j, di, dj) else {
                continue;
            };
            let nidx = index(ni, nj);
            if closed[nidx] {
                continue;
            }
            let dg = if di != 0 && dj != 0 { COST_DIAGONAL } else { COST_STRAIGHT };
            let g = node.g + dg;
            let nh = octile(ni, nj, gi, gj);
            if cost[nidx] == u64::MAX && nh < best_h {
                best_h = nh;
                best = nidx;
            }
            if g >= cost[nidx] {
                continue;
            }
            cost[nidx] = g;
            pred[nidx] = idx as u32;
            open.push(OpenNode {
                f: g + nh,
                h: nh,
                g,
                index: nidx as u32,
            });
        }
    }

    let mut waypoints = Vec::new();
    let mut cur = best;
    while cur != start_idx {
        let (i, j) = coords(cur);
        waypoints.push(navcell_center(i, j));
        cur = pred[cur] as usize;
    }
    if reached && goal.kind == GoalKind::Point {
        if let Some(first) = waypoints.first_mut() {
            *first = goal.center;
        }
    }
    WaypointPath::new(waypoints)
}

/// Straighten a navcell chain into sparse waypoints.
///
/// Keeps a waypoint only where the straight line from the previous kept one
/// to the following one is blocked, and never leaves more than `maxdist`
/// between consecutive waypoints (zero disables the limit).
pub fn improve_path_waypoints(
    path: &mut WaypointPath,
    grid: &Grid<NavcellData>,
    class: PassClass,
    maxdist: Fixed,
    start: Vec2Fixed,
) {
    let Some(first) = path.next() else {
        return;
    };
    if maxdist > Fixed::ZERO {
        let offset = first - start;
        if offset.compare_length(maxdist).is_gt() {
            path.push(start + offset.normalize_to(maxdist));
        }
    }
    let waypoints = &path.waypoints;
    if waypoints.len() < 2 {
        return;
    }

    let mut improved = Vec::with_capacity(waypoints.len());
    let mut prev = waypoints[0];
    improved.push(prev);
    for k in 1..waypoints.len() - 1 {
        let ahead = waypoints[k + 1];
        let curr = waypoints[k];

        if maxdist > Fixed::ZERO && (curr - prev).compare_length(maxdist).is_gt() {
            prev = prev + (curr - prev) / Fixed::from_num(2);
            improved.push(prev);
        }
        if (ahead - curr).perpendicular().dot(curr - prev).abs() <= STRAIGHT_TOLERANCE {
            continue;
        }
        if !check_line_movement(prev, ahead, class, grid) {
            prev = curr;
            improved.push(curr);
        }
    }
    improved.push(waypoints[waypoints.len() - 1]);
    path.waypoints = improved;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassabilityClassDef;
    use crate::passability::{ObstructionHandling, PassabilityClass};

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    fn p(x: f64, y: f64) -> Vec2Fixed {
        Vec2Fixed::new(fx(x), fx(y))
    }

    fn setup(grid: &Grid<NavcellData>) -> HierarchicalPathfinder {
        let class = PassabilityClass::from_def(
            &PassabilityClassDef {
                name: "default".into(),
                obstructions: ObstructionHandling::Pathfinding,
                ..PassabilityClassDef::default()
            },
            0,
        );
        let mut hier = HierarchicalPathfinder::new();
        hier.recompute(grid, &[class]);
        hier
    }

    /// 40x40 grid with a wall at x = 20 from y = 0 to y = 30.
    fn wall_grid() -> Grid<NavcellData> {
        let mut grid = Grid::new(40, 40);
        for j in 0..30 {
            grid.set(20, j, 1);
        }
        grid
    }

    fn assert_segments_walkable(path: &WaypointPath, start: Vec2Fixed, grid: &Grid<NavcellData>) {
        let mut prev = start;
        for wp in path.walk_order() {
            assert!(check_line_movement(prev, wp, 1, grid), "blocked segment {prev:?} -> {wp:?}");
            prev = wp;
        }
    }

    #[test]
    fn test_straight_path_on_open_grid() {
        let grid = Grid::new(40, 40);
        let hier = setup(&grid);
        let path = LongPathfinder::new(&grid, &hier).compute_path(p(2.5, 2.5), &PathGoal::point(p(30.5, 2.5)), 1);
        // Straightening keeps the destination and the first navcell step only.
        assert_eq!(path.waypoints, vec![p(30.5, 2.5), p(3.5, 2.5)]);
    }

    #[test]
    fn test_path_goes_around_wall() {
        let grid = wall_grid();
        let hier = setup(&grid);
        let start = p(10.5, 5.5);
        let goal = PathGoal::point(p(30.5, 5.5));
        let path = LongPathfinder::new(&grid, &hier).compute_path(start, &goal, 1);

        assert!(path.len() >= 2);
        assert_eq!(path.destination(), Some(goal.center));
        assert!(path.walk_order().any(|wp| wp.y >= fx(30.0)));
        assert_segments_walkable(&path, start, &grid);
    }

    #[test]
    fn test_maxdist_limits_spacing() {
        let grid = Grid::new(64, 64);
        let hier = setup(&grid);
        let start = p(1.5, 1.5);
        let goal = PathGoal {
            maxdist: fx(11.0),
            ..PathGoal::point(p(60.5, 1.5))
        };
        let path = LongPathfinder::new(&grid, &hier).compute_path(start, &goal, 1);
        let first = path.next().expect("non-empty path");
        assert!((first - start).compare_length(fx(11.0)).is_le());
    }

    #[test]
    fn test_unreachable_goal_gives_empty_path() {
        let mut grid: Grid<NavcellData> = Grid::new(40, 40);
        for k in 10..=20 {
            grid.set(k, 10, 1);
            grid.set(k, 20, 1);
            grid.set(10, k, 1);
            grid.set(20, k, 1);
        }
        let hier = setup(&grid);
        let path = LongPathfinder::new(&grid, &hier).compute_path(p(2.5, 2.5), &PathGoal::point(p(15.5, 15.5)), 1);
        assert!(path.is_empty());
    }

    #[test]
    fn test_circle_goal_stops_at_boundary() {
        let grid = Grid::new(40, 40);
        let hier = setup(&grid);
        let goal = PathGoal::circle(p(30.0, 10.0), fx(4.0));
        let path = LongPathfinder::new(&grid, &hier).compute_path(p(2.5, 10.5), &goal, 1);
        let end = path.destination().expect("non-empty path");
        assert!(goal.contains_point(end));
        assert!(end.x < fx(27.0));
    }

    #[test]
    fn test_start_inside_goal() {
        let grid = Grid::new(20, 20);
        let hier = setup(&grid);
        let goal = PathGoal::circle(p(5.0, 5.0), fx(3.0));
        let path = LongPathfinder::new(&grid, &hier).compute_path(p(5.5, 5.5), &goal, 1);
        assert_eq!(path.waypoints, vec![p(5.5, 5.5)]);
    }

    #[test]
    fn test_excluded_region_is_avoided() {
        let grid = Grid::new(40, 40);
        let hier = setup(&grid);
        let start = p(2.5, 20.5);
        let goal = PathGoal::point(p(37.5, 20.5));
        let excluded = [CircularRegion {
            center: p(20.0, 20.0),
            radius: fx(6.0),
        }];
        let path = LongPathfinder::new(&grid, &hier).compute_path_excluding(start, &goal, 1, &excluded);
        assert_eq!(path.destination(), Some(goal.center));
        assert!(path
            .walk_order()
            .all(|wp| (wp - excluded[0].center).compare_length(fx(5.0)).is_gt()));
    }

    #[test]
    fn test_improve_inserts_first_hop() {
        let grid = Grid::new(40, 40);
        let mut path = WaypointPath::new(vec![p(30.5, 0.5)]);
        improve_path_waypoints(&mut path, &grid, 1, fx(10.0), p(0.5, 0.5));
        assert_eq!(path.len(), 2);
        assert_eq!(path.next(), Some(p(10.5, 0.5)));
    }
}
