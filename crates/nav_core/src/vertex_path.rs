//! Short-range vertex pathfinder.
//!
//! Builds a points-of-visibility graph inside a square search window around
//! the unit: one vertex per expanded corner of every nearby obstruction and
//! every concave terrain corner, and one-sided collision edges along their
//! outlines. An A* over that graph with a weighted heuristic gives paths that
//! hug obstacles closely, which the navcell grid cannot.
//!
//! # Quadrants
//!
//! Every vertex remembers from which quadrant it may be entered and into
//! which quadrants a path may continue. A shortest path that turns around an
//! axis-aligned corner can never head back across the obstacle it just
//! rounded, so successors in those quadrants are skipped without a
//! visibility test. Non-aligned shapes and terrain corners allow every
//! quadrant.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::goal::{PathGoal, WaypointPath};
use crate::grid::{nearest_navcell, Grid, NavcellData, NAVCELL_SIZE};
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::obstruction::{ControlGroupMovementFilter, ObstructionRegistry};
use crate::passability::{is_passable, PassClass};
use crate::pathfinder::Ticket;
use crate::EntityId;

const QUADRANT_NONE: u8 = 0;
const QUADRANT_BL: u8 = 1;
const QUADRANT_TR: u8 = 2;
const QUADRANT_TL: u8 = 4;
const QUADRANT_BR: u8 = 8;
const QUADRANT_ALL: u8 = QUADRANT_BL | QUADRANT_TR | QUADRANT_TL | QUADRANT_BR;

/// Vertices sit this far outside the corner they belong to so that they are
/// never considered inside the shape's own edges.
const EDGE_EXPAND_DELTA: Fixed = Fixed::from_bits(1 << 28);

/// Windows at least this wide are never shifted towards the goal.
const MAX_SHIFTED_RANGE_NAVCELLS: i32 = 46;

/// Axis-aligned squares nearest the current vertex tested first.
const SQUARE_SORT_PREFIX: usize = 8;
/// Unaligned edges nearest the current vertex tested first.
const UNALIGNED_SORT_PREFIX: usize = 28;

const START_VERTEX: usize = 0;
const GOAL_VERTEX: usize = 1;

/// A queued short-range path computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortPathRequest {
    /// Ticket identifying the request.
    pub ticket: Ticket,
    /// Where the unit stands.
    pub start: Vec2Fixed,
    /// Unit clearance.
    #[serde(with = "fixed_serde")]
    pub clearance: Fixed,
    /// Half size of the search window.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
    /// Destination region.
    pub goal: PathGoal,
    /// Passability class used for terrain edges.
    pub pass_class: PassClass,
    /// Whether moving units count as obstacles.
    pub avoid_moving_units: bool,
    /// Control group whose shapes are ignored.
    pub group: EntityId,
    /// Entity receiving the result.
    pub notify: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexStatus {
    Unexplored,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Vertex {
    p: Vec2Fixed,
    g: Fixed,
    h: Fixed,
    pred: usize,
    status: VertexStatus,
    quad_outward: u8,
}

impl Vertex {
    fn unexplored(p: Vec2Fixed, quad_outward: u8) -> Self {
        Self {
            p,
            g: Fixed::ZERO,
            h: Fixed::ZERO,
            pred: START_VERTEX,
            status: VertexStatus::Unexplored,
            quad_outward,
        }
    }
}

/// One-sided edge: crossing it is only blocked from the side its
/// `(p1 - p0).perpendicular()` normal points to.
#[derive(Debug, Clone, Copy)]
struct Edge {
    p0: Vec2Fixed,
    p1: Vec2Fixed,
}

/// Axis-aligned box, blocking from every side.
#[derive(Debug, Clone, Copy)]
struct EdgeSquare {
    p0: Vec2Fixed,
    p1: Vec2Fixed,
}

impl EdgeSquare {
    fn contains(&self, p: Vec2Fixed) -> bool {
        p.x >= self.p0.x && p.y >= self.p0.y && p.x <= self.p1.x && p.y <= self.p1.y
    }
}

/// Axis-aligned edge from `p0` along one axis to coordinate `c1`.
#[derive(Debug, Clone, Copy)]
struct EdgeAa {
    p0: Vec2Fixed,
    c1: Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenVertex {
    f: Fixed,
    h: Fixed,
    id: usize,
}

impl Ord for OpenVertex {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (f, h, id).
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for OpenVertex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    min: Vec2Fixed,
    max: Vec2Fixed,
}

impl Window {
    fn around(start: Vec2Fixed, range: Fixed, goal_center: Vec2Fixed) -> Self {
        let reach = Vec2Fixed::new(range, range);
        let mut min = start - reach;
        let mut max = start + reach;

        // Short windows facing a distant goal lean towards it.
        let to_goal = goal_center - start;
        if to_goal.compare_length(range).is_ge()
            && range < NAVCELL_SIZE * Fixed::from_num(MAX_SHIFTED_RANGE_NAVCELLS)
        {
            let len = to_goal.length();
            let shift_len = (len / 2).min(range * 3 / 5);
            let shift = to_goal.normalize_to(shift_len);
            min += shift;
            max += shift;
        }
        Self { min, max }
    }

    fn contains(&self, p: Vec2Fixed) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x <= self.max.x && p.y <= self.max.y
    }

    fn boundary_edges(&self) -> [Edge; 4] {
        let (x0, y0, x1, y1) = (self.min.x, self.min.y, self.max.x, self.max.y);
        [
            Edge { p0: Vec2Fixed::new(x0, y0), p1: Vec2Fixed::new(x0, y1) },
            Edge { p0: Vec2Fixed::new(x0, y1), p1: Vec2Fixed::new(x1, y1) },
            Edge { p0: Vec2Fixed::new(x1, y1), p1: Vec2Fixed::new(x1, y0) },
            Edge { p0: Vec2Fixed::new(x1, y0), p1: Vec2Fixed::new(x0, y0) },
        ]
    }
}

fn check_visibility(a: Vec2Fixed, b: Vec2Fixed, edges: &[Edge]) -> bool {
    let abn = (b - a).perpendicular();
    !edges.iter().any(|e| {
        let d = (e.p1 - e.p0).perpendicular();
        (a - e.p0).dot(d) >= Fixed::ZERO
            && (b - e.p0).dot(d) <= Fixed::ZERO
            && (e.p0 - a).dot(abn) <= Fixed::ZERO
            && (e.p1 - a).dot(abn) >= Fixed::ZERO
    })
}

/// Whether the segment straddles an axis-aligned edge running from `p0` to `p1`.
fn blocks(a: Vec2Fixed, abn: Vec2Fixed, p0: Vec2Fixed, p1: Vec2Fixed) -> bool {
    (p0 - a).dot(abn) <= Fixed::ZERO && (p1 - a).dot(abn) >= Fixed::ZERO
}

fn check_visibility_left(a: Vec2Fixed, b: Vec2Fixed, edges: &[EdgeAa]) -> bool {
    if a.x >= b.x {
        return true;
    }
    let abn = (b - a).perpendicular();
    !edges.iter().any(|e| {
        b.x >= e.p0.x && blocks(a, abn, Vec2Fixed::new(e.p0.x, e.c1), e.p0)
    })
}

fn check_visibility_right(a: Vec2Fixed, b: Vec2Fixed, edges: &[EdgeAa]) -> bool {
    if a.x <= b.x {
        return true;
    }
    let abn = (b - a).perpendicular();
    !edges.iter().any(|e| {
        b.x <= e.p0.x && blocks(a, abn, Vec2Fixed::new(e.p0.x, e.c1), e.p0)
    })
}

fn check_visibility_bottom(a: Vec2Fixed, b: Vec2Fixed, edges: &[EdgeAa]) -> bool {
    if a.y >= b.y {
        return true;
    }
    let abn = (b - a).perpendicular();
    !edges.iter().any(|e| {
        b.y >= e.p0.y && blocks(a, abn, e.p0, Vec2Fixed::new(e.c1, e.p0.y))
    })
}

fn check_visibility_top(a: Vec2Fixed, b: Vec2Fixed, edges: &[EdgeAa]) -> bool {
    if a.y <= b.y {
        return true;
    }
    let abn = (b - a).perpendicular();
    !edges.iter().any(|e| {
        b.y <= e.p0.y && blocks(a, abn, e.p0, Vec2Fixed::new(e.c1, e.p0.y))
    })
}

/// Quadrant of `to` as seen from `from`. Points on an axis belong to both neighbours.
fn quadrant(from: Vec2Fixed, to: Vec2Fixed) -> u8 {
    let mut quad = QUADRANT_NONE;
    if from.x <= to.x && from.y <= to.y {
        quad |= QUADRANT_BL;
    }
    if from.x >= to.x && from.y >= to.y {
        quad |= QUADRANT_TR;
    }
    if from.x <= to.x && from.y >= to.y {
        quad |= QUADRANT_TL;
    }
    if from.x >= to.x && from.y <= to.y {
        quad |= QUADRANT_BR;
    }
    quad
}

/// Collapse sorted cell indices into `[start, end)` runs.
fn runs(cells: &[u16]) -> Vec<(u16, u16)> {
    let mut out: Vec<(u16, u16)> = Vec::new();
    for &c in cells {
        if let Some(last) = out.last_mut() {
            if last.1 == c {
                last.1 += 1;
                continue;
            }
        }
        out.push((c, c + 1));
    }
    out
}

fn navcell_corner(i: i32, j: i32, dx: Fixed, dy: Fixed) -> Vec2Fixed {
    Vec2Fixed::new(
        (Fixed::from_num(i) + dx) * NAVCELL_SIZE,
        (Fixed::from_num(j) + dy) * NAVCELL_SIZE,
    )
}

/// Reusable scratch state for short path searches.
///
/// The buffers keep their capacity between calls; each worker thread owns
/// its own instance.
#[derive(Debug, Default)]
pub struct VertexPathfinder {
    vertexes: Vec<Vertex>,
    edges: Vec<Edge>,
    edge_squares: Vec<EdgeSquare>,
    edges_unaligned: Vec<Edge>,
    edges_left: Vec<EdgeAa>,
    edges_right: Vec<EdgeAa>,
    edges_bottom: Vec<EdgeAa>,
    edges_top: Vec<EdgeAa>,
}

impl VertexPathfinder {
    /// Create an empty pathfinder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute a path for `request` around the registry's shapes and the
    /// impassable cells of `terrain_grid`.
    ///
    /// When the goal cannot be reached inside the search window the path
    /// leads to the explored vertex closest to it. An empty path means no
    /// vertex improved on the start position.
    pub fn compute_short_path(
        &mut self,
        request: &ShortPathRequest,
        registry: &ObstructionRegistry,
        terrain_grid: &Grid<NavcellData>,
    ) -> WaypointPath {
        self.clear();
        let goal = &request.goal;
        let window = Window::around(request.start, request.range, goal.center);
        self.edges.extend(window.boundary_edges());

        let start_h = (request.start - goal.nearest_point_on_goal(request.start)).length();
        self.vertexes.push(Vertex {
            h: start_h,
            status: VertexStatus::Open,
            ..Vertex::unexplored(request.start, QUADRANT_ALL)
        });
        self.vertexes.push(Vertex::unexplored(goal.center, QUADRANT_ALL));

        self.add_obstruction_shapes(request, registry, &window);

        let (w, h) = (terrain_grid.width(), terrain_grid.height());
        if w > 2 && h > 2 {
            let (i0, j0) = nearest_navcell(window.min, w, h);
            let (i1, j1) = nearest_navcell(window.max, w, h);
            self.add_terrain_edges(i0, j0, i1, j1, request.pass_class, terrain_grid);
        }

        // Corners swallowed by another box are unreachable, unless the unit
        // starts inside that box and needs them to get out.
        for square in &self.edge_squares {
            if square.contains(request.start) {
                continue;
            }
            for vertex in self.vertexes.iter_mut().skip(2) {
                if square.contains(vertex.p) {
                    vertex.status = VertexStatus::Closed;
                }
            }
        }

        let heuristic_weight = if self.edges.len() > 100 || self.edge_squares.len() > 100 {
            Fixed::from_num(5) / 3
        } else {
            Fixed::from_num(4) / 3
        };

        let best = self.search(goal, &window, heuristic_weight);

        let mut waypoints = Vec::new();
        let mut id = best;
        while id != START_VERTEX {
            waypoints.push(self.vertexes[id].p);
            id = self.vertexes[id].pred;
        }
        tracing::trace!(
            ticket = request.ticket,
            vertexes = self.vertexes.len(),
            edges = self.edges.len(),
            squares = self.edge_squares.len(),
            waypoints = waypoints.len(),
            reached = best == GOAL_VERTEX,
            "short path computed"
        );
        self.clear();
        WaypointPath::new(waypoints)
    }

    fn clear(&mut self) {
        self.vertexes.clear();
        self.edges.clear();
        self.edge_squares.clear();
        self.edges_unaligned.clear();
        self.edges_left.clear();
        self.edges_right.clear();
        self.edges_bottom.clear();
        self.edges_top.clear();
    }

    fn add_obstruction_shapes(
        &mut self,
        request: &ShortPathRequest,
        registry: &ObstructionRegistry,
        window: &Window,
    ) {
        let filter = ControlGroupMovementFilter::new(request.avoid_moving_units, request.group);
        let reach = Vec2Fixed::new(request.clearance, request.clearance);
        let (min, max) = (window.min - reach, window.max + reach);
        let statics = registry.get_static_obstructions_in_range(&filter, min, max);
        let units = registry.get_unit_obstructions_in_range(&filter, min, max);

        // Units may brush past each other slightly; it keeps crowds from
        // sealing off gaps the grid considers open.
        let unit_clearance = request.clearance - Fixed::ONE / 2;
        let shapes = statics
            .iter()
            .map(|sq| (sq, request.clearance))
            .chain(units.iter().map(|sq| (sq, unit_clearance)));

        for (sq, clearance) in shapes {
            let (c, u, v) = (sq.center, sq.u, sq.v);
            let aa = u == Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)
                && v == Vec2Fixed::new(Fixed::ZERO, Fixed::ONE);

            let ew = sq.half.x + clearance + EDGE_EXPAND_DELTA;
            let eh = sq.half.y + clearance + EDGE_EXPAND_DELTA;
            let hd0 = Vec2Fixed::new(ew, eh);
            let hd1 = Vec2Fixed::new(ew, -eh);
            let corners = [
                (Vec2Fixed::new(c.x - hd0.dot(u), c.y + hd0.dot(v)), QUADRANT_BR),
                (Vec2Fixed::new(c.x - hd1.dot(u), c.y + hd1.dot(v)), QUADRANT_TR),
                (Vec2Fixed::new(c.x + hd0.dot(u), c.y - hd0.dot(v)), QUADRANT_TL),
                (Vec2Fixed::new(c.x + hd1.dot(u), c.y - hd1.dot(v)), QUADRANT_BL),
            ];
            for (p, inward) in corners {
                if window.contains(p) {
                    let outward = if aa { !inward & QUADRANT_ALL } else { QUADRANT_ALL };
                    self.vertexes.push(Vertex::unexplored(p, outward));
                }
            }

            let h0 = Vec2Fixed::new(sq.half.x + clearance, sq.half.y + clearance);
            let h1 = Vec2Fixed::new(h0.x, -h0.y);
            let ev0 = Vec2Fixed::new(c.x - h0.dot(u), c.y + h0.dot(v));
            let ev1 = Vec2Fixed::new(c.x - h1.dot(u), c.y + h1.dot(v));
            let ev2 = Vec2Fixed::new(c.x + h0.dot(u), c.y - h0.dot(v));
            let ev3 = Vec2Fixed::new(c.x + h1.dot(u), c.y - h1.dot(v));
            if aa {
                self.edge_squares.push(EdgeSquare { p0: ev1, p1: ev3 });
            } else {
                self.edges.extend([
                    Edge { p0: ev0, p1: ev1 },
                    Edge { p0: ev1, p1: ev2 },
                    Edge { p0: ev2, p1: ev3 },
                    Edge { p0: ev3, p1: ev0 },
                ]);
            }
        }
    }

    /// Vertices at concave corners of impassable terrain and edges along the
    /// passable/impassable boundary, over navcells `[i0, i1] x [j0, j1]`.
    ///
    /// The outermost ring of navcells is never sampled; it is always
    /// impassable and never borders a passable cell inside the map.
    fn add_terrain_edges(
        &mut self,
        i0: u16,
        j0: u16,
        i1: u16,
        j1: u16,
        class: PassClass,
        grid: &Grid<NavcellData>,
    ) {
        let (w, h) = (i32::from(grid.width()), i32::from(grid.height()));
        let i0 = i32::from(i0).clamp(1, w - 2);
        let j0 = i32::from(j0).clamp(1, h - 2);
        let i1 = i32::from(i1).clamp(1, w - 2);
        let j1 = i32::from(j1).clamp(1, h - 2);
        let passable = |i: i32, j: i32| {
            grid.get_checked(i, j)
                .is_some_and(|data| is_passable(data, class))
        };

        let d = EDGE_EXPAND_DELTA;
        let one = Fixed::ONE;
        for j in j0..=j1 {
            for i in i0..=i1 {
                if passable(i, j) {
                    continue;
                }
                // A concave corner is where three passable cells meet one impassable one.
                if passable(i + 1, j) && passable(i, j + 1) && passable(i + 1, j + 1) {
                    self.vertexes
                        .push(Vertex::unexplored(navcell_corner(i, j, one + d, one + d), QUADRANT_ALL));
                }
                if passable(i - 1, j) && passable(i, j + 1) && passable(i - 1, j + 1) {
                    self.vertexes
                        .push(Vertex::unexplored(navcell_corner(i, j, -d, one + d), QUADRANT_ALL));
                }
                if passable(i + 1, j) && passable(i, j - 1) && passable(i + 1, j - 1) {
                    self.vertexes
                        .push(Vertex::unexplored(navcell_corner(i, j, one + d, -d), QUADRANT_ALL));
                }
                if passable(i - 1, j) && passable(i, j - 1) && passable(i - 1, j - 1) {
                    self.vertexes
                        .push(Vertex::unexplored(navcell_corner(i, j, -d, -d), QUADRANT_ALL));
                }
            }
        }

        let cell = |i: i32, j: i32| navcell_corner(i, j, Fixed::ZERO, Fixed::ZERO);
        let mut forward: Vec<u16> = Vec::new();
        let mut backward: Vec<u16> = Vec::new();

        // Horizontal boundaries between rows j and j + 1.
        for j in j0..j1 {
            forward.clear();
            backward.clear();
            for i in i0..=i1 {
                let above = passable(i, j + 1);
                let below = passable(i, j);
                if above && !below {
                    backward.push(i as u16);
                }
                if below && !above {
                    forward.push(i as u16);
                }
            }
            for (ia, ib) in runs(&forward) {
                self.edges.push(Edge {
                    p0: cell(i32::from(ia), j + 1),
                    p1: cell(i32::from(ib), j + 1),
                });
            }
            for (ia, ib) in runs(&backward) {
                self.edges.push(Edge {
                    p0: cell(i32::from(ib), j + 1),
                    p1: cell(i32::from(ia), j + 1),
                });
            }
        }

        // Vertical boundaries between columns i and i + 1.
        for i in i0..i1 {
            forward.clear();
            backward.clear();
            for j in j0..=j1 {
                let right = passable(i + 1, j);
                let left = passable(i, j);
                if right && !left {
                    forward.push(j as u16);
                }
                if left && !right {
                    backward.push(j as u16);
                }
            }
            for (ja, jb) in runs(&forward) {
                self.edges.push(Edge {
                    p0: cell(i + 1, i32::from(ja)),
                    p1: cell(i + 1, i32::from(jb)),
                });
            }
            for (ja, jb) in runs(&backward) {
                self.edges.push(Edge {
                    p0: cell(i + 1, i32::from(jb)),
                    p1: cell(i + 1, i32::from(ja)),
                });
            }
        }
    }

    /// Bucket the edges facing `a` by side so most visibility tests only
    /// compare one coordinate.
    fn split_aa_edges(&mut self, a: Vec2Fixed) {
        self.edges_unaligned.clear();
        self.edges_left.clear();
        self.edges_right.clear();
        self.edges_bottom.clear();
        self.edges_top.clear();

        for sq in &self.edge_squares {
            if a.x <= sq.p0.x {
                self.edges_left.push(EdgeAa { p0: sq.p0, c1: sq.p1.y });
            }
            if a.x >= sq.p1.x {
                self.edges_right.push(EdgeAa { p0: sq.p1, c1: sq.p0.y });
            }
            if a.y <= sq.p0.y {
                self.edges_bottom.push(EdgeAa { p0: sq.p0, c1: sq.p1.x });
            }
            if a.y >= sq.p1.y {
                self.edges_top.push(EdgeAa { p0: sq.p1, c1: sq.p0.x });
            }
        }

        for edge in &self.edges {
            if edge.p0.x == edge.p1.x {
                if edge.p1.y < edge.p0.y {
                    if a.x <= edge.p0.x {
                        self.edges_left.push(EdgeAa { p0: edge.p1, c1: edge.p0.y });
                    }
                } else if a.x >= edge.p0.x {
                    self.edges_right.push(EdgeAa { p0: edge.p1, c1: edge.p0.y });
                }
            } else if edge.p0.y == edge.p1.y {
                if edge.p0.x < edge.p1.x {
                    if a.y <= edge.p0.y {
                        self.edges_bottom.push(EdgeAa { p0: edge.p0, c1: edge.p1.x });
                    }
                } else if a.y >= edge.p0.y {
                    self.edges_top.push(EdgeAa { p0: edge.p0, c1: edge.p1.x });
                }
            } else {
                self.edges_unaligned.push(*edge);
            }
        }
    }

    fn is_visible(&self, a: Vec2Fixed, b: Vec2Fixed) -> bool {
        check_visibility_left(a, b, &self.edges_left)
            && check_visibility_right(a, b, &self.edges_right)
            && check_visibility_bottom(a, b, &self.edges_bottom)
            && check_visibility_top(a, b, &self.edges_top)
            && check_visibility(a, b, &self.edges_unaligned)
    }

    /// Run A* from the start vertex and return the id of the goal vertex, or
    /// of the explored vertex with the smallest heuristic if the goal was
    /// never reached.
    fn search(&mut self, goal: &PathGoal, window: &Window, weight: Fixed) -> usize {
        let start_h = self.vertexes[START_VERTEX].h;
        let mut open = BinaryHeap::new();
        open.push(OpenVertex { f: start_h, h: start_h, id: START_VERTEX });
        let mut best = START_VERTEX;
        let mut best_h = start_h;

        let clamp_min = window.min + Vec2Fixed::new(EDGE_EXPAND_DELTA, EDGE_EXPAND_DELTA);
        let clamp_max = window.max - Vec2Fixed::new(EDGE_EXPAND_DELTA, EDGE_EXPAND_DELTA);

        while let Some(curr) = open.pop() {
            let vertex = self.vertexes[curr.id];
            // Entries superseded by a cheaper route are left in the heap.
            if vertex.status == VertexStatus::Closed || curr.f != vertex.g + vertex.h {
                continue;
            }
            self.vertexes[curr.id].status = VertexStatus::Closed;
            if curr.id == GOAL_VERTEX {
                best = GOAL_VERTEX;
                break;
            }

            let a = vertex.p;
            // Nearby blockers first so invisible candidates fail fast.
            if self.edge_squares.len() > SQUARE_SORT_PREFIX {
                self.edge_squares.select_nth_unstable_by(SQUARE_SORT_PREFIX, |x, y| {
                    (x.p0 - a).compare_length_to(y.p0 - a)
                });
            }
            self.split_aa_edges(a);
            if self.edges_unaligned.len() > UNALIGNED_SORT_PREFIX {
                self.edges_unaligned.select_nth_unstable_by(UNALIGNED_SORT_PREFIX, |x, y| {
                    (x.p0 - a).compare_length_to(y.p0 - a)
                });
            }

            for n in 0..self.vertexes.len() {
                let candidate = self.vertexes[n];
                if candidate.status == VertexStatus::Closed {
                    continue;
                }
                let npos = if n == GOAL_VERTEX {
                    let p = goal.nearest_point_on_goal(a);
                    Vec2Fixed::new(
                        p.x.clamp(clamp_min.x, clamp_max.x),
                        p.y.clamp(clamp_min.y, clamp_max.y),
                    )
                } else {
                    candidate.p
                };

                if vertex.quad_outward & quadrant(a, npos) == 0
                    && curr.id != START_VERTEX
                    && n != GOAL_VERTEX
                {
                    continue;
                }
                if !self.is_visible(a, npos) {
                    continue;
                }

                let g = vertex.g + (a - npos).length();
                let target = &mut self.vertexes[n];
                match target.status {
                    VertexStatus::Unexplored => {
                        target.status = VertexStatus::Open;
                        target.g = g;
                        target.h = goal.distance_to_point(npos) * weight;
                        target.pred = curr.id;
                        if n == GOAL_VERTEX {
                            target.p = npos;
                        }
                        open.push(OpenVertex { f: g + target.h, h: target.h, id: n });
                        if target.h < best_h {
                            best = n;
                            best_h = target.h;
                        }
                    }
                    VertexStatus::Open if g < target.g => {
                        target.g = g;
                        target.pred = curr.id;
                        if n == GOAL_VERTEX {
                            target.p = npos;
                        }
                        open.push(OpenVertex { f: g + target.h, h: target.h, id: n });
                    }
                    _ => {}
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstruction::ObstructionFlags;
    use crate::passability::check_line_movement;

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    fn p(x: f64, y: f64) -> Vec2Fixed {
        Vec2Fixed::new(fx(x), fx(y))
    }

    fn open_grid(size: u16) -> Grid<NavcellData> {
        let mut grid = Grid::new(size, size);
        for i in 0..size {
            grid.set(i, 0, 1);
            grid.set(i, size - 1, 1);
            grid.set(0, i, 1);
            grid.set(size - 1, i, 1);
        }
        grid
    }

    fn registry(size: i32) -> ObstructionRegistry {
        let mut reg = ObstructionRegistry::new();
        reg.set_bounds(Fixed::from_num(size), Fixed::from_num(size), Fixed::ONE);
        reg
    }

    fn request(start: Vec2Fixed, goal: PathGoal, range: f64) -> ShortPathRequest {
        ShortPathRequest {
            ticket: 1,
            start,
            clearance: fx(0.8),
            range: fx(range),
            goal,
            pass_class: 1,
            avoid_moving_units: true,
            group: 99,
            notify: 1,
        }
    }

    fn blocking() -> ObstructionFlags {
        ObstructionFlags::BLOCK_MOVEMENT | ObstructionFlags::BLOCK_PATHFINDING
    }

    #[test]
    fn test_direct_path_when_nothing_in_the_way() {
        let grid = open_grid(64);
        let reg = registry(64);
        let req = request(p(20.0, 20.0), PathGoal::point(p(30.0, 20.0)), 16.0);

        let path = VertexPathfinder::new().compute_short_path(&req, &reg, &grid);
        assert_eq!(path.waypoints, vec![p(30.0, 20.0)]);
    }

    #[test]
    fn test_path_rounds_a_building() {
        let grid = open_grid(64);
        let mut reg = registry(64);
        reg.add_static_shape(7, p(30.0, 30.0), Fixed::ZERO, fx(4.0), fx(4.0), blocking(), 7, 0);
        let req = request(p(24.0, 30.0), PathGoal::point(p(36.0, 30.0)), 16.0);

        let path = VertexPathfinder::new().compute_short_path(&req, &reg, &grid);
        assert_eq!(path.destination(), Some(p(36.0, 30.0)));
        assert!(path.len() >= 3, "expected a detour, got {:?}", path.waypoints);

        // Every leg stays clear of the expanded footprint.
        let mut prev = req.start;
        for wp in path.walk_order() {
            assert!(
                !crate::geometry::test_ray_square(
                    prev - p(30.0, 30.0),
                    wp - p(30.0, 30.0),
                    Vec2Fixed::new(fx(1.0), fx(0.0)),
                    Vec2Fixed::new(fx(0.0), fx(1.0)),
                    p(2.5, 2.5),
                ),
                "leg {prev:?} -> {wp:?} crosses the building"
            );
            prev = wp;
        }
    }

    #[test]
    fn test_own_control_group_is_ignored() {
        let grid = open_grid(64);
        let mut reg = registry(64);
        reg.add_static_shape(7, p(30.0, 30.0), Fixed::ZERO, fx(4.0), fx(4.0), blocking(), 99, 0);
        let req = request(p(24.0, 30.0), PathGoal::point(p(36.0, 30.0)), 16.0);

        let path = VertexPathfinder::new().compute_short_path(&req, &reg, &grid);
        assert_eq!(path.waypoints, vec![p(36.0, 30.0)]);
    }

    #[test]
    fn test_terrain_wall_is_avoided() {
        let mut grid = open_grid(64);
        for j in 10..40 {
            grid.set(30, j, 1);
        }
        let reg = registry(64);
        let req = request(p(25.5, 25.5), PathGoal::point(p(35.5, 25.5)), 24.0);

        let path = VertexPathfinder::new().compute_short_path(&req, &reg, &grid);
        assert_eq!(path.destination(), Some(p(35.5, 25.5)));
        let mut prev = req.start;
        for wp in path.walk_order() {
            assert!(check_line_movement(prev, wp, 1, &grid), "{prev:?} -> {wp:?}");
            prev = wp;
        }
    }

    #[test]
    fn test_goal_outside_window_gets_closest_point() {
        let grid = open_grid(128);
        let reg = registry(128);
        let req = request(p(20.0, 20.0), PathGoal::point(p(100.0, 20.0)), 8.0);

        let path = VertexPathfinder::new().compute_short_path(&req, &reg, &grid);
        let end = path.destination().unwrap_or(req.start);
        // The window leans towards the goal by 3/5 of its range.
        assert!(end.x > fx(30.0) && end.x < fx(33.0), "{end:?}");
    }

    #[test]
    fn test_window_shift() {
        let w = Window::around(p(10.0, 10.0), fx(10.0), p(50.0, 10.0));
        assert_eq!(w.min, p(6.0, 0.0));
        assert_eq!(w.max, p(26.0, 20.0));

        let near = Window::around(p(10.0, 10.0), fx(10.0), p(15.0, 10.0));
        assert_eq!(near.min, p(0.0, 0.0));
    }

    #[test]
    fn test_quadrants() {
        assert_eq!(quadrant(p(0.0, 0.0), p(1.0, 1.0)), QUADRANT_BL);
        assert_eq!(quadrant(p(0.0, 0.0), p(-1.0, -1.0)), QUADRANT_TR);
        assert_eq!(quadrant(p(0.0, 0.0), p(1.0, 0.0)), QUADRANT_BL | QUADRANT_TL);
    }

    #[test]
    fn test_runs() {
        assert_eq!(runs(&[2, 3, 4, 7, 9, 10]), vec![(2, 5), (7, 8), (9, 11)]);
        assert!(runs(&[]).is_empty());
    }

    #[test]
    fn test_one_sided_edge() {
        let edge = [Edge { p0: p(0.0, -1.0), p1: p(0.0, 1.0) }];
        // Normal (2, 0) faces +x, so only crossings from the right are blocked.
        assert!(!check_visibility(p(1.0, 0.0), p(-1.0, 0.0), &edge));
        assert!(check_visibility(p(-1.0, 0.0), p(1.0, 0.0), &edge));
    }
}
