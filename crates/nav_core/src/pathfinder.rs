//! The pathfinder context.
//!
//! [`Pathfinder`] owns everything derived from terrain and obstructions: the
//! terrain-only grid, the final passability grid, the hierarchical region
//! graph, and the queues of ticketed path requests. It is mutated only on
//! the coordinating thread; path workers borrow it immutably while a batch
//! is computed, so every request of one batch sees the same snapshot.
//!
//! ## Request lifecycle
//!
//! 1. [`Pathfinder::compute_path_async`] / [`Pathfinder::compute_short_path_async`]
//!    queue a request and return its ticket.
//! 2. [`Pathfinder::start_processing_moves`] arms the newest requests, up to
//!    the per-turn cap.
//! 3. [`Pathfinder::send_requested_paths`] computes the armed batch on the
//!    worker pool, blocks until it is done and hands back the results, short
//!    paths first.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::NavConfig;
use crate::error::{NavError, Result};
use crate::geometry::rasterize_rect_with_clearance;
use crate::goal::{PathGoal, WaypointPath};
use crate::grid::{nearest_navcell, Grid, GridUpdateInformation, NavcellData, MAX_PASS_CLASSES, NAVCELL_SIZE};
use crate::hierarchical::HierarchicalPathfinder;
use crate::long_path::{CircularRegion, LongPathfinder};
use crate::math::{Fixed, Vec2Fixed, PI};
use crate::obstruction::{ObstructionFilter, ObstructionRegistry};
use crate::passability::{check_line_movement, is_passable, ObstructionHandling, PassClass, PassabilityClass};
use crate::terrain::{TerrainPassabilityBaker, TerrainSampler};
use crate::vertex_path::{ShortPathRequest, VertexPathfinder};
use crate::EntityId;

/// Identifies one asynchronous path request and its result.
pub type Ticket = u32;

/// A queued long-range path computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongPathRequest {
    /// Ticket identifying the request.
    pub ticket: Ticket,
    /// Where the unit stands.
    pub start: Vec2Fixed,
    /// Destination region.
    pub goal: PathGoal,
    /// Passability class to search with.
    pub pass_class: PassClass,
    /// Entity receiving the result.
    pub notify: EntityId,
}

/// A computed path addressed to the entity that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResult {
    /// Ticket of the request.
    pub ticket: Ticket,
    /// Entity to deliver the result to.
    pub notify: EntityId,
    /// The path; empty when nothing was found.
    pub path: WaypointPath,
}

/// Outcome of a placement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoundationCheck {
    /// The footprint is free.
    Success,
    /// Another shape overlaps the footprint.
    FailObstructsFoundation,
    /// Terrain under the footprint is impassable for the class.
    FailTerrainClass,
    /// The grid has not been built yet.
    FailError,
}

/// Queued requests plus the range armed for the current batch.
#[derive(Debug, Clone)]
struct PathRequests<T> {
    requests: Vec<T>,
    armed_start: usize,
    armed_len: usize,
}

impl<T> Default for PathRequests<T> {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            armed_start: 0,
            armed_len: 0,
        }
    }
}

impl<T> PathRequests<T> {
    /// Arm the newest `max` requests, or all of them when `max` is zero.
    fn prepare_for_computation(&mut self, max: usize) {
        let n = self.requests.len();
        let armed = if max != 0 && n > max { max } else { n };
        self.armed_start = n - armed;
        self.armed_len = armed;
    }

    fn armed(&self) -> &[T] {
        &self.requests[self.armed_start..self.armed_start + self.armed_len]
    }

    fn clear_computed(&mut self) {
        self.requests
            .drain(self.armed_start..self.armed_start + self.armed_len);
        self.armed_start = 0;
        self.armed_len = 0;
    }
}

/// Persisted part of the pathfinder. Grids and graphs are rebuilt after load.
#[derive(Debug, Serialize, Deserialize)]
struct PathfinderState {
    long_requests: Vec<LongPathRequest>,
    short_requests: Vec<ShortPathRequest>,
    next_ticket: Ticket,
    grid_size: u16,
}

/// Owner of the passability grids, region graph and path request queues.
#[derive(Debug)]
pub struct Pathfinder {
    classes: Vec<PassabilityClass>,
    class_masks: BTreeMap<String, PassClass>,
    map_edge_tiles: u16,
    circular: bool,
    max_same_turn_moves: usize,

    grid_size: u16,
    grid: Grid<NavcellData>,
    terrain_only_grid: Grid<NavcellData>,
    terrain_dirty: bool,
    dirtiness: GridUpdateInformation,
    /// Changes accumulated for consumers outside the tick, e.g. AI planners.
    secondary_dirtiness: GridUpdateInformation,
    hier: HierarchicalPathfinder,

    long_requests: PathRequests<LongPathRequest>,
    short_requests: PathRequests<ShortPathRequest>,
    next_ticket: Ticket,

    pool: Option<rayon::ThreadPool>,
}

impl Pathfinder {
    /// Build a pathfinder from configuration. The grid stays empty until
    /// the first [`Self::update_grid`].
    pub fn new(config: &NavConfig) -> Result<Self> {
        config.validate()?;
        if config.passability_classes.len() > MAX_PASS_CLASSES {
            return Err(NavError::TooManyPassClasses {
                count: config.passability_classes.len(),
                max: MAX_PASS_CLASSES,
            });
        }
        let classes: Vec<PassabilityClass> = config
            .passability_classes
            .iter()
            .enumerate()
            .map(|(i, def)| PassabilityClass::from_def(def, i))
            .collect();
        let class_masks = classes.iter().map(|c| (c.name.clone(), c.mask)).collect();

        let pool = if config.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("nav-path-{i}"))
                .build()
                .map_err(|e| NavError::InvalidState(format!("path worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            classes,
            class_masks,
            map_edge_tiles: config.map_edge_tiles,
            circular: config.circular_map,
            max_same_turn_moves: config.max_same_turn_moves,
            grid_size: 0,
            grid: Grid::default(),
            terrain_only_grid: Grid::default(),
            terrain_dirty: true,
            dirtiness: GridUpdateInformation::default(),
            secondary_dirtiness: GridUpdateInformation::default(),
            hier: HierarchicalPathfinder::new(),
            long_requests: PathRequests::default(),
            short_requests: PathRequests::default(),
            next_ticket: 1,
            pool,
        })
    }

    // ---------------------------------------------------------------------
    // Passability classes
    // ---------------------------------------------------------------------

    /// Mask of the class called `name`.
    pub fn get_pass_class(&self, name: &str) -> Result<PassClass> {
        self.class_masks
            .get(name)
            .copied()
            .ok_or_else(|| NavError::UnknownPassClass(name.to_string()))
    }

    /// Every class name with its mask.
    pub fn get_pass_classes(&self) -> &BTreeMap<String, PassClass> {
        &self.class_masks
    }

    /// Classes split into `(non_pathfinding, pathfinding)`.
    pub fn get_pass_classes_split(&self) -> (BTreeMap<String, PassClass>, BTreeMap<String, PassClass>) {
        let mut non_pathfinding = BTreeMap::new();
        let mut pathfinding = BTreeMap::new();
        for class in &self.classes {
            if class.obstructions == ObstructionHandling::Pathfinding {
                pathfinding.insert(class.name.clone(), class.mask);
            } else {
                non_pathfinding.insert(class.name.clone(), class.mask);
            }
        }
        (non_pathfinding, pathfinding)
    }

    /// Resolved class for a single-bit mask.
    pub fn passability_from_mask(&self, mask: PassClass) -> Option<&PassabilityClass> {
        self.classes.iter().find(|c| c.mask == mask)
    }

    /// All resolved classes, in bit order.
    pub fn classes(&self) -> &[PassabilityClass] {
        &self.classes
    }

    /// Largest clearance of any class; the registry needs it to size its
    /// dirty-neighbour margin.
    pub fn max_clearance(&self) -> Fixed {
        self.classes
            .iter()
            .map(|c| c.clearance)
            .max()
            .unwrap_or(Fixed::ZERO)
    }

    // ---------------------------------------------------------------------
    // Grids
    // ---------------------------------------------------------------------

    /// The passability grid with obstructions drawn in.
    pub fn grid(&self) -> &Grid<NavcellData> {
        &self.grid
    }

    /// Terrain passability only, with clearance dilation.
    pub fn terrain_only_grid(&self) -> &Grid<NavcellData> {
        &self.terrain_only_grid
    }

    /// The region graph.
    pub fn hierarchical(&self) -> &HierarchicalPathfinder {
        &self.hier
    }

    /// Navcells per side of the current grid.
    pub fn grid_size(&self) -> u16 {
        self.grid_size
    }

    /// Hand out everything that changed since the previous call.
    pub fn take_dirtiness_information(&mut self) -> GridUpdateInformation {
        let mut out = GridUpdateInformation {
            dirtiness_grid: Grid::new(self.grid_size, self.grid_size),
            ..GridUpdateInformation::default()
        };
        out.merge_and_clear(&mut self.secondary_dirtiness);
        out
    }

    /// Bring the grid and region graph up to date with terrain and obstructions.
    ///
    /// Terrain edits trigger a full re-bake; otherwise only navcells dirtied
    /// by obstruction changes are restored from the terrain-only grid and
    /// redrawn.
    pub fn update_grid(&mut self, terrain: &dyn TerrainSampler, registry: &mut ObstructionRegistry) {
        let size = terrain.navcells_per_side();
        if size == 0 {
            return;
        }

        if self.grid_size != size || self.grid.width() != size {
            tracing::debug!(from = self.grid_size, to = size, "pathfinder grid resized");
            self.grid_size = size;
            self.grid = Grid::new(size, size);
            self.terrain_only_grid = Grid::new(size, size);
            self.dirtiness = GridUpdateInformation {
                dirty: true,
                globally_dirty: true,
                dirtiness_grid: Grid::new(size, size),
            };
            self.secondary_dirtiness = self.dirtiness.clone();
            self.terrain_dirty = true;
        }

        registry.update_informations(&mut self.dirtiness);
        if !self.dirtiness.dirty && !self.terrain_dirty {
            return;
        }

        if self.terrain_dirty {
            let baker = TerrainPassabilityBaker::new(&self.classes, self.map_edge_tiles, self.circular);
            self.terrain_only_grid = baker.bake(terrain);
            self.grid.clone_from(&self.terrain_only_grid);
            self.terrain_dirty = false;
            self.dirtiness.dirty = true;
            self.dirtiness.globally_dirty = true;
        } else if self.dirtiness.globally_dirty {
            self.grid.clone_from(&self.terrain_only_grid);
        } else {
            let dirty = &self.dirtiness.dirtiness_grid;
            for j in 0..dirty.height() {
                for i in 0..dirty.width() {
                    if dirty.get(i, j) {
                        self.grid.set(i, j, self.terrain_only_grid.get(i, j));
                    }
                }
            }
        }

        registry.rasterize(&mut self.grid, &self.classes, self.dirtiness.globally_dirty);

        if self.dirtiness.globally_dirty {
            self.hier.recompute(&self.grid, &self.classes);
        } else {
            self.hier.update(&self.grid, &self.dirtiness.dirtiness_grid);
        }
        tracing::trace!(global = self.dirtiness.globally_dirty, "pathfinder grid updated");

        self.secondary_dirtiness.merge_and_clear(&mut self.dirtiness);
    }

    /// Terrain tiles `[i0, i1] x [j0, j1]` changed height.
    ///
    /// Only the affected box of the terrain-only grid is re-baked; the next
    /// [`Self::update_grid`] redraws obstructions over it and updates the
    /// region graph locally.
    pub fn terrain_changed(
        &mut self,
        terrain: &dyn TerrainSampler,
        registry: &mut ObstructionRegistry,
        i0: u16,
        j0: u16,
        i1: u16,
        j1: u16,
    ) {
        if self.terrain_dirty || self.terrain_only_grid.width() != terrain.navcells_per_side() {
            self.terrain_dirty = true;
            return;
        }
        let baker = TerrainPassabilityBaker::new(&self.classes, self.map_edge_tiles, self.circular);
        let rect = baker.bake_region(terrain, &mut self.terrain_only_grid, i0, j0, i1, j1);
        if !registry.mark_navcells_dirty(rect.i0, rect.j0, rect.i1, rect.j1) {
            self.terrain_dirty = true;
        }
    }

    /// The water plane or the playable area shape changed.
    pub fn water_changed(&mut self, terrain: &dyn TerrainSampler, registry: &mut ObstructionRegistry) {
        self.terrain_dirty = true;
        self.update_grid(terrain, registry);
    }

    /// Switch between a square and a circular playable area.
    pub fn set_circular(&mut self, circular: bool) {
        if self.circular != circular {
            self.circular = circular;
            self.terrain_dirty = true;
        }
    }

    // ---------------------------------------------------------------------
    // Path requests
    // ---------------------------------------------------------------------

    fn next_ticket(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Queue a long-range path request.
    pub fn compute_path_async(
        &mut self,
        start: Vec2Fixed,
        goal: PathGoal,
        pass_class: PassClass,
        notify: EntityId,
    ) -> Ticket {
        let ticket = self.next_ticket();
        self.long_requests.requests.push(LongPathRequest {
            ticket,
            start,
            goal,
            pass_class,
            notify,
        });
        ticket
    }

    /// Queue a short-range path request.
    pub fn compute_short_path_async(
        &mut self,
        start: Vec2Fixed,
        clearance: Fixed,
        range: Fixed,
        goal: PathGoal,
        pass_class: PassClass,
        avoid_moving_units: bool,
        group: EntityId,
        notify: EntityId,
    ) -> Ticket {
        let ticket = self.next_ticket();
        self.short_requests.requests.push(ShortPathRequest {
            ticket,
            start,
            clearance,
            range,
            goal,
            pass_class,
            avoid_moving_units,
            group,
            notify,
        });
        ticket
    }

    /// Whether any request is waiting.
    pub fn has_pending_requests(&self) -> bool {
        !self.long_requests.requests.is_empty() || !self.short_requests.requests.is_empty()
    }

    /// Arm the next batch. With `use_max` each queue is capped at the
    /// configured per-turn limit, newest requests first.
    pub fn start_processing_moves(&mut self, use_max: bool) {
        let max = if use_max { self.max_same_turn_moves } else { 0 };
        self.short_requests.prepare_for_computation(max);
        self.long_requests.prepare_for_computation(max);
    }

    /// Compute the armed batch and return the results, short paths first.
    ///
    /// Blocks until every armed request is done. Requests queued after the
    /// batch was armed stay queued.
    pub fn send_requested_paths(&mut self, registry: &ObstructionRegistry) -> Vec<PathResult> {
        let short = self.short_requests.armed();
        let long = self.long_requests.armed();
        if short.is_empty() && long.is_empty() {
            return Vec::new();
        }
        tracing::debug!(short = short.len(), long = long.len(), "computing path batch");

        let mut results = self.compute_short_batch(short, registry);
        results.extend(self.compute_long_batch(long));

        self.short_requests.clear_computed();
        self.long_requests.clear_computed();
        results
    }

    fn compute_short_batch(&self, requests: &[ShortPathRequest], registry: &ObstructionRegistry) -> Vec<PathResult> {
        let terrain = &self.terrain_only_grid;
        self.run_batch(requests, VertexPathfinder::new, |vp, req| PathResult {
            ticket: req.ticket,
            notify: req.notify,
            path: vp.compute_short_path(req, registry, terrain),
        })
    }

    fn compute_long_batch(&self, requests: &[LongPathRequest]) -> Vec<PathResult> {
        let finder = LongPathfinder::new(&self.grid, &self.hier);
        self.run_batch(requests, || (), |_, req| PathResult {
            ticket: req.ticket,
            notify: req.notify,
            path: finder.compute_path(req.start, &req.goal, req.pass_class),
        })
    }

    /// Run the first `max_same_turn_moves` requests on the calling thread
    /// while the pool works through the rest. Results keep request order.
    fn run_batch<R, S, T, I, F>(&self, requests: &[R], init: I, run: F) -> Vec<T>
    where
        R: Sync,
        T: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, &R) -> T + Sync + Send,
    {
        let inline = match self.max_same_turn_moves {
            0 => requests.len(),
            max => max.min(requests.len()),
        };
        let (head, tail) = requests.split_at(inline);
        let Some(pool) = self.pool.as_ref().filter(|_| !tail.is_empty()) else {
            let mut state = init();
            return requests.iter().map(|req| run(&mut state, req)).collect();
        };

        let mut tail_results: Vec<T> = Vec::new();
        let mut results: Vec<T> = Vec::new();
        let (init, run, tail_out) = (&init, &run, &mut tail_results);
        pool.in_place_scope(|scope| {
            scope.spawn(move |_| {
                *tail_out = tail.par_iter().map_init(init, run).collect();
            });
            let mut state = init();
            results = head.iter().map(|req| run(&mut state, req)).collect();
        });
        results.extend(tail_results);
        results
    }

    /// Long path computed on the calling thread.
    pub fn compute_path_immediate(&self, start: Vec2Fixed, goal: &PathGoal, pass_class: PassClass) -> WaypointPath {
        LongPathfinder::new(&self.grid, &self.hier).compute_path(start, goal, pass_class)
    }

    /// Long path that also avoids the given discs.
    pub fn compute_path_excluding(
        &self,
        start: Vec2Fixed,
        goal: &PathGoal,
        pass_class: PassClass,
        excluded: &[CircularRegion],
    ) -> WaypointPath {
        LongPathfinder::new(&self.grid, &self.hier).compute_path_excluding(start, goal, pass_class, excluded)
    }

    /// Short path computed on the calling thread.
    pub fn compute_short_path_immediate(&self, request: &ShortPathRequest, registry: &ObstructionRegistry) -> WaypointPath {
        VertexPathfinder::new().compute_short_path(request, registry, &self.terrain_only_grid)
    }

    // ---------------------------------------------------------------------
    // Synchronous queries
    // ---------------------------------------------------------------------

    /// Whether the goal can be reached from `start` at all.
    pub fn is_goal_reachable(&self, start: Vec2Fixed, goal: &PathGoal, pass_class: PassClass) -> bool {
        if self.grid_size == 0 {
            return false;
        }
        let (mut i, mut j) = nearest_navcell(start, self.grid_size, self.grid_size);
        if !is_passable(self.grid.get(i, j), pass_class) {
            (i, j) = self.hier.find_nearest_passable_navcell(i, j, pass_class);
        }
        self.hier.is_goal_reachable(i, j, goal, pass_class)
    }

    /// Whether a unit of radius `r` can move in a straight line from `a` to `b`.
    ///
    /// Units are tested with relaxed clearance; terrain uses the terrain-only grid.
    pub fn check_movement<F: ObstructionFilter + ?Sized>(
        &self,
        registry: &ObstructionRegistry,
        filter: &F,
        a: Vec2Fixed,
        b: Vec2Fixed,
        r: Fixed,
        pass_class: PassClass,
    ) -> bool {
        if registry.test_line(filter, a, b, r, true) {
            return false;
        }
        check_line_movement(a, b, pass_class, &self.terrain_only_grid)
    }

    /// Whether a unit of radius `r` could stand at `pos`.
    pub fn check_unit_placement<F: ObstructionFilter + ?Sized>(
        &self,
        registry: &ObstructionRegistry,
        filter: &F,
        pos: Vec2Fixed,
        r: Fixed,
        pass_class: PassClass,
    ) -> FoundationCheck {
        if !registry.test_unit_shape(filter, pos, r).is_empty() {
            return FoundationCheck::FailObstructsFoundation;
        }
        if self.grid_size == 0 {
            return FoundationCheck::FailError;
        }
        let (i, j) = nearest_navcell(pos, self.grid_size, self.grid_size);
        if !is_passable(self.grid.get(i, j), pass_class) {
            return FoundationCheck::FailTerrainClass;
        }
        FoundationCheck::Success
    }

    /// Whether a building of full size `width` x `depth` could be placed.
    ///
    /// The footprint is grown by the class clearance and every navcell it
    /// covers must be passable terrain.
    pub fn check_building_placement<F: ObstructionFilter + ?Sized>(
        &self,
        registry: &ObstructionRegistry,
        filter: &F,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
        pass_class: PassClass,
    ) -> FoundationCheck {
        if !registry
            .test_static_shape(filter, center, angle, width, depth)
            .is_empty()
        {
            return FoundationCheck::FailObstructsFoundation;
        }
        if self.grid_size == 0 {
            return FoundationCheck::FailError;
        }

        let square = registry.get_static_shape_obstruction(center, angle, width, depth);
        let expand = self
            .passability_from_mask(pass_class)
            .map_or(Fixed::ZERO, |c| c.clearance);
        let (w, h) = (
            i32::from(self.terrain_only_grid.width()),
            i32::from(self.terrain_only_grid.height()),
        );
        for span in rasterize_rect_with_clearance(&square, expand, NAVCELL_SIZE) {
            if span.i0 < 0 || span.i1 > w || span.j < 0 || span.j >= h {
                return FoundationCheck::FailTerrainClass;
            }
            let j = span.j as u16;
            if (span.i0..span.i1).any(|i| !is_passable(self.terrain_only_grid.get(i as u16, j), pass_class)) {
                return FoundationCheck::FailTerrainClass;
            }
        }
        FoundationCheck::Success
    }

    /// Spread units on growing rings around `center`.
    ///
    /// Ring slots on navcells impassable for `pass_class` are skipped while
    /// the grid allows it. Slots are then swapped between units until no swap
    /// shortens the summed squared walking distance. Returns one position per
    /// entry of `unit_positions`, in the same order.
    pub fn distribute_around(
        &self,
        unit_positions: &[Vec2Fixed],
        center: Vec2Fixed,
        pass_class: PassClass,
    ) -> Vec<Vec2Fixed> {
        let n = unit_positions.len();
        let mut positions = Vec::with_capacity(n);
        if n == 0 {
            return positions;
        }

        let increment = Fixed::from_num(7) / 4;
        let ring_step = |radius: Fixed| Fixed::from_num(9) / (PI * radius);
        let mut angle = Fixed::ZERO;
        let mut radius = Fixed::ONE;
        let mut angle_step = ring_step(radius);
        let max_attempts = n * 64;
        let mut attempts = 0;

        while positions.len() < n {
            let candidate = center + Vec2Fixed::new(radius, Fixed::ZERO).rotate(angle);
            attempts += 1;
            if attempts > max_attempts || self.is_passable_at(candidate, pass_class) {
                positions.push(candidate);
            }
            angle += angle_step;
            if angle >= PI * 2 {
                angle = Fixed::ZERO;
                radius += increment;
                angle_step = ring_step(radius);
            }
        }

        let dist_sq = |a: Vec2Fixed, b: Vec2Fixed| -> i64 {
            let dx = (a.x - b.x).ceil().to_num::<i64>();
            let dy = (a.y - b.y).ceil().to_num::<i64>();
            dx * dx + dy * dy
        };
        let mut improved = true;
        while improved {
            improved = false;
            for i in 0..n {
                for j in (i + 1)..n {
                    let current = dist_sq(positions[i], unit_positions[i]) + dist_sq(positions[j], unit_positions[j]);
                    let swapped = dist_sq(positions[j], unit_positions[i]) + dist_sq(positions[i], unit_positions[j]);
                    if swapped < current {
                        positions.swap(i, j);
                        improved = true;
                    }
                }
            }
        }
        positions
    }

    fn is_passable_at(&self, pos: Vec2Fixed, pass_class: PassClass) -> bool {
        if self.grid_size == 0 {
            return true;
        }
        let size = Fixed::from_num(self.grid_size) * NAVCELL_SIZE;
        if pos.x < Fixed::ZERO || pos.y < Fixed::ZERO || pos.x >= size || pos.y >= size {
            return false;
        }
        let (i, j) = nearest_navcell(pos, self.grid_size, self.grid_size);
        is_passable(self.grid.get(i, j), pass_class)
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Encode the request queues, the ticket counter and the grid size.
    pub fn serialize_state(&self) -> Result<Vec<u8>> {
        let state = PathfinderState {
            long_requests: self.long_requests.requests.clone(),
            short_requests: self.short_requests.requests.clone(),
            next_ticket: self.next_ticket,
            grid_size: self.grid_size,
        };
        bincode::serialize(&state).map_err(|e| NavError::Serialization(e.to_string()))
    }

    /// Restore state written by [`Self::serialize_state`].
    ///
    /// Call [`Self::on_deserialized`] afterwards to rebuild the grids.
    pub fn deserialize_state(&mut self, bytes: &[u8]) -> Result<()> {
        let state: PathfinderState =
            bincode::deserialize(bytes).map_err(|e| NavError::Serialization(e.to_string()))?;
        self.long_requests = PathRequests {
            requests: state.long_requests,
            ..PathRequests::default()
        };
        self.short_requests = PathRequests {
            requests: state.short_requests,
            ..PathRequests::default()
        };
        self.next_ticket = state.next_ticket;
        self.grid_size = state.grid_size;
        self.terrain_dirty = true;
        Ok(())
    }

    /// Rebuild derived data after a load and arm the whole backlog.
    pub fn on_deserialized(&mut self, terrain: &dyn TerrainSampler, registry: &mut ObstructionRegistry) {
        // Force the resize path so every grid is reallocated.
        self.grid = Grid::default();
        self.update_grid(terrain, registry);
        if self.has_pending_requests() {
            self.start_processing_moves(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstruction::{NullFilter, ObstructionFlags};
    use crate::terrain::HeightmapTerrain;

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    fn p(x: f64, y: f64) -> Vec2Fixed {
        Vec2Fixed::new(fx(x), fx(y))
    }

    fn setup(worker_threads: usize) -> (Pathfinder, ObstructionRegistry, HeightmapTerrain) {
        let config = NavConfig {
            worker_threads,
            max_same_turn_moves: 2,
            ..NavConfig::default()
        };
        let pathfinder = Pathfinder::new(&config).expect("valid config");
        let terrain = HeightmapTerrain::flat(16, Fixed::ZERO);
        let mut registry = ObstructionRegistry::new();
        registry.set_bounds(fx(64.0), fx(64.0), pathfinder.max_clearance());
        (pathfinder, registry, terrain)
    }

    fn blocking() -> ObstructionFlags {
        ObstructionFlags::BLOCK_MOVEMENT
            | ObstructionFlags::BLOCK_PATHFINDING
            | ObstructionFlags::BLOCK_FOUNDATION
    }

    #[test]
    fn test_unknown_pass_class() {
        let (pf, _, _) = setup(0);
        assert_eq!(pf.get_pass_class("default").ok(), Some(1));
        assert!(matches!(pf.get_pass_class("nope"), Err(NavError::UnknownPassClass(_))));
    }

    #[test]
    fn test_tickets_increase() {
        let (mut pf, _, _) = setup(0);
        let a = pf.compute_path_async(p(10.0, 10.0), PathGoal::point(p(20.0, 20.0)), 1, 5);
        let b = pf.compute_short_path_async(
            p(10.0, 10.0),
            fx(0.8),
            fx(12.0),
            PathGoal::point(p(20.0, 20.0)),
            1,
            true,
            5,
            5,
        );
        assert!(b > a);
    }

    #[test]
    fn test_update_grid_is_idempotent() {
        let (mut pf, mut reg, terrain) = setup(0);
        reg.add_static_shape(3, p(32.0, 32.0), Fixed::ZERO, fx(6.0), fx(6.0), blocking(), 3, 0);
        pf.update_grid(&terrain, &mut reg);
        let first = pf.grid().clone();
        pf.update_grid(&terrain, &mut reg);
        assert_eq!(pf.grid(), &first);
        assert!(!is_passable(first.get(32, 32), 1));
        assert!(is_passable(first.get(20, 20), 1));
    }

    #[test]
    fn test_moving_a_shape_restores_cells() {
        let (mut pf, mut reg, terrain) = setup(0);
        let tag = reg.add_static_shape(3, p(20.0, 20.0), Fixed::ZERO, fx(4.0), fx(4.0), blocking(), 3, 0);
        pf.update_grid(&terrain, &mut reg);
        assert!(!is_passable(pf.grid().get(20, 20), 1));

        reg.move_shape(tag, p(40.0, 40.0), Fixed::ZERO);
        pf.update_grid(&terrain, &mut reg);
        assert!(is_passable(pf.grid().get(20, 20), 1));
        assert!(!is_passable(pf.grid().get(40, 40), 1));
    }

    #[test]
    fn test_request_queue_holds_types_without_default() {
        #[derive(Debug, Clone, PartialEq)]
        struct Opaque(u32);

        let mut queue = PathRequests::<Opaque>::default();
        queue.requests.extend((0..5).map(Opaque));
        queue.prepare_for_computation(2);
        assert_eq!(queue.armed(), &[Opaque(3), Opaque(4)]);
        queue.clear_computed();
        assert_eq!(queue.requests, vec![Opaque(0), Opaque(1), Opaque(2)]);
    }

    #[test]
    fn test_batch_respects_cap_and_order() {
        let (mut pf, mut reg, terrain) = setup(2);
        pf.update_grid(&terrain, &mut reg);

        let goal = PathGoal::point(p(30.5, 30.5));
        let tickets: Vec<Ticket> = (0..3)
            .map(|i| pf.compute_path_async(p(10.5, 10.5), goal, 1, 100 + i))
            .collect();
        let short = pf.compute_short_path_async(p(10.0, 10.0), fx(0.8), fx(12.0), goal, 1, true, 7, 7);

        pf.start_processing_moves(true);
        let results = pf.send_requested_paths(&reg);
        let got: Vec<Ticket> = results.iter().map(|r| r.ticket).collect();
        // Short results first, then the two newest long requests.
        assert_eq!(got, vec![short, tickets[1], tickets[2]]);
        assert!(results.iter().all(|r| !r.path.is_empty()));

        pf.start_processing_moves(true);
        let rest = pf.send_requested_paths(&reg);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].ticket, tickets[0]);
        assert!(!pf.has_pending_requests());
    }

    #[test]
    fn test_uncapped_batch_splits_between_caller_and_pool() {
        let (mut pf, mut reg, terrain) = setup(2);
        pf.update_grid(&terrain, &mut reg);

        let goals: Vec<PathGoal> = (0..5).map(|k| PathGoal::point(p(20.5 + f64::from(k) * 6.0, 40.5))).collect();
        let tickets: Vec<Ticket> = goals
            .iter()
            .map(|goal| pf.compute_path_async(p(10.5, 10.5), *goal, 1, 9))
            .collect();

        pf.start_processing_moves(false);
        let results = pf.send_requested_paths(&reg);
        let got: Vec<Ticket> = results.iter().map(|r| r.ticket).collect();
        assert_eq!(got, tickets);
        for (result, goal) in results.iter().zip(&goals) {
            assert_eq!(result.path, pf.compute_path_immediate(p(10.5, 10.5), goal, 1));
        }
    }

    #[test]
    fn test_requests_after_arming_wait() {
        let (mut pf, mut reg, terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        let goal = PathGoal::point(p(30.5, 30.5));
        let first = pf.compute_path_async(p(10.5, 10.5), goal, 1, 1);
        pf.start_processing_moves(true);
        let late = pf.compute_path_async(p(10.5, 10.5), goal, 1, 2);

        let results = pf.send_requested_paths(&reg);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ticket, first);
        assert!(pf.has_pending_requests());

        pf.start_processing_moves(true);
        assert_eq!(pf.send_requested_paths(&reg)[0].ticket, late);
    }

    #[test]
    fn test_unit_placement() {
        let (mut pf, mut reg, terrain) = setup(0);
        reg.add_static_shape(3, p(32.0, 32.0), Fixed::ZERO, fx(6.0), fx(6.0), blocking(), 3, 0);
        pf.update_grid(&terrain, &mut reg);

        assert_eq!(
            pf.check_unit_placement(&reg, &NullFilter, p(20.0, 20.0), fx(0.8), 1),
            FoundationCheck::Success
        );
        assert_eq!(
            pf.check_unit_placement(&reg, &NullFilter, p(32.0, 32.0), fx(0.8), 1),
            FoundationCheck::FailObstructsFoundation
        );
        // Map edge: not an obstruction, but impassable terrain.
        assert_eq!(
            pf.check_unit_placement(&reg, &NullFilter, p(2.5, 30.0), fx(0.8), 1),
            FoundationCheck::FailTerrainClass
        );
    }

    #[test]
    fn test_building_placement() {
        let (mut pf, mut reg, terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        let class = pf.get_pass_class("building_land").expect("configured");

        assert_eq!(
            pf.check_building_placement(&reg, &NullFilter, p(30.0, 30.0), Fixed::ZERO, fx(8.0), fx(8.0), class),
            FoundationCheck::Success
        );
        assert_eq!(
            pf.check_building_placement(&reg, &NullFilter, p(6.0, 30.0), Fixed::ZERO, fx(8.0), fx(8.0), class),
            FoundationCheck::FailTerrainClass
        );

        reg.add_unit_shape(9, p(31.0, 31.0), fx(0.8), blocking(), 9);
        assert_eq!(
            pf.check_building_placement(&reg, &NullFilter, p(30.0, 30.0), Fixed::ZERO, fx(8.0), fx(8.0), class),
            FoundationCheck::FailObstructsFoundation
        );
    }

    #[test]
    fn test_check_movement_blocked_by_building() {
        let (mut pf, mut reg, terrain) = setup(0);
        reg.add_static_shape(3, p(32.0, 32.0), Fixed::ZERO, fx(6.0), fx(6.0), blocking(), 3, 0);
        pf.update_grid(&terrain, &mut reg);

        assert!(pf.check_movement(&reg, &NullFilter, p(20.0, 20.0), p(25.0, 20.0), fx(0.8), 1));
        assert!(!pf.check_movement(&reg, &NullFilter, p(25.0, 32.0), p(40.0, 32.0), fx(0.8), 1));
    }

    #[test]
    fn test_distribute_around() {
        let (mut pf, mut reg, terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        let units = vec![p(20.0, 32.0), p(44.0, 32.0), p(32.0, 20.0), p(32.0, 44.0), p(30.0, 30.0)];
        let spots = pf.distribute_around(&units, p(32.0, 32.0), 1);

        assert_eq!(spots.len(), units.len());
        for (i, a) in spots.iter().enumerate() {
            for b in &spots[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // The unit standing west of the centre keeps a western slot.
        assert!(spots[0].x < fx(32.0));
    }

    #[test]
    fn test_goal_reachability() {
        let (mut pf, mut reg, terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        assert!(pf.is_goal_reachable(p(10.0, 10.0), &PathGoal::point(p(50.0, 50.0)), 1));
        // A start on the impassable border snaps to the nearest passable cell.
        assert!(pf.is_goal_reachable(p(1.0, 1.0), &PathGoal::point(p(50.0, 50.0)), 1));
    }

    #[test]
    fn test_state_survives_save_and_load() {
        let (mut pf, mut reg, terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        let goal = PathGoal::point(p(30.5, 30.5));
        let ticket = pf.compute_path_async(p(10.5, 10.5), goal, 1, 4);
        let bytes = pf.serialize_state().expect("serialize");

        let (mut loaded, mut reg2, _) = setup(0);
        loaded.deserialize_state(&bytes).expect("deserialize");
        loaded.on_deserialized(&terrain, &mut reg2);
        assert_eq!(loaded.grid(), pf.grid());

        let results = loaded.send_requested_paths(&reg2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ticket, ticket);
        let next = loaded.compute_path_async(p(10.5, 10.5), goal, 1, 4);
        assert_eq!(next, ticket + 1);
    }

    #[test]
    fn test_terrain_change_rebakes() {
        let (mut pf, mut reg, mut terrain) = setup(0);
        pf.update_grid(&terrain, &mut reg);
        assert!(is_passable(pf.terrain_only_grid().get(33, 33), 1));

        terrain.set_vertex_height(8, 8, fx(40.0));
        pf.terrain_changed(&terrain, &mut reg, 7, 7, 8, 8);
        assert!(!is_passable(pf.terrain_only_grid().get(33, 33), 1));

        pf.update_grid(&terrain, &mut reg);
        assert!(!is_passable(pf.grid().get(33, 33), 1));
    }

    #[test]
    fn test_terrain_change_is_local_and_matches_full_rebake() {
        let (mut pf, mut reg, mut terrain) = setup(0);
        reg.add_static_shape(1, p(36.0, 30.0), Fixed::ZERO, fx(6.0), fx(4.0), blocking(), 1, 0);
        pf.update_grid(&terrain, &mut reg);
        pf.take_dirtiness_information();

        terrain.set_vertex_height(8, 8, fx(40.0));
        pf.terrain_changed(&terrain, &mut reg, 7, 7, 8, 8);
        pf.update_grid(&terrain, &mut reg);

        let info = pf.take_dirtiness_information();
        assert!(info.dirty && !info.globally_dirty);
        assert!(info.dirtiness_grid.get(33, 33));
        assert!(!info.dirtiness_grid.get(2, 60));
        let incremental = pf.grid().clone();

        pf.water_changed(&terrain, &mut reg);
        assert_eq!(pf.grid(), &incremental);
    }
}
