//! Navigation world.
//!
//! [`NavWorld`] owns everything a simulation turn needs: entity poses, the
//! obstruction registry, the pathfinder with its grids and request queues,
//! and the motion coordinator. A turn runs in a fixed order:
//!
//! 1. Turn start: arrival and lost-target checks.
//! 2. Path delivery: results computed since the previous turn go to their units.
//! 3. Formation controllers move.
//! 4. Units move, push and react.
//! 5. The passability grid catches up with shape changes.
//! 6. This turn's path requests are armed for the next delivery.
//!
//! Requests issued during a turn are therefore answered at the start of the
//! next one. Everything is single-threaded and deterministic except the path
//! batch, which runs on a worker pool but only ever returns results in
//! request order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::config::NavConfig;
use crate::coordinator::{MotionCoordinator, MotionWorld};
use crate::error::{NavError, Result};
use crate::grid::TERRAIN_TILE_SIZE;
use crate::math::{Fixed, Vec2Fixed};
use crate::motion::{EntityPose, EntityTable, MotionContext, MotionController, MotionEvent, MotionParams};
use crate::obstruction::{ObstructionFlags, ObstructionRegistry, Tag};
use crate::pathfinder::Pathfinder;
use crate::terrain::{HeightmapTerrain, TerrainSampler};
use crate::{EntityId, INVALID_ENTITY};

/// Simulation turns per second.
pub const TICK_RATE: u32 = 20;

/// Duration of one turn, in seconds.
pub const TURN_LENGTH: Fixed = Fixed::from_bits((1_i64 << 32) / TICK_RATE as i64);

/// Flags of the footprint every spawned unit registers.
pub const UNIT_OBSTRUCTION_FLAGS: ObstructionFlags = ObstructionFlags::from_bits(
    ObstructionFlags::BLOCK_MOVEMENT.bits()
        | ObstructionFlags::BLOCK_FOUNDATION.bits()
        | ObstructionFlags::BLOCK_CONSTRUCTION.bits(),
);

#[derive(Serialize, Deserialize)]
struct WorldState {
    turn: u64,
    next_entity: EntityId,
    entities: EntityTable,
    registry: ObstructionRegistry,
    coordinator: MotionCoordinator,
    pathfinder: Vec<u8>,
}

/// The whole navigation subsystem of one match.
pub struct NavWorld {
    config: NavConfig,
    terrain: HeightmapTerrain,
    entities: EntityTable,
    registry: ObstructionRegistry,
    pathfinder: Pathfinder,
    coordinator: MotionCoordinator,
    turn: u64,
    next_entity: EntityId,
    pending_events: Vec<MotionEvent>,
}

impl NavWorld {
    /// Build a world over `terrain`.
    pub fn new(config: NavConfig, terrain: HeightmapTerrain) -> Result<Self> {
        config.validate()?;
        let mut pathfinder = Pathfinder::new(&config)?;
        let mut registry = ObstructionRegistry::new();
        let size = Fixed::from_num(i32::from(terrain.tiles_per_side()) * TERRAIN_TILE_SIZE);
        registry.set_bounds(size, size, pathfinder.max_clearance());
        registry.set_passability_circular(config.circular_map);
        pathfinder.update_grid(&terrain, &mut registry);

        tracing::info!(
            tiles = terrain.tiles_per_side(),
            classes = pathfinder.classes().len(),
            workers = config.worker_threads,
            "navigation world created"
        );

        Ok(Self {
            coordinator: MotionCoordinator::new(config.pushing.clone()),
            config,
            terrain,
            entities: EntityTable::new(),
            registry,
            pathfinder,
            turn: 0,
            next_entity: 1,
            pending_events: Vec::new(),
        })
    }

    fn allocate_entity(&mut self) -> EntityId {
        let id = self.next_entity;
        self.next_entity += 1;
        id
    }

    // ---------------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------------

    /// Place a unit, or a formation controller when `params` says so.
    pub fn spawn_unit(&mut self, position: Vec2Fixed, angle: Fixed, params: &MotionParams) -> Result<EntityId> {
        let id = self.allocate_entity();
        let mut controller = MotionController::new(id, params, &self.pathfinder, self.config.pushing.enabled())?;
        controller.set_hack_failure_jump(self.config.short_path_hack_failure_jump);

        let mut pose = EntityPose::at(position, angle);
        if !controller.is_formation_controller() {
            let tag = self.registry.add_unit_shape(
                id,
                position,
                controller.clearance(),
                UNIT_OBSTRUCTION_FLAGS,
                id,
            );
            pose.obstruction = Some(tag);
        }
        self.entities.insert(id, pose);
        self.coordinator.register(controller);
        tracing::debug!(entity = id, x = %position.x, y = %position.y, "unit spawned");
        Ok(id)
    }

    /// Place a static obstruction of full size `width` x `depth`.
    pub fn add_static_obstruction(
        &mut self,
        center: Vec2Fixed,
        angle: Fixed,
        width: Fixed,
        depth: Fixed,
        flags: ObstructionFlags,
    ) -> EntityId {
        let id = self.allocate_entity();
        let tag = self
            .registry
            .add_static_shape(id, center, angle, width, depth, flags, id, INVALID_ENTITY);
        let mut pose = EntityPose::at(center, angle);
        pose.obstruction = Some(tag);
        self.entities.insert(id, pose);
        id
    }

    /// Remove an entity with its controller and shape.
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.coordinator.unregister(entity);
        if let Some(pose) = self.entities.remove(&entity) {
            if let Some(tag) = pose.obstruction {
                self.registry.remove_shape(tag);
            }
        }
    }

    /// Take an entity out of the world without forgetting it.
    pub fn set_in_world(&mut self, entity: EntityId, in_world: bool) {
        if let Some(pose) = self.entities.get_mut(&entity) {
            pose.in_world = in_world;
        }
    }

    // ---------------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------------

    fn with_controller<R>(
        &mut self,
        entity: EntityId,
        f: impl FnOnce(&mut MotionController, &mut MotionContext<'_>) -> R,
    ) -> Option<R> {
        let mut controller = self.coordinator.unregister(entity)?;
        let out = {
            let mut ctx = MotionContext {
                entities: &self.entities,
                registry: &self.registry,
                pathfinder: &mut self.pathfinder,
                events: &mut self.pending_events,
                computing_motion: false,
            };
            f(&mut controller, &mut ctx)
        };
        self.coordinator.register(controller);
        Some(out)
    }

    /// Order `entity` within `[min_range, max_range]` of a point.
    pub fn move_to_point(&mut self, entity: EntityId, target: Vec2Fixed, min_range: Fixed, max_range: Fixed) -> bool {
        self.with_controller(entity, |ctl, ctx| ctl.move_to_point_range(ctx, target, min_range, max_range))
            .unwrap_or(false)
    }

    /// Order `entity` within `[min_range, max_range]` of `target`.
    pub fn move_to_target(&mut self, entity: EntityId, target: EntityId, min_range: Fixed, max_range: Fixed) -> bool {
        self.with_controller(entity, |ctl, ctx| ctl.move_to_target_range(ctx, target, min_range, max_range))
            .unwrap_or(false)
    }

    /// Put `entity` in the formation of `controller` at `offset`.
    pub fn move_to_formation_offset(&mut self, entity: EntityId, controller: EntityId, offset: Vec2Fixed) {
        self.with_controller(entity, |ctl, ctx| {
            ctl.set_member_of_formation(controller);
            ctl.move_to_formation_offset(ctx, controller, offset);
        });
    }

    /// Take `entity` out of its formation.
    pub fn leave_formation(&mut self, entity: EntityId) {
        if let Some(ctl) = self.coordinator.get_mut(entity) {
            ctl.set_member_of_formation(INVALID_ENTITY);
        }
    }

    /// Cancel the order of `entity`, turning it towards its target if configured.
    pub fn stop_moving(&mut self, entity: EntityId) {
        let facing = self
            .with_controller(entity, |ctl, ctx| ctl.stop_moving(ctx))
            .flatten();
        if let Some(angle) = facing {
            self.set_angle(entity, angle);
        }
    }

    /// Turn `entity` to face `point`.
    pub fn face_towards_point(&mut self, entity: EntityId, point: Vec2Fixed) {
        let facing = self
            .coordinator
            .get(entity)
            .and_then(|ctl| ctl.face_towards_point(&self.entities, point));
        if let Some(angle) = facing {
            self.set_angle(entity, angle);
        }
    }

    fn set_angle(&mut self, entity: EntityId, angle: Fixed) {
        if let Some(pose) = self.entities.get_mut(&entity) {
            pose.angle = angle;
            if let Some(tag) = pose.obstruction {
                self.registry.move_shape(tag, pose.position, angle);
            }
        }
    }

    /// Whether `entity` could ever get within range of `target`.
    pub fn is_target_range_reachable(&mut self, entity: EntityId, target: EntityId, min_range: Fixed, max_range: Fixed) -> bool {
        self.with_controller(entity, |ctl, ctx| ctl.is_target_range_reachable(ctx, target, min_range, max_range))
            .unwrap_or(false)
    }

    /// Where `entity` would be after `dt` seconds if nothing else moved.
    pub fn estimate_future_position(&mut self, entity: EntityId, dt: Fixed) -> Option<Vec2Fixed> {
        self.with_controller(entity, |ctl, ctx| ctl.estimate_future_position(ctx, dt))
    }

    // ---------------------------------------------------------------------
    // Terrain
    // ---------------------------------------------------------------------

    /// Change one terrain vertex and rebake the tiles around it.
    pub fn set_vertex_height(&mut self, i: u16, j: u16, height: Fixed) {
        self.terrain.set_vertex_height(i, j, height);
        let last = self.terrain.tiles_per_side().saturating_sub(1);
        self.pathfinder.terrain_changed(
            &self.terrain,
            &mut self.registry,
            i.saturating_sub(1),
            j.saturating_sub(1),
            i.min(last),
            j.min(last),
        );
    }

    /// Change the water plane and rebake everything.
    pub fn set_water_level(&mut self, level: Fixed) {
        self.terrain.set_water_level(level);
        self.pathfinder.water_changed(&self.terrain, &mut self.registry);
    }

    // ---------------------------------------------------------------------
    // Turn
    // ---------------------------------------------------------------------

    /// Advance one turn, returning the motion notifications it produced.
    pub fn tick(&mut self) -> Vec<MotionEvent> {
        let mut events = std::mem::take(&mut self.pending_events);
        {
            let mut world = MotionWorld {
                entities: &mut self.entities,
                registry: &mut self.registry,
                pathfinder: &mut self.pathfinder,
                events: &mut events,
            };

            // 1. Turn start
            self.coordinator.on_turn_start(&mut world);

            // 2. Path delivery
            let results = world.pathfinder.send_requested_paths(&*world.registry);
            self.coordinator.deliver_path_results(&results, &mut world);

            // 3-4. Formations, then units
            self.coordinator.update(TURN_LENGTH, &mut world);
        }

        // 5. Grid
        self.pathfinder.update_grid(&self.terrain, &mut self.registry);

        // 6. Arm requests
        self.pathfinder.start_processing_moves(true);

        self.turn += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(turn = self.turn, state_hash = hash, "navigation state hash");
        }

        events
    }

    /// Run `turns` turns, collecting every notification.
    pub fn run(&mut self, turns: u32) -> Vec<MotionEvent> {
        let mut events = Vec::new();
        for _ in 0..turns {
            events.extend(self.tick());
        }
        events
    }

    /// Hash of everything that must agree between peers.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.turn.hash(&mut hasher);
        self.entities.len().hash(&mut hasher);
        for (id, pose) in &self.entities {
            id.hash(&mut hasher);
            pose.position.x.to_bits().hash(&mut hasher);
            pose.position.y.to_bits().hash(&mut hasher);
            pose.angle.to_bits().hash(&mut hasher);
            pose.in_world.hash(&mut hasher);
        }
        for ctl in self.coordinator.controllers() {
            ctl.entity().hash(&mut hasher);
            ctl.current_speed().to_bits().hash(&mut hasher);
            ctl.failed_movements().hash(&mut hasher);
            ctl.pushing_pressure().hash(&mut hasher);
            ctl.expected_ticket().hash(&mut hasher);
            for wp in ctl.long_path().waypoints.iter().chain(&ctl.short_path().waypoints) {
                wp.x.to_bits().hash(&mut hasher);
                wp.y.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Turns run so far.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Pose of an entity.
    pub fn entity(&self, entity: EntityId) -> Option<&EntityPose> {
        self.entities.get(&entity)
    }

    /// Position of an entity.
    pub fn position(&self, entity: EntityId) -> Option<Vec2Fixed> {
        self.entities.get(&entity).map(|p| p.position)
    }

    /// All poses.
    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// Controller of an entity.
    pub fn controller(&self, entity: EntityId) -> Option<&MotionController> {
        self.coordinator.get(entity)
    }

    /// Mutable controller of an entity, for speed and class tweaks.
    pub fn controller_mut(&mut self, entity: EntityId) -> Option<&mut MotionController> {
        self.coordinator.get_mut(entity)
    }

    /// Obstruction tag of an entity.
    pub fn obstruction(&self, entity: EntityId) -> Option<Tag> {
        self.entities.get(&entity).and_then(|p| p.obstruction)
    }

    /// Obstruction registry.
    pub fn registry(&self) -> &ObstructionRegistry {
        &self.registry
    }

    /// Mutable obstruction registry.
    pub fn registry_mut(&mut self) -> &mut ObstructionRegistry {
        &mut self.registry
    }

    /// Pathfinder.
    pub fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    /// Motion coordinator.
    pub fn coordinator(&self) -> &MotionCoordinator {
        &self.coordinator
    }

    /// Terrain.
    pub fn terrain(&self) -> &HeightmapTerrain {
        &self.terrain
    }

    /// Configuration the world was built with.
    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Encode everything except configuration and terrain.
    pub fn save_state(&self) -> Result<Vec<u8>> {
        let state = WorldState {
            turn: self.turn,
            next_entity: self.next_entity,
            entities: self.entities.clone(),
            registry: self.registry.clone(),
            coordinator: self.coordinator.clone(),
            pathfinder: self.pathfinder.serialize_state()?,
        };
        bincode::serialize(&state).map_err(|e| NavError::Serialization(e.to_string()))
    }

    /// Rebuild a world from [`Self::save_state`] output.
    pub fn load_state(config: NavConfig, terrain: HeightmapTerrain, bytes: &[u8]) -> Result<Self> {
        let state: WorldState =
            bincode::deserialize(bytes).map_err(|e| NavError::Serialization(e.to_string()))?;
        let mut world = Self::new(config, terrain)?;
        world.turn = state.turn;
        world.next_entity = state.next_entity;
        world.entities = state.entities;
        world.registry = state.registry;
        world.registry.rebuild_after_load();
        world.coordinator = state.coordinator;
        world.coordinator.set_pushing_config(world.config.pushing.clone());
        world.pathfinder.deserialize_state(&state.pathfinder)?;
        world
            .pathfinder
            .on_deserialized(&world.terrain, &mut world.registry);
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionUpdate;

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    fn p(x: f64, y: f64) -> Vec2Fixed {
        Vec2Fixed::new(fx(x), fx(y))
    }

    fn world() -> NavWorld {
        let config = NavConfig {
            worker_threads: 0,
            ..NavConfig::default()
        };
        NavWorld::new(config, HeightmapTerrain::flat(16, Fixed::ZERO)).expect("world")
    }

    #[test]
    fn test_turn_length_matches_tick_rate() {
        // A twentieth is not exact in binary; the shortfall stays under one bit per tick.
        let second = TURN_LENGTH * i64::from(TICK_RATE);
        assert!(second <= Fixed::ONE);
        assert!(Fixed::ONE - second < Fixed::from_bits(i64::from(TICK_RATE)));
    }

    #[test]
    fn test_unit_walks_to_point() {
        let mut w = world();
        let unit = w
            .spawn_unit(p(10.0, 10.0), Fixed::ZERO, &MotionParams::default())
            .expect("spawn");
        assert!(w.move_to_point(unit, p(40.0, 40.0), Fixed::ZERO, fx(1.0)));

        let mut arrived = false;
        for _ in 0..200 {
            if w.tick()
                .iter()
                .any(|e| e.entity == unit && e.update == MotionUpdate::LikelySuccess)
            {
                arrived = true;
                break;
            }
        }
        assert!(arrived);
        let pos = w.position(unit).expect("pose");
        assert!((pos - p(40.0, 40.0)).compare_length(fx(2.0)).is_le());
    }

    #[test]
    fn test_shape_follows_unit() {
        let mut w = world();
        let unit = w
            .spawn_unit(p(10.0, 10.0), Fixed::ZERO, &MotionParams::default())
            .expect("spawn");
        w.move_to_point(unit, p(20.0, 10.0), Fixed::ZERO, Fixed::ZERO);
        w.run(20);
        let tag = w.obstruction(unit).expect("tag");
        let pos = w.position(unit).expect("pose");
        assert_ne!(pos, p(10.0, 10.0));
        assert_eq!(w.registry().get_obstruction(tag).center, pos);
    }

    #[test]
    fn test_unknown_entity_orders_fail() {
        let mut w = world();
        assert!(!w.move_to_point(99, p(20.0, 10.0), Fixed::ZERO, Fixed::ZERO));
    }

    #[test]
    fn test_identical_worlds_hash_identically() {
        let build = || {
            let mut w = world();
            for k in 0..5 {
                let id = w
                    .spawn_unit(p(10.0 + f64::from(k) * 2.0, 10.0), Fixed::ZERO, &MotionParams::default())
                    .expect("spawn");
                w.move_to_point(id, p(50.0, 50.0), Fixed::ZERO, fx(4.0));
            }
            w.run(40);
            w.state_hash()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_save_and_load_resume_identically() {
        let mut a = world();
        let unit = a
            .spawn_unit(p(10.0, 10.0), Fixed::ZERO, &MotionParams::default())
            .expect("spawn");
        a.move_to_point(unit, p(50.0, 30.0), Fixed::ZERO, Fixed::ZERO);
        a.run(5);

        let bytes = a.save_state().expect("save");
        let mut b = NavWorld::load_state(a.config().clone(), a.terrain().clone(), &bytes).expect("load");
        assert_eq!(a.state_hash(), b.state_hash());

        a.run(30);
        b.run(30);
        assert_eq!(a.position(unit), b.position(unit));
    }

    #[test]
    fn test_stop_clears_order() {
        let mut w = world();
        let unit = w
            .spawn_unit(p(10.0, 10.0), Fixed::ZERO, &MotionParams::default())
            .expect("spawn");
        w.move_to_point(unit, p(40.0, 10.0), Fixed::ZERO, Fixed::ZERO);
        w.run(3);
        w.stop_moving(unit);
        let ctl = w.controller(unit).expect("controller");
        assert!(!ctl.is_move_requested());
        assert!(ctl.long_path().is_empty() && ctl.short_path().is_empty());
    }
}
