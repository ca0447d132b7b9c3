//! Motion coordination.
//!
//! Runs every [`MotionController`] through the per-tick passes in a fixed
//! order and resolves unit-unit overlap by pushing. Formation controllers
//! move in their own pass before ordinary units so members aim at offsets
//! relative to where their controller ends up this tick.
//!
//! A pass goes pre-move, move, push, post-move. Nothing is committed to the
//! shared pose table until post-move, so every unit plans against the same
//! snapshot of everyone else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PushingConfig;
use crate::math::{Fixed, Vec2Fixed};
use crate::motion::{EntityTable, MotionContext, MotionController, MotionEvent};
use crate::obstruction::{ObstructionRegistry, StaticShapesFilter};
use crate::passability::PassClass;
use crate::pathfinder::{PathResult, Pathfinder};
use crate::{EntityId, INVALID_ENTITY};

/// Pressure ceiling.
pub const MAX_PRESSURE: u8 = 255;

/// Side of the buckets pushing candidates are grouped in.
const PUSHING_BUCKET_SIZE: i64 = 20;

/// Scratch state of one entity for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionState {
    /// Entity this state belongs to.
    pub entity: EntityId,
    /// Position at the start of the pass.
    pub initial_pos: Vec2Fixed,
    /// Position being computed.
    pub pos: Vec2Fixed,
    /// Accumulated push.
    pub push: Vec2Fixed,
    /// Speed at the end of the move.
    pub speed: Fixed,
    /// Facing at the start of the pass.
    pub initial_angle: Fixed,
    /// Facing being computed.
    pub angle: Fixed,
    /// Formation controller, or [`INVALID_ENTITY`].
    pub control_group: EntityId,
    /// Group static shapes are filtered with.
    pub group: EntityId,
    /// Clearance radius.
    pub clearance: Fixed,
    /// Passability class mask.
    pub pass_class: PassClass,
    /// Pushing pressure.
    pub pushing_pressure: u8,
    /// Excluded from pushing.
    pub ignore: bool,
    /// Runs move and post-move this pass.
    pub need_update: bool,
    /// Took the straight-line shortcut.
    pub went_straight: bool,
    /// The move was blocked.
    pub was_obstructed: bool,
    /// Counts as moving for pushing and obstruction tests.
    pub is_moving: bool,
    /// Waypoint the move was heading for, if any.
    pub waypoint: Option<Vec2Fixed>,
}

impl MotionState {
    /// Fresh state for an entity standing at `pos` facing `angle`.
    #[must_use]
    pub fn new(entity: EntityId, pos: Vec2Fixed, angle: Fixed) -> Self {
        Self {
            entity,
            initial_pos: pos,
            pos,
            initial_angle: angle,
            angle,
            control_group: INVALID_ENTITY,
            group: entity,
            ..Self::default()
        }
    }
}

/// Owner of every motion controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotionCoordinator {
    units: BTreeMap<EntityId, MotionController>,
    formation_controllers: BTreeMap<EntityId, MotionController>,
    #[serde(skip)]
    pushing: PushingConfig,
    #[serde(skip)]
    computing_motion: bool,
}

/// Mutable world pieces a pass works on.
pub struct MotionWorld<'a> {
    /// Poses, committed during post-move.
    pub entities: &'a mut EntityTable,
    /// Shapes, moved along with their entities.
    pub registry: &'a mut ObstructionRegistry,
    /// Grid queries and path requests.
    pub pathfinder: &'a mut Pathfinder,
    /// Outgoing notifications.
    pub events: &'a mut Vec<MotionEvent>,
}

impl MotionCoordinator {
    /// Create a coordinator with the given pushing tuning.
    #[must_use]
    pub fn new(pushing: PushingConfig) -> Self {
        Self {
            units: BTreeMap::new(),
            formation_controllers: BTreeMap::new(),
            pushing,
            computing_motion: false,
        }
    }

    /// Register a controller, replacing any previous one for the entity.
    pub fn register(&mut self, controller: MotionController) {
        let entity = controller.entity();
        self.unregister(entity);
        if controller.is_formation_controller() {
            self.formation_controllers.insert(entity, controller);
        } else {
            self.units.insert(entity, controller);
        }
    }

    /// Forget an entity's controller.
    pub fn unregister(&mut self, entity: EntityId) -> Option<MotionController> {
        self.units
            .remove(&entity)
            .or_else(|| self.formation_controllers.remove(&entity))
    }

    /// Controller of an entity.
    pub fn get(&self, entity: EntityId) -> Option<&MotionController> {
        self.units
            .get(&entity)
            .or_else(|| self.formation_controllers.get(&entity))
    }

    /// Mutable controller of an entity.
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut MotionController> {
        match self.units.get_mut(&entity) {
            Some(ctl) => Some(ctl),
            None => self.formation_controllers.get_mut(&entity),
        }
    }

    /// All controllers, formation controllers first.
    pub fn controllers(&self) -> impl Iterator<Item = &MotionController> {
        self.formation_controllers.values().chain(self.units.values())
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.units.len() + self.formation_controllers.len()
    }

    /// Whether no controller is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a move pass is running.
    pub fn is_computing_motion(&self) -> bool {
        self.computing_motion
    }

    /// Whether pushing is active.
    pub fn is_pushing_activated(&self) -> bool {
        self.pushing.enabled()
    }

    /// Replace the pushing tuning, which is not part of saved state.
    pub fn set_pushing_config(&mut self, pushing: PushingConfig) {
        self.pushing = pushing;
    }

    /// Pushing tuning.
    pub fn pushing_config(&self) -> &PushingConfig {
        &self.pushing
    }

    /// Early-turn checks for every controller.
    pub fn on_turn_start(&mut self, world: &mut MotionWorld<'_>) {
        refresh_move_requested(world.entities, &self.formation_controllers);
        refresh_move_requested(world.entities, &self.units);
        let mut ctx = MotionContext {
            entities: &*world.entities,
            registry: &*world.registry,
            pathfinder: &mut *world.pathfinder,
            events: &mut *world.events,
            computing_motion: false,
        };
        for ctl in self
            .formation_controllers
            .values_mut()
            .chain(self.units.values_mut())
        {
            ctl.on_turn_start(&mut ctx);
        }
    }

    /// Hand finished path computations to the controllers that asked for them.
    pub fn deliver_path_results(&mut self, results: &[PathResult], world: &mut MotionWorld<'_>) {
        let mut ctx = MotionContext {
            entities: &*world.entities,
            registry: &*world.registry,
            pathfinder: &mut *world.pathfinder,
            events: &mut *world.events,
            computing_motion: false,
        };
        for result in results {
            let ctl = match self.units.get_mut(&result.notify) {
                Some(ctl) => ctl,
                None => match self.formation_controllers.get_mut(&result.notify) {
                    Some(ctl) => ctl,
                    None => {
                        tracing::debug!(entity = result.notify, ticket = result.ticket, "path result for unknown entity");
                        continue;
                    }
                },
            };
            ctl.path_result(&mut ctx, result.ticket, &result.path);
        }
    }

    /// Move formation controllers, then units.
    pub fn update(&mut self, dt: Fixed, world: &mut MotionWorld<'_>) {
        let mut controllers = std::mem::take(&mut self.formation_controllers);
        self.run_pass(&mut controllers, dt, world);
        self.formation_controllers = controllers;

        let mut units = std::mem::take(&mut self.units);
        self.run_pass(&mut units, dt, world);
        self.units = units;
    }

    fn run_pass(&mut self, controllers: &mut BTreeMap<EntityId, MotionController>, dt: Fixed, world: &mut MotionWorld<'_>) {
        // The map not being moved this pass is still in place; the other one is `controllers`.
        refresh_move_requested(world.entities, &self.formation_controllers);
        refresh_move_requested(world.entities, &self.units);
        refresh_move_requested(world.entities, controllers);

        // 1. Pre-move
        let mut states: Vec<MotionState> = Vec::with_capacity(controllers.len());
        for (&entity, ctl) in controllers.iter() {
            let Some(pose) = world.entities.get(&entity) else {
                continue;
            };
            let mut state = MotionState::new(entity, pose.position, pose.angle);
            ctl.pre_move(&mut state, pose.in_world);
            if !pose.in_world {
                state.ignore = true;
            }
            if ctl.blocks_movement() {
                if let Some(tag) = pose.obstruction {
                    world.registry.set_unit_moving_flag(tag, state.is_moving);
                    world.registry.set_unit_control_group(tag, state.group);
                }
            }
            states.push(state);
        }

        // 2. Move
        self.computing_motion = true;
        {
            let ctx = MotionContext {
                entities: &*world.entities,
                registry: &*world.registry,
                pathfinder: &mut *world.pathfinder,
                events: &mut *world.events,
                computing_motion: true,
            };
            for state in states.iter_mut().filter(|s| s.need_update) {
                if let Some(ctl) = controllers.get_mut(&state.entity) {
                    ctl.move_step(&ctx, state, dt);
                }
            }
        }

        // 3. Push
        if self.pushing.enabled() {
            apply_pushing(&mut states, &self.pushing, dt, &*world.registry, &*world.pathfinder);
        }
        self.computing_motion = false;

        // 4. Post-move
        for state in &states {
            let Some(ctl) = controllers.get_mut(&state.entity) else {
                continue;
            };
            ctl.set_pushing_pressure(state.pushing_pressure);
            if !state.need_update {
                continue;
            }

            if let Some(pose) = world.entities.get_mut(&state.entity) {
                pose.previous_position = state.initial_pos;
                pose.position = state.pos;
                pose.angle = state.angle;
                if let Some(tag) = pose.obstruction {
                    if state.pos != state.initial_pos || state.angle != state.initial_angle {
                        world.registry.move_shape(tag, state.pos, state.angle);
                    }
                }
            }

            let mut ctx = MotionContext {
                entities: &*world.entities,
                registry: &*world.registry,
                pathfinder: &mut *world.pathfinder,
                events: &mut *world.events,
                computing_motion: false,
            };
            ctl.post_move(&mut ctx, state, dt);
        }
    }
}

fn refresh_move_requested(entities: &mut EntityTable, controllers: &BTreeMap<EntityId, MotionController>) {
    for (entity, ctl) in controllers {
        if let Some(pose) = entities.get_mut(entity) {
            pose.move_requested = ctl.is_move_requested();
        }
    }
}

fn bucket_of(pos: Vec2Fixed) -> (i64, i64) {
    let size = Fixed::from_num(PUSHING_BUCKET_SIZE);
    ((pos.x / size).floor().to_num(), (pos.y / size).floor().to_num())
}

/// Accumulate the symmetric push between two entities.
///
/// Does nothing when either is ignored or they are farther apart than the
/// pushing reach.
pub fn push(a: &mut MotionState, b: &mut MotionState, config: &PushingConfig) {
    if a.ignore || b.ignore {
        return;
    }

    let combined = (a.clearance + b.clearance) * config.radius_multiplier;
    let same_group = a.control_group != INVALID_ENTITY && a.control_group == b.control_group;
    let moving = a.is_moving || b.is_moving;
    let mut max_dist = combined;
    if !same_group {
        max_dist += if moving {
            config.moving_extension
        } else {
            config.static_extension
        };
    }

    let offset = a.pos - b.pos;
    if offset.compare_length(max_dist).is_gt() {
        return;
    }

    let mut length = offset.length();
    let direction = if length <= Fixed::from_bits(1 << 16) {
        // Stacked exactly; split along an axis picked by id so both sides agree.
        length = Fixed::ZERO;
        if a.entity % 2 == 1 {
            Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)
        } else {
            Vec2Fixed::new(Fixed::ZERO, Fixed::ONE)
        }
    } else {
        offset / length
    };

    let spread = if moving {
        config.moving_spread
    } else {
        config.static_spread
    };
    let band_start = combined * (Fixed::ONE - spread);
    let band = max_dist - band_start;
    let factor = if band > Fixed::ZERO {
        ((max_dist - length) / band).min(Fixed::ONE)
    } else {
        Fixed::ONE
    };
    let magnitude = (max_dist - length) * factor;

    let mut impulse = direction * magnitude;

    // Units walking into each other along one line would cancel out forever;
    // both step to the same relative side instead.
    if a.is_moving && b.is_moving && (a.pos - a.initial_pos).dot(b.pos - b.initial_pos) < Fixed::ZERO {
        impulse += direction.perpendicular() * (magnitude / 2);
    }

    a.push += impulse;
    b.push -= impulse;
}

/// Pair up nearby entities, accumulate pushes and apply them.
fn apply_pushing(
    states: &mut [MotionState],
    config: &PushingConfig,
    dt: Fixed,
    registry: &ObstructionRegistry,
    pathfinder: &Pathfinder,
) {
    let mut buckets: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (index, state) in states.iter().enumerate() {
        if !state.ignore {
            buckets.entry(bucket_of(state.pos)).or_default().push(index);
        }
    }

    for i in 0..states.len() {
        if states[i].ignore {
            continue;
        }
        let (bx, by) = bucket_of(states[i].pos);
        let mut neighbours: Vec<usize> = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(bucket) = buckets.get(&(bx + dx, by + dy)) {
                    neighbours.extend(bucket.iter().copied().filter(|&j| j > i));
                }
            }
        }
        neighbours.sort_unstable();
        for j in neighbours {
            let (left, right) = states.split_at_mut(j);
            push(&mut left[i], &mut right[0], config);
        }
    }

    for state in states.iter_mut().filter(|s| !s.ignore) {
        let length = state.push.length();
        if length <= config.minimal_pushing {
            state.push = Vec2Fixed::ZERO;
        } else {
            let gained: i64 = (length * config.pressure_strength).to_num();
            let pressure = i64::from(state.pushing_pressure) + gained;
            state.pushing_pressure = u8::try_from(pressure.min(i64::from(MAX_PRESSURE))).unwrap_or(MAX_PRESSURE);

            let mut step = if length > config.max_push_speed {
                state.push.normalize_to(config.max_push_speed)
            } else {
                state.push
            };
            step = step * dt;

            let filter = StaticShapesFilter { group: state.group };
            let target = state.pos + step;
            if pathfinder.check_movement(registry, &filter, state.pos, target, state.clearance, state.pass_class) {
                state.pos = target;
                state.need_update = true;
            }
        }
        state.push = Vec2Fixed::ZERO;
    }

    for state in states.iter_mut() {
        state.pushing_pressure = state.pushing_pressure.saturating_sub(config.pressure_decay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(n: f64) -> Fixed {
        Fixed::from_num(n)
    }

    fn state(entity: EntityId, x: f64, y: f64) -> MotionState {
        let mut s = MotionState::new(entity, Vec2Fixed::new(fx(x), fx(y)), Fixed::ZERO);
        s.clearance = fx(0.8);
        s
    }

    #[test]
    fn test_push_is_symmetric() {
        let config = PushingConfig::default();
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 11.0, 10.0);
        push(&mut a, &mut b, &config);
        assert!(a.push.x < Fixed::ZERO);
        assert_eq!(a.push, -b.push);
    }

    #[test]
    fn test_push_out_of_reach() {
        let config = PushingConfig::default();
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 30.0, 10.0);
        push(&mut a, &mut b, &config);
        assert!(a.push.is_zero() && b.push.is_zero());
    }

    #[test]
    fn test_stacked_units_split_by_id() {
        let config = PushingConfig::default();
        let mut a = state(3, 10.0, 10.0);
        let mut b = state(4, 10.0, 10.0);
        push(&mut a, &mut b, &config);
        assert!(a.push.x > Fixed::ZERO);
        assert_eq!(a.push.y, Fixed::ZERO);
        assert_eq!(a.push, -b.push);
    }

    #[test]
    fn test_ignored_units_are_not_pushed() {
        let config = PushingConfig::default();
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 10.5, 10.0);
        b.ignore = true;
        push(&mut a, &mut b, &config);
        assert!(a.push.is_zero());
    }

    #[test]
    fn test_same_group_has_shorter_reach() {
        let config = PushingConfig::default();
        // Beyond combined clearance but within the idle extension.
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 13.0, 10.0);
        push(&mut a, &mut b, &config);
        assert!(!a.push.is_zero());

        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 13.0, 10.0);
        a.control_group = 7;
        b.control_group = 7;
        push(&mut a, &mut b, &config);
        assert!(a.push.is_zero());
    }

    #[test]
    fn test_moving_reach_is_longer() {
        let config = PushingConfig::default();
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 14.75, 10.0);
        push(&mut a, &mut b, &config);
        assert!(a.push.is_zero());

        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 14.75, 10.0);
        a.is_moving = true;
        push(&mut a, &mut b, &config);
        assert!(!a.push.is_zero());
    }

    #[test]
    fn test_opposing_movers_sidestep() {
        let config = PushingConfig::default();
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 11.0, 10.0);
        a.initial_pos = Vec2Fixed::new(fx(9.0), fx(10.0));
        b.initial_pos = Vec2Fixed::new(fx(12.0), fx(10.0));
        a.is_moving = true;
        b.is_moving = true;
        push(&mut a, &mut b, &config);
        assert!(a.push.x < Fixed::ZERO);
        assert!(a.push.y != Fixed::ZERO);
        assert_eq!(a.push, -b.push);

        // Walking the same way: straight apart only.
        let mut a = state(1, 10.0, 10.0);
        let mut b = state(2, 11.0, 10.0);
        a.initial_pos = Vec2Fixed::new(fx(9.0), fx(10.0));
        b.initial_pos = Vec2Fixed::new(fx(10.0), fx(10.0));
        a.is_moving = true;
        b.is_moving = true;
        push(&mut a, &mut b, &config);
        assert_eq!(a.push.y, Fixed::ZERO);
    }

    #[test]
    fn test_bucket_of_negative_coordinates() {
        assert_eq!(bucket_of(Vec2Fixed::new(fx(-1.0), fx(39.0))), (-1, 1));
    }
}
