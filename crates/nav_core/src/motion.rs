//! Per-entity motion.
//!
//! A [`MotionController`] turns a move order into path requests and
//! tick-by-tick kinematic integration. Conceptually it cycles through
//! idle, path pending, following and obstructed; the state is implicit in
//! the move request, the outstanding ticket and the cached waypoint chains.
//!
//! Controllers never touch the world directly. Everything they read comes
//! through a [`MotionContext`]; position changes are handed back to the
//! [`crate::coordinator::MotionCoordinator`] through [`MotionState`], and
//! notifications for the order-issuing layer are pushed as [`MotionEvent`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coordinator::{MotionState, MAX_PRESSURE};
use crate::error::Result;
use crate::geometry::Square;
use crate::goal::{GoalKind, PathGoal, WaypointPath};
use crate::grid::NAVCELL_SIZE;
use crate::math::{atan2, fixed_decimal, fixed_serde, fixed_sqrt, sin_cos, wrap_angle, Fixed, Vec2Fixed, PI, TAU};
use crate::obstruction::{
    are_shapes_in_range, distance_between_shapes, point_square, ObstructionRegistry, SkipTagAndControlGroupFilter,
    Tag,
};
use crate::passability::PassClass;
use crate::pathfinder::{Pathfinder, Ticket};
use crate::{EntityId, INVALID_ENTITY};

const fn cells(n: i64) -> Fixed {
    Fixed::from_bits(n << 32)
}

/// Smallest window the short-range search runs in.
pub const SHORT_PATH_MIN_SEARCH_RANGE: Fixed = cells(12);
/// Largest window the short-range search runs in.
pub const SHORT_PATH_MAX_SEARCH_RANGE: Fixed = cells(56);
/// Window growth per failed movement.
pub const SHORT_PATH_SEARCH_RANGE_INCREMENT: Fixed = cells(4);
/// Failed movements before the window starts growing.
pub const SHORT_PATH_SEARCH_RANGE_INCREASE_DELAY: u8 = 1;
/// Radius of the circle aimed at when rejoining a long waypoint.
pub const SHORT_PATH_LONG_WAYPOINT_RANGE: Fixed = cells(4);
/// Goals closer than this are reached with the short-range search only.
pub const LONG_PATH_MIN_DIST: Fixed = cells(16);
/// Targets within this distance may be walked to in a straight line.
pub const DIRECT_PATH_RANGE: Fixed = cells(24);
/// Range slack grows by one navcell per this much distance to the target.
pub const TARGET_UNCERTAINTY_MULTIPLIER: Fixed = cells(8);
/// Turns an imperfect path is followed before it is recomputed.
pub const KNOWN_IMPERFECT_PATH_RESET_COUNTDOWN: u8 = 12;
/// Consecutive failed turns before a likely failure is reported.
pub const MAX_FAILED_MOVEMENTS: u8 = 35;
/// First failed turn on which the other search is tried.
pub const ALTERNATE_PATH_TYPE_DELAY: u8 = 3;
/// Period, in failed turns, of switching search after the first switch.
pub const ALTERNATE_PATH_TYPE_EVERY: u8 = 6;
/// Failed turn on which a one-step back-away is attempted.
pub const BACKUP_HACK_DELAY: u8 = 10;
/// From this many failures on, obstruction is reported as severe.
pub const VERY_OBSTRUCTED_THRESHOLD: u8 = 10;

/// Pressure below which pushing does not slow a unit down.
const PRESSURE_MIN_THRESHOLD: i32 = 10;
/// Pressure span over which speed drops from full to the floor.
const PRESSURE_SLOWDOWN_SPAN: i32 = MAX_PRESSURE as i32 - PRESSURE_MIN_THRESHOLD - 80;
/// Slowest a pressured unit is made to walk.
const PRESSURE_FLOOR_SPEED: Fixed = Fixed::from_bits(3 << 31);

/// Notification for the layer that issued the move order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionUpdate {
    /// The unit is probably at its destination.
    LikelySuccess,
    /// The unit will probably not get there.
    LikelyFailure,
    /// This turn's move was blocked.
    Obstructed,
    /// Moves have been blocked for a while.
    VeryObstructed,
}

/// A [`MotionUpdate`] for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionEvent {
    /// Entity the update is about.
    pub entity: EntityId,
    /// What happened.
    pub update: MotionUpdate,
}

/// Where an entity stands, as seen by motion controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPose {
    /// Current position.
    pub position: Vec2Fixed,
    /// Position at the start of the previous movement.
    pub previous_position: Vec2Fixed,
    /// Facing angle; 0 faces +y, increasing clockwise.
    #[serde(with = "fixed_serde")]
    pub angle: Fixed,
    /// Whether the entity is placed in the world.
    pub in_world: bool,
    /// Obstruction shape, if any.
    pub obstruction: Option<Tag>,
    /// Whether the entity has a standing move order (refreshed every pass).
    pub move_requested: bool,
}

impl EntityPose {
    /// An in-world entity at `position` facing `angle`.
    #[must_use]
    pub fn at(position: Vec2Fixed, angle: Fixed) -> Self {
        Self {
            position,
            previous_position: position,
            angle,
            in_world: true,
            obstruction: None,
            move_requested: false,
        }
    }
}

/// Every entity's pose, keyed by id.
pub type EntityTable = BTreeMap<EntityId, EntityPose>;

/// Everything a controller may consult or mutate while it runs.
pub struct MotionContext<'a> {
    /// Poses of all entities.
    pub entities: &'a EntityTable,
    /// Obstruction shapes.
    pub registry: &'a ObstructionRegistry,
    /// Grid queries and path requests.
    pub pathfinder: &'a mut Pathfinder,
    /// Outgoing notifications.
    pub events: &'a mut Vec<MotionEvent>,
    /// Whether the move pass is running; targets are then extrapolated.
    pub computing_motion: bool,
}

/// The standing move order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MoveRequest {
    /// No order.
    #[default]
    None,
    /// Get within `[min_range, max_range]` of a point.
    Point {
        /// Target point.
        target: Vec2Fixed,
        /// Minimum range.
        #[serde(with = "fixed_serde")]
        min_range: Fixed,
        /// Maximum range; negative means unbounded.
        #[serde(with = "fixed_serde")]
        max_range: Fixed,
    },
    /// Get within `[min_range, max_range]` of another entity.
    Entity {
        /// Target entity.
        target: EntityId,
        /// Minimum range.
        #[serde(with = "fixed_serde")]
        min_range: Fixed,
        /// Maximum range; negative means unbounded.
        #[serde(with = "fixed_serde")]
        max_range: Fixed,
    },
    /// Stand at an offset from a formation controller, rotated with it.
    Offset {
        /// Formation controller entity.
        controller: EntityId,
        /// Offset in the controller's frame.
        offset: Vec2Fixed,
    },
}

impl MoveRequest {
    fn ranges(&self) -> (Fixed, Fixed) {
        match *self {
            Self::Point {
                min_range,
                max_range,
                ..
            }
            | Self::Entity {
                min_range,
                max_range,
                ..
            } => (min_range, max_range),
            Self::None | Self::Offset { .. } => (Fixed::ZERO, Fixed::ZERO),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PathKind {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ExpectedTicket {
    ticket: Ticket,
    kind: PathKind,
}

/// Template values a controller is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    /// Walking speed, world units per second.
    #[serde(with = "fixed_decimal")]
    pub walk_speed: Fixed,
    /// Running speed as a multiple of walking speed.
    #[serde(with = "fixed_decimal")]
    pub run_multiplier: Fixed,
    /// Acceleration, world units per second squared.
    #[serde(with = "fixed_decimal")]
    pub acceleration: Fixed,
    /// Angle turned without slowing down, in radians.
    #[serde(with = "fixed_decimal")]
    pub instant_turn_angle: Fixed,
    /// Rotation speed, radians per second. Zero turns instantly.
    #[serde(with = "fixed_decimal")]
    pub turn_rate: Fixed,
    /// Passability class name.
    pub pass_class: String,
    /// Whether the unit takes part in pushing.
    pub pushing: bool,
    /// Whether the entity is a formation controller.
    pub formation_controller: bool,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            walk_speed: Fixed::from_num(9),
            run_multiplier: Fixed::from_num(5) / Fixed::from_num(3),
            acceleration: Fixed::from_num(18),
            instant_turn_angle: Fixed::from_num(3) / Fixed::from_num(2),
            turn_rate: Fixed::from_num(12),
            pass_class: "default".to_string(),
            pushing: true,
            formation_controller: false,
        }
    }
}

/// Motion state machine of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionController {
    entity: EntityId,
    is_formation_controller: bool,

    #[serde(with = "fixed_serde")]
    template_walk_speed: Fixed,
    #[serde(with = "fixed_serde")]
    template_run_multiplier: Fixed,
    #[serde(with = "fixed_serde")]
    walk_speed: Fixed,
    #[serde(with = "fixed_serde")]
    run_multiplier: Fixed,
    #[serde(with = "fixed_serde")]
    speed_multiplier: Fixed,
    #[serde(with = "fixed_serde")]
    speed: Fixed,
    #[serde(with = "fixed_serde")]
    last_turn_speed: Fixed,
    #[serde(with = "fixed_serde")]
    current_speed: Fixed,
    #[serde(with = "fixed_serde")]
    instant_turn_angle: Fixed,
    #[serde(with = "fixed_serde")]
    acceleration: Fixed,
    #[serde(with = "fixed_serde")]
    turn_rate: Fixed,

    pass_class_name: String,
    pass_class: PassClass,
    #[serde(with = "fixed_serde")]
    clearance: Fixed,

    face_point_after_move: bool,
    pushing: bool,
    block_movement: bool,
    pushing_pressure: u8,

    failed_movements: u8,
    failure_reported: bool,
    follow_known_imperfect_path_countdown: u8,
    hack_failure_jump: u8,

    expected_ticket: Option<ExpectedTicket>,
    move_request: MoveRequest,
    formation_controller: EntityId,

    long_path: WaypointPath,
    short_path: WaypointPath,
}

impl MotionController {
    /// Create a controller for `entity`.
    ///
    /// Fails when the passability class is unknown to `pathfinder`.
    pub fn new(entity: EntityId, params: &MotionParams, pathfinder: &Pathfinder, pushing_enabled: bool) -> Result<Self> {
        let pass_class = pathfinder.get_pass_class(&params.pass_class)?;
        let clearance = pathfinder
            .passability_from_mask(pass_class)
            .map_or(Fixed::ZERO, |c| c.clearance);
        let run_multiplier = params.run_multiplier.max(Fixed::ONE);
        Ok(Self {
            entity,
            is_formation_controller: params.formation_controller,
            template_walk_speed: params.walk_speed,
            template_run_multiplier: run_multiplier,
            walk_speed: params.walk_speed,
            run_multiplier,
            speed_multiplier: Fixed::ONE,
            speed: params.walk_speed,
            last_turn_speed: Fixed::ZERO,
            current_speed: Fixed::ZERO,
            instant_turn_angle: params.instant_turn_angle,
            acceleration: params.acceleration,
            turn_rate: params.turn_rate,
            pass_class_name: params.pass_class.clone(),
            pass_class,
            clearance,
            face_point_after_move: true,
            pushing: params.pushing && pushing_enabled,
            block_movement: true,
            pushing_pressure: 0,
            failed_movements: 0,
            failure_reported: false,
            follow_known_imperfect_path_countdown: 0,
            hack_failure_jump: MAX_FAILED_MOVEMENTS - 2,
            expected_ticket: None,
            move_request: MoveRequest::None,
            formation_controller: INVALID_ENTITY,
            long_path: WaypointPath::default(),
            short_path: WaypointPath::default(),
        })
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Entity driven by this controller.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Whether this controller drives a formation.
    pub fn is_formation_controller(&self) -> bool {
        self.is_formation_controller
    }

    /// Whether a move order is standing.
    pub fn is_move_requested(&self) -> bool {
        self.move_request != MoveRequest::None
    }

    /// The standing move order.
    pub fn move_request(&self) -> MoveRequest {
        self.move_request
    }

    /// Speed the unit moves at when not running.
    pub fn speed(&self) -> Fixed {
        self.speed
    }

    /// Base walking speed.
    pub fn walk_speed(&self) -> Fixed {
        self.walk_speed
    }

    /// Running speed as a multiple of walking speed.
    pub fn run_multiplier(&self) -> Fixed {
        self.run_multiplier
    }

    /// Multiplier applied to walking speed.
    pub fn speed_multiplier(&self) -> Fixed {
        self.speed_multiplier
    }

    /// Speed reached at the end of the last turn.
    pub fn current_speed(&self) -> Fixed {
        self.current_speed
    }

    /// Mean speed over the last turn.
    pub fn last_turn_speed(&self) -> Fixed {
        self.last_turn_speed
    }

    /// Acceleration.
    pub fn acceleration(&self) -> Fixed {
        self.acceleration
    }

    /// Passability class mask.
    pub fn pass_class(&self) -> PassClass {
        self.pass_class
    }

    /// Passability class name.
    pub fn pass_class_name(&self) -> &str {
        &self.pass_class_name
    }

    /// Clearance radius.
    pub fn clearance(&self) -> Fixed {
        self.clearance
    }

    /// Whether the unit takes part in pushing.
    pub fn is_pushing(&self) -> bool {
        self.pushing
    }

    /// Whether the unit blocks and is blocked by movement.
    pub fn blocks_movement(&self) -> bool {
        self.block_movement
    }

    /// Current pushing pressure.
    pub fn pushing_pressure(&self) -> u8 {
        self.pushing_pressure
    }

    /// Consecutive failed movements.
    pub fn failed_movements(&self) -> u8 {
        self.failed_movements
    }

    /// Ticket of the outstanding path request.
    pub fn expected_ticket(&self) -> Option<Ticket> {
        self.expected_ticket.map(|t| t.ticket)
    }

    /// Cached long waypoints, back to front.
    pub fn long_path(&self) -> &WaypointPath {
        &self.long_path
    }

    /// Cached short waypoints, back to front.
    pub fn short_path(&self) -> &WaypointPath {
        &self.short_path
    }

    /// Whether the unit turns to face its target when stopping.
    pub fn face_point_after_move(&self) -> bool {
        self.face_point_after_move
    }

    /// Formation controller this unit belongs to, or [`INVALID_ENTITY`].
    pub fn formation(&self) -> EntityId {
        self.formation_controller
    }

    // ---------------------------------------------------------------------
    // Setters
    // ---------------------------------------------------------------------

    /// Set the speed multiplier, capped at the run multiplier.
    pub fn set_speed_multiplier(&mut self, multiplier: Fixed) {
        self.speed_multiplier = multiplier.min(self.run_multiplier);
        self.speed = self.speed_multiplier * self.walk_speed;
    }

    /// Change the walking speed.
    pub fn set_walk_speed(&mut self, speed: Fixed) {
        self.walk_speed = speed;
        self.set_speed_multiplier(self.speed_multiplier);
    }

    /// Change the run multiplier, re-capping the speed multiplier.
    pub fn set_run_multiplier(&mut self, multiplier: Fixed) {
        self.run_multiplier = multiplier;
        self.set_speed_multiplier(self.speed_multiplier);
    }

    /// Change the acceleration.
    pub fn set_acceleration(&mut self, acceleration: Fixed) {
        self.acceleration = acceleration;
    }

    /// Change the rotation speed.
    pub fn set_turn_rate(&mut self, turn_rate: Fixed) {
        self.turn_rate = turn_rate;
    }

    /// Change the angle turned without slowing.
    pub fn set_instant_turn_angle(&mut self, angle: Fixed) {
        self.instant_turn_angle = angle;
    }

    /// Whether to face the target when stopping.
    pub fn set_facing(&mut self, face: bool) {
        self.face_point_after_move = face;
    }

    /// Switch passability class. Only formation controllers may change class.
    pub fn set_pass_class(&mut self, pathfinder: &Pathfinder, name: &str) -> Result<()> {
        if !self.is_formation_controller {
            tracing::warn!(entity = self.entity, "only formation controllers may change passability class");
            return Ok(());
        }
        self.pass_class = pathfinder.get_pass_class(name)?;
        self.pass_class_name = name.to_string();
        self.clearance = pathfinder
            .passability_from_mask(self.pass_class)
            .map_or(Fixed::ZERO, |c| c.clearance);
        Ok(())
    }

    /// Override the clearance radius.
    pub fn set_clearance(&mut self, clearance: Fixed) {
        self.clearance = clearance;
    }

    /// Whether the unit blocks movement.
    pub fn set_block_movement(&mut self, block: bool) {
        self.block_movement = block;
    }

    /// Enable or disable pushing for this unit.
    pub fn set_pushing(&mut self, pushing: bool) {
        self.pushing = pushing;
    }

    /// Join a formation, or leave with [`INVALID_ENTITY`].
    pub fn set_member_of_formation(&mut self, controller: EntityId) {
        self.formation_controller = controller;
    }

    /// Failure count the short-path hack jumps to.
    pub fn set_hack_failure_jump(&mut self, jump: u8) {
        self.hack_failure_jump = jump.min(MAX_FAILED_MOVEMENTS - 1);
    }

    pub(crate) fn set_pushing_pressure(&mut self, pressure: u8) {
        self.pushing_pressure = pressure;
    }

    // ---------------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------------

    /// Move within `[min_range, max_range]` of a point.
    ///
    /// Returns `false` when the unit is not in the world.
    pub fn move_to_point_range(&mut self, ctx: &mut MotionContext<'_>, target: Vec2Fixed, min_range: Fixed, max_range: Fixed) -> bool {
        self.move_to(
            ctx,
            MoveRequest::Point {
                target,
                min_range,
                max_range,
            },
        )
    }

    /// Move within `[min_range, max_range]` of another entity.
    pub fn move_to_target_range(&mut self, ctx: &mut MotionContext<'_>, target: EntityId, min_range: Fixed, max_range: Fixed) -> bool {
        self.move_to(
            ctx,
            MoveRequest::Entity {
                target,
                min_range,
                max_range,
            },
        )
    }

    /// Move to `offset` in the frame of formation `controller`.
    pub fn move_to_formation_offset(&mut self, ctx: &mut MotionContext<'_>, controller: EntityId, offset: Vec2Fixed) {
        self.move_to(ctx, MoveRequest::Offset { controller, offset });
    }

    fn move_to(&mut self, ctx: &mut MotionContext<'_>, request: MoveRequest) -> bool {
        let (min_range, max_range) = request.ranges();
        if min_range == max_range && min_range != Fixed::ZERO {
            tracing::warn!(
                entity = self.entity,
                range = %min_range,
                "move order has equal min and max range, it may never be reached"
            );
        }

        let Some(pos) = self.own_position(ctx.entities) else {
            return false;
        };
        let Some(goal) = self.compute_goal(ctx, &request) else {
            return false;
        };

        self.move_request = request;
        self.failed_movements = 0;
        self.failure_reported = false;
        self.follow_known_imperfect_path_countdown = 0;
        self.compute_path_to_goal(ctx, pos, &goal);
        true
    }

    /// Drop the order and all cached paths.
    ///
    /// Returns the angle the unit should turn to, when it faces its target on stopping.
    pub fn stop_moving(&mut self, ctx: &MotionContext<'_>) -> Option<Fixed> {
        let mut facing = None;
        if self.face_point_after_move {
            if let (Some(pos), Some(target)) = (self.own_position(ctx.entities), self.compute_target_position(ctx, &self.move_request)) {
                facing = facing_towards(pos, target);
            }
        }

        self.move_request = MoveRequest::None;
        self.failure_reported = false;
        self.expected_ticket = None;
        self.long_path.clear();
        self.short_path.clear();
        facing
    }

    /// Angle that faces `point` from the unit's position.
    pub fn face_towards_point(&self, entities: &EntityTable, point: Vec2Fixed) -> Option<Fixed> {
        facing_towards(self.own_position(entities)?, point)
    }

    /// Whether any point within range of `target` can be reached at all.
    pub fn is_target_range_reachable(&self, ctx: &MotionContext<'_>, target: EntityId, min_range: Fixed, max_range: Fixed) -> bool {
        let Some(pos) = self.own_position(ctx.entities) else {
            return false;
        };
        let request = MoveRequest::Entity {
            target,
            min_range,
            max_range,
        };
        let Some(goal) = self.compute_goal(ctx, &request) else {
            return false;
        };
        ctx.pathfinder.is_goal_reachable(pos, &goal, self.pass_class)
    }

    /// Where the unit would be after `dt` if nothing else moved.
    pub fn estimate_future_position(&self, ctx: &MotionContext<'_>, dt: Fixed) -> Vec2Fixed {
        let Some(pose) = self.own_pose(ctx.entities) else {
            return Vec2Fixed::ZERO;
        };
        let mut pos = pose.position;
        let mut angle = pose.angle;
        let mut speed = self.current_speed;
        let mut short = self.short_path.clone();
        let mut long = self.long_path.clone();
        self.perform_move(ctx, dt, &mut short, &mut long, &mut pos, &mut speed, &mut angle, 0);
        pos
    }

    // ---------------------------------------------------------------------
    // Path results
    // ---------------------------------------------------------------------

    /// Fold the result of an asynchronous request into the cached paths.
    ///
    /// Results for any ticket other than the outstanding one are stale and dropped.
    pub fn path_result(&mut self, ctx: &mut MotionContext<'_>, ticket: Ticket, path: &WaypointPath) {
        let Some(expected) = self.expected_ticket else {
            tracing::warn!(entity = self.entity, ticket, "ignoring unexpected path result");
            return;
        };
        if expected.ticket != ticket || self.move_request == MoveRequest::None {
            tracing::warn!(entity = self.entity, ticket, expected = expected.ticket, "ignoring stale path result");
            return;
        }
        self.expected_ticket = None;

        let Some(pos) = self.own_position(ctx.entities) else {
            return;
        };

        // Long paths always aim at the goal; short ones only when no long path remains.
        let pathed_towards_goal = expected.kind == PathKind::Long || self.long_path.is_empty();

        let mut short_path_hack = false;
        if path.is_empty() {
            if !pathed_towards_goal {
                return;
            }
            short_path_hack = expected.kind == PathKind::Long;
        } else if pathed_towards_goal
            && self
                .compute_goal(ctx, &self.move_request)
                .is_some_and(|goal| reject_farther_paths(&goal, path, pos))
        {
            if !self.long_path.is_empty() {
                return;
            }
            short_path_hack = expected.kind == PathKind::Long;
        }

        if short_path_hack {
            // The grid search gave up; let the visibility search try the goal
            // itself and fail fast if it cannot either.
            self.failed_movements = self.hack_failure_jump;
            if let Some(target) = self.compute_target_position(ctx, &self.move_request) {
                self.long_path.push(target);
            }
            return;
        }

        if expected.kind == PathKind::Long {
            self.long_path = path.clone();
            // Grid paths start with short diagonal hops; skip the first
            // waypoint when the second is directly reachable.
            if self.long_path.len() >= 2 {
                if let (Some(first), Some(second)) = (self.long_path.next(), self.long_path.after_next()) {
                    if (first - pos).compare_length(NAVCELL_SIZE * 4).is_le()
                        && self.check_movement(ctx, None, pos, second)
                    {
                        self.long_path.pop();
                    }
                }
            }
        } else {
            self.short_path = path.clone();
        }

        self.follow_known_imperfect_path_countdown = 0;

        if !pathed_towards_goal {
            return;
        }

        // A path that will not bring us in range most likely leads somewhere
        // unreachable; follow it anyway instead of re-pathing every turn.
        if self.pathing_update_needed(ctx, pos) {
            if !self.increment_failed_movements_and_maybe_notify(ctx) {
                self.move_obstructed(ctx);
            }
            self.follow_known_imperfect_path_countdown = KNOWN_IMPERFECT_PATH_RESET_COUNTDOWN;
        } else if expected.kind == PathKind::Long {
            // A grid path into range again: a later failure is news.
            self.failure_reported = false;
        }
    }

    // ---------------------------------------------------------------------
    // Per-tick passes
    // ---------------------------------------------------------------------

    /// Early-turn destination and target validity check.
    pub fn on_turn_start(&mut self, ctx: &mut MotionContext<'_>) {
        if self.possibly_at_destination(ctx) {
            self.move_succeeded(ctx);
        } else if !self.target_has_valid_position(ctx.entities) {
            // Resume once the target is back; whether to give up is the caller's call.
            self.long_path.clear();
            self.short_path.clear();
            self.move_failed(ctx);
        }
    }

    /// Prepare this tick's motion state.
    pub fn pre_move(&self, state: &mut MotionState, in_world: bool) {
        state.ignore = !self.pushing || !self.block_movement;
        state.was_obstructed = false;
        state.went_straight = false;
        state.speed = self.current_speed;
        state.pushing_pressure = self.pushing_pressure;
        state.clearance = self.clearance;
        state.pass_class = self.pass_class;
        state.group = self.group();
        state.need_update = in_world
            && (self.current_speed != Fixed::ZERO
                || self.last_turn_speed != Fixed::ZERO
                || self.move_request != MoveRequest::None);

        if !self.block_movement {
            return;
        }
        state.control_group = if self.is_formation_member() {
            self.formation_controller
        } else {
            INVALID_ENTITY
        };
        state.is_moving = self.pushing && self.move_request != MoveRequest::None;
    }

    /// Attempt the straight-line shortcut then integrate along the cached paths.
    pub fn move_step(&mut self, ctx: &MotionContext<'_>, state: &mut MotionState, dt: Fixed) {
        state.went_straight = self.try_going_straight_to_target(ctx, state.initial_pos, true);
        state.waypoint = self.next_waypoint();

        let mut short = std::mem::take(&mut self.short_path);
        let mut long = std::mem::take(&mut self.long_path);
        state.was_obstructed = self.perform_move(
            ctx,
            dt,
            &mut short,
            &mut long,
            &mut state.pos,
            &mut state.speed,
            &mut state.angle,
            state.pushing_pressure,
        );
        self.short_path = short;
        self.long_path = long;
    }

    /// React to the committed movement: recovery, look-ahead and re-pathing.
    ///
    /// The pose in `ctx` must already hold the committed position.
    pub fn post_move(&mut self, ctx: &mut MotionContext<'_>, state: &MotionState, dt: Fixed) {
        if state.pos == state.initial_pos {
            self.update_movement_state(Fixed::ZERO, Fixed::ZERO);
        } else {
            let moved = (state.pos - state.initial_pos).length();
            self.update_movement_state(state.speed, moved / dt);
        }

        let moved = state.pos != state.initial_pos;
        if state.was_obstructed && self.handle_obstructed_move(ctx, moved) {
            return;
        } else if !state.was_obstructed && moved {
            if self.made_progress(state) {
                self.failed_movements = 0;
            } else if self.handle_obstructed_move(ctx, false) {
                // Pushed back at least as far as we walked.
                return;
            }
        }

        let need_path_update = self.pathing_update_needed(ctx, state.pos);

        // Look ahead along the long path so units in the way are walked around early.
        if !need_path_update && !state.was_obstructed && self.short_path.is_empty() {
            if let Some(next) = self.long_path.next() {
                let filter = self.obstruction_filter(self.target_tag(ctx.entities));
                if ctx
                    .registry
                    .test_unit_line(&filter, state.pos, next, self.clearance, true)
                {
                    if self.long_path.len() > 1 {
                        self.long_path.pop();
                        if let Some(after) = self.long_path.next() {
                            let subgoal = PathGoal::circle(after, NAVCELL_SIZE * 2);
                            self.request_short_path(ctx, state.pos, &subgoal, false);
                        }
                    } else if let Some(goal) = self.compute_goal(ctx, &self.move_request) {
                        self.request_short_path(ctx, state.pos, &goal, false);
                    }
                }
            }
        }

        if state.went_straight && !state.was_obstructed {
            self.short_path.clear();
        }

        if !state.went_straight && need_path_update {
            if let Some(goal) = self.compute_goal(ctx, &self.move_request) {
                self.compute_path_to_goal(ctx, state.pos, &goal);
            }
        } else if self.follow_known_imperfect_path_countdown > 0 {
            self.follow_known_imperfect_path_countdown -= 1;
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn own_pose<'t>(&self, entities: &'t EntityTable) -> Option<&'t EntityPose> {
        entities.get(&self.entity).filter(|p| p.in_world)
    }

    fn own_position(&self, entities: &EntityTable) -> Option<Vec2Fixed> {
        self.own_pose(entities).map(|p| p.position)
    }

    fn own_square(&self, ctx: &MotionContext<'_>, at: Vec2Fixed) -> Square {
        let mut square = self
            .own_pose(ctx.entities)
            .and_then(|p| p.obstruction)
            .filter(|&tag| ctx.registry.contains(tag))
            .map_or_else(|| point_square(at), |tag| ctx.registry.get_obstruction(tag));
        square.center = at;
        square
    }

    fn target_tag(&self, entities: &EntityTable) -> Option<Tag> {
        match self.move_request {
            MoveRequest::Entity { target, .. } => entities.get(&target).and_then(|p| p.obstruction),
            _ => None,
        }
    }

    fn target_square(&self, ctx: &MotionContext<'_>, request: &MoveRequest, at: Vec2Fixed) -> Square {
        let tag = match *request {
            MoveRequest::Entity { target, .. } => ctx.entities.get(&target).and_then(|p| p.obstruction),
            _ => None,
        };
        let mut square = tag
            .filter(|&tag| ctx.registry.contains(tag))
            .map_or_else(|| point_square(at), |tag| ctx.registry.get_obstruction(tag));
        square.center = at;
        square
    }

    fn is_formation_member(&self) -> bool {
        self.formation_controller != INVALID_ENTITY
    }

    fn is_moving_as_formation(&self) -> bool {
        self.is_formation_member() && matches!(self.move_request, MoveRequest::Offset { .. })
    }

    fn is_formation_controller_moving(&self, entities: &EntityTable) -> bool {
        entities
            .get(&self.formation_controller)
            .is_some_and(|p| p.move_requested)
    }

    fn group(&self) -> EntityId {
        if self.is_formation_member() {
            self.formation_controller
        } else {
            self.entity
        }
    }

    /// Pushing units pass through each other; units outside pushing that
    /// still block movement must collide with everyone.
    fn should_collide_with_moving_units(&self) -> bool {
        !self.pushing && self.block_movement
    }

    fn obstruction_filter(&self, ignore: Option<Tag>) -> SkipTagAndControlGroupFilter {
        SkipTagAndControlGroupFilter {
            tag: ignore.unwrap_or(Tag::INVALID),
            avoid_moving: self.should_collide_with_moving_units(),
            group: self.group(),
        }
    }

    fn check_movement(&self, ctx: &MotionContext<'_>, ignore: Option<Tag>, from: Vec2Fixed, to: Vec2Fixed) -> bool {
        let filter = self.obstruction_filter(ignore);
        ctx.pathfinder
            .check_movement(ctx.registry, &filter, from, to, self.clearance, self.pass_class)
    }

    fn notify(&self, ctx: &mut MotionContext<'_>, update: MotionUpdate) {
        // Members of a moving formation can be stuck on an unreachable offset for a long time.
        if self.is_formation_member() && self.is_formation_controller_moving(ctx.entities) {
            return;
        }
        ctx.events.push(MotionEvent {
            entity: self.entity,
            update,
        });
    }

    fn move_failed(&self, ctx: &mut MotionContext<'_>) {
        self.notify(ctx, MotionUpdate::LikelyFailure);
    }

    fn move_succeeded(&self, ctx: &mut MotionContext<'_>) {
        self.notify(ctx, MotionUpdate::LikelySuccess);
    }

    fn move_obstructed(&self, ctx: &mut MotionContext<'_>) {
        let update = if self.failed_movements >= VERY_OBSTRUCTED_THRESHOLD {
            MotionUpdate::VeryObstructed
        } else {
            MotionUpdate::Obstructed
        };
        self.notify(ctx, update);
    }

    /// Returns `true` once the failure limit is hit, whether or not it was
    /// reported. A standing order reports a likely failure only once.
    fn increment_failed_movements_and_maybe_notify(&mut self, ctx: &mut MotionContext<'_>) -> bool {
        self.failed_movements = self.failed_movements.saturating_add(1);
        if self.failed_movements >= MAX_FAILED_MOVEMENTS {
            if !self.failure_reported {
                self.move_failed(ctx);
                self.failure_reported = true;
            }
            self.failed_movements = 0;
            return true;
        }
        false
    }

    fn next_waypoint(&self) -> Option<Vec2Fixed> {
        self.short_path.next().or_else(|| self.long_path.next())
    }

    /// Whether the committed move got closer to the waypoint it was heading for.
    fn made_progress(&self, state: &MotionState) -> bool {
        let Some(waypoint) = state.waypoint else {
            return true;
        };
        if self.next_waypoint() != Some(waypoint) {
            return true;
        }
        (state.pos - waypoint).length() < (state.initial_pos - waypoint).length()
    }

    fn should_alternate_pathfinder(&self) -> bool {
        let failed = self.failed_movements;
        failed == ALTERNATE_PATH_TYPE_DELAY
            || (failed > ALTERNATE_PATH_TYPE_DELAY
                && (failed - ALTERNATE_PATH_TYPE_DELAY) % ALTERNATE_PATH_TYPE_EVERY == 0)
    }

    fn short_path_search_range(&self) -> Fixed {
        let multiple = self
            .failed_movements
            .saturating_sub(SHORT_PATH_SEARCH_RANGE_INCREASE_DELAY);
        (SHORT_PATH_MIN_SEARCH_RANGE + SHORT_PATH_SEARCH_RANGE_INCREMENT * i64::from(multiple))
            .min(SHORT_PATH_MAX_SEARCH_RANGE)
    }

    fn possibly_at_destination(&self, ctx: &MotionContext<'_>) -> bool {
        let Some(pos) = self.own_position(ctx.entities) else {
            return false;
        };
        match self.move_request {
            MoveRequest::None => false,
            MoveRequest::Point {
                target,
                min_range,
                max_range,
            } => {
                let own = self.own_square(ctx, pos);
                are_shapes_in_range(&own, &point_square(target), min_range, max_range, false)
            }
            MoveRequest::Entity {
                target,
                min_range,
                max_range,
            } => {
                let Some(target_pose) = ctx.entities.get(&target).filter(|p| p.in_world) else {
                    return false;
                };
                let own = self.own_square(ctx, pos);
                let target_square = self.target_square(ctx, &self.move_request, target_pose.position);
                are_shapes_in_range(&own, &target_square, min_range, max_range, false)
            }
            MoveRequest::Offset { controller, .. } => {
                if ctx.entities.get(&controller).is_some_and(|p| p.move_requested) {
                    return false;
                }
                // Only an exact match counts, or idle formations keep reshuffling.
                self.compute_target_position(ctx, &self.move_request)
                    .is_some_and(|target| target == pos)
            }
        }
    }

    fn target_has_valid_position(&self, entities: &EntityTable) -> bool {
        match self.move_request {
            MoveRequest::Entity { target, .. } => entities.get(&target).is_some_and(|p| p.in_world),
            _ => true,
        }
    }

    fn compute_target_position(&self, ctx: &MotionContext<'_>, request: &MoveRequest) -> Option<Vec2Fixed> {
        match *request {
            MoveRequest::None => None,
            MoveRequest::Point { target, .. } => Some(target),
            MoveRequest::Offset { controller, offset } => {
                let pose = ctx.entities.get(&controller).filter(|p| p.in_world)?;
                Some(pose.position + offset.rotate(pose.angle))
            }
            MoveRequest::Entity { target, .. } => {
                let pose = ctx.entities.get(&target).filter(|p| p.in_world)?;
                let mut out = pose.position;
                // Positions are committed after everyone moved; while the move
                // pass runs, aim where a moving target will be.
                if pose.move_requested && ctx.computing_motion {
                    out = out + (out - pose.previous_position);
                }
                Some(out)
            }
        }
    }

    fn try_going_straight_to_target(&mut self, ctx: &MotionContext<'_>, from: Vec2Fixed, update_paths: bool) -> bool {
        // Formation offsets are tiny and look best walked straight.
        if !self.is_formation_member() && !self.short_path.is_empty() {
            return false;
        }
        let Some(target) = self.compute_target_position(ctx, &self.move_request) else {
            return false;
        };
        let Some(mut goal) = self.compute_goal(ctx, &self.move_request) else {
            return false;
        };
        goal.center = target;

        let goal_pos = goal.nearest_point_on_goal(from);
        if (goal_pos - from).compare_length(DIRECT_PATH_RANGE).is_gt() {
            return false;
        }
        if !self.check_movement(ctx, self.target_tag(ctx.entities), from, goal_pos) {
            return false;
        }
        if !update_paths {
            return true;
        }

        self.long_path.clear();
        self.short_path.clear();
        self.short_path.push(goal_pos);
        true
    }

    fn pathing_update_needed(&self, ctx: &MotionContext<'_>, from: Vec2Fixed) -> bool {
        if self.move_request == MoveRequest::None {
            return false;
        }
        let Some(target) = self.compute_target_position(ctx, &self.move_request) else {
            return false;
        };
        if self.follow_known_imperfect_path_countdown > 0 && (!self.long_path.is_empty() || !self.short_path.is_empty()) {
            return false;
        }
        if self.possibly_at_destination(ctx) {
            return false;
        }

        let target_shape = self.target_square(ctx, &self.move_request, target);
        // Our own shape at the end of the path, or here when there is none.
        let end = self
            .long_path
            .destination()
            .or_else(|| self.short_path.destination())
            .unwrap_or(from);
        let own_shape = self.own_square(ctx, end);

        let distance = (from - target).length();
        let slack = distance / TARGET_UNCERTAINTY_MULTIPLIER;
        let (min_range, max_range) = self.move_request.ranges();
        let min_range = (min_range - slack).max(Fixed::ZERO);
        let max_range = if max_range < Fixed::ZERO {
            max_range
        } else {
            max_range + slack
        };

        !are_shapes_in_range(&own_shape, &target_shape, min_range, max_range, false)
    }

    /// Large targets with a small range keep their square; everything else becomes a circle.
    fn should_treat_target_as_circle(range: Fixed, circle_radius: Fixed) -> bool {
        range > circle_radius * 3
    }

    fn compute_goal(&self, ctx: &MotionContext<'_>, request: &MoveRequest) -> Option<PathGoal> {
        if *request == MoveRequest::None {
            return None;
        }
        let pos = self.own_position(ctx.entities)?;
        let target = self.compute_target_position(ctx, request)?;

        let target_square = self.target_square(ctx, request, target);
        let own_square = self.own_square(ctx, pos);
        let (min_range, max_range) = request.ranges();

        let mut out = PathGoal {
            kind: GoalKind::Point,
            center: target,
            hw: target_square.half.x,
            hh: target_square.half.y,
            u: target_square.u,
            v: target_square.v,
            maxdist: Fixed::ZERO,
        };
        if min_range > Fixed::ZERO || max_range > Fixed::ZERO || target_square.half.x > Fixed::ZERO {
            out.kind = GoalKind::Square;
        } else {
            return Some(out);
        }

        let distance = distance_between_shapes(&own_square, &target_square);
        let circle_radius = target_square.half.length();

        if distance < min_range {
            // Edge-to-edge distances ignore our own size; diagonals need a bit over sqrt(2).
            let goal_distance = min_range + self.clearance * 3 / 2;
            if Self::should_treat_target_as_circle(min_range, circle_radius) {
                out.kind = GoalKind::InvertedCircle;
                out.hw = circle_radius + goal_distance;
            } else {
                out.kind = GoalKind::InvertedSquare;
                out.hw = target_square.half.x + goal_distance;
                out.hh = target_square.half.y + goal_distance;
            }
        } else if max_range >= Fixed::ZERO && distance > max_range {
            if Self::should_treat_target_as_circle(max_range, circle_radius) {
                // In range of the inscribed circle, not the circumscribed one.
                let inscribed = target_square.half.x.min(target_square.half.y);
                out.kind = GoalKind::Circle;
                out.hw = inscribed + max_range;
            } else {
                // Slightly less than 1/sqrt(2) so the corners come within range.
                let goal_distance = max_range * 2 / 3;
                let delta = goal_distance.max(self.clearance + Fixed::from_num(4) / 16);
                out.kind = GoalKind::Square;
                out.hw = target_square.half.x + delta;
                out.hh = target_square.half.y + delta;
            }
        }
        Some(out)
    }

    fn in_short_path_range(goal: &PathGoal, pos: Vec2Fixed) -> bool {
        goal.distance_to_point(pos) < LONG_PATH_MIN_DIST
    }

    fn compute_path_to_goal(&mut self, ctx: &mut MotionContext<'_>, from: Vec2Fixed, goal: &PathGoal) {
        // Close enough to walk straight next turn; keep a long path fresh in case that fails.
        if !self.should_alternate_pathfinder() && self.try_going_straight_to_target(ctx, from, false) {
            self.short_path.clear();
            self.request_long_path(ctx, from, goal);
            return;
        }

        let mut short = Self::in_short_path_range(goal, from);
        if self.should_alternate_pathfinder() {
            short = !short;
        }
        if short {
            self.long_path.clear();
            self.request_short_path(ctx, from, goal, true);
        } else {
            self.short_path.clear();
            self.request_long_path(ctx, from, goal);
        }
    }

    fn request_long_path(&mut self, ctx: &mut MotionContext<'_>, from: Vec2Fixed, goal: &PathGoal) {
        let mut improved = *goal;
        improved.maxdist = SHORT_PATH_MIN_SEARCH_RANGE - Fixed::ONE;
        let ticket = ctx
            .pathfinder
            .compute_path_async(from, improved, self.pass_class, self.entity);
        self.expected_ticket = Some(ExpectedTicket {
            ticket,
            kind: PathKind::Long,
        });
    }

    fn request_short_path(&mut self, ctx: &mut MotionContext<'_>, from: Vec2Fixed, goal: &PathGoal, extend_range: bool) {
        let search_range = short_path_request_range(self.short_path_search_range(), from, goal, extend_range);
        let ticket = ctx.pathfinder.compute_short_path_async(
            from,
            self.clearance,
            search_range,
            *goal,
            self.pass_class,
            self.should_collide_with_moving_units(),
            self.group(),
            self.entity,
        );
        self.expected_ticket = Some(ExpectedTicket {
            ticket,
            kind: PathKind::Short,
        });
    }

    fn update_movement_state(&mut self, speed: Fixed, mean_speed: Fixed) {
        self.last_turn_speed = mean_speed;
        self.current_speed = speed;
    }

    /// Returns `true` when the obstruction was handled.
    fn handle_obstructed_move(&mut self, ctx: &mut MotionContext<'_>, moved: bool) -> bool {
        let Some(pos) = self.own_position(ctx.entities) else {
            return false;
        };

        // Stay quiet on the first failure, and count only once while still inching forward.
        if !moved || self.failed_movements < 2 {
            let notified = self.increment_failed_movements_and_maybe_notify(ctx);
            if !notified && self.failed_movements >= 2 {
                self.move_obstructed(ctx);
            }
        }

        let Some(goal) = self.compute_goal(ctx, &self.move_request) else {
            return false;
        };

        if !Self::in_short_path_range(&goal, pos) && self.try_salvage_long_path(ctx, pos, &goal) {
            return true;
        }

        self.compute_path_to_goal(ctx, pos, &goal);
        true
    }

    /// Cheap recoveries that keep the long path. Returns `true` when one was applied.
    fn try_salvage_long_path(&mut self, ctx: &mut MotionContext<'_>, pos: Vec2Fixed, goal: &PathGoal) -> bool {
        // The visibility search can consider a unit on an obstruction edge
        // free while the movement test does not; one step back resolves it.
        if self.failed_movements == BACKUP_HACK_DELAY {
            if let Some(next) = self.short_path.next() {
                let back = (pos - next).normalize();
                self.short_path.push(pos + back);
                return true;
            }
        }

        // Skipping a close waypoint helps when units stand on it.
        let skip_beyond = (self.short_path_search_range() / 3).max(NAVCELL_SIZE * 8);
        let next_is_close = self
            .long_path
            .next()
            .is_some_and(|next| (pos - next).compare_length(skip_beyond).is_lt());
        if self.long_path.len() > 1 && next_is_close {
            self.long_path.pop();
        } else if self.should_alternate_pathfinder() {
            // Occasionally recompute everything in case skipping led into a dead end.
            self.request_long_path(ctx, pos, goal);
            return true;
        }

        let Some(next) = self.long_path.next() else {
            return false;
        };
        let radius = (skip_beyond / 3).clamp(NAVCELL_SIZE * 4, NAVCELL_SIZE * 12);
        let subgoal = PathGoal::circle(next, radius);
        self.request_short_path(ctx, pos, &subgoal, false);
        true
    }

    /// Integrate one turn of movement along the given paths.
    ///
    /// Returns `true` when the move was obstructed or there was nothing to follow.
    #[allow(clippy::too_many_arguments)]
    fn perform_move(
        &self,
        ctx: &MotionContext<'_>,
        dt: Fixed,
        short_path: &mut WaypointPath,
        long_path: &mut WaypointPath,
        pos: &mut Vec2Fixed,
        speed: &mut Fixed,
        angle: &mut Fixed,
        pushing_pressure: u8,
    ) -> bool {
        if short_path.is_empty() && long_path.is_empty() {
            return true;
        }

        *angle = wrap_angle(*angle);

        let mut max_speed = if self.is_moving_as_formation() {
            self.speed * self.run_multiplier
        } else {
            self.speed
        };
        if pushing_pressure > 0 {
            max_speed = pressured_speed(max_speed, self.template_walk_speed, pushing_pressure);
        }
        if max_speed <= Fixed::ZERO {
            return false;
        }
        if *speed > max_speed {
            *speed = max_speed;
        }

        let ignore = self.target_tag(ctx.entities);
        let mut time_left = dt;

        while time_left > Fixed::ZERO {
            let Some(target) = short_path.next().or_else(|| long_path.next()) else {
                break;
            };
            let mut offset = target - *pos;

            if self.turn_rate > Fixed::ZERO && !offset.is_zero() {
                let heading = atan2(offset.x, offset.y);
                let angle_diff = *angle - heading;
                let mut abs_diff = angle_diff.abs();
                if abs_diff > PI {
                    abs_diff = TAU - abs_diff;
                }

                if abs_diff > self.instant_turn_angle {
                    // Stop while turning this far.
                    *speed = Fixed::ZERO;
                    let max_rotation = self.turn_rate * time_left;
                    let direction = if (Fixed::ZERO < angle_diff && angle_diff <= PI) || angle_diff < -PI {
                        -Fixed::ONE
                    } else {
                        Fixed::ONE
                    };

                    if abs_diff - self.instant_turn_angle > max_rotation {
                        *angle = wrap_angle(*angle + max_rotation * direction);
                        break;
                    }
                    *angle = heading;
                    time_left = max_rotation.min(max_rotation - abs_diff + self.instant_turn_angle) / self.turn_rate;
                } else {
                    let (_, cos) = sin_cos(angle_diff);
                    *speed *= cos;
                    *angle = heading;
                }
            }

            let (accel_time, accel_dist) = if self.acceleration > Fixed::ZERO {
                let t = time_left.min((max_speed - *speed) / self.acceleration).max(Fixed::ZERO);
                (t, *speed * t + t * t * self.acceleration / 2)
            } else {
                *speed = max_speed;
                (Fixed::ZERO, Fixed::ZERO)
            };
            let max_dist = accel_dist + max_speed * (time_left - accel_time);

            let offset_length = offset.length();
            if offset_length <= max_dist {
                if !self.check_movement(ctx, ignore, *pos, target) {
                    return true;
                }
                *pos = target;

                // Spend the rest of the turn heading for the next waypoint.
                if offset_length <= accel_dist && self.acceleration > Fixed::ZERO {
                    let disc = *speed * *speed + offset_length * self.acceleration * 2;
                    let required = (fixed_sqrt(disc) - *speed) / self.acceleration;
                    time_left -= required;
                    *speed += self.acceleration * required;
                } else {
                    time_left -= accel_time + (offset_length - accel_dist) / max_speed;
                    *speed = max_speed;
                }

                if short_path.is_empty() {
                    long_path.pop();
                } else {
                    short_path.pop();
                }
                continue;
            }

            offset = offset.normalize_to(max_dist);
            let step_target = *pos + offset;
            *speed = max_speed.min(*speed + self.acceleration * time_left);
            if !self.check_movement(ctx, ignore, *pos, step_target) {
                return true;
            }
            *pos = step_target;
            break;
        }
        false
    }
}

/// Search window for a short path request.
///
/// With `extend_range` the window grows to reach the goal centre plus one
/// navcell, never past [`SHORT_PATH_MAX_SEARCH_RANGE`].
#[must_use]
pub fn short_path_request_range(base: Fixed, from: Vec2Fixed, goal: &PathGoal, extend_range: bool) -> Fixed {
    let mut range = base;
    if extend_range {
        let dist = from - goal.center;
        if dist.compare_length(range - Fixed::ONE).is_ge() {
            range = (dist.length() + Fixed::ONE).min(SHORT_PATH_MAX_SEARCH_RANGE);
        }
    }
    range
}

/// Speed left to a unit under `pressure`.
fn pressured_speed(speed: Fixed, template_walk_speed: Fixed, pressure: u8) -> Fixed {
    let excess = (i32::from(pressure) - PRESSURE_MIN_THRESHOLD).clamp(0, PRESSURE_SLOWDOWN_SPAN);
    let slowdown = PRESSURE_SLOWDOWN_SPAN - excess;
    let slowed = speed * Fixed::from_num(slowdown) / Fixed::from_num(PRESSURE_SLOWDOWN_SPAN);
    slowed.max(template_walk_speed.min(PRESSURE_FLOOR_SPEED))
}

/// Whether `path` would end farther from `goal` than `pos` already is.
fn reject_farther_paths(goal: &PathGoal, path: &WaypointPath, pos: Vec2Fixed) -> bool {
    path.destination()
        .is_some_and(|end| goal.distance_to_point(pos) <= goal.distance_to_point(end))
}

fn facing_towards(from: Vec2Fixed, point: Vec2Fixed) -> Option<Fixed> {
    let offset = point - from;
    (!offset.is_zero()).then(|| atan2(offset.x, offset.y))
}
