use nav_core::config::PushingConfig;
use nav_core::coordinator::{push, MotionState};
use nav_core::goal::PathGoal;
use nav_core::math::{Fixed, Vec2Fixed};
use nav_core::motion::{MotionUpdate, MAX_FAILED_MOVEMENTS};
use nav_core::world::NavWorld;
use nav_core::EntityId;
use nav_test_utils::fixtures::{add_enclosure, add_wall, fixed, fixed_f, open_field, spawn_unit, vec2};

fn updates_for(events: &[nav_core::motion::MotionEvent], entity: EntityId, update: MotionUpdate) -> usize {
    events
        .iter()
        .filter(|e| e.entity == entity && e.update == update)
        .count()
}

/// Ticks until `entity` reports `update`, or `None` within `limit` ticks.
fn ticks_until(world: &mut NavWorld, entity: EntityId, update: MotionUpdate, limit: u32) -> Option<u32> {
    (0..limit).find(|_| updates_for(&world.tick(), entity, update) > 0)
}

#[test]
fn equal_ranges_are_still_attempted() {
    let mut world = open_field(24);
    let unit = spawn_unit(&mut world, 20.0, 20.0);
    let target = vec2(60.0, 50.0);

    assert!(world.move_to_point(unit, target, fixed(3), fixed(3)));
    assert!(world.controller(unit).is_some_and(|c| c.is_move_requested()));

    world.run(150);

    // Exact ranges are hard to satisfy with a square footprint, but the
    // unit must have walked up to the ring.
    let pos = world.position(unit).expect("alive");
    let dist = (pos - target).length();
    assert!(dist <= fixed(6), "ended {dist} away from the target");
}

#[test]
fn push_between_equal_units_is_symmetric() {
    let config = PushingConfig::default();
    for (dx, dy) in [(0.5, 0.0), (0.3, -0.4), (-1.2, 0.9), (0.0, 0.0)] {
        let mut a = MotionState::new(1, vec2(50.0, 50.0), Fixed::ZERO);
        let mut b = MotionState::new(2, vec2(50.0 + dx, 50.0 + dy), Fixed::ZERO);
        a.clearance = fixed_f(0.8);
        b.clearance = fixed_f(0.8);
        a.is_moving = true;

        push(&mut a, &mut b, &config);

        assert!(!a.push.is_zero(), "no push at offset ({dx}, {dy})");
        assert_eq!(a.push, -b.push);
    }
}

#[test]
fn push_strength_falls_with_distance() {
    let config = PushingConfig::default();
    let strength = |d: f64| {
        let mut a = MotionState::new(1, vec2(50.0, 50.0), Fixed::ZERO);
        let mut b = MotionState::new(2, vec2(50.0 + d, 50.0), Fixed::ZERO);
        a.clearance = fixed_f(0.8);
        b.clearance = fixed_f(0.8);
        push(&mut a, &mut b, &config);
        a.push.length()
    };
    assert!(strength(0.5) > strength(1.5));
    assert!(strength(1.5) > strength(3.0));
    assert_eq!(strength(10.0), Fixed::ZERO);
}

#[test]
fn converging_units_end_up_separated() {
    let mut world = open_field(24);
    let clearance_sum = fixed_f(1.6);
    let a = spawn_unit(&mut world, 48.0, 48.0);
    let b = spawn_unit(&mut world, 49.7, 48.0);

    world.move_to_point(a, vec2(49.7, 48.0), Fixed::ZERO, Fixed::ZERO);
    world.move_to_point(b, vec2(48.0, 48.0), Fixed::ZERO, Fixed::ZERO);
    world.run(80);

    let pa = world.position(a).expect("a alive");
    let pb = world.position(b).expect("b alive");
    let gap = (pa - pb).length();
    assert!(gap >= clearance_sum, "units still overlap: gap {gap}");
}

#[test]
fn crowd_at_one_point_spreads_out() {
    let mut world = open_field(24);
    let target = vec2(48.0, 48.0);
    let units: Vec<EntityId> = (0..6)
        .map(|k| spawn_unit(&mut world, 30.0 + f64::from(k) * 6.0, 20.0))
        .collect();
    for &unit in &units {
        world.move_to_point(unit, target, Fixed::ZERO, fixed(1));
    }
    world.run(400);

    for (i, &a) in units.iter().enumerate() {
        for &b in &units[i + 1..] {
            let pa = world.position(a).expect("alive");
            let pb = world.position(b).expect("alive");
            assert!((pa - pb).length() >= fixed(1), "{a} and {b} are stacked");
        }
    }
}

#[test]
fn enclosed_goal_fails_without_spamming() {
    let mut world = open_field(16);
    add_enclosure(&mut world, 40.0, 40.0, 4.0);
    world.tick();

    let class = world.pathfinder().get_pass_class("default").expect("class");
    let goal = PathGoal::point(vec2(40.0, 40.0));
    assert!(world
        .pathfinder()
        .compute_path_immediate(vec2(12.0, 12.0), &goal, class)
        .is_empty());

    let unit = spawn_unit(&mut world, 12.0, 12.0);
    world.move_to_point(unit, vec2(40.0, 40.0), Fixed::ZERO, Fixed::ZERO);

    let mut failure_ticks = Vec::new();
    let mut first_obstruction = None;
    for tick in 0..400u32 {
        let events = world.tick();
        if updates_for(&events, unit, MotionUpdate::LikelyFailure) > 0 {
            failure_ticks.push(tick);
        }
        let obstructed = updates_for(&events, unit, MotionUpdate::Obstructed)
            + updates_for(&events, unit, MotionUpdate::VeryObstructed);
        if obstructed > 0 && first_obstruction.is_none() {
            first_obstruction = Some(tick);
        }
    }

    // One notification for the standing order, after failed turns were counted.
    assert_eq!(failure_ticks.len(), 1, "failure reported at {failure_ticks:?}");
    let failed_at = failure_ticks[0];
    assert!(failed_at <= 4 * u32::from(MAX_FAILED_MOVEMENTS), "first failure came late, at {failed_at}");
    let obstructed_at = first_obstruction.expect("obstruction before giving up");
    assert!(obstructed_at <= failed_at);

    // A fresh order towards the same pen is news again.
    world.move_to_point(unit, vec2(40.0, 40.0), Fixed::ZERO, Fixed::ZERO);
    assert!(ticks_until(&mut world, unit, MotionUpdate::LikelyFailure, 400).is_some());

    // Never made it inside.
    let pos = world.position(unit).expect("alive");
    assert!((pos - vec2(40.0, 40.0)).length() > fixed(4));
}

#[test]
fn head_on_units_swap_places() {
    let mut world = open_field(24);
    let a = spawn_unit(&mut world, 20.0, 48.0);
    let b = spawn_unit(&mut world, 76.0, 48.0);
    world.move_to_point(a, vec2(76.0, 48.0), Fixed::ZERO, fixed(2));
    world.move_to_point(b, vec2(20.0, 48.0), Fixed::ZERO, fixed(2));

    let (mut a_done, mut b_done) = (false, false);
    for _ in 0..600 {
        let events = world.tick();
        // Either arriving or giving up counts; standing still forever does not.
        for (unit, done) in [(a, &mut a_done), (b, &mut b_done)] {
            if updates_for(&events, unit, MotionUpdate::LikelySuccess) > 0
                || updates_for(&events, unit, MotionUpdate::LikelyFailure) > 0
            {
                *done = true;
            }
        }
        if a_done && b_done {
            break;
        }
    }
    assert!(a_done && b_done, "units deadlocked at {:?} and {:?}", world.position(a), world.position(b));
}

#[test]
fn new_wall_on_route_is_walked_around() {
    let mut world = open_field(32);
    let unit = spawn_unit(&mut world, 20.0, 60.0);
    let goal = vec2(104.0, 60.0);
    world.move_to_point(unit, goal, Fixed::ZERO, fixed(2));
    world.run(30);

    let before = world.position(unit).expect("alive");
    assert!(before.x > fixed(24) && before.x < fixed(56), "unit at {before:?}");

    // Wall squarely across the route, ahead of the unit.
    let (x0, x1, y0, y1) = (62.0, 66.0, 40.0, 80.0);
    add_wall(&mut world, x0, y0, x1, y1);

    let mut arrived = false;
    for _ in 0..600 {
        let events = world.tick();
        let pos = world.position(unit).expect("alive");
        let inside = pos.x > fixed_f(x0) && pos.x < fixed_f(x1) && pos.y > fixed_f(y0) && pos.y < fixed_f(y1);
        assert!(!inside, "unit walked through the wall at {pos:?}");
        if updates_for(&events, unit, MotionUpdate::LikelySuccess) > 0 {
            arrived = true;
            break;
        }
    }

    assert!(arrived, "unit never reached its goal");
    let end = world.position(unit).expect("alive");
    assert!((end - goal).length() <= fixed(3));
}

#[test]
fn target_order_follows_moving_unit() {
    let mut world = open_field(32);
    let runner = spawn_unit(&mut world, 30.0, 30.0);
    let hunter = spawn_unit(&mut world, 20.0, 90.0);

    world.move_to_point(runner, vec2(100.0, 40.0), Fixed::ZERO, fixed(2));
    assert!(world.move_to_target(hunter, runner, Fixed::ZERO, fixed(3)));

    let caught = ticks_until(&mut world, hunter, MotionUpdate::LikelySuccess, 600);
    assert!(caught.is_some(), "hunter never reached the runner");

    let gap = (world.position(hunter).expect("alive") - world.position(runner).expect("alive")).length();
    assert!(gap <= fixed(8));
}

#[test]
fn removed_entity_stops_receiving_updates() {
    let mut world = open_field(16);
    let unit = spawn_unit(&mut world, 10.0, 10.0);
    world.move_to_point(unit, vec2(50.0, 50.0), Fixed::ZERO, Fixed::ZERO);
    world.run(10);

    world.remove_entity(unit);
    let events = world.run(50);
    assert!(events.iter().all(|e| e.entity != unit));
    assert!(world.position(unit).is_none());
}

#[test]
fn out_of_world_unit_does_not_move() {
    let mut world = open_field(16);
    let unit = spawn_unit(&mut world, 10.0, 10.0);
    world.move_to_point(unit, vec2(50.0, 50.0), Fixed::ZERO, Fixed::ZERO);
    world.set_in_world(unit, false);
    world.run(30);
    assert_eq!(world.position(unit), Some(Vec2Fixed::new(fixed(10), fixed(10))));
}
