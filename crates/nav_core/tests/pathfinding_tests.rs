use nav_core::config::NavConfig;
use nav_core::goal::PathGoal;
use nav_core::math::{Fixed, Vec2Fixed};
use nav_core::motion::{short_path_request_range, SHORT_PATH_MAX_SEARCH_RANGE, SHORT_PATH_MIN_SEARCH_RANGE};
use nav_core::obstruction::{ControlGroupMovementFilter, ObstructionRegistry};
use nav_core::passability::{check_line_movement, PassClass};
use nav_core::pathfinder::Pathfinder;
use nav_core::terrain::{HeightmapTerrain, TerrainSampler};
use nav_core::vertex_path::ShortPathRequest;
use nav_core::INVALID_ENTITY;
use nav_test_utils::fixtures::{fixed, fixed_f, flat_terrain, test_config, vec2, WALL_FLAGS};

struct Setup {
    terrain: HeightmapTerrain,
    registry: ObstructionRegistry,
    pathfinder: Pathfinder,
}

fn setup(tiles: u16) -> Setup {
    let config = test_config();
    let terrain = flat_terrain(tiles);
    let mut pathfinder = Pathfinder::new(&config).expect("default config");
    let mut registry = ObstructionRegistry::new();
    let size = Fixed::from_num(i32::from(terrain.tiles_per_side()) * 4);
    registry.set_bounds(size, size, pathfinder.max_clearance());
    pathfinder.update_grid(&terrain, &mut registry);
    Setup {
        terrain,
        registry,
        pathfinder,
    }
}

fn add_wall(s: &mut Setup, entity: u64, center: Vec2Fixed, w: i32, d: i32, angle: f64) {
    s.registry.add_static_shape(
        entity,
        center,
        fixed_f(angle),
        fixed(w),
        fixed(d),
        WALL_FLAGS,
        entity,
        INVALID_ENTITY,
    );
}

fn short_request(start: Vec2Fixed, goal: PathGoal, range: Fixed, pass_class: PassClass) -> ShortPathRequest {
    ShortPathRequest {
        ticket: 1,
        start,
        clearance: fixed_f(0.8),
        range,
        goal,
        pass_class,
        avoid_moving_units: true,
        group: 1000,
        notify: 1000,
    }
}

#[test]
fn long_path_legs_stay_on_passable_navcells() {
    let mut s = setup(32);
    add_wall(&mut s, 1, vec2(64.0, 50.0), 4, 80, 0.0);
    add_wall(&mut s, 2, vec2(30.0, 90.0), 30, 4, 0.4);
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);

    let class = s.pathfinder.get_pass_class("default").expect("class");
    let start = vec2(20.0, 20.0);
    let path = s
        .pathfinder
        .compute_path_immediate(start, &PathGoal::point(vec2(110.0, 30.0)), class);
    assert!(!path.is_empty());

    let mut prev = path.walk_order().next().expect("first waypoint");
    for wp in path.walk_order().skip(1) {
        assert!(
            check_line_movement(prev, wp, class, s.pathfinder.grid()),
            "leg {prev:?} -> {wp:?} crosses an impassable navcell"
        );
        prev = wp;
    }
}

#[test]
fn short_path_legs_do_not_cross_obstructions() {
    let mut s = setup(16);
    add_wall(&mut s, 1, vec2(32.0, 32.0), 4, 14, 0.0);
    add_wall(&mut s, 2, vec2(38.0, 24.0), 6, 3, 0.8);

    let start = vec2(24.0, 32.0);
    let class = s.pathfinder.get_pass_class("default").expect("class");
    let request = short_request(start, PathGoal::point(vec2(42.0, 34.0)), fixed(24), class);
    let path = s.pathfinder.compute_short_path_immediate(&request, &s.registry);
    assert!(!path.is_empty());
    assert_eq!(path.destination(), Some(vec2(42.0, 34.0)));

    let filter = ControlGroupMovementFilter::new(request.avoid_moving_units, request.group);
    let r = request.clearance - Fixed::from_bits(1 << 27);
    let mut prev = start;
    for wp in path.walk_order() {
        assert!(
            !s.registry.test_line(&filter, prev, wp, r, false),
            "leg {prev:?} -> {wp:?} crosses an obstruction edge"
        );
        prev = wp;
    }
}

#[test]
fn unreachable_goal_gives_empty_long_path() {
    let mut s = setup(16);
    add_wall(&mut s, 1, vec2(40.0, 33.0), 20, 2, 0.0);
    add_wall(&mut s, 2, vec2(40.0, 47.0), 20, 2, 0.0);
    add_wall(&mut s, 3, vec2(31.0, 40.0), 2, 12, 0.0);
    add_wall(&mut s, 4, vec2(49.0, 40.0), 2, 12, 0.0);
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);

    let class = s.pathfinder.get_pass_class("default").expect("class");
    let goal = PathGoal::point(vec2(40.0, 40.0));
    assert!(!s.pathfinder.is_goal_reachable(vec2(10.0, 10.0), &goal, class));
    assert!(s.pathfinder.compute_path_immediate(vec2(10.0, 10.0), &goal, class).is_empty());
}

#[test]
fn grid_rebuild_is_idempotent() {
    let mut s = setup(24);
    add_wall(&mut s, 1, vec2(40.0, 40.0), 10, 6, 0.3);
    add_wall(&mut s, 2, vec2(70.0, 20.0), 4, 30, 0.0);
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);
    let first = s.pathfinder.grid().clone();

    s.pathfinder.update_grid(&s.terrain, &mut s.registry);
    assert_eq!(s.pathfinder.grid(), &first);

    // Forced full rebake with nothing changed.
    s.pathfinder.water_changed(&s.terrain, &mut s.registry);
    assert_eq!(s.pathfinder.grid(), &first);
    s.pathfinder.water_changed(&s.terrain, &mut s.registry);
    assert_eq!(s.pathfinder.grid(), &first);
}

#[test]
fn partial_update_matches_full_rebuild() {
    let mut s = setup(24);
    add_wall(&mut s, 1, vec2(40.0, 40.0), 10, 6, 0.0);
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);

    let tag = s.registry.add_static_shape(2, vec2(60.0, 60.0), Fixed::ZERO, fixed(8), fixed(8), WALL_FLAGS, 2, 0);
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);
    s.registry.move_shape(tag, vec2(20.0, 70.0), fixed_f(0.5));
    s.pathfinder.update_grid(&s.terrain, &mut s.registry);
    let incremental = s.pathfinder.grid().clone();

    s.pathfinder.water_changed(&s.terrain, &mut s.registry);
    assert_eq!(s.pathfinder.grid(), &incremental);
}

#[test]
fn config_classes_all_get_a_grid_bit() {
    let config = NavConfig::default();
    let pathfinder = Pathfinder::new(&config).expect("default config");
    for def in &config.passability_classes {
        let mask = pathfinder.get_pass_class(&def.name).expect("class");
        assert_eq!(mask.count_ones(), 1);
    }
}

#[test]
fn search_range_grows_with_distance_and_is_capped() {
    let from = vec2(100.0, 100.0);

    // Close goal: default radius.
    let near = PathGoal::point(vec2(105.0, 100.0));
    assert_eq!(
        short_path_request_range(SHORT_PATH_MIN_SEARCH_RANGE, from, &near, true),
        SHORT_PATH_MIN_SEARCH_RANGE
    );

    // Farther than the default radius: distance plus one navcell.
    let mid = PathGoal::point(vec2(130.0, 100.0));
    assert_eq!(
        short_path_request_range(SHORT_PATH_MIN_SEARCH_RANGE, from, &mid, true),
        fixed(31)
    );

    // Never past the maximum.
    let far = PathGoal::point(vec2(300.0, 100.0));
    assert_eq!(
        short_path_request_range(SHORT_PATH_MIN_SEARCH_RANGE, from, &far, true),
        SHORT_PATH_MAX_SEARCH_RANGE
    );

    // Extension disabled.
    assert_eq!(
        short_path_request_range(SHORT_PATH_MIN_SEARCH_RANGE, from, &far, false),
        SHORT_PATH_MIN_SEARCH_RANGE
    );
}
