//! Pathfinding and movement benchmarks for nav_core.
//!
//! Run with: `cargo bench -p nav_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nav_core::goal::PathGoal;
use nav_core::math::Fixed;
use nav_core::obstruction::ObstructionRegistry;
use nav_core::pathfinder::Pathfinder;
use nav_core::terrain::HeightmapTerrain;
use nav_core::vertex_path::ShortPathRequest;
use nav_test_utils::fixtures::{crossing_scenario, fixed, fixed_f, flat_terrain, test_config, vec2, WALL_FLAGS};

/// A 64-tile map with a few long walls to route around.
fn walled_map() -> (HeightmapTerrain, ObstructionRegistry, Pathfinder) {
    let terrain = flat_terrain(64);
    let mut pathfinder = Pathfinder::new(&test_config()).expect("default config");
    let mut registry = ObstructionRegistry::new();
    registry.set_bounds(fixed(256), fixed(256), pathfinder.max_clearance());
    let walls = [(64.0, 100.0, 4, 160), (128.0, 156.0, 4, 160), (192.0, 100.0, 4, 160), (100.0, 40.0, 60, 4)];
    for (k, &(x, y, w, d)) in walls.iter().enumerate() {
        let entity = k as u64 + 1;
        registry.add_static_shape(entity, vec2(x, y), Fixed::ZERO, fixed(w), fixed(d), WALL_FLAGS, entity, 0);
    }
    pathfinder.update_grid(&terrain, &mut registry);
    (terrain, registry, pathfinder)
}

pub fn long_path_benchmark(c: &mut Criterion) {
    let (_terrain, _registry, pathfinder) = walled_map();
    let class = pathfinder.get_pass_class("default").expect("class");
    let goal = PathGoal::point(vec2(240.0, 20.0));

    c.bench_function("long_path_walled_map", |b| {
        b.iter(|| black_box(pathfinder.compute_path_immediate(black_box(vec2(16.0, 240.0)), &goal, class)))
    });
}

pub fn short_path_benchmark(c: &mut Criterion) {
    let (_terrain, registry, pathfinder) = walled_map();
    let class = pathfinder.get_pass_class("default").expect("class");
    let request = ShortPathRequest {
        ticket: 1,
        start: vec2(56.0, 100.0),
        clearance: fixed_f(0.8),
        range: fixed(24),
        goal: PathGoal::point(vec2(72.0, 104.0)),
        pass_class: class,
        avoid_moving_units: true,
        group: 1000,
        notify: 1000,
    };

    c.bench_function("short_path_around_wall", |b| {
        b.iter(|| black_box(pathfinder.compute_short_path_immediate(black_box(&request), &registry)))
    });
}

pub fn tick_benchmark(c: &mut Criterion) {
    c.bench_function("crossing_scenario_50_ticks", |b| {
        b.iter_batched(
            crossing_scenario,
            |mut world| black_box(world.run(50)),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, long_path_benchmark, short_path_benchmark, tick_benchmark);
criterion_main!(benches);
