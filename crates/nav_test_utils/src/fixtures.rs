//! Test fixtures and helpers.
//!
//! Canned configurations, maps and worlds for consistent testing.

use fixed::types::I32F32;
use nav_core::config::NavConfig;
use nav_core::math::Vec2Fixed;
use nav_core::motion::MotionParams;
use nav_core::obstruction::ObstructionFlags;
use nav_core::terrain::HeightmapTerrain;
use nav_core::world::NavWorld;
use nav_core::EntityId;

/// Flags of an impassable wall.
pub const WALL_FLAGS: ObstructionFlags = ObstructionFlags::from_bits(
    ObstructionFlags::BLOCK_MOVEMENT.bits()
        | ObstructionFlags::BLOCK_PATHFINDING.bits()
        | ObstructionFlags::BLOCK_FOUNDATION.bits()
        | ObstructionFlags::BLOCK_CONSTRUCTION.bits(),
);

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a vector from two floats (for tests only).
#[must_use]
pub fn vec2(x: f64, y: f64) -> Vec2Fixed {
    Vec2Fixed::new(fixed_f(x), fixed_f(y))
}

/// Default configuration computing paths on the calling thread.
#[must_use]
pub fn test_config() -> NavConfig {
    NavConfig {
        worker_threads: 0,
        ..NavConfig::default()
    }
}

/// Configuration with pushing switched off.
#[must_use]
pub fn no_pushing_config() -> NavConfig {
    let mut config = test_config();
    config.pushing.radius_multiplier = I32F32::ZERO;
    config
}

/// Flat dry map of `tiles` x `tiles` terrain tiles.
#[must_use]
pub fn flat_terrain(tiles: u16) -> HeightmapTerrain {
    HeightmapTerrain::flat(tiles, fixed(10))
}

/// Empty flat world with the test configuration.
///
/// # Panics
///
/// Panics if the default configuration is rejected.
#[must_use]
pub fn open_field(tiles: u16) -> NavWorld {
    NavWorld::new(test_config(), flat_terrain(tiles)).expect("test configuration is valid")
}

/// Add an axis-aligned wall from `(x0, y0)` to `(x1, y1)`.
pub fn add_wall(world: &mut NavWorld, x0: f64, y0: f64, x1: f64, y1: f64) -> EntityId {
    let center = vec2((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    world.add_static_obstruction(
        center,
        I32F32::ZERO,
        fixed_f((x1 - x0).abs()),
        fixed_f((y1 - y0).abs()),
        WALL_FLAGS,
    )
}

/// Closed square pen of inner half size `half` around `(cx, cy)`.
pub fn add_enclosure(world: &mut NavWorld, cx: f64, cy: f64, half: f64) -> [EntityId; 4] {
    let t = 2.0;
    [
        add_wall(world, cx - half - t, cy - half - t, cx + half + t, cy - half),
        add_wall(world, cx - half - t, cy + half, cx + half + t, cy + half + t),
        add_wall(world, cx - half - t, cy - half, cx - half, cy + half),
        add_wall(world, cx + half, cy - half, cx + half + t, cy + half),
    ]
}

/// Spawn a default infantry unit.
///
/// # Panics
///
/// Panics if the default passability class is missing.
pub fn spawn_unit(world: &mut NavWorld, x: f64, y: f64) -> EntityId {
    world
        .spawn_unit(vec2(x, y), I32F32::ZERO, &MotionParams::default())
        .expect("default class exists")
}

/// A world with a handful of units crossing paths around a wall, used by
/// determinism tests and benchmarks.
#[must_use]
pub fn crossing_scenario() -> NavWorld {
    let mut world = open_field(24);
    add_wall(&mut world, 44.0, 20.0, 48.0, 76.0);
    for k in 0..6 {
        let y = 30.0 + f64::from(k) * 6.0;
        let a = spawn_unit(&mut world, 20.0, y);
        let b = spawn_unit(&mut world, 76.0, y);
        world.move_to_point(a, vec2(76.0, y), I32F32::ZERO, fixed(2));
        world.move_to_point(b, vec2(20.0, y), I32F32::ZERO, fixed(2));
    }
    world
}
