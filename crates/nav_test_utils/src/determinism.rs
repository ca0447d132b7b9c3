//! Determinism testing utilities.
//!
//! Provides a harness for verifying that navigation worlds produce
//! identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Lockstep peers must agree bit for bit. Sources of non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`nav_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Entities, shapes and requests are kept in ordered maps.
//!
//! - **Worker scheduling**: path batches run on a thread pool. Results must
//!   come back in request order no matter which worker finished first.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual passes (pushing, path result handling)
//! 2. **Property tests**: random inputs must still produce deterministic outputs
//! 3. **Integration tests**: full scenarios are reproducible
//! 4. **Parallel tests**: running N worlds in parallel all match

use std::thread;

use nav_core::world::NavWorld;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic world).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the runs were deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Navigation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Result of parallel world runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Final state hash from each world.
    pub hashes: Vec<u64>,
    /// Number of ticks each world ran.
    pub ticks: u64,
    /// Number of worlds run.
    pub num_sims: usize,
}

impl ParallelSimResult {
    /// Check if all worlds produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all worlds matched.
    ///
    /// # Panics
    ///
    /// Panics if worlds produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel worlds diverged!\n\
                 Worlds: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_sims,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial state
/// * `step` - Function to advance by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```ignore
/// use nav_test_utils::determinism::verify_determinism;
/// use nav_test_utils::fixtures::crossing_scenario;
///
/// let result = verify_determinism(
///     3,   // Run 3 times
///     100, // 100 ticks each
///     crossing_scenario,
///     |world| { world.tick(); },
///     |world| world.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run a world twice with identical setup and compare final state hashes.
pub fn verify_world_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> NavWorld,
{
    let result = verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |world| {
            world.tick();
        },
        |world| world.state_hash(),
    );
    result.is_deterministic
}

/// Run N worlds on scoped threads and collect final hashes.
///
/// Catches non-determinism that only shows up under thread scheduling
/// variations, such as results collected in completion order.
///
/// # Panics
///
/// Panics if a world thread panics.
pub fn run_parallel_simulations_scoped<F>(
    setup_fn: F,
    num_sims: usize,
    num_ticks: u64,
) -> ParallelSimResult
where
    F: Fn() -> NavWorld + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut world = setup_fn();
                    for _ in 0..num_ticks {
                        world.tick();
                    }
                    world.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("world thread panicked"))
            .collect()
    });

    ParallelSimResult {
        hashes,
        ticks: num_ticks,
        num_sims,
    }
}

/// Compare two runs tick by tick, finding the first divergence.
///
/// # Returns
///
/// `None` if the runs agree, `Some(tick)` if they diverge at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> NavWorld,
{
    let mut a = setup_fn();
    let mut b = setup_fn();

    if a.state_hash() != b.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        a.tick();
        b.tick();

        let (ha, hb) = (a.state_hash(), b.state_hash());
        if ha != hb {
            tracing::warn!(tick, first = ha, second = hb, "worlds diverged");
            return Some(tick);
        }
    }

    None
}

/// Verify that a save/load round trip preserves the state and the future.
///
/// Runs `num_ticks`, saves, restores into a fresh world, and checks that
/// both hash the same now and after `num_ticks` more ticks.
pub fn verify_serialization_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> NavWorld,
{
    let mut world = setup_fn();
    for _ in 0..num_ticks {
        world.tick();
    }

    let Ok(bytes) = world.save_state() else {
        return false;
    };
    let Ok(mut restored) = NavWorld::load_state(world.config().clone(), world.terrain().clone(), &bytes) else {
        return false;
    };
    if world.state_hash() != restored.state_hash() {
        return false;
    }

    for _ in 0..num_ticks {
        world.tick();
        restored.tick();
    }
    world.state_hash() == restored.state_hash()
}

/// Proptest strategies for navigation tests.
pub mod strategies {
    use nav_core::goal::PathGoal;
    use nav_core::math::{Fixed, Vec2Fixed};
    use proptest::prelude::*;

    /// A fixed-point coordinate with 1/16 resolution inside `[lo, hi)`.
    pub fn arb_coordinate(lo: i32, hi: i32) -> impl Strategy<Value = Fixed> {
        ((lo * 16)..(hi * 16)).prop_map(|n| Fixed::from_num(n) / 16)
    }

    /// A position inside a square map of side `size`, away from the edge.
    pub fn arb_map_position(size: i32) -> impl Strategy<Value = Vec2Fixed> {
        (arb_coordinate(6, size - 6), arb_coordinate(6, size - 6)).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// Any position in a wide range, for pure geometry.
    pub fn arb_vec2() -> impl Strategy<Value = Vec2Fixed> {
        (arb_coordinate(-1000, 1000), arb_coordinate(-1000, 1000)).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// A clearance between 0 and 4.
    pub fn arb_clearance() -> impl Strategy<Value = Fixed> {
        (0i32..64).prop_map(|n| Fixed::from_num(n) / 16)
    }

    /// An angle in `[-π, π)`.
    pub fn arb_angle() -> impl Strategy<Value = Fixed> {
        (-3216i32..3216).prop_map(|n| Fixed::from_num(n) / 1024)
    }

    /// A point or circle goal inside a map of side `size`.
    pub fn arb_goal(size: i32) -> impl Strategy<Value = PathGoal> {
        (arb_map_position(size), 0i32..8).prop_map(|(center, r)| {
            if r == 0 {
                PathGoal::point(center)
            } else {
                PathGoal::circle(center, Fixed::from_num(r))
            }
        })
    }

    /// An obstacle rectangle `(center, half_width, half_depth)` inside a map of side `size`.
    pub fn arb_obstacle(size: i32) -> impl Strategy<Value = (Vec2Fixed, Fixed, Fixed)> {
        (arb_map_position(size), 1i32..6, 1i32..6)
            .prop_map(|(c, w, h)| (c, Fixed::from_num(w), Fixed::from_num(h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{crossing_scenario, open_field, spawn_unit, vec2};
    use nav_core::math::Fixed;

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_world_determinism() {
        assert!(verify_world_determinism(|| open_field(8), 50));
    }

    #[test]
    fn test_single_unit_determinism() {
        let is_det = verify_world_determinism(
            || {
                let mut world = open_field(16);
                let unit = spawn_unit(&mut world, 10.0, 10.0);
                world.move_to_point(unit, vec2(50.0, 40.0), Fixed::ZERO, Fixed::ZERO);
                world
            },
            120,
        );
        assert!(is_det);
    }

    #[test]
    fn test_find_divergence_on_deterministic_world() {
        assert!(find_first_divergence(crossing_scenario, 60).is_none());
    }

    #[test]
    fn test_parallel_worlds_agree() {
        run_parallel_simulations_scoped(crossing_scenario, 4, 60).assert_deterministic();
    }

    #[test]
    fn test_save_load_round_trip() {
        assert!(verify_serialization_determinism(crossing_scenario, 20));
    }

    #[test]
    fn test_result_reports_divergence() {
        let result = DeterminismResult {
            is_deterministic: false,
            hashes: vec![1, 2, 1],
            ticks: 10,
        };
        assert_eq!(result.unique_hashes(), vec![1, 2]);
    }
}
