//! # Nav Core
//!
//! Deterministic navigation for lockstep RTS simulations.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO outside configuration loading
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! Path batches run on a worker pool, but results are always delivered in
//! request order, so every peer sees the same outcome.
//!
//! ## Crate Structure
//!
//! - [`math`] - Fixed-point vectors and trigonometry
//! - [`grid`] - Navcell grids and dirtiness tracking
//! - [`passability`] - Passability classes and line checks
//! - [`obstruction`] - Obstruction shapes, spatial queries and rasterization
//! - [`terrain`] - Terrain sampling and passability baking
//! - [`hierarchical`] - Region connectivity and reachability
//! - [`long_path`] - Grid-based long-range pathfinding
//! - [`vertex_path`] - Visibility-graph short-range pathfinding
//! - [`pathfinder`] - Grid ownership and asynchronous path requests
//! - [`motion`] - Per-entity motion controllers
//! - [`coordinator`] - Per-tick motion passes and pushing
//! - [`world`] - Turn loop tying everything together

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod geometry;
pub mod goal;
pub mod grid;
pub mod hierarchical;
pub mod long_path;
pub mod math;
pub mod motion;
pub mod obstruction;
pub mod passability;
pub mod pathfinder;
pub mod terrain;
pub mod vertex_path;
pub mod world;

/// Simulation entity identifier.
pub type EntityId = u64;

/// Entity id that never names a real entity.
pub const INVALID_ENTITY: EntityId = 0;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NavConfig, PassabilityClassDef, PushingConfig};
    pub use crate::error::{NavError, Result};
    pub use crate::goal::{GoalKind, PathGoal, WaypointPath};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::motion::{EntityPose, MotionController, MotionEvent, MotionParams, MotionUpdate, MoveRequest};
    pub use crate::obstruction::{ObstructionFlags, ObstructionRegistry, Tag};
    pub use crate::passability::PassClass;
    pub use crate::pathfinder::{Pathfinder, Ticket};
    pub use crate::terrain::{HeightmapTerrain, TerrainSampler};
    pub use crate::world::NavWorld;
    pub use crate::{EntityId, INVALID_ENTITY};
}
