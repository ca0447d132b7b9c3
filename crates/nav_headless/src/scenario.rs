//! Scenario loading and configuration.
//!
//! Scenarios describe a navigation test: the map, static obstructions, the
//! units on it and a timeline of orders. They are authored in RON; decimal
//! values are written either as integers or as strings (`"2.5"`) so they are
//! parsed straight into fixed-point.

use std::collections::BTreeSet;
use std::path::Path;

use nav_core::config::NavConfig;
use nav_core::error::NavError;
use nav_core::math::{fixed_decimal, Fixed, Vec2Fixed};
use nav_core::motion::MotionParams;
use nav_core::terrain::HeightmapTerrain;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// The scenario parsed but is inconsistent.
    #[error("Invalid scenario: {0}")]
    Invalid(String),
    /// The navigation core rejected the setup.
    #[error("Navigation setup failed: {0}")]
    Nav(#[from] NavError),
}

fn default_base_height() -> Fixed {
    Fixed::from_num(10)
}

fn default_ticks() -> u32 {
    600
}

/// A complete navigation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Map side length in terrain tiles.
    pub tiles: u16,
    /// Height of every vertex before edits.
    #[serde(default = "default_base_height", with = "fixed_decimal")]
    pub base_height: Fixed,
    /// Water plane height.
    #[serde(default, with = "fixed_decimal")]
    pub water_level: Fixed,
    /// Rectangular terrain edits applied on top of the base height.
    #[serde(default)]
    pub terrain: Vec<TerrainPatch>,
    /// Static obstructions such as walls and buildings.
    #[serde(default)]
    pub obstructions: Vec<ObstructionPlacement>,
    /// Units present at turn 0.
    #[serde(default)]
    pub units: Vec<UnitPlacement>,
    /// Timeline of orders.
    #[serde(default)]
    pub orders: Vec<TimedOrder>,
    /// Number of turns to simulate.
    #[serde(default = "default_ticks")]
    pub ticks: u32,
    /// Navigation configuration.
    #[serde(default)]
    pub config: NavConfig,
}

/// Set every vertex of a tile rectangle to one height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainPatch {
    /// First tile column.
    pub i0: u16,
    /// First tile row.
    pub j0: u16,
    /// Last tile column.
    pub i1: u16,
    /// Last tile row.
    pub j1: u16,
    /// New vertex height.
    #[serde(with = "fixed_decimal")]
    pub height: Fixed,
}

/// A static rectangular obstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstructionPlacement {
    /// Optional name, used by `RemoveObstruction` orders.
    #[serde(default)]
    pub name: Option<String>,
    /// Center x.
    #[serde(with = "fixed_decimal")]
    pub x: Fixed,
    /// Center z.
    #[serde(with = "fixed_decimal")]
    pub y: Fixed,
    /// Full size along the local x axis.
    #[serde(with = "fixed_decimal")]
    pub width: Fixed,
    /// Full size along the local z axis.
    #[serde(with = "fixed_decimal")]
    pub depth: Fixed,
    /// Rotation in radians.
    #[serde(default, with = "fixed_decimal")]
    pub angle: Fixed,
}

/// A unit spawned at turn 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlacement {
    /// Unique unit name.
    pub name: String,
    /// Position x.
    #[serde(with = "fixed_decimal")]
    pub x: Fixed,
    /// Position z.
    #[serde(with = "fixed_decimal")]
    pub y: Fixed,
    /// Initial facing.
    #[serde(default, with = "fixed_decimal")]
    pub angle: Fixed,
    /// Movement template.
    #[serde(default)]
    pub params: MotionParams,
}

impl UnitPlacement {
    /// Placement with default movement parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            name: name.into(),
            x: Fixed::from_num(x),
            y: Fixed::from_num(y),
            angle: Fixed::ZERO,
            params: MotionParams::default(),
        }
    }

    /// Spawn position.
    #[must_use]
    pub fn position(&self) -> Vec2Fixed {
        Vec2Fixed::new(self.x, self.y)
    }
}

/// An action issued at the start of a given turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedOrder {
    /// Turn at which the action is issued.
    pub tick: u64,
    /// What happens.
    pub action: Action,
}

/// Scenario actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    /// Walk to within a range of a point.
    MoveToPoint {
        /// Unit name.
        unit: String,
        /// Target x.
        #[serde(with = "fixed_decimal")]
        x: Fixed,
        /// Target z.
        #[serde(with = "fixed_decimal")]
        y: Fixed,
        /// Minimum distance to the point.
        #[serde(default, with = "fixed_decimal")]
        min_range: Fixed,
        /// Maximum distance to the point.
        #[serde(default, with = "fixed_decimal")]
        max_range: Fixed,
    },
    /// Walk to within a range of another unit.
    MoveToUnit {
        /// Unit name.
        unit: String,
        /// Target unit name.
        target: String,
        /// Minimum distance to the target's shape.
        #[serde(default, with = "fixed_decimal")]
        min_range: Fixed,
        /// Maximum distance to the target's shape.
        #[serde(default, with = "fixed_decimal")]
        max_range: Fixed,
    },
    /// Drop the current order.
    Stop {
        /// Unit name.
        unit: String,
    },
    /// Turn to face a point.
    FaceTowards {
        /// Unit name.
        unit: String,
        /// Point x.
        #[serde(with = "fixed_decimal")]
        x: Fixed,
        /// Point z.
        #[serde(with = "fixed_decimal")]
        y: Fixed,
    },
    /// Remove a named static obstruction.
    RemoveObstruction {
        /// Obstruction name.
        obstruction: String,
    },
    /// Move the water plane.
    SetWaterLevel {
        /// New level.
        #[serde(with = "fixed_decimal")]
        level: Fixed,
    },
}

impl Action {
    /// The unit this action commands, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::MoveToPoint { unit, .. }
            | Self::MoveToUnit { unit, .. }
            | Self::Stop { unit }
            | Self::FaceTowards { unit, .. } => Some(unit),
            Self::RemoveObstruction { .. } | Self::SetWaterLevel { .. } => None,
        }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "Empty Field".to_string(),
            description: "A flat map with nothing on it".to_string(),
            tiles: 32,
            base_height: default_base_height(),
            water_level: Fixed::ZERO,
            terrain: Vec::new(),
            obstructions: Vec::new(),
            units: Vec::new(),
            orders: Vec::new(),
            ticks: default_ticks(),
            config: NavConfig::default(),
        }
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Check names and references.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.tiles == 0 {
            return Err(ScenarioError::Invalid("map must have at least one tile".to_string()));
        }
        self.config.validate()?;

        let mut units = BTreeSet::new();
        for unit in &self.units {
            if !units.insert(unit.name.as_str()) {
                return Err(ScenarioError::Invalid(format!("duplicate unit '{}'", unit.name)));
            }
        }
        let mut obstructions = BTreeSet::new();
        for name in self.obstructions.iter().filter_map(|o| o.name.as_deref()) {
            if !obstructions.insert(name) {
                return Err(ScenarioError::Invalid(format!("duplicate obstruction '{name}'")));
            }
        }

        for order in &self.orders {
            if let Some(unit) = order.action.unit() {
                if !units.contains(unit) {
                    return Err(ScenarioError::Invalid(format!(
                        "order at tick {} names unknown unit '{unit}'",
                        order.tick
                    )));
                }
            }
            match &order.action {
                Action::MoveToUnit { target, .. } if !units.contains(target.as_str()) => {
                    return Err(ScenarioError::Invalid(format!(
                        "order at tick {} targets unknown unit '{target}'",
                        order.tick
                    )));
                }
                Action::RemoveObstruction { obstruction } if !obstructions.contains(obstruction.as_str()) => {
                    return Err(ScenarioError::Invalid(format!(
                        "order at tick {} removes unknown obstruction '{obstruction}'",
                        order.tick
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Build the heightmap this scenario starts with.
    #[must_use]
    pub fn build_terrain(&self) -> HeightmapTerrain {
        let mut terrain = HeightmapTerrain::flat(self.tiles, self.base_height);
        terrain.set_water_level(self.water_level);
        for patch in &self.terrain {
            terrain.raise_tiles(patch.i0, patch.j0, patch.i1, patch.j1, patch.height);
        }
        terrain
    }

    /// Two units walking past each other across an open field.
    #[must_use]
    pub fn head_on() -> Self {
        Self {
            name: "Head On".to_string(),
            description: "Two units swap places along the same line".to_string(),
            tiles: 24,
            units: vec![UnitPlacement::new("west", 20, 48), UnitPlacement::new("east", 76, 48)],
            orders: vec![
                TimedOrder {
                    tick: 0,
                    action: Action::MoveToPoint {
                        unit: "west".to_string(),
                        x: Fixed::from_num(76),
                        y: Fixed::from_num(48),
                        min_range: Fixed::ZERO,
                        max_range: Fixed::from_num(2),
                    },
                },
                TimedOrder {
                    tick: 0,
                    action: Action::MoveToPoint {
                        unit: "east".to_string(),
                        x: Fixed::from_num(20),
                        y: Fixed::from_num(48),
                        min_range: Fixed::ZERO,
                        max_range: Fixed::from_num(2),
                    },
                },
            ],
            ticks: 300,
            ..Self::default()
        }
    }
}
