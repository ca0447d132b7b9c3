//! Navigation configuration.
//!
//! Loaded from RON. Every field has a default, so a config file only needs
//! to list what it overrides:
//!
//! ```ron
//! (
//!     max_same_turn_moves: 32,
//!     pushing: (radius_multiplier: "1.2"),
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::grid::MAX_PASS_CLASSES;
use crate::math::{fixed_decimal, option_fixed_decimal, Fixed};
use crate::motion::MAX_FAILED_MOVEMENTS;
use crate::passability::ObstructionHandling;

/// One passability class as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassabilityClassDef {
    /// Class name used to look it up.
    pub name: String,
    /// Clearance radius in world units.
    #[serde(with = "fixed_decimal")]
    pub clearance: Fixed,
    /// Obstruction rasterization mode.
    pub obstructions: ObstructionHandling,
    /// Minimum water depth (inclusive).
    #[serde(with = "option_fixed_decimal")]
    pub min_water_depth: Option<Fixed>,
    /// Maximum water depth (inclusive).
    #[serde(with = "option_fixed_decimal")]
    pub max_water_depth: Option<Fixed>,
    /// Maximum terrain slope (exclusive).
    #[serde(with = "option_fixed_decimal")]
    pub max_terrain_slope: Option<Fixed>,
    /// Minimum distance to shore (inclusive).
    #[serde(with = "option_fixed_decimal")]
    pub min_shore_distance: Option<Fixed>,
    /// Maximum distance to shore (inclusive).
    #[serde(with = "option_fixed_decimal")]
    pub max_shore_distance: Option<Fixed>,
}

impl Default for PassabilityClassDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            clearance: Fixed::ZERO,
            obstructions: ObstructionHandling::None,
            min_water_depth: None,
            max_water_depth: None,
            max_terrain_slope: None,
            min_shore_distance: None,
            max_shore_distance: None,
        }
    }
}

/// Tuning for inter-unit pushing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushingConfig {
    /// Multiplier applied to the sum of two clearances. Zero disables pushing.
    #[serde(with = "fixed_decimal")]
    pub radius_multiplier: Fixed,
    /// Extra reach when at least one of the pair is moving.
    #[serde(with = "fixed_decimal")]
    pub moving_extension: Fixed,
    /// Extra reach when both of the pair are idle.
    #[serde(with = "fixed_decimal")]
    pub static_extension: Fixed,
    /// Fraction of the combined clearance over which moving pushes fade, in [0, 1].
    #[serde(with = "fixed_decimal")]
    pub moving_spread: Fixed,
    /// Fraction of the combined clearance over which idle pushes fade, in [0, 1].
    #[serde(with = "fixed_decimal")]
    pub static_spread: Fixed,
    /// Pushes shorter than this are dropped.
    #[serde(with = "fixed_decimal")]
    pub minimal_pushing: Fixed,
    /// Fastest a push may displace an entity, in world units per second.
    #[serde(with = "fixed_decimal")]
    pub max_push_speed: Fixed,
    /// Pressure gained per unit of push length.
    #[serde(with = "fixed_decimal")]
    pub pressure_strength: Fixed,
    /// Pressure lost every tick.
    pub pressure_decay: u8,
}

impl Default for PushingConfig {
    fn default() -> Self {
        Self {
            radius_multiplier: Fixed::from_num(8) / Fixed::from_num(5),
            moving_extension: Fixed::from_num(5) / Fixed::from_num(2),
            static_extension: Fixed::from_num(2),
            moving_spread: Fixed::from_num(3) / Fixed::from_num(5),
            static_spread: Fixed::from_num(3) / Fixed::from_num(10),
            minimal_pushing: Fixed::from_num(1) / Fixed::from_num(5),
            max_push_speed: Fixed::from_num(8),
            pressure_strength: Fixed::from_num(8),
            pressure_decay: 6,
        }
    }
}

impl PushingConfig {
    /// Whether pushing is active at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.radius_multiplier != Fixed::ZERO
    }
}

/// Top-level navigation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Passability classes, at most one per navcell bit.
    pub passability_classes: Vec<PassabilityClassDef>,
    /// Path requests armed per tick when the cap is in effect.
    pub max_same_turn_moves: usize,
    /// Worker threads for path computation; zero computes on the caller.
    pub worker_threads: usize,
    /// Pushing tuning.
    pub pushing: PushingConfig,
    /// Failure count a unit jumps to when the long-range search gives up.
    pub short_path_hack_failure_jump: u8,
    /// Width of the impassable border, in terrain tiles.
    pub map_edge_tiles: u16,
    /// Whether the playable area is the inscribed circle of the map.
    pub circular_map: bool,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            passability_classes: default_classes(),
            max_same_turn_moves: 64,
            worker_threads: 2,
            pushing: PushingConfig::default(),
            short_path_hack_failure_jump: MAX_FAILED_MOVEMENTS - 2,
            map_edge_tiles: 1,
            circular_map: false,
        }
    }
}

fn default_classes() -> Vec<PassabilityClassDef> {
    let frac = |n: i32, d: i32| Fixed::from_num(n) / Fixed::from_num(d);
    vec![
        PassabilityClassDef {
            name: "default".to_string(),
            clearance: frac(4, 5),
            obstructions: ObstructionHandling::Pathfinding,
            max_water_depth: Some(Fixed::from_num(2)),
            max_terrain_slope: Some(Fixed::ONE),
            ..PassabilityClassDef::default()
        },
        PassabilityClassDef {
            name: "large".to_string(),
            clearance: Fixed::from_num(4),
            obstructions: ObstructionHandling::Pathfinding,
            max_water_depth: Some(Fixed::from_num(2)),
            max_terrain_slope: Some(Fixed::ONE),
            ..PassabilityClassDef::default()
        },
        PassabilityClassDef {
            name: "ship".to_string(),
            clearance: Fixed::from_num(12),
            obstructions: ObstructionHandling::Pathfinding,
            min_water_depth: Some(Fixed::ONE),
            ..PassabilityClassDef::default()
        },
        PassabilityClassDef {
            name: "building_land".to_string(),
            clearance: Fixed::ZERO,
            obstructions: ObstructionHandling::Foundation,
            max_water_depth: Some(Fixed::ZERO),
            max_terrain_slope: Some(frac(3, 2)),
            ..PassabilityClassDef::default()
        },
    ]
}

impl NavConfig {
    /// Load a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: NavConfig = ron::from_str(&contents).map_err(|e| NavError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a RON string (useful for embedded configs).
    pub fn from_ron_str(ron: &str) -> Result<Self> {
        let config: NavConfig = ron::from_str(ron).map_err(|e| NavError::ConfigParse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural limits.
    pub fn validate(&self) -> Result<()> {
        if self.passability_classes.len() > MAX_PASS_CLASSES {
            return Err(NavError::TooManyPassClasses {
                count: self.passability_classes.len(),
                max: MAX_PASS_CLASSES,
            });
        }
        for (i, class) in self.passability_classes.iter().enumerate() {
            if self.passability_classes[..i]
                .iter()
                .any(|other| other.name == class.name)
            {
                return Err(NavError::InvalidState(format!(
                    "duplicate passability class '{}'",
                    class.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NavConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pushing.enabled());
        assert_eq!(config.short_path_hack_failure_jump, 33);
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = NavConfig::from_ron_str(
            r#"(max_same_turn_moves: 8, pushing: (radius_multiplier: "0"))"#,
        )
        .expect("valid config");
        assert_eq!(config.max_same_turn_moves, 8);
        assert!(!config.pushing.enabled());
        assert_eq!(config.passability_classes.len(), 4);
    }

    #[test]
    fn test_class_fixed_values_parse_exactly() {
        let config = NavConfig::from_ron_str(
            r#"(passability_classes: [(name: "tiny", clearance: "0.5", max_water_depth: Some("1.25"))])"#,
        )
        .expect("valid config");
        let class = &config.passability_classes[0];
        assert_eq!(class.clearance, Fixed::from_num(0.5));
        assert_eq!(class.max_water_depth, Some(Fixed::from_num(1.25)));
        assert_eq!(class.min_water_depth, None);
    }

    #[test]
    fn test_water_and_slope_predicates_load() {
        let config = NavConfig::from_ron_str(
            r#"(passability_classes: [
                (name: "ship", clearance: 2, min_water_depth: Some("1"), min_shore_distance: Some(4)),
                (name: "hill", max_terrain_slope: Some("0.75"), max_shore_distance: Some("8.5")),
            ])"#,
        )
        .expect("valid config");
        let ship = &config.passability_classes[0];
        assert_eq!(ship.clearance, Fixed::from_num(2));
        assert_eq!(ship.min_water_depth, Some(Fixed::ONE));
        assert_eq!(ship.min_shore_distance, Some(Fixed::from_num(4)));
        let hill = &config.passability_classes[1];
        assert_eq!(hill.max_terrain_slope, Some(Fixed::from_num(0.75)));
        assert_eq!(hill.max_shore_distance, Some(Fixed::from_num(8.5)));
        assert_eq!(hill.min_water_depth, None);

        let written = ron::to_string(&config).expect("serialize");
        let reloaded = NavConfig::from_ron_str(&written).expect("reload");
        assert_eq!(reloaded.passability_classes, config.passability_classes);
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let result =
            NavConfig::from_ron_str(r#"(passability_classes: [(name: "a"), (name: "a")])"#);
        assert!(matches!(result, Err(NavError::InvalidState(_))));
    }

    #[test]
    fn test_too_many_classes_rejected() {
        let mut config = NavConfig::default();
        config.passability_classes = (0..17)
            .map(|i| PassabilityClassDef {
                name: format!("c{i}"),
                ..PassabilityClassDef::default()
            })
            .collect();
        assert!(matches!(
            config.validate(),
            Err(NavError::TooManyPassClasses { count: 17, .. })
        ));
    }

    #[test]
    fn test_malformed_ron_reports_parse_error() {
        let result = NavConfig::from_ron_str("(max_same_turn_moves: )");
        assert!(matches!(result, Err(NavError::ConfigParse { .. })));
    }
}
