//! Scenario reports.
//!
//! Everything in a report is derived from simulation state, so two runs of
//! the same scenario produce byte-identical JSON.

use std::path::Path;

use nav_core::math::{fixed_decimal, Fixed};
use nav_core::motion::MotionUpdate;
use nav_core::EntityId;
use serde::{Deserialize, Serialize};

/// Outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: String,
    /// Turns simulated.
    pub ticks: u64,
    /// Final navigation state hash.
    pub final_state_hash: u64,
    /// Per-unit outcome, in scenario order.
    pub units: Vec<UnitReport>,
}

impl ScenarioReport {
    /// Report for a scenario before any turn has run.
    #[must_use]
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            ticks: 0,
            final_state_hash: 0,
            units: Vec::new(),
        }
    }

    /// Look up a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Number of units that reached their last destination.
    #[must_use]
    pub fn arrived_count(&self) -> usize {
        self.units.iter().filter(|u| u.arrival_tick.is_some()).count()
    }

    /// Total failure notifications across all units.
    #[must_use]
    pub fn total_failures(&self) -> u32 {
        self.units.iter().map(|u| u.failures).sum()
    }

    /// Save the report as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Outcome for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Unit name from the scenario.
    pub name: String,
    /// Simulation entity id.
    pub entity: EntityId,
    /// Final x.
    #[serde(with = "fixed_decimal")]
    pub x: Fixed,
    /// Final z.
    #[serde(with = "fixed_decimal")]
    pub y: Fixed,
    /// Turn of the last success notification after the last order.
    pub arrival_tick: Option<u64>,
    /// Failure notifications received.
    pub failures: u32,
    /// Turns on which the unit was blocked.
    pub obstructed: u32,
    /// Turns on which the unit reported being blocked for a while.
    pub very_obstructed: u32,
}

impl UnitReport {
    /// Empty report for a freshly spawned unit.
    #[must_use]
    pub fn new(name: impl Into<String>, entity: EntityId) -> Self {
        Self {
            name: name.into(),
            entity,
            x: Fixed::ZERO,
            y: Fixed::ZERO,
            arrival_tick: None,
            failures: 0,
            obstructed: 0,
            very_obstructed: 0,
        }
    }

    /// Fold a motion notification received on `tick`.
    pub fn record(&mut self, tick: u64, update: MotionUpdate) {
        match update {
            MotionUpdate::LikelySuccess => self.arrival_tick = Some(tick),
            MotionUpdate::LikelyFailure => self.failures += 1,
            MotionUpdate::Obstructed => self.obstructed += 1,
            MotionUpdate::VeryObstructed => self.very_obstructed += 1,
        }
    }

    /// A new order invalidates any earlier arrival.
    pub fn order_issued(&mut self) {
        self.arrival_tick = None;
    }
}
