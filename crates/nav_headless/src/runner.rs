//! Scenario runner.
//!
//! Builds a [`NavWorld`] from a [`Scenario`], replays its order timeline
//! turn by turn and folds motion notifications into a [`ScenarioReport`].

use std::collections::BTreeMap;

use nav_core::math::Vec2Fixed;
use nav_core::obstruction::ObstructionFlags;
use nav_core::world::NavWorld;
use nav_core::EntityId;
use tracing::{debug, info, warn};

use crate::report::{ScenarioReport, UnitReport};
use crate::scenario::{Action, Scenario, ScenarioError, TimedOrder};

/// Flags given to every static obstruction of a scenario.
pub const STATIC_OBSTRUCTION_FLAGS: ObstructionFlags = ObstructionFlags::from_bits(
    ObstructionFlags::BLOCK_MOVEMENT.bits()
        | ObstructionFlags::BLOCK_PATHFINDING.bits()
        | ObstructionFlags::BLOCK_FOUNDATION.bits()
        | ObstructionFlags::BLOCK_CONSTRUCTION.bits(),
);

/// Runs one scenario.
pub struct ScenarioRunner {
    name: String,
    world: NavWorld,
    orders: Vec<TimedOrder>,
    next_order: usize,
    units: BTreeMap<String, EntityId>,
    obstructions: BTreeMap<String, EntityId>,
    reports: Vec<UnitReport>,
    report_index: BTreeMap<EntityId, usize>,
    ticks: u32,
}

impl ScenarioRunner {
    /// Set up the world at turn 0.
    pub fn new(scenario: &Scenario) -> Result<Self, ScenarioError> {
        scenario.validate()?;
        let mut world = NavWorld::new(scenario.config.clone(), scenario.build_terrain())?;

        let mut obstructions = BTreeMap::new();
        for placement in &scenario.obstructions {
            let id = world.add_static_obstruction(
                Vec2Fixed::new(placement.x, placement.y),
                placement.angle,
                placement.width,
                placement.depth,
                STATIC_OBSTRUCTION_FLAGS,
            );
            if let Some(name) = &placement.name {
                obstructions.insert(name.clone(), id);
            }
        }

        let mut units = BTreeMap::new();
        let mut reports = Vec::with_capacity(scenario.units.len());
        let mut report_index = BTreeMap::new();
        for placement in &scenario.units {
            let id = world.spawn_unit(placement.position(), placement.angle, &placement.params)?;
            units.insert(placement.name.clone(), id);
            report_index.insert(id, reports.len());
            reports.push(UnitReport::new(placement.name.clone(), id));
        }

        // Stable sort keeps same-tick orders in file order.
        let mut orders = scenario.orders.clone();
        orders.sort_by_key(|o| o.tick);

        debug!(
            scenario = %scenario.name,
            units = units.len(),
            obstructions = scenario.obstructions.len(),
            orders = orders.len(),
            "scenario loaded"
        );

        Ok(Self {
            name: scenario.name.clone(),
            world,
            orders,
            next_order: 0,
            units,
            obstructions,
            reports,
            report_index,
            ticks: scenario.ticks,
        })
    }

    /// Override the number of turns to run.
    #[must_use]
    pub fn with_ticks(mut self, ticks: u32) -> Self {
        self.ticks = ticks;
        self
    }

    /// The world being simulated.
    #[must_use]
    pub fn world(&self) -> &NavWorld {
        &self.world
    }

    /// Entity of a named unit.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<EntityId> {
        self.units.get(name).copied()
    }

    /// Issue due orders and advance one turn.
    pub fn step(&mut self) {
        let turn = self.world.turn();
        while let Some(order) = self.orders.get(self.next_order) {
            if order.tick > turn {
                break;
            }
            let action = order.action.clone();
            self.next_order += 1;
            self.apply(&action);
        }

        for event in self.world.tick() {
            if let Some(&index) = self.report_index.get(&event.entity) {
                self.reports[index].record(turn, event.update);
            }
        }
    }

    fn apply(&mut self, action: &Action) {
        let unit = action.unit().and_then(|name| self.units.get(name).copied());
        if let Some(id) = unit {
            if let Some(&index) = self.report_index.get(&id) {
                self.reports[index].order_issued();
            }
        }

        match action {
            Action::MoveToPoint {
                x,
                y,
                min_range,
                max_range,
                ..
            } => {
                if let Some(id) = unit {
                    if !self.world.move_to_point(id, Vec2Fixed::new(*x, *y), *min_range, *max_range) {
                        warn!(entity = id, "move order rejected");
                    }
                }
            }
            Action::MoveToUnit {
                target,
                min_range,
                max_range,
                ..
            } => {
                let target = self.units.get(target).copied();
                if let (Some(id), Some(target)) = (unit, target) {
                    if !self.world.move_to_target(id, target, *min_range, *max_range) {
                        warn!(entity = id, target, "move order rejected");
                    }
                }
            }
            Action::Stop { .. } => {
                if let Some(id) = unit {
                    self.world.stop_moving(id);
                }
            }
            Action::FaceTowards { x, y, .. } => {
                if let Some(id) = unit {
                    self.world.face_towards_point(id, Vec2Fixed::new(*x, *y));
                }
            }
            Action::RemoveObstruction { obstruction } => {
                if let Some(id) = self.obstructions.remove(obstruction) {
                    self.world.remove_entity(id);
                }
            }
            Action::SetWaterLevel { level } => self.world.set_water_level(*level),
        }
    }

    /// Run the remaining turns and produce the report.
    #[must_use]
    pub fn run(mut self) -> ScenarioReport {
        while self.world.turn() < u64::from(self.ticks) {
            self.step();
        }
        self.finish()
    }

    /// Produce the report for the current turn.
    #[must_use]
    pub fn finish(mut self) -> ScenarioReport {
        for report in &mut self.reports {
            if let Some(pos) = self.world.position(report.entity) {
                report.x = pos.x;
                report.y = pos.y;
            }
        }

        let report = ScenarioReport {
            scenario: self.name,
            ticks: self.world.turn(),
            final_state_hash: self.world.state_hash(),
            units: self.reports,
        };
        info!(
            scenario = %report.scenario,
            ticks = report.ticks,
            arrived = report.arrived_count(),
            failures = report.total_failures(),
            state_hash = report.final_state_hash,
            "scenario finished"
        );
        report
    }
}

/// Run a scenario to completion.
pub fn run_scenario(scenario: &Scenario, ticks: Option<u32>) -> Result<ScenarioReport, ScenarioError> {
    let mut runner = ScenarioRunner::new(scenario)?;
    if let Some(ticks) = ticks {
        runner = runner.with_ticks(ticks);
    }
    Ok(runner.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_core::math::Fixed;

    #[test]
    fn test_head_on_units_arrive() {
        let report = run_scenario(&Scenario::head_on(), None).expect("runs");

        assert_eq!(report.ticks, 300);
        assert_eq!(report.arrived_count(), 2);
        let west = report.unit("west").expect("west");
        assert!((west.x - Fixed::from_num(76)).abs() <= Fixed::from_num(3));
    }

    #[test]
    fn test_runs_are_reproducible() {
        let a = run_scenario(&Scenario::head_on(), Some(120)).expect("runs");
        let b = run_scenario(&Scenario::head_on(), Some(120)).expect("runs");
        assert_eq!(a, b);
    }

    #[test]
    fn test_orders_wait_for_their_tick() {
        let mut scenario = Scenario::head_on();
        for order in &mut scenario.orders {
            order.tick = 50;
        }
        let mut runner = ScenarioRunner::new(&scenario).expect("valid");
        let west = runner.unit("west").expect("west");
        let start = runner.world().position(west);

        for _ in 0..50 {
            runner.step();
        }
        assert_eq!(runner.world().position(west), start);

        for _ in 0..20 {
            runner.step();
        }
        assert_ne!(runner.world().position(west), start);
    }

    #[test]
    fn test_removed_obstruction_opens_the_way() {
        let ron = r#"
            Scenario(
                name: "Gate",
                tiles: 16,
                obstructions: [
                    (name: Some("gate"), x: 32, y: 32, width: 6, depth: 64),
                ],
                units: [(name: "a", x: 16, y: 32)],
                orders: [
                    (tick: 5, action: RemoveObstruction(obstruction: "gate")),
                    (tick: 6, action: MoveToPoint(unit: "a", x: 48, y: 32, max_range: 2)),
                ],
                ticks: 200,
            )
        "#;
        let scenario = Scenario::from_ron_str(ron).expect("valid");
        let report = run_scenario(&scenario, None).expect("runs");
        assert!(report.unit("a").and_then(|u| u.arrival_tick).is_some());
    }
}
