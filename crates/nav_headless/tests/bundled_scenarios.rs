//! Runs the scenarios shipped in `scenarios/` and checks their outcomes.

use std::path::PathBuf;

use nav_core::math::Fixed;
use nav_headless::batch::{run_batch, scenario_files, BatchConfig};
use nav_headless::runner::run_scenario;
use nav_headless::scenario::Scenario;

fn scenarios_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}

fn load(name: &str) -> Scenario {
    Scenario::load(scenarios_dir().join(name)).expect("bundled scenario parses")
}

#[test]
fn test_all_bundled_scenarios_parse() {
    let files = scenario_files(&scenarios_dir()).expect("scenarios dir");
    assert!(files.len() >= 4);
    for file in files {
        Scenario::load(&file).unwrap_or_else(|e| panic!("{}: {e}", file.display()));
    }
}

#[test]
fn test_gate_everyone_gets_through() {
    let report = run_scenario(&load("gate.ron"), None).expect("runs");
    assert_eq!(report.arrived_count(), report.units.len());
    for unit in &report.units {
        assert!(unit.x > Fixed::from_num(100), "{} stuck at x = {}", unit.name, unit.x);
    }
}

#[test]
fn test_ford_is_found() {
    let report = run_scenario(&load("ford.ron"), None).expect("runs");
    let scout = report.unit("scout").expect("scout");
    assert!(scout.arrival_tick.is_some());
}

#[test]
fn test_pen_gives_up() {
    let report = run_scenario(&load("pen.ron"), None).expect("runs");
    let lost = report.unit("lost").expect("lost");
    assert!(lost.failures > 0);
    assert!(lost.arrival_tick.is_none());
}

#[test]
fn test_bundled_batch_is_thread_independent() {
    let run = |threads| {
        run_batch(BatchConfig {
            dir: scenarios_dir(),
            threads,
            ticks: Some(100),
        })
        .expect("batch runs")
    };
    let single = run(1);
    let multi = run(4);
    assert!(single.errors.is_empty());
    assert_eq!(single.reports, multi.reports);
}
