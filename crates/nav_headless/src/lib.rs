//! Headless navigation scenario runner for CI verification and tuning.
//!
//! Scenarios are RON files describing a map, static obstructions, units and
//! a timeline of orders. Running one produces a JSON report with each unit's
//! final position, arrival turn and failure count, plus the final state hash
//! so two machines can check they agree.
//!
//! # Example
//!
//! ```bash
//! # Run one scenario
//! cargo run -p nav_headless -- run scenarios/gate.ron --output report.json
//!
//! # Run a directory of scenarios on four threads
//! cargo run -p nav_headless -- batch scenarios/ --threads 4
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod report;
pub mod runner;
pub mod scenario;
