//! Headless navigation runner.
//!
//! # Usage
//!
//! ```bash
//! # Run a single scenario and print its report
//! cargo run -p nav_headless -- run scenarios/gate.ron
//!
//! # Run for a fixed number of turns and save the report
//! cargo run -p nav_headless -- run scenarios/gate.ron --ticks 400 --output report.json
//!
//! # Run every scenario of a directory in parallel
//! cargo run -p nav_headless -- batch scenarios/ --threads 8 --output results.json
//!
//! # Check that a scenario is reproducible
//! cargo run -p nav_headless -- verify scenarios/gate.ron --runs 3
//! ```
//!
//! Reports go to stdout (or `--output`), logs go to stderr.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nav_headless::{
    batch::{run_batch, BatchConfig},
    runner::run_scenario,
    scenario::Scenario,
};

#[derive(Parser)]
#[command(name = "nav_headless")]
#[command(about = "Headless navigation scenario runner")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario and write its report
    Run {
        /// Scenario file (RON)
        scenario: PathBuf,

        /// Turns to simulate, overriding the scenario
        #[arg(short, long)]
        ticks: Option<u32>,

        /// Report file (JSON); stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run every scenario of a directory in parallel
    Batch {
        /// Directory containing *.ron scenarios
        dir: PathBuf,

        /// Worker threads (0 = one per core)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Turns to simulate, overriding each scenario
        #[arg(short, long)]
        ticks: Option<u32>,

        /// Results file (JSON); stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a scenario several times and compare final state hashes
    Verify {
        /// Scenario file (RON)
        scenario: PathBuf,

        /// Number of runs
        #[arg(short, long, default_value = "3")]
        runs: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            output,
        } => cmd_run(scenario, ticks, output),
        Commands::Batch {
            dir,
            threads,
            ticks,
            output,
        } => cmd_batch(dir, threads, ticks, output),
        Commands::Verify { scenario, runs } => cmd_verify(scenario, runs),
    }
}

fn load_or_exit(path: &Path) -> Scenario {
    match Scenario::load(path) {
        Ok(scenario) => scenario,
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Failed to load scenario");
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    }
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<PathBuf>) {
    let json = match serde_json::to_string_pretty(value) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("FATAL: Failed to encode report: {e}");
            std::process::exit(1);
        }
    };
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, json) {
                tracing::error!(error = %e, path = %path.display(), "Failed to save report");
                eprintln!("FATAL: Failed to save report: {e}");
                std::process::exit(1);
            }
            tracing::info!(path = %path.display(), "Report saved");
        }
        None => println!("{json}"),
    }
}

/// Run a single scenario
fn cmd_run(path: PathBuf, ticks: Option<u32>, output: Option<PathBuf>) {
    let scenario = load_or_exit(&path);
    tracing::info!(scenario = %scenario.name, units = scenario.units.len(), "Running scenario");

    match run_scenario(&scenario, ticks) {
        Ok(report) => {
            eprintln!(
                "{}: {}/{} units arrived, {} failure notifications, hash {:#018x}",
                report.scenario,
                report.arrived_count(),
                report.units.len(),
                report.total_failures(),
                report.final_state_hash
            );
            write_json(&report, output);
        }
        Err(e) => {
            tracing::error!(error = %e, "Scenario setup failed");
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    }
}

/// Run a directory of scenarios
fn cmd_batch(dir: PathBuf, threads: usize, ticks: Option<u32>, output: Option<PathBuf>) {
    let config = BatchConfig { dir, threads, ticks };

    let results = match run_batch(config) {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(error = %e, "Batch failed");
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    eprintln!("\n{}", "=".repeat(50));
    eprintln!("BATCH COMPLETE");
    eprintln!("{}", "=".repeat(50));
    eprintln!("Scenarios run: {}", results.reports.len());
    for report in &results.reports {
        eprintln!(
            "  {:<24} {:>3}/{:<3} arrived  {:>3} failures",
            report.scenario,
            report.arrived_count(),
            report.units.len(),
            report.total_failures()
        );
    }
    if !results.errors.is_empty() {
        eprintln!("Scenarios failed: {}", results.errors.len());
        for failure in &results.errors {
            eprintln!("  {}: {}", failure.path.display(), failure.message);
        }
    }
    eprintln!("Duration: {} ms", results.duration_ms);

    let failed = !results.errors.is_empty();
    write_json(&results, output);
    if failed {
        std::process::exit(1);
    }
}

/// Check a scenario is reproducible
fn cmd_verify(path: PathBuf, runs: u32) {
    let scenario = load_or_exit(&path);
    tracing::info!(scenario = %scenario.name, runs, "Verifying determinism");

    let mut hashes = Vec::new();
    for run in 0..runs {
        match run_scenario(&scenario, None) {
            Ok(report) => {
                tracing::debug!(run, hash = report.final_state_hash, "Run complete");
                hashes.push(report.final_state_hash);
            }
            Err(e) => {
                eprintln!("FATAL: {e}");
                std::process::exit(1);
            }
        }
    }

    if hashes.windows(2).all(|w| w[0] == w[1]) {
        eprintln!("PASS: All {runs} runs produced identical results");
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        eprintln!("  Hashes: {hashes:?}");
        std::process::exit(1);
    }
}
