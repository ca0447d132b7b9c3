//! Batch scenario runner.
//!
//! Runs every scenario of a directory in parallel on a dedicated rayon
//! pool. Each scenario owns its world, so results do not depend on the
//! number of threads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::report::ScenarioReport;
use crate::runner::run_scenario;
use crate::scenario::{Scenario, ScenarioError};

/// Configuration for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory scanned for `*.ron` scenarios.
    pub dir: PathBuf,
    /// Worker threads (0 = rayon default).
    pub threads: usize,
    /// Turn count overriding each scenario's own.
    pub ticks: Option<u32>,
}

/// A scenario that could not be run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Scenario file.
    pub path: PathBuf,
    /// Error message.
    pub message: String,
}

/// Results of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Configuration used.
    pub config: BatchConfig,
    /// Reports, in file name order.
    pub reports: Vec<ScenarioReport>,
    /// Scenarios that failed to load or set up.
    pub errors: Vec<BatchFailure>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl BatchResults {
    /// Save results to a JSON file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from a JSON file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Progress tracker shared between workers.
#[derive(Debug)]
pub struct BatchProgress {
    completed: AtomicU32,
    total: u32,
}

impl BatchProgress {
    /// Create a tracker for `total` scenarios.
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            completed: AtomicU32::new(0),
            total,
        }
    }

    /// Record one finished scenario and return the new count.
    pub fn record_completion(&self) -> u32 {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Scenarios finished so far.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Total scenarios.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }
}

/// All `*.ron` files directly inside `dir`, sorted by name.
pub fn scenario_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "ron"))
        .collect();
    files.sort();
    Ok(files)
}

fn run_file(path: &Path, ticks: Option<u32>) -> Result<ScenarioReport, ScenarioError> {
    let scenario = Scenario::load(path)?;
    run_scenario(&scenario, ticks)
}

/// Run every scenario of `config.dir`.
pub fn run_batch(config: BatchConfig) -> std::io::Result<BatchResults> {
    let start = Instant::now();
    let files = scenario_files(&config.dir)?;
    let total = u32::try_from(files.len()).unwrap_or(u32::MAX);
    let progress = BatchProgress::new(total);

    info!(
        dir = %config.dir.display(),
        scenarios = files.len(),
        threads = config.threads,
        "Starting batch run"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(std::io::Error::other)?;

    let results: Vec<(PathBuf, Result<ScenarioReport, ScenarioError>)> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let result = run_file(path, config.ticks);
                let done = progress.record_completion();
                debug!("Progress: {}/{}", done, progress.total());
                (path.clone(), result)
            })
            .collect()
    });

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for (path, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Scenario failed");
                errors.push(BatchFailure {
                    path,
                    message: e.to_string(),
                });
            }
        }
    }

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        completed = reports.len(),
        failed = errors.len(),
        duration_ms,
        "Batch complete"
    );

    Ok(BatchResults {
        config,
        reports,
        errors,
        duration_ms,
    })
}
