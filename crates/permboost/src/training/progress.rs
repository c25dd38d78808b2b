//! Training progress: metric history, stopping policy and snapshot gating.
//!
//! - [`OverfittingDetector`]: stops when the test metric stalls
//! - [`ProgressTracker`]: what the boosting loop reports to and asks
//!   "should I stop / save / restore?"
//! - [`InterruptFlag`]: cooperative cancellation from another thread

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{BoostingConfig, SnapshotConfig};
use crate::persist::SnapshotError;

use super::logger::TrainingLogger;

// =============================================================================
// StopReason
// =============================================================================

/// Why the boosting loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The configured number of iterations was reached.
    IterationLimit,
    /// The test metric did not improve for too long.
    OverfittingDetector,
    /// [`InterruptFlag::interrupt`] was called.
    Interrupted,
}

// =============================================================================
// OverfittingDetector
// =============================================================================

/// Iteration-wait overfitting detector.
///
/// Votes to stop once the test metric (lower is better) has not improved for
/// more than `wait_iterations` iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingDetector {
    wait_iterations: usize,
    best_value: Option<f64>,
    best_iteration: usize,
    current_iteration: usize,
}

impl OverfittingDetector {
    pub fn new(wait_iterations: usize) -> Self {
        Self {
            wait_iterations,
            best_value: None,
            best_iteration: 0,
            current_iteration: 0,
        }
    }

    /// Record the metric of the next iteration.
    pub fn add_error(&mut self, value: f64) {
        let improved = self.best_value.is_none_or(|best| value < best);
        if improved {
            self.best_value = Some(value);
            self.best_iteration = self.current_iteration;
        }
        self.current_iteration += 1;
    }

    pub fn is_need_stop(&self) -> bool {
        self.current_iteration - self.best_iteration > self.wait_iterations
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn current_iteration(&self) -> usize {
        self.current_iteration
    }
}

// =============================================================================
// State
// =============================================================================

/// Per-iteration learn and test metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub learn: Vec<f64>,
    pub test: Vec<f64>,
}

/// Everything the tracker needs to continue after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Number of finished iterations.
    pub iteration: usize,
    pub history: MetricsHistory,
    /// `(iteration, value)` of the best test metric so far.
    pub best_test: Option<(usize, f64)>,
    pub detector: Option<OverfittingDetector>,
}

// =============================================================================
// InterruptFlag
// =============================================================================

/// Shared cancellation flag, polled once per iteration.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// =============================================================================
// ProgressTracker
// =============================================================================

/// Collects metrics, applies the stopping policy and decides when to persist.
#[derive(Debug)]
pub struct ProgressTracker {
    iteration_limit: usize,
    state: TrackerState,
    snapshot: Option<SnapshotConfig>,
    last_snapshot_time: Instant,
    last_snapshot_iteration: usize,
    has_test: bool,
    interrupt: InterruptFlag,
    best_test_cursor: Option<Array2<f64>>,
    logger: TrainingLogger,
}

impl ProgressTracker {
    pub fn new(config: &BoostingConfig) -> Self {
        let state = TrackerState {
            detector: config
                .overfitting_detector
                .map(|od| OverfittingDetector::new(od.wait_iterations)),
            ..Default::default()
        };
        Self {
            iteration_limit: config.iterations,
            state,
            snapshot: config.snapshot.clone(),
            last_snapshot_time: Instant::now(),
            last_snapshot_iteration: 0,
            has_test: false,
            interrupt: InterruptFlag::new(),
            best_test_cursor: None,
            logger: TrainingLogger::new(config.verbosity),
        }
    }

    /// Whether a test dataset takes part in this run.
    pub fn set_has_test(&mut self, has_test: bool) {
        self.has_test = has_test;
    }

    #[inline]
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    #[inline]
    pub fn iteration(&self) -> usize {
        self.state.iteration
    }

    #[inline]
    pub fn history(&self) -> &MetricsHistory {
        &self.state.history
    }

    /// Best test iteration, if any test metric was tracked.
    pub fn best_iteration(&self) -> Option<usize> {
        self.state.best_test.map(|(iteration, _)| iteration)
    }

    /// A handle that stops the run at the next iteration boundary.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    // -------------------------------------------------------------------------
    // Stopping
    // -------------------------------------------------------------------------

    /// The reason to stop before starting the next iteration, if any.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.state.iteration >= self.iteration_limit {
            return Some(StopReason::IterationLimit);
        }
        if self.state.detector.as_ref().is_some_and(OverfittingDetector::is_need_stop) {
            return Some(StopReason::OverfittingDetector);
        }
        None
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop_reason().is_some()
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    pub fn track_learn_errors(&mut self, value: f64) {
        self.state.history.learn.push(value);
    }

    pub fn track_test_errors(&mut self, value: f64) {
        let iteration = self.state.iteration;
        self.state.history.test.push(value);
        if self.state.best_test.is_none_or(|(_, best)| value < best) {
            self.state.best_test = Some((iteration, value));
        }
        if let Some(detector) = &mut self.state.detector {
            detector.add_error(value);
        }
    }

    /// Whether the current iteration holds the best test metric so far.
    pub fn is_best_test_iteration(&self) -> bool {
        self.state
            .best_test
            .is_some_and(|(iteration, _)| iteration == self.state.iteration)
    }

    pub fn finish_iteration(&mut self) {
        let iteration = self.state.iteration;
        let learn = self.state.history.learn.last().copied().unwrap_or(f64::NAN);
        let test = self.state.history.test.get(iteration).copied();
        self.logger
            .log_iteration(iteration, learn, test, self.state.best_test);
        self.state.iteration += 1;
        if self.state.detector.as_ref().is_some_and(OverfittingDetector::is_need_stop) {
            self.logger.info(&format!(
                "Overfitting detector stopped training after iteration {iteration}"
            ));
        }
    }

    pub fn need_best_test_cursor(&self) -> bool {
        self.has_test
    }

    pub fn set_best_test_cursor(&mut self, cursor: Array2<f64>) {
        self.best_test_cursor = Some(cursor);
    }

    pub fn best_test_cursor(&self) -> Option<&Array2<f64>> {
        self.best_test_cursor.as_ref()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    fn snapshot_due(&self, config: &SnapshotConfig) -> bool {
        let by_iteration = config.iteration_interval.is_some_and(|every| {
            every > 0 && self.state.iteration >= self.last_snapshot_iteration + every
        });
        by_iteration || self.last_snapshot_time.elapsed() >= config.interval
    }

    /// Save a snapshot if one is configured and due.
    ///
    /// `write` receives the tracker state and the destination. Returns
    /// whether a snapshot was written.
    pub fn maybe_save_snapshot<F>(&mut self, write: F) -> Result<bool, SnapshotError>
    where
        F: FnOnce(&TrackerState, &mut dyn Write) -> Result<(), SnapshotError>,
    {
        let due = self
            .snapshot
            .as_ref()
            .is_some_and(|config| self.snapshot_due(config));
        if due { self.save_snapshot(write) } else { Ok(false) }
    }

    /// Save a snapshot if one is configured, regardless of the interval.
    pub fn save_snapshot<F>(&mut self, write: F) -> Result<bool, SnapshotError>
    where
        F: FnOnce(&TrackerState, &mut dyn Write) -> Result<(), SnapshotError>,
    {
        let Some(config) = &self.snapshot else {
            return Ok(false);
        };
        let path = config.path.clone();
        let tmp = temporary_path(&path);
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            write(&self.state, &mut out)?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        self.last_snapshot_time = Instant::now();
        self.last_snapshot_iteration = self.state.iteration;
        self.logger.debug(&format!(
            "Saved snapshot at iteration {} to {}",
            self.state.iteration,
            path.display()
        ));
        Ok(true)
    }

    /// Restore from the configured snapshot file if it exists.
    ///
    /// `read` restores the caller's part of the state and returns the
    /// tracker state. Returns whether a snapshot was restored.
    pub fn maybe_restore_from_snapshot<F>(&mut self, read: F) -> Result<bool, SnapshotError>
    where
        F: FnOnce(&mut dyn Read) -> Result<TrackerState, SnapshotError>,
    {
        let Some(config) = &self.snapshot else {
            return Ok(false);
        };
        if !config.path.exists() {
            return Ok(false);
        }
        let mut input = BufReader::new(File::open(&config.path)?);
        let state = read(&mut input)?;
        if state.detector.is_some() != self.state.detector.is_some() {
            return Err(SnapshotError::StateMismatch(
                "overfitting detector configuration changed".into(),
            ));
        }
        self.state = state;
        self.last_snapshot_time = Instant::now();
        self.last_snapshot_iteration = self.state.iteration;
        self.logger.info(&format!(
            "Restored snapshot at iteration {}",
            self.state.iteration
        ));
        Ok(true)
    }
}

fn temporary_path(path: &std::path::Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
