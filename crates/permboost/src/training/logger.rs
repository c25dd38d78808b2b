//! Training progress logging.
//!
//! [`TrainingLogger`] filters messages by [`Verbosity`] and forwards them to
//! `tracing`, so any subscriber the caller installs receives them.

use serde::{Deserialize, Serialize};

/// How much the training loop reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verbosity {
    #[default]
    Silent,
    /// Only warnings.
    Warning,
    /// Start, finish and per-iteration metrics.
    Info,
    /// Everything, including snapshot and estimation details.
    Debug,
}

/// Verbosity-gated logger for a training run.
#[derive(Debug, Clone, Copy)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    #[inline]
    pub fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Silent && self.verbosity >= level
    }

    pub fn warn(&self, message: &str) {
        if self.enabled(Verbosity::Warning) {
            tracing::warn!("{message}");
        }
    }

    pub fn info(&self, message: &str) {
        if self.enabled(Verbosity::Info) {
            tracing::info!("{message}");
        }
    }

    pub fn debug(&self, message: &str) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!("{message}");
        }
    }

    /// Log the metrics of one iteration.
    pub fn log_iteration(&self, iteration: usize, learn: f64, test: Option<f64>, best: Option<(usize, f64)>) {
        if !self.enabled(Verbosity::Info) {
            return;
        }
        match (test, best) {
            (Some(test), Some((best_iteration, best))) => {
                tracing::info!(iteration, learn, test, best, best_iteration, "iteration finished");
            }
            (Some(test), None) => tracing::info!(iteration, learn, test, "iteration finished"),
            _ => tracing::info!(iteration, learn, "iteration finished"),
        }
    }
}

impl Default for TrainingLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_ordering() {
        assert!(Verbosity::Debug > Verbosity::Info);
        assert!(Verbosity::Info > Verbosity::Warning);
        assert!(Verbosity::Warning > Verbosity::Silent);
    }

    #[test]
    fn silent_enables_nothing() {
        let logger = TrainingLogger::new(Verbosity::Silent);
        assert!(!logger.enabled(Verbosity::Warning));
        assert!(!logger.enabled(Verbosity::Silent));
    }

    #[test]
    fn info_enables_warnings() {
        let logger = TrainingLogger::new(Verbosity::Info);
        assert!(logger.enabled(Verbosity::Warning));
        assert!(logger.enabled(Verbosity::Info));
        assert!(!logger.enabled(Verbosity::Debug));
        // Emitting without a subscriber is a no-op.
        logger.log_iteration(0, 1.0, Some(2.0), Some((0, 2.0)));
    }
}
