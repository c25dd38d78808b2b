//! Ordered boosting.
//!
//! ## Boosting loop
//!
//! - [`DynamicBoosting`]: the iteration state machine
//! - [`ProgressTracker`]: metric history, stopping policy, snapshot gating
//! - [`train`]: one-call training of oblivious trees
//! - [`cv::cross_validate`]: cross-validation on top of the loop
//!
//! ## Building blocks
//!
//! - [`folds`]: growing (estimate, validate) folds per permutation
//! - [`permutations`]: permuted datasets and their objective views
//! - [`slots`]: per-fold and estimation storage for cursors and models
//! - [`estimation`]: batched Newton estimation of leaf values
//! - [`weak`]: weak-learner traits and oblivious trees
//!
//! ## Objectives
//!
//! - [`SquaredLoss`]: regression
//! - [`LogisticLoss`]: binary classification on log-odds

mod boosting;
pub mod cache;
pub mod cv;
pub mod estimation;
pub mod folds;
mod logger;
mod metrics;
mod objectives;
pub mod permutations;
mod progress;
pub mod random_score;
pub mod slots;
pub mod target;
pub mod weak;

pub use boosting::{BoostingResult, DynamicBoosting, needs_estimation_task, select_learn_permutation};
pub use estimation::{EstimationError, LeavesEstimator};
pub use logger::{TrainingLogger, Verbosity};
pub use metrics::MetricCalcer;
pub use objectives::{LogisticLoss, Objective, ObjectiveFn, SquaredLoss};
pub use progress::{
    InterruptFlag, MetricsHistory, OverfittingDetector, ProgressTracker, StopReason, TrackerState,
};

use crate::config::BoostingConfig;
use crate::data::TrainingData;
use crate::error::TrainError;
use crate::utils::Parallelism;

use weak::{ObliviousTreeLearner, ObliviousTreeModel};

/// Train oblivious trees on `learn`, tracking quality on `test`.
///
/// Use [`DynamicBoosting`] directly to keep the [`ProgressTracker`] (for
/// example to interrupt the run from another thread).
pub fn train(
    config: &BoostingConfig,
    learn: &TrainingData,
    test: Option<&TrainingData>,
) -> Result<BoostingResult<ObliviousTreeModel>, TrainError> {
    let learner = ObliviousTreeLearner::from_config(config)
        .with_parallelism(Parallelism::from_threads(config.thread_count()));
    let mut boosting = DynamicBoosting::new(config, learner);
    boosting.set_data(learn, test);
    let mut tracker = ProgressTracker::new(config);
    boosting.run(&mut tracker)
}
