//! Training configuration with builder pattern.
//!
//! [`BoostingConfig`] groups every knob of the ordered boosting loop. It uses
//! the `bon` crate for builder generation and validates at build time.
//!
//! # Example
//!
//! ```
//! use permboost::config::{BoostingConfig, BoostingType, TreeParams};
//! use permboost::training::Objective;
//!
//! let config = BoostingConfig::builder().build().unwrap();
//! assert_eq!(config.boosting_type, BoostingType::Ordered);
//!
//! let config = BoostingConfig::builder()
//!     .objective(Objective::logistic())
//!     .iterations(200)
//!     .learning_rate(0.1)
//!     .tree(TreeParams { depth: 4 })
//!     .build()
//!     .unwrap();
//! ```

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::training::{Objective, Verbosity};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors detected before the first boosting iteration runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Learning rate must be positive.
    InvalidLearningRate(f64),
    /// Number of iterations must be at least 1.
    InvalidIterations,
    /// At least one permutation is required.
    InvalidPermutationCount,
    /// Fold growth rate must be greater than 1.
    InvalidGrowthRate(f64),
    /// Minimum fold size must be positive.
    InvalidMinFoldSize,
    /// At least one device (aggregation stripe) is required.
    InvalidDeviceCount,
    /// Tree depth outside `1..=16`.
    InvalidDepth(u32),
    /// Negative or non-finite regularization parameter.
    InvalidRegularization { field: &'static str, value: f64 },
    /// Leaf estimation needs at least one descent step.
    InvalidLeafIterations,
    /// Not enough queries to give every device its share of folds.
    TooFewGroups { groups: usize, required: usize },
    /// Fold planning produced an empty first estimation range.
    ZeroMinEstimationSize,
    /// Cross-validation fold count is unusable for this dataset.
    InvalidFoldCount { folds: usize, samples: usize },
    /// Cross-validation would shuffle data marked as ordered.
    OrderedCrossValidation,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLearningRate(v) => {
                write!(f, "learning_rate must be positive, got {}", v)
            }
            Self::InvalidIterations => write!(f, "iterations must be at least 1"),
            Self::InvalidPermutationCount => write!(f, "permutation_count must be at least 1"),
            Self::InvalidGrowthRate(v) => {
                write!(f, "fold_len_multiplier must be greater than 1, got {}", v)
            }
            Self::InvalidMinFoldSize => write!(f, "min_fold_size must be positive"),
            Self::InvalidDeviceCount => write!(f, "device_count must be at least 1"),
            Self::InvalidDepth(d) => write!(f, "depth must be in 1..=16, got {}", d),
            Self::InvalidRegularization { field, value } => {
                write!(f, "{} must be non-negative, got {}", field, value)
            }
            Self::InvalidLeafIterations => {
                write!(f, "leaves estimation iterations must be at least 1")
            }
            Self::TooFewGroups { groups, required } => write!(
                f,
                "need at least {} groups for the requested device count, got {}",
                required, groups
            ),
            Self::ZeroMinEstimationSize => write!(f, "minimal estimation size is zero"),
            Self::InvalidFoldCount { folds, samples } => write!(
                f,
                "cannot split {} samples into {} cross-validation folds",
                samples, folds
            ),
            Self::OrderedCrossValidation => {
                write!(f, "cross-validation of ordered data is not supported")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// Parameter groups
// =============================================================================

/// How folds are laid out over each permutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoostingType {
    /// Growing folds: leaves are estimated only on samples "before" the ones
    /// they are evaluated on.
    #[default]
    Ordered,
    /// A single fold covering every sample.
    Plain,
}

/// Oblivious tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Number of levels; a tree has `2^depth` leaves.
    pub depth: u32,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self { depth: 6 }
    }
}

/// Step rule of the leaf-value descent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeavesEstimationMethod {
    /// Divide the gradient by the regularized second derivative.
    #[default]
    Newton,
    /// Divide the gradient by the regularized leaf weight.
    Gradient,
}

/// Leaf-value estimation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeavesEstimationConfig {
    pub method: LeavesEstimationMethod,
    /// Number of descent steps per boosting iteration.
    pub iterations: u32,
    /// L2 regularization on leaf values.
    pub l2_reg: f64,
    /// Divide every task's loss by its total weight.
    pub normalize_by_weight: bool,
    /// Halve rejected steps instead of accepting them.
    pub backtracking: bool,
    pub max_backtracking_steps: u32,
    /// Leaves lighter than this are pinned to zero.
    pub min_leaf_weight: f64,
}

impl Default for LeavesEstimationConfig {
    fn default() -> Self {
        Self {
            method: LeavesEstimationMethod::Newton,
            iterations: 1,
            l2_reg: 3.0,
            normalize_by_weight: true,
            backtracking: true,
            max_backtracking_steps: 8,
            min_leaf_weight: 1e-20,
        }
    }
}

/// Stop when the test metric has not improved for a number of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverfittingDetectorConfig {
    pub wait_iterations: usize,
}

/// Where and how often training progress is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    /// Minimum wall time between two snapshots.
    pub interval: Duration,
    /// Also save every this many iterations.
    pub iteration_interval: Option<usize>,
}

impl SnapshotConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: Duration::from_secs(600),
            iteration_interval: None,
        }
    }
}

// =============================================================================
// BoostingConfig
// =============================================================================

/// Configuration of one ordered boosting run.
///
/// # Structure
///
/// - **Objective**: loss to minimize
/// - **Boosting**: iterations, learning rate, boosting type
/// - **Permutations & folds**: permutation count, fold growth, block size
/// - **Weak learner**: tree depth, random strength, leaf estimation
/// - **Stopping & persistence**: overfitting detector, snapshots
/// - **Resources**: devices (aggregation stripes), threads, seed
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct BoostingConfig {
    // === Objective ===
    /// Loss function. Default: squared loss.
    #[builder(default)]
    pub objective: Objective,

    // === Boosting ===
    /// Maximum number of boosting iterations. Default: 500.
    #[builder(default = 500)]
    pub iterations: usize,

    /// Shrinkage applied to every weak model. Default: 0.03.
    #[builder(default = 0.03)]
    pub learning_rate: f64,

    #[builder(default)]
    pub boosting_type: BoostingType,

    // === Permutations & folds ===
    /// Number of sample orderings, the identity estimation ordering
    /// included. Forced to 1 for ordered data. Default: 4.
    #[builder(default = 4)]
    pub permutation_count: usize,

    /// Growth factor between consecutive folds. Default: 2.0.
    #[builder(default = 2.0)]
    pub fold_len_multiplier: f64,

    /// Preferred size of the first estimation range. Default: 100.
    #[builder(default = 100)]
    pub min_fold_size: usize,

    /// Suggested shuffle block for large ungrouped datasets. Default: 32.
    #[builder(default = 32)]
    pub permutation_block_size: usize,

    // === Weak learner ===
    #[builder(default)]
    pub tree: TreeParams,

    /// Scale of the noise added to split scores. Default: 1.0.
    #[builder(default = 1.0)]
    pub random_strength: f64,

    #[builder(default)]
    pub leaves: LeavesEstimationConfig,

    // === Stopping & persistence ===
    pub overfitting_detector: Option<OverfittingDetectorConfig>,

    /// Truncate the ensemble to the best test iteration. Default: false.
    #[builder(default = false)]
    pub use_best_model: bool,

    pub snapshot: Option<SnapshotConfig>,

    // === Resources ===
    /// Number of aggregation stripes per reduction. Default: 1.
    #[builder(default = 1)]
    pub device_count: usize,

    /// Number of threads. `None` uses all available cores.
    pub n_threads: Option<NonZeroUsize>,

    /// Random seed. Default: 0.
    #[builder(default = 0)]
    pub seed: u64,

    /// Verbosity level. Default: `Silent`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: boosting_config_builder::IsComplete> BoostingConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid.
    pub fn build(self) -> Result<BoostingConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}

impl BoostingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if self.iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        if self.permutation_count == 0 {
            return Err(ConfigError::InvalidPermutationCount);
        }
        if self.fold_len_multiplier.is_nan() || self.fold_len_multiplier <= 1.0 {
            return Err(ConfigError::InvalidGrowthRate(self.fold_len_multiplier));
        }
        if self.min_fold_size == 0 {
            return Err(ConfigError::InvalidMinFoldSize);
        }
        if self.device_count == 0 {
            return Err(ConfigError::InvalidDeviceCount);
        }
        if self.tree.depth == 0 || self.tree.depth > 16 {
            return Err(ConfigError::InvalidDepth(self.tree.depth));
        }
        check_non_negative("random_strength", self.random_strength)?;
        check_non_negative("l2_reg", self.leaves.l2_reg)?;
        check_non_negative("min_leaf_weight", self.leaves.min_leaf_weight)?;
        if self.leaves.iterations == 0 {
            return Err(ConfigError::InvalidLeafIterations);
        }
        Ok(())
    }

    /// Thread count in `run_with_threads` semantics (0 = auto).
    pub fn thread_count(&self) -> usize {
        self.n_threads.map_or(0, NonZeroUsize::get)
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRegularization { field, value })
    }
}
