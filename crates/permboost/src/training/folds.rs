//! Growing-fold planning.
//!
//! Ordered boosting estimates leaf values on a prefix of a permutation and
//! tracks quality on the block right after it. Folds grow geometrically so the
//! number of folds stays logarithmic in the sample count:
//!
//! ```text
//! fold 0: estimate [0, m)        validate [m, m*g)
//! fold 1: estimate [0, m*g)      validate [m*g, m*g^2)
//! ...
//! fold k: estimate [0, r_{k-1})  validate [r_{k-1}, n)
//! ```
//!
//! Every cut point is snapped up to a query start.

use serde::{Deserialize, Serialize};

use crate::config::{BoostingConfig, BoostingType, ConfigError};
use crate::data::{QueryGrouping, Slice};
use crate::utils::{ceil_div, ceil_log2};

/// Below this sample count the first estimation range is a single sample.
const SMALL_DATASET: usize = 500;
/// Upper bound on the number of folds before the minimum size is raised.
const MAX_FOLD_LOG: u32 = 18;

/// One (estimate, validate) pair over a permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Samples whose gradients determine leaf values.
    pub estimate_samples: Slice,
    /// Samples on which the fold's model quality is tracked.
    pub quality_evaluate_samples: Slice,
}

impl Fold {
    /// Length of this fold's cursor: everything up to the validate end.
    #[inline]
    pub fn cursor_len(&self) -> usize {
        self.quality_evaluate_samples.right
    }

    /// `[0, validate.right)`.
    #[inline]
    pub fn all_samples(&self) -> Slice {
        Slice::full(self.cursor_len())
    }
}

/// Splits a permutation into growing folds.
#[derive(Debug, Clone, Copy)]
pub struct FoldPlanner {
    boosting_type: BoostingType,
    min_fold_size: usize,
    device_count: usize,
}

impl FoldPlanner {
    pub fn new(boosting_type: BoostingType, min_fold_size: usize, device_count: usize) -> Self {
        Self {
            boosting_type,
            min_fold_size,
            device_count,
        }
    }

    pub fn from_config(config: &BoostingConfig) -> Self {
        Self::new(
            config.boosting_type,
            config.min_fold_size,
            config.device_count,
        )
    }

    /// Size of the first estimation range before query snapping.
    pub fn min_estimation_size(&self, sample_count: usize) -> usize {
        if sample_count < SMALL_DATASET {
            return 1;
        }
        let min_fold_size = self.min_fold_size.max(1);
        let fold_count = ceil_log2(ceil_div(sample_count, min_fold_size));
        if fold_count >= MAX_FOLD_LOG {
            ceil_div(sample_count, 1 << MAX_FOLD_LOG)
        } else {
            self.min_fold_size.min(sample_count / 50)
        }
    }

    /// Plan folds for `sample_count` samples.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::TooFewGroups`] with fewer than `4 * device_count` queries
    /// - [`ConfigError::ZeroMinEstimationSize`] if the first range is empty
    /// - [`ConfigError::InvalidGrowthRate`] for `growth_rate <= 1`
    ///
    /// All checks run in plain mode too.
    pub fn plan(
        &self,
        sample_count: usize,
        growth_rate: f64,
        grouping: &QueryGrouping,
    ) -> Result<Vec<Fold>, ConfigError> {
        debug_assert_eq!(grouping.n_samples(), sample_count);
        let device_count = self.device_count.max(1);

        let mut min_size = grouping.next_query_offset_for_line(self.min_estimation_size(sample_count));
        if device_count > 1 {
            let query = (16 * device_count).min(grouping.query_count() / 2);
            min_size = min_size.max(grouping.query_offset(query));
        }

        let required = 4 * device_count;
        if grouping.query_count() < required {
            return Err(ConfigError::TooFewGroups {
                groups: grouping.query_count(),
                required,
            });
        }
        if min_size == 0 {
            return Err(ConfigError::ZeroMinEstimationSize);
        }
        if growth_rate.is_nan() || growth_rate <= 1.0 {
            return Err(ConfigError::InvalidGrowthRate(growth_rate));
        }

        if self.boosting_type == BoostingType::Plain {
            let all = Slice::full(sample_count);
            return Ok(vec![Fold {
                estimate_samples: all,
                quality_evaluate_samples: all,
            }]);
        }

        let next_right = |left: usize| -> usize {
            let grown = ((left as f64 * growth_rate) as usize).min(sample_count);
            grouping.next_query_offset_for_line(grown.max(left + 1))
        };

        let mut folds = Vec::new();
        let mut left = min_size.min(sample_count);
        loop {
            let right = next_right(left);
            folds.push(Fold {
                estimate_samples: Slice::new(0, left),
                quality_evaluate_samples: Slice::new(left, right),
            });
            if right >= sample_count {
                break;
            }
            left = right;
        }
        Ok(folds)
    }
}
