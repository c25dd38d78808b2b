//! Cross-validation driver.
//!
//! Splits the data into query-aligned folds, trains one model per fold with
//! the overfitting detector disabled, and aggregates the per-iteration
//! metrics. The detector, if configured, then runs on the averaged test
//! metric and truncates the result.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{BoostingConfig, ConfigError};
use crate::data::{DatasetError, TrainingData};
use crate::error::TrainError;
use crate::utils::Parallelism;

use super::boosting::DynamicBoosting;
use super::logger::TrainingLogger;
use super::progress::{OverfittingDetector, ProgressTracker};
use super::weak::ObliviousTreeLearner;

/// How the data is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvParams {
    pub fold_count: usize,
    /// Shuffle queries before splitting.
    pub shuffle: bool,
    pub seed: u64,
    /// Train on one fold and test on the rest.
    pub inverted: bool,
}

impl Default for CvParams {
    fn default() -> Self {
        Self {
            fold_count: 3,
            shuffle: true,
            seed: 0,
            inverted: false,
        }
    }
}

/// Mean and sample standard deviation across folds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvStat {
    pub mean: f64,
    pub std: f64,
}

impl CvStat {
    fn from_values(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Self { mean, std }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CvIteration {
    pub learn: CvStat,
    pub test: CvStat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CvResult {
    /// One entry per reported iteration.
    pub iterations: Vec<CvIteration>,
    /// Iteration with the lowest average test metric.
    pub best_iteration: usize,
}

/// Test sample indices of every fold.
///
/// Queries are kept whole; fold `k` takes the queries whose first sample
/// falls in `[k * n / folds, (k + 1) * n / folds)` of the (shuffled) order.
pub fn split_folds(data: &TrainingData, params: &CvParams) -> Vec<Vec<usize>> {
    let grouping = data.grouping();
    let mut queries: Vec<usize> = (0..grouping.query_count()).collect();
    if params.shuffle {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        queries.shuffle(&mut rng);
    }

    let n = data.n_samples();
    let mut folds = vec![Vec::new(); params.fold_count];
    let mut position = 0;
    for query in queries {
        let fold = (position * params.fold_count / n).min(params.fold_count - 1);
        folds[fold].extend(grouping.query_slice(query).range());
        position += grouping.query_size(query);
    }
    folds
}

fn check_params(data: &TrainingData, params: &CvParams) -> Result<(), TrainError> {
    if data.n_samples() == 0 {
        return Err(DatasetError::Empty.into());
    }
    if params.fold_count < 2 || data.n_samples() <= params.fold_count {
        return Err(ConfigError::InvalidFoldCount {
            folds: params.fold_count,
            samples: data.n_samples(),
        }
        .into());
    }
    if data.is_ordered() {
        return Err(ConfigError::OrderedCrossValidation.into());
    }
    Ok(())
}

/// Cross-validate `config` on `data`.
pub fn cross_validate(
    config: &BoostingConfig,
    data: &TrainingData,
    params: &CvParams,
) -> Result<CvResult, TrainError> {
    config.validate()?;
    check_params(data, params)?;
    let logger = TrainingLogger::new(config.verbosity);

    let mut fold_config = config.clone();
    fold_config.overfitting_detector = None;
    fold_config.use_best_model = false;
    fold_config.snapshot = None;

    let splits = split_folds(data, params);
    let mut pairs = Vec::with_capacity(splits.len());
    for (k, test_indices) in splits.iter().enumerate() {
        let rest: Vec<usize> = splits
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != k)
            .flat_map(|(_, indices)| indices.iter().copied())
            .collect();
        let (learn, test) = if params.inverted {
            (test_indices.clone(), rest)
        } else {
            (rest, test_indices.clone())
        };
        if learn.is_empty() || test.is_empty() {
            return Err(ConfigError::InvalidFoldCount {
                folds: params.fold_count,
                samples: data.n_samples(),
            }
            .into());
        }
        pairs.push((data.subset(&learn)?, data.subset(&test)?));
    }

    let parallelism = Parallelism::from_threads(config.thread_count());
    let histories = parallelism
        .maybe_par_map(&pairs, |(learn, test)| {
            let learner = ObliviousTreeLearner::from_config(&fold_config).with_parallelism(parallelism);
            let mut boosting = DynamicBoosting::new(&fold_config, learner);
            boosting.set_data(learn, Some(test));
            let mut tracker = ProgressTracker::new(&fold_config);
            boosting.run(&mut tracker).map(|result| result.history)
        })
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let iteration_count = histories.iter().map(|h| h.test.len()).min().unwrap_or(0);
    let mut detector = config
        .overfitting_detector
        .map(|od| OverfittingDetector::new(od.wait_iterations));
    let mut iterations = Vec::with_capacity(iteration_count);
    for i in 0..iteration_count {
        let learn: Vec<f64> = histories.iter().map(|h| h.learn[i]).collect();
        let test: Vec<f64> = histories.iter().map(|h| h.test[i]).collect();
        let stats = CvIteration {
            learn: CvStat::from_values(&learn),
            test: CvStat::from_values(&test),
        };
        let test_mean = stats.test.mean;
        iterations.push(stats);
        if let Some(detector) = &mut detector {
            detector.add_error(test_mean);
            if detector.is_need_stop() {
                logger.info(&format!("Cross-validation stopped by overfitting detector at iteration {i}"));
                break;
            }
        }
    }

    let best_iteration = iterations
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.test.mean.total_cmp(&b.1.test.mean))
        .map_or(0, |(i, _)| i);
    Ok(CvResult {
        iterations,
        best_iteration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use ndarray::Array2;

    fn data(n: usize, groups: Option<usize>) -> TrainingData {
        let features = Array2::from_shape_fn((2, n), |(f, i)| ((i * (f + 3)) % 7) as u8);
        let targets = Array1::from_shape_fn(n, |i| (i % 7) as f32 * 0.5);
        let mut builder = TrainingData::builder()
            .features(features.view())
            .targets(targets.view());
        if let Some(size) = groups {
            builder = builder.group_ids((0..n).map(|i| (i / size) as u32).collect());
        }
        builder.build().unwrap()
    }

    #[test]
    fn sample_standard_deviation() {
        let stat = CvStat::from_values(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(stat.mean, 2.0);
        assert_abs_diff_eq!(stat.std, 1.0);
    }

    #[test]
    fn folds_partition_samples_and_keep_queries() {
        let d = data(60, Some(4));
        let params = CvParams {
            fold_count: 3,
            ..Default::default()
        };
        let folds = split_folds(&d, &params);
        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..60).collect::<Vec<_>>());
        for fold in &folds {
            assert!(!fold.is_empty());
            for chunk in fold.chunks(4) {
                assert_eq!(chunk[0] % 4, 0);
                assert_eq!(chunk[3], chunk[0] + 3);
            }
        }
    }

    #[test]
    fn unshuffled_folds_are_contiguous() {
        let d = data(9, None);
        let params = CvParams {
            fold_count: 3,
            shuffle: false,
            ..Default::default()
        };
        assert_eq!(
            split_folds(&d, &params),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]
        );
    }

    #[test]
    fn rejects_bad_parameters() {
        let config = BoostingConfig::builder().iterations(2).build().unwrap();
        let d = data(3, None);
        let err = cross_validate(&config, &d, &CvParams::default()).unwrap_err();
        assert!(matches!(err, TrainError::Config(ConfigError::InvalidFoldCount { .. })));

        let d = data(30, None);
        let params = CvParams {
            fold_count: 1,
            ..Default::default()
        };
        assert!(cross_validate(&config, &d, &params).is_err());
    }

    #[test]
    fn reports_every_iteration() {
        let config = BoostingConfig::builder()
            .iterations(5)
            .learning_rate(0.3)
            .tree(crate::config::TreeParams { depth: 2 })
            .build()
            .unwrap();
        let d = data(90, None);
        let result = cross_validate(&config, &d, &CvParams::default()).unwrap();
        assert_eq!(result.iterations.len(), 5);
        assert!(result.best_iteration < 5);
        let first = &result.iterations[0];
        let last = &result.iterations[4];
        assert!(last.learn.mean < first.learn.mean);
        assert!(first.test.std >= 0.0);
    }
}
