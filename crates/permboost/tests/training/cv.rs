//! Cross-validation driver.

use permboost::config::{OverfittingDetectorConfig, TreeParams};
use permboost::data::ObjectsOrder;
use permboost::training::cv::{CvParams, cross_validate, split_folds};
use permboost::{BoostingConfig, ConfigError, TrainError, TrainingData};

use super::common::{grouped_data, regression_arrays, regression_data};

fn config(iterations: usize) -> BoostingConfig {
    BoostingConfig::builder()
        .iterations(iterations)
        .learning_rate(0.3)
        .permutation_count(2)
        .tree(TreeParams { depth: 3 })
        .build()
        .unwrap()
}

#[test]
fn reports_every_iteration_with_spread() {
    let data = regression_data(600, 31);
    let result = cross_validate(&config(10), &data, &CvParams::default()).unwrap();

    assert_eq!(result.iterations.len(), 10);
    let first = &result.iterations[0];
    let last = &result.iterations[9];
    assert!(last.test.mean < first.test.mean);
    assert!(last.learn.mean < first.learn.mean);
    assert!(result.iterations.iter().all(|it| it.test.std >= 0.0));
    assert!(result.best_iteration < 10);
}

#[test]
fn folds_partition_samples_and_keep_queries_whole() {
    let data = grouped_data(300, 6, 32);
    let params = CvParams {
        fold_count: 4,
        ..Default::default()
    };

    let folds = split_folds(&data, &params);

    assert_eq!(folds.len(), 4);
    let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..300).collect::<Vec<_>>());
    for fold in &folds {
        assert!(!fold.is_empty());
        assert_eq!(fold.len() % 6, 0);
    }
}

#[test]
fn inverted_trains_on_the_small_side() {
    let data = regression_data(400, 33);
    let params = CvParams {
        fold_count: 4,
        inverted: true,
        ..Default::default()
    };

    let result = cross_validate(&config(5), &data, &params).unwrap();

    assert_eq!(result.iterations.len(), 5);
}

#[test]
fn detector_on_average_test_metric_truncates() {
    // Targets unrelated to features, so the average test metric stalls.
    let (features, _) = regression_arrays(300, 34);
    let (_, targets) = regression_arrays(300, 35);
    let data = TrainingData::new(features.view(), targets.view()).unwrap();
    let mut config = config(300);
    config.learning_rate = 0.5;
    config.overfitting_detector = Some(OverfittingDetectorConfig { wait_iterations: 2 });

    let result = cross_validate(&config, &data, &CvParams::default()).unwrap();

    assert!(result.iterations.len() < 300);
    assert_eq!(result.iterations.len() - 1 - result.best_iteration, 2);
}

#[test]
fn rejects_unusable_inputs() {
    let data = regression_data(50, 36);

    let too_few = CvParams {
        fold_count: 1,
        ..Default::default()
    };
    assert!(matches!(
        cross_validate(&config(3), &data, &too_few),
        Err(TrainError::Config(ConfigError::InvalidFoldCount { .. }))
    ));

    let (features, targets) = regression_arrays(50, 37);
    let ordered = TrainingData::builder()
        .features(features.view())
        .targets(targets.view())
        .order(ObjectsOrder::Ordered)
        .build()
        .unwrap();
    assert!(matches!(
        cross_validate(&config(3), &ordered, &CvParams::default()),
        Err(TrainError::Config(ConfigError::OrderedCrossValidation))
    ));
}
