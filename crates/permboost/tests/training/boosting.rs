//! End-to-end boosting scenarios.
//!
//! Focused on loop invariants: cursor consistency, permutation fallbacks,
//! stopping and best-model bookkeeping.

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use rstest::rstest;
use tempfile::TempDir;

use permboost::config::{BoostingType, OverfittingDetectorConfig, SnapshotConfig, TreeParams};
use permboost::data::ObjectsOrder;
use permboost::persist::read_snapshot;
use permboost::training::weak::{ObliviousTreeLearner, ObliviousTreeModel, WeakModel};
use permboost::training::{DynamicBoosting, ProgressTracker, StopReason, Verbosity, train};
use permboost::{BoostingConfig, Objective, Parallelism, TrainError, TrainingData};

use super::common::{binary_data, grouped_data, mean_squared_error, regression_arrays, regression_data};

fn config(boosting_type: BoostingType, permutation_count: usize, iterations: usize) -> BoostingConfig {
    BoostingConfig::builder()
        .boosting_type(boosting_type)
        .permutation_count(permutation_count)
        .iterations(iterations)
        .learning_rate(0.3)
        .tree(TreeParams { depth: 3 })
        .seed(7)
        .build()
        .unwrap()
}

#[rstest]
#[case::ordered(BoostingType::Ordered, 4)]
#[case::ordered_single_permutation(BoostingType::Ordered, 1)]
#[case::plain(BoostingType::Plain, 4)]
#[case::plain_single_permutation(BoostingType::Plain, 1)]
fn test_cursor_matches_committed_models(#[case] boosting_type: BoostingType, #[case] permutations: usize) {
    let learn = regression_data(600, 1);
    let test = regression_data(200, 2);
    let config = config(boosting_type, permutations, 15);

    let result = train(&config, &learn, Some(&test)).unwrap();

    assert_eq!(result.stop_reason, StopReason::IterationLimit);
    assert_eq!(result.model.len(), 15);
    assert_eq!(result.history.learn.len(), 15);
    assert_eq!(result.history.test.len(), 15);

    let cursor = result.test_approx.expect("test cursor");
    let predicted = result.model.predict(&test, Parallelism::Sequential);
    for (c, p) in cursor.iter().zip(predicted.iter()) {
        assert_abs_diff_eq!(*c, *p, epsilon = 1e-4);
    }
}

#[rstest]
#[case::ordered(BoostingType::Ordered)]
#[case::plain(BoostingType::Plain)]
fn learn_error_decreases(#[case] boosting_type: BoostingType) {
    let learn = regression_data(800, 3);
    let config = config(boosting_type, 3, 30);

    let result = train(&config, &learn, None).unwrap();

    let learn_errors = &result.history.learn;
    assert!(learn_errors.last().unwrap() < &(learn_errors[0] * 0.5));
    assert!(result.history.test.is_empty());
    assert!(result.best_iteration.is_none());
    assert!(result.test_approx.is_none());
    assert!(result.best_test_approx.is_none());

    let predictions = result.model.predict(&learn, Parallelism::Parallel);
    let targets = learn.targets().to_vec();
    let base = mean_squared_error(&vec![0.0; targets.len()], &targets);
    assert!(mean_squared_error(predictions.as_slice().unwrap(), &targets) < base * 0.5);
}

/// Plain boosting on one permutation commits the sole fold model as the
/// estimation model; every other layout estimates it separately.
#[rstest]
#[case::plain_single_permutation(BoostingType::Plain, 1, true)]
#[case::plain_two_permutations(BoostingType::Plain, 2, false)]
#[case::ordered_single_permutation(BoostingType::Ordered, 1, false)]
fn estimation_model_reuses_the_sole_fold_model(
    #[case] boosting_type: BoostingType,
    #[case] permutations: usize,
    #[case] shared: bool,
) {
    let learn = regression_data(400, 41);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("estimation.snapshot"));
    let mut config = config(boosting_type, permutations, 6);
    config.snapshot = Some(snapshot.clone());

    train(&config, &learn, None).unwrap();

    let mut file = std::fs::File::open(&snapshot.path).unwrap();
    let state = read_snapshot::<_, ObliviousTreeModel>(&mut file).unwrap();
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    let estimation = bits(&state.estimation_cursor);
    let matching = state.fold_cursors.iter().filter(|c| bits(c.as_slice()) == estimation).count();
    if shared {
        assert_eq!(state.fold_cursors.len(), 1);
        assert_eq!(matching, 1);
    } else {
        assert_eq!(matching, 0);
    }
}

#[test]
fn ordered_data_trains_on_a_single_permutation() {
    let (features, targets) = regression_arrays(1000, 4);
    let learn = TrainingData::builder()
        .features(features.view())
        .targets(targets.view())
        .order(ObjectsOrder::Ordered)
        .build()
        .unwrap();
    // The configured count is ignored for ordered data.
    let config = config(BoostingType::Ordered, 6, 10);

    let result = train(&config, &learn, None).unwrap();

    assert_eq!(result.model.len(), 10);
    assert!(result.history.learn[9] < result.history.learn[0]);
}

#[test]
fn grouped_data_keeps_queries_whole() {
    let learn = grouped_data(900, 9, 5);
    let test = grouped_data(270, 9, 6);
    let config = config(BoostingType::Ordered, 3, 10);

    let result = train(&config, &learn, Some(&test)).unwrap();

    assert_eq!(result.model.len(), 10);
    assert!(result.history.test[9] < result.history.test[0]);
}

#[test]
fn logistic_objective_separates_classes() {
    let learn = binary_data(800, 8);
    let config = BoostingConfig::builder()
        .objective(Objective::logistic())
        .iterations(30)
        .learning_rate(0.3)
        .tree(TreeParams { depth: 2 })
        .build()
        .unwrap();

    let result = train(&config, &learn, None).unwrap();

    let probabilities = result
        .model
        .predict_transformed(&learn, &config.objective, Parallelism::Sequential);
    assert!(probabilities.iter().all(|&p| (0.0..=1.0).contains(&p)));
    let correct = probabilities
        .iter()
        .zip(learn.targets().iter())
        .filter(|&(&p, &y)| (p > 0.5) == (y > 0.5))
        .count();
    assert!(correct as f64 / 800.0 > 0.8);
}

#[test]
fn baseline_is_the_starting_point() {
    let (features, targets) = regression_arrays(500, 9);
    let baseline = targets.mapv(|t| t - 0.25);
    let learn = TrainingData::builder()
        .features(features.view())
        .targets(targets.view())
        .baseline(baseline.view())
        .build()
        .unwrap();
    let config = config(BoostingType::Ordered, 2, 5);

    let result = train(&config, &learn, Some(&learn)).unwrap();

    // Starting at target - 0.25 the squared error is already tiny.
    assert!(result.history.learn[0] < 0.05);
    let cursor = result.test_approx.unwrap();
    let predicted = result.model.predict(&learn, Parallelism::Sequential);
    for (c, p) in cursor.iter().zip(predicted.iter()) {
        assert_abs_diff_eq!(*c, *p, epsilon = 1e-4);
    }
}

#[test]
fn use_best_model_truncates_to_best_test_iteration() {
    let learn = regression_data(400, 10);
    // Test targets unrelated to features: test error bottoms out early.
    let (test_features, _) = regression_arrays(200, 11);
    let (_, test_targets) = regression_arrays(200, 12);
    let test = TrainingData::new(test_features.view(), test_targets.view()).unwrap();

    let config = BoostingConfig::builder()
        .iterations(40)
        .learning_rate(0.5)
        .tree(TreeParams { depth: 4 })
        .use_best_model(true)
        .build()
        .unwrap();

    let result = train(&config, &learn, Some(&test)).unwrap();

    let best = result.best_iteration.expect("test metric tracked");
    assert_eq!(result.model.len(), best + 1);
    let best_error = result.history.test[best];
    assert!(result.history.test.iter().all(|&e| e >= best_error));

    let best_approx = result.best_test_approx.expect("best test cursor");
    assert_eq!(best_approx.dim(), (1, 200));
    let predicted = result.model.predict(&test, Parallelism::Sequential);
    for (a, p) in best_approx.row(0).iter().zip(predicted.iter()) {
        assert_abs_diff_eq!(*a, *p as f64, epsilon = 1e-4);
    }
}

#[test]
fn overfitting_detector_stops_after_patience() {
    let learn = regression_data(400, 13);
    let (test_features, _) = regression_arrays(200, 14);
    let (_, test_targets) = regression_arrays(200, 15);
    let test = TrainingData::new(test_features.view(), test_targets.view()).unwrap();

    let wait = 3;
    let config = BoostingConfig::builder()
        .iterations(500)
        .learning_rate(0.5)
        .tree(TreeParams { depth: 4 })
        .overfitting_detector(OverfittingDetectorConfig { wait_iterations: wait })
        .build()
        .unwrap();

    let result = train(&config, &learn, Some(&test)).unwrap();

    assert_eq!(result.stop_reason, StopReason::OverfittingDetector);
    let best = result.best_iteration.unwrap();
    let trained = result.history.test.len();
    assert_eq!(result.model.len(), trained);
    assert_eq!(trained - 1 - best, wait);
}

#[test]
fn interrupt_before_first_iteration_yields_empty_model() {
    let learn = regression_data(300, 16);
    let config = config(BoostingType::Ordered, 3, 10);
    let learner = ObliviousTreeLearner::from_config(&config);
    let mut boosting = DynamicBoosting::new(&config, learner);
    boosting.set_data(&learn, None);

    let mut tracker = ProgressTracker::new(&config);
    tracker.interrupt_flag().interrupt();
    let result = boosting.run(&mut tracker).unwrap();

    assert_eq!(result.stop_reason, StopReason::Interrupted);
    assert!(result.model.is_empty());
    assert!(result.history.learn.is_empty());
    assert_eq!(tracker.iteration(), 0);
}

#[test]
fn identical_seeds_give_identical_models() {
    let learn = regression_data(600, 17);
    let mut sequential = config(BoostingType::Ordered, 4, 8);
    sequential.n_threads = NonZeroUsize::new(1);
    let mut parallel = sequential.clone();
    parallel.n_threads = NonZeroUsize::new(3);

    let a = train(&sequential, &learn, None).unwrap();
    let b = train(&parallel, &learn, None).unwrap();

    assert_eq!(a.model.len(), b.model.len());
    for (x, y) in a.model.weak_models().iter().zip(b.model.weak_models()) {
        assert_eq!(x.structure(), y.structure());
    }
    let pa = a.model.predict(&learn, Parallelism::Sequential);
    let pb = b.model.predict(&learn, Parallelism::Sequential);
    for (x, y) in pa.iter().zip(pb.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
    }
}

#[test]
fn too_few_queries_fail_before_training() {
    let learn = grouped_data(30, 10, 18);
    let config = config(BoostingType::Ordered, 2, 5);

    let err = train(&config, &learn, None).unwrap_err();

    assert!(matches!(err, TrainError::Config(_)));
}

#[test]
fn invalid_config_fails_before_training() {
    let learn = regression_data(100, 19);
    let mut config = config(BoostingType::Ordered, 2, 5);
    config.fold_len_multiplier = 1.0;

    let err = train(&config, &learn, None).unwrap_err();

    assert!(matches!(err, TrainError::Config(_)));
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn verbose_run_reports_through_tracing() {
    let learn = regression_data(300, 20);
    let mut config = config(BoostingType::Ordered, 2, 3);
    config.verbosity = Verbosity::Info;
    // Stay on this thread so the scoped subscriber sees every event.
    config.n_threads = NonZeroUsize::new(1);

    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, || train(&config, &learn, None).unwrap());

    let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("Starting training"));
    assert_eq!(output.matches("iteration finished").count(), 3);
    assert!(output.contains("Training finished"));
}
