//! Snapshot save/restore through the boosting loop.

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use permboost::config::{OverfittingDetectorConfig, SnapshotConfig, TreeParams};
use permboost::persist::{SnapshotError, read_snapshot};
use permboost::training::weak::ObliviousTreeModel;
use permboost::training::{StopReason, train};
use permboost::{BoostingConfig, Parallelism, TrainError};

use super::common::regression_data;

fn config(iterations: usize, snapshot: Option<SnapshotConfig>) -> BoostingConfig {
    BoostingConfig::builder()
        .iterations(iterations)
        .learning_rate(0.2)
        .permutation_count(3)
        .tree(TreeParams { depth: 3 })
        .seed(11)
        .maybe_snapshot(snapshot)
        .build()
        .unwrap()
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let learn = regression_data(700, 21);
    let test = regression_data(150, 22);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("train.snapshot"));

    let full = train(&config(12, None), &learn, Some(&test)).unwrap();

    let first = train(&config(5, Some(snapshot.clone())), &learn, Some(&test)).unwrap();
    assert_eq!(first.model.len(), 5);
    assert!(snapshot.path.exists());

    let resumed = train(&config(12, Some(snapshot.clone())), &learn, Some(&test)).unwrap();

    assert_eq!(resumed.stop_reason, StopReason::IterationLimit);
    assert_eq!(resumed.model.len(), full.model.len());
    assert_eq!(resumed.history, full.history);
    assert_eq!(resumed.best_iteration, full.best_iteration);
    for (a, b) in resumed.model.weak_models().iter().zip(full.model.weak_models()) {
        assert_eq!(a, b);
    }
    let a = resumed.test_approx.unwrap();
    let b = full.test_approx.unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
    }
}

#[test]
fn final_snapshot_holds_the_whole_run() {
    let learn = regression_data(300, 23);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("final.snapshot"));

    let result = train(&config(4, Some(snapshot.clone())), &learn, None).unwrap();

    let mut file = std::fs::File::open(&snapshot.path).unwrap();
    let data = read_snapshot::<_, ObliviousTreeModel>(&mut file).unwrap();
    assert_eq!(data.tracker.iteration, 4);
    assert_eq!(data.tracker.history, result.history);
    assert_eq!(data.model.len(), 4);
    assert_eq!(data.estimation_cursor.len(), 300);
    assert!(data.test_cursor.is_none());
    assert!(data.best_test_cursor.is_none());

    // The estimation cursor is the committed model applied to the identity order.
    let predicted = result.model.predict(&learn, Parallelism::Sequential);
    for (c, p) in data.estimation_cursor.iter().zip(predicted.iter()) {
        assert_abs_diff_eq!(*c, *p, epsilon = 1e-4);
    }
}

#[test]
fn restoring_a_finished_run_trains_nothing_new() {
    let learn = regression_data(300, 24);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("done.snapshot"));

    let first = train(&config(6, Some(snapshot.clone())), &learn, None).unwrap();
    let again = train(&config(6, Some(snapshot)), &learn, None).unwrap();

    assert_eq!(again.model.len(), 6);
    assert_eq!(again.history, first.history);
}

#[test]
fn changed_fold_layout_is_rejected() {
    let learn = regression_data(400, 25);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("layout.snapshot"));

    train(&config(3, Some(snapshot.clone())), &learn, None).unwrap();

    let mut changed = config(6, Some(snapshot));
    changed.permutation_count = 5;
    let err = train(&changed, &learn, None).unwrap_err();

    assert!(matches!(
        err,
        TrainError::Snapshot(SnapshotError::StateMismatch(_))
    ));
}

#[test]
fn changed_detector_presence_is_rejected() {
    let learn = regression_data(300, 26);
    let test = regression_data(100, 27);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("detector.snapshot"));

    train(&config(3, Some(snapshot.clone())), &learn, Some(&test)).unwrap();

    let mut changed = config(6, Some(snapshot));
    changed.overfitting_detector = Some(OverfittingDetectorConfig { wait_iterations: 5 });
    let err = train(&changed, &learn, Some(&test)).unwrap_err();

    assert!(matches!(
        err,
        TrainError::Snapshot(SnapshotError::StateMismatch(_))
    ));
}

#[test]
fn corrupted_snapshot_fails_the_run() {
    let learn = regression_data(300, 28);
    let dir = TempDir::new().unwrap();
    let snapshot = SnapshotConfig::new(dir.path().join("corrupt.snapshot"));

    train(&config(2, Some(snapshot.clone())), &learn, None).unwrap();
    let mut bytes = std::fs::read(&snapshot.path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&snapshot.path, bytes).unwrap();

    let err = train(&config(4, Some(snapshot)), &learn, None).unwrap_err();

    assert!(matches!(
        err,
        TrainError::Snapshot(SnapshotError::ChecksumMismatch { .. })
    ));
}
