//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::data::DatasetError;
use crate::persist::SnapshotError;
use crate::training::EstimationError;

/// Any failure of a training run.
///
/// Interruption is not an error; it ends a run with
/// [`StopReason::Interrupted`](crate::training::StopReason::Interrupted).
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid dataset: {0}")]
    Dataset(#[from] DatasetError),

    #[error("leaf estimation failed: {0}")]
    Estimation(#[from] EstimationError),

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    /// `run` was called without learn data.
    #[error("no training data was provided")]
    MissingTrainingData,
}
