//! Error types for dataset construction.

use thiserror::Error;

/// Errors raised while building or slicing training data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    /// The dataset (or one of its orderings) has no samples.
    #[error("dataset has no samples")]
    Empty,

    /// Two inputs disagree on the number of samples or features.
    #[error("shape mismatch for {field}: expected {expected}, got {actual}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Samples of one group are not stored contiguously.
    #[error("group {group_id} is not contiguous (seen again at sample {sample})")]
    NonContiguousGroup { group_id: u32, sample: usize },

    /// A target value is NaN or infinite.
    #[error("non-finite target at sample {sample}")]
    NonFiniteTarget { sample: usize },

    /// A sample weight is negative or not finite.
    #[error("invalid weight {weight} at sample {sample}")]
    InvalidWeight { sample: usize, weight: f32 },

    /// Features were never supplied to the builder.
    #[error("missing feature matrix")]
    MissingFeatures,

    /// Targets were never supplied to the builder.
    #[error("missing targets")]
    MissingTargets,
}
