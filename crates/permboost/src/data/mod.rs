//! Training data, sample orderings and query boundaries.
//!
//! - [`TrainingData`]: binarized features, targets, weights, baseline, groups
//! - [`Permutation`] / [`PermutedDataset`]: one reordering and its gathered copy
//! - [`QueryGrouping`]: query start offsets for boundary snapping
//! - [`Slice`]: half-open sample ranges

mod dataset;
mod error;
mod grouping;
mod permuted;
mod slice;

pub use dataset::{ObjectsOrder, TrainingData, TrainingDataBuilder};
pub use error::DatasetError;
pub use grouping::QueryGrouping;
pub use permuted::{DatasetId, Permutation, PermutedDataset, permutation_block_size};
pub use slice::Slice;
