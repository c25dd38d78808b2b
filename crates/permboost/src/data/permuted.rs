//! Sample permutations and the datasets they induce.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;

use super::dataset::TrainingData;
use super::error::DatasetError;
use super::grouping::QueryGrouping;
use super::slice::Slice;
use crate::utils::ceil_log2;

/// Identifier of a dataset view, unique within one training run.
pub type DatasetId = u32;

// =============================================================================
// Permutation
// =============================================================================

/// A reordering of samples.
///
/// `order[i]` is the original index of the sample stored at position `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<u32>,
}

impl Permutation {
    pub fn identity(n_samples: usize) -> Self {
        Self {
            order: (0..n_samples as u32).collect(),
        }
    }

    /// Random permutation that keeps queries intact.
    ///
    /// With one sample per query, consecutive blocks of `block_size` samples
    /// are shuffled as units instead.
    pub fn random<R: Rng + ?Sized>(grouping: &QueryGrouping, block_size: usize, rng: &mut R) -> Self {
        let n = grouping.n_samples();
        let mut units: Vec<Slice> = if grouping.is_per_sample() {
            let block = block_size.max(1);
            (0..n.div_ceil(block))
                .map(|b| Slice::new(b * block, ((b + 1) * block).min(n)))
                .collect()
        } else {
            (0..grouping.query_count())
                .map(|q| grouping.query_slice(q))
                .collect()
        };
        units.shuffle(rng);

        let mut order = Vec::with_capacity(n);
        for unit in units {
            order.extend(unit.left as u32..unit.right as u32);
        }
        Self { order }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.order
    }

    pub fn is_identity(&self) -> bool {
        self.order.iter().enumerate().all(|(i, &o)| i as u32 == o)
    }

    /// `out[i] = src[order[i]]`.
    pub fn gather<T: Copy>(&self, src: &[T]) -> Vec<T> {
        self.order.iter().map(|&i| src[i as usize]).collect()
    }
}

/// Block size used to shuffle ungrouped samples.
///
/// Small datasets are shuffled sample by sample. Larger ones round the
/// suggestion up to a power of two, halved until at least 128 blocks remain.
pub fn permutation_block_size(sample_count: usize, suggested: usize) -> usize {
    if sample_count < 50_000 {
        return 1;
    }
    let mut block = 1usize << ceil_log2(suggested.clamp(1, sample_count));
    while block > 1 && block * 128 > sample_count {
        block /= 2;
    }
    block
}

// =============================================================================
// PermutedDataset
// =============================================================================

/// Training data gathered by one permutation.
///
/// Immutable for the whole run. Targets and weights are shared so target
/// views can be narrowed without copying.
#[derive(Debug, Clone)]
pub struct PermutedDataset {
    id: DatasetId,
    permutation: Permutation,
    features: Array2<u8>,
    n_bins: Vec<u16>,
    targets: Arc<[f32]>,
    weights: Arc<[f32]>,
    baseline: Option<Vec<f32>>,
    grouping: QueryGrouping,
}

impl PermutedDataset {
    pub fn new(
        id: DatasetId,
        data: &TrainingData,
        permutation: Permutation,
    ) -> Result<Self, DatasetError> {
        if permutation.is_empty() {
            return Err(DatasetError::Empty);
        }
        if permutation.len() != data.n_samples() {
            return Err(DatasetError::ShapeMismatch {
                field: "permutation",
                expected: data.n_samples(),
                actual: permutation.len(),
            });
        }

        let indices: Vec<usize> = permutation.indices().iter().map(|&i| i as usize).collect();
        let features = if permutation.is_identity() {
            data.features().to_owned()
        } else {
            data.features().select(Axis(1), &indices)
        };
        let targets = data.targets();
        let targets: Arc<[f32]> = indices.iter().map(|&i| targets[i]).collect();
        let weights = data.weights_or_uniform();
        let weights: Arc<[f32]> = indices.iter().map(|&i| weights[i]).collect();
        let baseline = data
            .baseline()
            .map(|b| indices.iter().map(|&i| b[i]).collect());
        let grouping = match data.group_ids() {
            Some(ids) => QueryGrouping::from_group_ids(&permutation.gather(ids))?,
            None => QueryGrouping::per_sample(indices.len()),
        };

        Ok(Self {
            id,
            permutation,
            features,
            n_bins: data.n_bins().to_vec(),
            targets,
            weights,
            baseline,
            grouping,
        })
    }

    #[inline]
    pub fn id(&self) -> DatasetId {
        self.id
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.features.ncols()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    /// Feature bins `[n_features, n_samples]` in permuted order.
    #[inline]
    pub fn features(&self) -> ArrayView2<'_, u8> {
        self.features.view()
    }

    #[inline]
    pub fn n_bins(&self) -> &[u16] {
        &self.n_bins
    }

    #[inline]
    pub fn targets(&self) -> &Arc<[f32]> {
        &self.targets
    }

    #[inline]
    pub fn weights(&self) -> &Arc<[f32]> {
        &self.weights
    }

    #[inline]
    pub fn baseline(&self) -> Option<&[f32]> {
        self.baseline.as_deref()
    }

    #[inline]
    pub fn grouping(&self) -> &QueryGrouping {
        &self.grouping
    }
}
