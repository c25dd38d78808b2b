//! Oblivious (symmetric) decision trees.
//!
//! Every level of an oblivious tree applies the same binary split to all
//! nodes, so the leaf of a sample is the bit pattern of its split outcomes:
//! `leaf = Σ_d (bin[feature_d] > border_d) << d`.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::utils::Parallelism;

use super::{ModelStructure, WeakModel};

/// Samples per parallel chunk when computing bins.
const BIN_CHUNK: usize = 16 * 1024;

/// `bin > border` on one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinarySplit {
    pub feature: u32,
    pub border: u8,
}

impl BinarySplit {
    #[inline]
    pub fn goes_right(&self, bin: u8) -> bool {
        bin > self.border
    }
}

/// Ordered list of per-level splits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObliviousTreeStructure {
    splits: Vec<BinarySplit>,
}

impl ObliviousTreeStructure {
    pub fn new(splits: Vec<BinarySplit>) -> Self {
        debug_assert!(splits.len() < 32);
        Self { splits }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.splits.len()
    }

    #[inline]
    pub fn splits(&self) -> &[BinarySplit] {
        &self.splits
    }
}

impl ModelStructure for ObliviousTreeStructure {
    #[inline]
    fn bin_count(&self) -> usize {
        1 << self.splits.len()
    }

    fn compute_bins(&self, features: ArrayView2<'_, u8>, parallelism: Parallelism) -> Vec<u32> {
        let mut bins = vec![0u32; features.ncols()];
        for (depth, split) in self.splits.iter().enumerate() {
            let row = features.row(split.feature as usize);
            parallelism.maybe_par_chunks_mut(&mut bins, BIN_CHUNK, |offset, chunk| {
                for (i, bin) in chunk.iter_mut().enumerate() {
                    if split.goes_right(row[offset + i]) {
                        *bin |= 1 << depth;
                    }
                }
            });
        }
        bins
    }
}

/// Oblivious tree with one value per leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTreeModel {
    structure: ObliviousTreeStructure,
    values: Vec<f32>,
}

impl ObliviousTreeModel {
    pub fn new(structure: ObliviousTreeStructure, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), structure.bin_count());
        Self { structure, values }
    }

    /// Raw prediction for every sample of a feature-major bin matrix.
    pub fn predict(&self, features: ArrayView2<'_, u8>, parallelism: Parallelism) -> Vec<f32> {
        self.structure
            .compute_bins(features, parallelism)
            .into_iter()
            .map(|bin| self.values[bin as usize])
            .collect()
    }
}

impl WeakModel for ObliviousTreeModel {
    type Structure = ObliviousTreeStructure;

    fn from_structure(structure: ObliviousTreeStructure) -> Self {
        let values = vec![0.0; structure.bin_count()];
        Self { structure, values }
    }

    #[inline]
    fn structure(&self) -> &ObliviousTreeStructure {
        &self.structure
    }

    #[inline]
    fn leaf_values(&self) -> &[f32] {
        &self.values
    }

    fn set_leaf_values(&mut self, values: &[f32]) {
        debug_assert_eq!(values.len(), self.values.len());
        self.values.copy_from_slice(values);
    }

    fn rescale(&mut self, step: f64) {
        for v in &mut self.values {
            *v = (*v as f64 * step) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn structure() -> ObliviousTreeStructure {
        ObliviousTreeStructure::new(vec![
            BinarySplit {
                feature: 0,
                border: 1,
            },
            BinarySplit {
                feature: 1,
                border: 0,
            },
        ])
    }

    #[test]
    fn bins_are_split_bit_patterns() {
        // feature 0: [0, 2, 3, 1], feature 1: [1, 0, 1, 0]
        let features = array![[0u8, 2, 3, 1], [1, 0, 1, 0]];
        for parallelism in [Parallelism::Sequential, Parallelism::Parallel] {
            let bins = structure().compute_bins(features.view(), parallelism);
            assert_eq!(bins, vec![0b10, 0b01, 0b11, 0b00]);
        }
        assert_eq!(structure().bin_count(), 4);
        assert_eq!(structure().depth(), 2);
    }

    #[test]
    fn empty_structure_has_single_leaf() {
        let s = ObliviousTreeStructure::default();
        assert_eq!(s.bin_count(), 1);
        let features = array![[5u8, 6]];
        assert_eq!(s.compute_bins(features.view(), Parallelism::Sequential), vec![0, 0]);
    }

    #[test]
    fn model_rescale_and_predict() {
        let mut model = ObliviousTreeModel::new(structure(), vec![1.0, 2.0, 3.0, 4.0]);
        model.rescale(0.5);
        assert_eq!(model.leaf_values(), &[0.5, 1.0, 1.5, 2.0]);

        let features = array![[0u8, 2, 3, 1], [1, 0, 1, 0]];
        let preds = model.predict(features.view(), Parallelism::Sequential);
        assert_eq!(preds, vec![1.5, 1.0, 2.0, 0.5]);
    }

    #[test]
    fn fresh_model_is_zero() {
        let model = ObliviousTreeModel::from_structure(structure());
        assert_eq!(model.leaf_values(), &[0.0; 4]);
    }

    #[test]
    fn fingerprint_tracks_structure() {
        let a = structure();
        let b = ObliviousTreeStructure::new(vec![BinarySplit {
            feature: 0,
            border: 1,
        }]);
        assert_eq!(a.fingerprint(), structure().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
