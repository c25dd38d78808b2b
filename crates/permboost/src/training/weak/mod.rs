//! Weak learner capabilities.
//!
//! The boosting loop is generic over a [`WeakLearner`], which provides four
//! capabilities over one fixed structure type:
//!
//! - [`WeakLearner::create_structure_searcher`]: pick a structure
//! - [`WeakLearner::cache_structure`]: compute leaf assignments per dataset
//! - [`WeakLearner::create_estimator`]: solve for leaf values
//! - [`WeakLearner::create_add_model_value`]: apply models to cursors
//!
//! [`ObliviousTreeLearner`] is the built-in implementation.

mod add_model;
mod oblivious;
mod searcher;

pub use add_model::AddModelValue;
pub use oblivious::{BinarySplit, ObliviousTreeModel, ObliviousTreeStructure};
pub use searcher::{ObliviousTreeLearner, ObliviousTreeSearcher};

use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};

use ndarray::ArrayView2;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::data::PermutedDataset;
use crate::error::TrainError;
use crate::utils::Parallelism;

use super::cache::IterationCache;
use super::estimation::LeavesEstimator;
use super::target::ShiftedTarget;

/// Immutable shape of a weak model: how samples map to leaves.
pub trait ModelStructure: Clone + Debug + Hash + Eq + Send + Sync {
    /// Number of leaves.
    fn bin_count(&self) -> usize;

    /// Leaf index of every sample of a feature-major bin matrix.
    fn compute_bins(&self, features: ArrayView2<'_, u8>, parallelism: Parallelism) -> Vec<u32>;

    /// Stable key for caching per-structure data within one process.
    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// A structure plus one value per leaf.
pub trait WeakModel: Clone + Debug + Send + Sync + Serialize + DeserializeOwned {
    type Structure: ModelStructure;

    /// Model with every leaf set to zero.
    fn from_structure(structure: Self::Structure) -> Self;

    fn structure(&self) -> &Self::Structure;

    fn leaf_values(&self) -> &[f32];

    fn set_leaf_values(&mut self, values: &[f32]);

    /// Multiply every leaf value by `step`.
    fn rescale(&mut self, step: f64);

    /// Leaf index of every sample of `dataset`.
    fn compute_bins(&self, dataset: &PermutedDataset, parallelism: Parallelism) -> Vec<u32> {
        self.structure().compute_bins(dataset.features(), parallelism)
    }

    #[inline]
    fn value_at_bin(&self, bin: u32) -> f32 {
        self.leaf_values()[bin as usize]
    }
}

/// Chooses the structure of the next weak model.
pub trait StructureSearcher<'a> {
    type Structure: ModelStructure;

    /// Scale of the noise added to candidate scores.
    fn set_random_strength(&mut self, strength: f64);

    /// Search and evaluate on the same samples (plain boosting).
    fn set_target(&mut self, target: ShiftedTarget<'a>);

    /// Estimate on `learn` and evaluate on `validate` (one fold).
    fn add_task(&mut self, learn: ShiftedTarget<'a>, validate: ShiftedTarget<'a>);

    fn fit<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Self::Structure, TrainError>;
}

/// A family of weak models the boosting loop can grow.
pub trait WeakLearner: Send + Sync {
    type Structure: ModelStructure;
    type Model: WeakModel<Structure = Self::Structure>;
    type Searcher<'a>: StructureSearcher<'a, Structure = Self::Structure>
    where
        Self: 'a;

    fn create_structure_searcher<'a>(&'a self, dataset: &'a PermutedDataset) -> Self::Searcher<'a>;

    /// Compute and store the leaf assignment of `dataset` under `structure`.
    fn cache_structure(
        &self,
        cache: &mut IterationCache,
        structure: &Self::Structure,
        dataset: &PermutedDataset,
    );

    fn create_estimator<'a>(&self) -> LeavesEstimator<'a, Self::Model>;

    fn create_add_model_value<'a>(&self, cache: &'a IterationCache) -> AddModelValue<'a, Self::Model>;
}
