//! Permutation and target management.
//!
//! [`DataSetsHolder`] owns one [`PermutedDataset`] per sample ordering plus
//! an optional test view. The last ordering is the identity and serves as the
//! estimation permutation; the others are random and used for structure
//! search and fold estimation.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::{DatasetError, Permutation, PermutedDataset, TrainingData, permutation_block_size};
use crate::utils::Parallelism;

use super::objectives::Objective;
use super::target::PermutationTarget;

/// Datasets for every permutation of one training run.
#[derive(Debug)]
pub struct DataSetsHolder {
    datasets: Vec<PermutedDataset>,
    test: Option<PermutedDataset>,
}

impl DataSetsHolder {
    /// Build `permutation_count` orderings of `learn`.
    ///
    /// Ordered data gets a single identity ordering. Random orderings are
    /// seeded from `seed` and their index, so the result does not depend on
    /// the thread count.
    pub fn build(
        learn: &TrainingData,
        test: Option<&TrainingData>,
        permutation_count: usize,
        suggested_block_size: usize,
        seed: u64,
        parallelism: Parallelism,
    ) -> Result<Self, DatasetError> {
        if learn.n_samples() == 0 {
            return Err(DatasetError::Empty);
        }
        let permutation_count = if learn.is_ordered() {
            1
        } else {
            permutation_count.max(1)
        };
        let estimation_permutation = permutation_count - 1;
        let block_size = permutation_block_size(learn.n_samples(), suggested_block_size);

        let datasets = parallelism
            .maybe_par_map(0..permutation_count, |id| {
                let permutation = if id == estimation_permutation {
                    Permutation::identity(learn.n_samples())
                } else {
                    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(id as u64));
                    Permutation::random(learn.grouping(), block_size, &mut rng)
                };
                PermutedDataset::new(id as u32, learn, permutation)
            })
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let test = test
            .map(|t| {
                PermutedDataset::new(
                    permutation_count as u32,
                    t,
                    Permutation::identity(t.n_samples()),
                )
            })
            .transpose()?;

        Ok(Self { datasets, test })
    }

    #[inline]
    pub fn permutation_count(&self) -> usize {
        self.datasets.len()
    }

    /// Index of the identity ordering.
    #[inline]
    pub fn estimation_permutation(&self) -> usize {
        self.datasets.len() - 1
    }

    /// Orderings usable for structure search; the sole ordering when there
    /// is only one.
    #[inline]
    pub fn learn_permutation_count(&self) -> usize {
        self.estimation_permutation().max(1)
    }

    #[inline]
    pub fn dataset(&self, permutation: usize) -> &PermutedDataset {
        &self.datasets[permutation]
    }

    #[inline]
    pub fn estimation_dataset(&self) -> &PermutedDataset {
        &self.datasets[self.estimation_permutation()]
    }

    #[inline]
    pub fn test(&self) -> Option<&PermutedDataset> {
        self.test.as_ref()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.datasets[0].n_samples()
    }
}

/// One objective view per permutation, bound to its full slice.
#[derive(Debug)]
pub struct PermutationTargets {
    targets: Vec<PermutationTarget>,
    test: Option<PermutationTarget>,
}

impl PermutationTargets {
    pub fn build(objective: &Objective, holder: &DataSetsHolder) -> Result<Self, DatasetError> {
        let targets = (0..holder.permutation_count())
            .map(|p| PermutationTarget::new(objective.clone(), holder.dataset(p)))
            .collect::<Result<Vec<_>, _>>()?;
        let test = holder
            .test()
            .map(|t| PermutationTarget::new(objective.clone(), t))
            .transpose()?;
        Ok(Self { targets, test })
    }

    #[inline]
    pub fn get(&self, permutation: usize) -> &PermutationTarget {
        &self.targets[permutation]
    }

    #[inline]
    pub fn test(&self) -> Option<&PermutationTarget> {
        self.test.as_ref()
    }
}
