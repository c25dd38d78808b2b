//! Additive application of weak models to cursors.

use std::sync::Arc;

use crate::data::{PermutedDataset, Slice};
use crate::training::cache::IterationCache;
use crate::training::estimation::EstimationError;
use crate::utils::Parallelism;

use super::{ModelStructure, WeakModel};

struct AddTask<'a, M> {
    model: &'a M,
    bins: Arc<[u32]>,
    samples: Slice,
    cursor: &'a mut [f32],
}

/// Batch of `cursor[i] += model(sample samples.left + i)` updates.
///
/// Tasks are queued first and applied together by [`proceed`], after every
/// model of the iteration has been estimated.
///
/// [`proceed`]: AddModelValue::proceed
pub struct AddModelValue<'a, M: WeakModel> {
    cache: &'a IterationCache,
    parallelism: Parallelism,
    tasks: Vec<AddTask<'a, M>>,
}

impl<'a, M: WeakModel> AddModelValue<'a, M> {
    pub fn new(cache: &'a IterationCache, parallelism: Parallelism) -> Self {
        Self {
            cache,
            parallelism,
            tasks: Vec::new(),
        }
    }

    /// Queue `model` for the `samples` positions of `dataset`.
    ///
    /// The model's structure must already be cached for `dataset`.
    pub fn add_task(
        &mut self,
        model: &'a M,
        dataset: &PermutedDataset,
        samples: Slice,
        cursor: &'a mut [f32],
    ) -> Result<&mut Self, EstimationError> {
        let bins = self
            .cache
            .bins(dataset.id(), model.structure().fingerprint())
            .ok_or(EstimationError::StructureNotCached {
                dataset: dataset.id(),
            })?;
        if samples.right > bins.len() {
            return Err(EstimationError::DimensionMismatch {
                expected: bins.len(),
                actual: samples.right,
            });
        }
        if cursor.len() != samples.len() {
            return Err(EstimationError::DimensionMismatch {
                expected: samples.len(),
                actual: cursor.len(),
            });
        }
        self.tasks.push(AddTask {
            model,
            bins: Arc::clone(bins),
            samples,
            cursor,
        });
        Ok(self)
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Apply every queued task.
    pub fn proceed(self) {
        self.parallelism.maybe_par_for_each(self.tasks, |task| {
            let bins = &task.bins[task.samples.range()];
            for (value, &bin) in task.cursor.iter_mut().zip(bins) {
                *value += task.model.value_at_bin(bin);
            }
        });
    }
}
