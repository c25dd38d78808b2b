//! Leaf-value estimation.
//!
//! A [`LeavesEstimator`] collects one task per (permutation, fold) model of an
//! iteration and solves all of them in a single batched descent. The point of
//! the descent is the concatenation of every task's leaf values; each task
//! owns a contiguous slice of it.
//!
//! # Task preparation
//!
//! For every task the samples are bucket-sorted by leaf (stable), so each
//! leaf's samples are contiguous and described by `offsets[leaf]..offsets[leaf + 1]`.
//! The current predictions are gathered in the same order and act as the
//! baseline the point is added to.
//!
//! # Objective
//!
//! With leaf sums `G_l`, `H_l`, `W_l`, task loss `L`, L2 strength `λ` and
//! scale `s` (total task weight when normalizing, else 1):
//!
//! ```text
//! value      = (L + λ/2 Σ v_l²) / s
//! gradient_l = (G_l + λ v_l) / s
//! der2_l     = (H_l + λ) / s
//! weight_l   = (W_l + λ) / s
//! ```

mod descent;

pub use descent::{LeavesEstimationOracle, NewtonDescent};

use thiserror::Error;

use crate::config::LeavesEstimationConfig;
use crate::data::{DatasetId, PermutedDataset, Slice};
use crate::utils::{Parallelism, stripe_bounds};

use super::cache::IterationCache;
use super::target::{DerCalcer, PermutationTarget};
use super::weak::{ModelStructure, WeakModel};

// =============================================================================
// Errors
// =============================================================================

/// Bookkeeping errors between the boosting loop and the estimator.
///
/// These indicate a programming error and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EstimationError {
    /// `estimate` or `point_dim` was called before any task was queued.
    #[error("no estimation tasks were queued")]
    NoTasks,

    /// A buffer does not have the length the task layout requires.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Leaf assignments for the model's structure were not cached.
    #[error("structure is not cached for dataset {dataset}")]
    StructureNotCached { dataset: DatasetId },
}

// =============================================================================
// Tasks
// =============================================================================

/// Per-leaf aggregates of one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartStats {
    pub value: f64,
    pub der: Vec<f64>,
    pub der2: Vec<f64>,
}

impl PartStats {
    fn zeros(bin_count: usize) -> Self {
        Self {
            value: 0.0,
            der: vec![0.0; bin_count],
            der2: vec![0.0; bin_count],
        }
    }

    fn merge(&mut self, other: &PartStats) {
        self.value += other.value;
        for (a, b) in self.der.iter_mut().zip(&other.der) {
            *a += b;
        }
        for (a, b) in self.der2.iter_mut().zip(&other.der2) {
            *a += b;
        }
    }
}

#[derive(Debug)]
struct EstimationTask {
    der_calcer: DerCalcer,
    /// Leaf of every reordered sample, non-decreasing.
    bins: Vec<u32>,
    offsets: Vec<usize>,
    baseline: Vec<f32>,
    leaf_weights: Vec<f64>,
    scale: f64,
}

impl EstimationTask {
    #[inline]
    fn bin_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Aggregate stats at `point`, one partial result per stripe, reduced in
    /// stripe order.
    fn part_stats(&self, point: &[f32], stripes: usize) -> PartStats {
        let n = self.bins.len();
        let cursor: Vec<f32> = self
            .baseline
            .iter()
            .zip(&self.bins)
            .map(|(&b, &bin)| b + point[bin as usize])
            .collect();
        let mut value = vec![0.0f64; n];
        let mut der = vec![0.0f32; n];
        let mut der2 = vec![0.0f32; n];
        self.der_calcer.compute(&cursor, &mut value, &mut der, &mut der2);

        let partials: Vec<PartStats> = stripe_bounds(n, stripes)
            .into_iter()
            .map(|range| {
                let mut local = PartStats::zeros(self.bin_count());
                for i in range {
                    let bin = self.bins[i] as usize;
                    local.value += value[i];
                    local.der[bin] += der[i] as f64;
                    local.der2[bin] += der2[i] as f64;
                }
                local
            })
            .collect();

        let mut total = PartStats::zeros(self.bin_count());
        for partial in &partials {
            total.merge(partial);
        }
        total
    }
}

/// Stable counting sort of samples by leaf.
///
/// Returns `(sorted_bins, indices, offsets)` where `indices[i]` is the
/// original position of the `i`-th sorted sample.
pub fn reorder_bins(bins: &[u32], bin_count: usize) -> (Vec<u32>, Vec<u32>, Vec<usize>) {
    let mut offsets = vec![0usize; bin_count + 1];
    for &bin in bins {
        offsets[bin as usize + 1] += 1;
    }
    for i in 0..bin_count {
        offsets[i + 1] += offsets[i];
    }
    let mut next = offsets.clone();
    let mut indices = vec![0u32; bins.len()];
    let mut sorted = vec![0u32; bins.len()];
    for (i, &bin) in bins.iter().enumerate() {
        let pos = &mut next[bin as usize];
        indices[*pos] = i as u32;
        sorted[*pos] = bin;
        *pos += 1;
    }
    (sorted, indices, offsets)
}

// =============================================================================
// LeavesEstimator
// =============================================================================

/// Batched leaf-value solver for the models of one iteration.
pub struct LeavesEstimator<'a, M: WeakModel> {
    config: LeavesEstimationConfig,
    stripes: usize,
    parallelism: Parallelism,
    tasks: Vec<EstimationTask>,
    task_slices: Vec<Slice>,
    destinations: Vec<&'a mut M>,
    // Derivatives at the last `move_to` point, in point coordinates.
    value: f64,
    der: Vec<f64>,
    der2: Vec<f64>,
}

impl<'a, M: WeakModel> LeavesEstimator<'a, M> {
    /// `stripes` partial aggregates are built per task before reduction.
    pub fn new(config: LeavesEstimationConfig, stripes: usize, parallelism: Parallelism) -> Self {
        Self {
            config,
            stripes: stripes.max(1),
            parallelism,
            tasks: Vec::new(),
            task_slices: Vec::new(),
            destinations: Vec::new(),
            value: 0.0,
            der: Vec::new(),
            der2: Vec::new(),
        }
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a task whose bins come from the iteration cache.
    ///
    /// `target` selects positions of `dataset`; `current` holds the current
    /// predictions of exactly those positions.
    pub fn add_estimation_task(
        &mut self,
        cache: &IterationCache,
        target: PermutationTarget,
        dataset: &PermutedDataset,
        current: &[f32],
        dst: &'a mut M,
    ) -> Result<&mut Self, EstimationError> {
        let bins = cache
            .bins(dataset.id(), dst.structure().fingerprint())
            .ok_or(EstimationError::StructureNotCached {
                dataset: dataset.id(),
            })?;
        let slice = target.slice();
        if slice.right > bins.len() {
            return Err(EstimationError::DimensionMismatch {
                expected: bins.len(),
                actual: slice.right,
            });
        }
        let bins = bins[slice.range()].to_vec();
        self.push_task(target, bins, current, dst)
    }

    /// Queue a task whose model computes bins itself.
    ///
    /// `dataset` must hold exactly the target's samples, in target order.
    pub fn add_estimation_task_doc_parallel(
        &mut self,
        target: PermutationTarget,
        dataset: &PermutedDataset,
        current: &[f32],
        dst: &'a mut M,
    ) -> Result<&mut Self, EstimationError> {
        let bins = dst.compute_bins(dataset, self.parallelism);
        if bins.len() != target.len() {
            return Err(EstimationError::DimensionMismatch {
                expected: target.len(),
                actual: bins.len(),
            });
        }
        self.push_task(target, bins, current, dst)
    }

    fn push_task(
        &mut self,
        target: PermutationTarget,
        bins: Vec<u32>,
        current: &[f32],
        dst: &'a mut M,
    ) -> Result<&mut Self, EstimationError> {
        if current.len() != target.len() {
            return Err(EstimationError::DimensionMismatch {
                expected: target.len(),
                actual: current.len(),
            });
        }
        let bin_count = dst.structure().bin_count();
        let (bins, indices, offsets) = reorder_bins(&bins, bin_count);
        let baseline = indices.iter().map(|&i| current[i as usize]).collect();
        let der_calcer = DerCalcer::new(target, indices);

        let mut weights = vec![0.0f32; der_calcer.len()];
        der_calcer.compute_weights(&mut weights);
        let leaf_weights = offsets
            .windows(2)
            .map(|w| weights[w[0]..w[1]].iter().map(|&x| x as f64).sum())
            .collect();
        let scale = if self.config.normalize_by_weight {
            let total = der_calcer.total_weight();
            if total > 0.0 { total } else { 1.0 }
        } else {
            1.0
        };

        let left = self.task_slices.last().map_or(0, |s| s.right);
        self.task_slices.push(Slice::new(left, left + bin_count));
        self.tasks.push(EstimationTask {
            der_calcer,
            bins,
            offsets,
            baseline,
            leaf_weights,
            scale,
        });
        self.destinations.push(dst);
        Ok(self)
    }

    /// Solve every queued task and write leaf values into the destinations.
    pub fn estimate(mut self) -> Result<(), EstimationError> {
        if self.tasks.is_empty() {
            return Err(EstimationError::NoTasks);
        }
        let point = NewtonDescent::from_config(&self.config).optimize(&mut self)?;
        self.make_estimation_result(&point)
    }
}

impl<M: WeakModel> LeavesEstimationOracle for LeavesEstimator<'_, M> {
    fn point_dim(&self) -> Result<usize, EstimationError> {
        self.task_slices
            .last()
            .map(|s| s.right)
            .ok_or(EstimationError::NoTasks)
    }

    fn move_to(&mut self, point: &[f32]) -> Result<(), EstimationError> {
        let dim = self.point_dim()?;
        if point.len() != dim {
            return Err(EstimationError::DimensionMismatch {
                expected: dim,
                actual: point.len(),
            });
        }
        let stripes = self.stripes;
        let stats: Vec<PartStats> = self.parallelism.maybe_par_map(
            self.tasks.iter().zip(&self.task_slices).collect::<Vec<_>>(),
            |(task, slice)| task.part_stats(&point[slice.range()], stripes),
        );

        let l2_reg = self.config.l2_reg;
        self.value = 0.0;
        self.der = vec![0.0; dim];
        self.der2 = vec![0.0; dim];
        for ((task, slice), stats) in self.tasks.iter().zip(&self.task_slices).zip(&stats) {
            let values = &point[slice.range()];
            let penalty: f64 = values.iter().map(|&v| (v as f64) * (v as f64)).sum();
            self.value += (stats.value + 0.5 * l2_reg * penalty) / task.scale;
            for (leaf, &v) in values.iter().enumerate() {
                self.der[slice.left + leaf] = (stats.der[leaf] + l2_reg * v as f64) / task.scale;
                self.der2[slice.left + leaf] = (stats.der2[leaf] + l2_reg) / task.scale;
            }
        }
        Ok(())
    }

    fn regularize(&self, point: &mut [f32]) {
        let min_weight = self.config.min_leaf_weight;
        for (task, slice) in self.tasks.iter().zip(&self.task_slices) {
            for (leaf, &weight) in task.leaf_weights.iter().enumerate() {
                if weight <= 0.0 || weight < min_weight {
                    point[slice.left + leaf] = 0.0;
                }
            }
        }
    }

    fn write_value_and_first_derivatives(
        &self,
        value: &mut f64,
        gradient: &mut Vec<f64>,
    ) -> Result<(), EstimationError> {
        self.point_dim()?;
        *value = self.value;
        gradient.clear();
        gradient.extend_from_slice(&self.der);
        Ok(())
    }

    fn write_second_derivatives(&self, der2: &mut Vec<f64>) -> Result<(), EstimationError> {
        self.point_dim()?;
        der2.clear();
        der2.extend_from_slice(&self.der2);
        Ok(())
    }

    fn write_weights(&self, weights: &mut Vec<f64>) -> Result<(), EstimationError> {
        let dim = self.point_dim()?;
        let l2_reg = self.config.l2_reg;
        weights.clear();
        weights.resize(dim, 0.0);
        for (task, slice) in self.tasks.iter().zip(&self.task_slices) {
            for (leaf, &w) in task.leaf_weights.iter().enumerate() {
                weights[slice.left + leaf] = (w + l2_reg) / task.scale;
            }
        }
        Ok(())
    }

    fn make_estimation_result(&mut self, point: &[f32]) -> Result<(), EstimationError> {
        let dim = self.point_dim()?;
        if point.len() != dim {
            return Err(EstimationError::DimensionMismatch {
                expected: dim,
                actual: point.len(),
            });
        }
        for (slice, dst) in self.task_slices.iter().zip(self.destinations.iter_mut()) {
            dst.set_leaf_values(&point[slice.range()]);
        }
        Ok(())
    }
}
