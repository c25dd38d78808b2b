//! Objective views bound to one permutation.
//!
//! - [`PermutationTarget`]: objective + targets/weights of one ordering,
//!   narrowed to a [`Slice`] without copying
//! - [`ShiftedTarget`]: a target evaluated at a current prediction vector
//! - [`DerCalcer`]: per-sample derivatives for a reordering of a target's
//!   samples, used by leaf estimation

use std::sync::Arc;

use crate::data::{DatasetError, PermutedDataset, Slice};

use super::objectives::{Objective, ObjectiveFn};

// =============================================================================
// PermutationTarget
// =============================================================================

/// Objective bound to the samples of one permutation.
///
/// Targets and weights are shared with the owning dataset; [`restrict`]
/// only changes the visible slice.
///
/// [`restrict`]: PermutationTarget::restrict
#[derive(Debug, Clone)]
pub struct PermutationTarget {
    objective: Objective,
    targets: Arc<[f32]>,
    weights: Arc<[f32]>,
    slice: Slice,
}

impl PermutationTarget {
    /// Bind `objective` to the full slice of `dataset`.
    pub fn new(objective: Objective, dataset: &PermutedDataset) -> Result<Self, DatasetError> {
        Self::from_parts(
            objective,
            Arc::clone(dataset.targets()),
            Arc::clone(dataset.weights()),
        )
    }

    pub fn from_parts(
        objective: Objective,
        targets: Arc<[f32]>,
        weights: Arc<[f32]>,
    ) -> Result<Self, DatasetError> {
        if targets.is_empty() {
            return Err(DatasetError::Empty);
        }
        if weights.len() != targets.len() {
            return Err(DatasetError::ShapeMismatch {
                field: "weights",
                expected: targets.len(),
                actual: weights.len(),
            });
        }
        let slice = Slice::full(targets.len());
        Ok(Self {
            objective,
            targets,
            weights,
            slice,
        })
    }

    /// Visible positions, in permutation coordinates.
    #[inline]
    pub fn slice(&self) -> Slice {
        self.slice
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    /// Narrow to `slice` (permutation coordinates, inside the current slice).
    pub fn restrict(&self, slice: Slice) -> Self {
        debug_assert!(
            self.slice.contains_slice(&slice),
            "{slice} is outside {}",
            self.slice
        );
        Self {
            objective: self.objective.clone(),
            targets: Arc::clone(&self.targets),
            weights: Arc::clone(&self.weights),
            slice,
        }
    }

    #[inline]
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    #[inline]
    pub fn targets(&self) -> &[f32] {
        &self.targets[self.slice.range()]
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights[self.slice.range()]
    }

    pub fn total_weight(&self) -> f64 {
        self.weights().iter().map(|&w| w as f64).sum()
    }

    /// Weighted loss sum at `point` (one prediction per visible sample).
    pub fn weighted_loss(&self, point: &[f32]) -> f64 {
        debug_assert_eq!(point.len(), self.len());
        point
            .iter()
            .zip(self.targets())
            .zip(self.weights())
            .map(|((&p, &y), &w)| w as f64 * self.objective.loss(p, y))
            .sum()
    }

    /// Evaluate this target at `point`.
    pub fn at_point<'a>(&self, point: &'a [f32]) -> ShiftedTarget<'a> {
        ShiftedTarget::new(self.clone(), point)
    }
}

// =============================================================================
// ShiftedTarget
// =============================================================================

/// A target paired with the current predictions of its visible samples.
#[derive(Debug, Clone)]
pub struct ShiftedTarget<'a> {
    target: PermutationTarget,
    point: &'a [f32],
}

impl<'a> ShiftedTarget<'a> {
    pub fn new(target: PermutationTarget, point: &'a [f32]) -> Self {
        debug_assert_eq!(
            target.len(),
            point.len(),
            "prediction view does not match target slice"
        );
        Self { target, point }
    }

    #[inline]
    pub fn target(&self) -> &PermutationTarget {
        &self.target
    }

    #[inline]
    pub fn point(&self) -> &'a [f32] {
        self.point
    }

    #[inline]
    pub fn slice(&self) -> Slice {
        self.target.slice()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.target.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Weighted `(der, der2)` per visible sample.
    pub fn weighted_derivatives(&self) -> (Vec<f32>, Vec<f32>) {
        let objective = self.target.objective();
        self.point
            .iter()
            .zip(self.target.targets())
            .zip(self.target.weights())
            .map(|((&p, &y), &w)| {
                let (der, der2) = objective.derivatives(p, y);
                (w * der, w * der2)
            })
            .unzip()
    }
}

// =============================================================================
// DerCalcer
// =============================================================================

/// Derivative calculator over a reordering of a target's samples.
///
/// Position `i` of every buffer refers to visible sample `indices[i]`.
#[derive(Debug, Clone)]
pub struct DerCalcer {
    target: PermutationTarget,
    indices: Vec<u32>,
}

impl DerCalcer {
    pub fn new(target: PermutationTarget, indices: Vec<u32>) -> Self {
        debug_assert_eq!(target.len(), indices.len());
        Self { target, indices }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Weighted loss and derivatives at `point` (reordered predictions).
    pub fn compute(&self, point: &[f32], value: &mut [f64], der: &mut [f32], der2: &mut [f32]) {
        debug_assert_eq!(point.len(), self.len());
        let targets = self.target.targets();
        let weights = self.target.weights();
        let objective = self.target.objective();
        for (i, &idx) in self.indices.iter().enumerate() {
            let idx = idx as usize;
            let w = weights[idx];
            let (d, d2) = objective.derivatives(point[i], targets[idx]);
            value[i] = w as f64 * objective.loss(point[i], targets[idx]);
            der[i] = w * d;
            der2[i] = w * d2;
        }
    }

    /// Sample weights in reordered positions.
    pub fn compute_weights(&self, weights: &mut [f32]) {
        let source = self.target.weights();
        for (dst, &idx) in weights.iter_mut().zip(&self.indices) {
            *dst = source[idx as usize];
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.target.total_weight()
    }
}
