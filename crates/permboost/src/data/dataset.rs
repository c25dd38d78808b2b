//! Binarized training data and its builder.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::error::DatasetError;
use super::grouping::QueryGrouping;

/// Whether samples may be shuffled.
///
/// `Ordered` data (time series and the like) is trained on a single
/// permutation that keeps the stored order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectsOrder {
    Ordered,
    #[default]
    Undefined,
}

/// Training data with pre-quantized features.
///
/// # Storage Layout
///
/// Feature bins are stored **feature-major**: `[n_features, n_samples]`, one
/// `u8` bin index per sample and feature. Targets, weights and baseline are
/// per-sample vectors.
#[derive(Debug, Clone)]
pub struct TrainingData {
    features: Array2<u8>,
    n_bins: Vec<u16>,
    targets: Array1<f32>,
    weights: Option<Array1<f32>>,
    baseline: Option<Array1<f32>>,
    group_ids: Option<Vec<u32>>,
    grouping: QueryGrouping,
    order: ObjectsOrder,
}

impl TrainingData {
    /// Start building a dataset.
    pub fn builder() -> TrainingDataBuilder {
        TrainingDataBuilder::default()
    }

    /// Shortcut for unweighted, ungrouped data.
    pub fn new(features: ArrayView2<u8>, targets: ArrayView1<f32>) -> Result<Self, DatasetError> {
        Self::builder().features(features).targets(targets).build()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.features.ncols()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.nrows()
    }

    /// Feature bins `[n_features, n_samples]`.
    #[inline]
    pub fn features(&self) -> ArrayView2<'_, u8> {
        self.features.view()
    }

    /// Number of distinct bins per feature (max bin + 1).
    #[inline]
    pub fn n_bins(&self) -> &[u16] {
        &self.n_bins
    }

    #[inline]
    pub fn targets(&self) -> ArrayView1<'_, f32> {
        self.targets.view()
    }

    #[inline]
    pub fn weights(&self) -> Option<ArrayView1<'_, f32>> {
        self.weights.as_ref().map(|w| w.view())
    }

    /// Per-sample weights, uniform when none were given.
    pub fn weights_or_uniform(&self) -> Array1<f32> {
        self.weights
            .clone()
            .unwrap_or_else(|| Array1::ones(self.n_samples()))
    }

    #[inline]
    pub fn baseline(&self) -> Option<ArrayView1<'_, f32>> {
        self.baseline.as_ref().map(|b| b.view())
    }

    #[inline]
    pub fn group_ids(&self) -> Option<&[u32]> {
        self.group_ids.as_deref()
    }

    #[inline]
    pub fn grouping(&self) -> &QueryGrouping {
        &self.grouping
    }

    #[inline]
    pub fn order(&self) -> ObjectsOrder {
        self.order
    }

    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.order == ObjectsOrder::Ordered
    }

    /// Copy the given samples, in the given order, into a new dataset.
    ///
    /// Samples of one group must stay adjacent in `indices`.
    pub fn subset(&self, indices: &[usize]) -> Result<Self, DatasetError> {
        let features = self.features.select(Axis(1), indices);
        let mut builder = Self::builder()
            .features(features.view())
            .targets(self.targets.select(Axis(0), indices).view())
            .order(self.order);
        if let Some(w) = &self.weights {
            builder = builder.weights(w.select(Axis(0), indices).view());
        }
        if let Some(b) = &self.baseline {
            builder = builder.baseline(b.select(Axis(0), indices).view());
        }
        if let Some(ids) = &self.group_ids {
            builder = builder.group_ids(indices.iter().map(|&i| ids[i]).collect());
        }
        builder.build()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`TrainingData`].
///
/// ```
/// use permboost::data::TrainingData;
/// use ndarray::array;
///
/// let features = array![[0u8, 1, 2, 1], [3, 3, 0, 1]];
/// let targets = array![0.5f32, 1.0, 1.5, 1.0];
/// let data = TrainingData::builder()
///     .features(features.view())
///     .targets(targets.view())
///     .group_ids(vec![0, 0, 1, 1])
///     .build()
///     .unwrap();
/// assert_eq!(data.grouping().query_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct TrainingDataBuilder {
    features: Option<Array2<u8>>,
    targets: Option<Array1<f32>>,
    weights: Option<Array1<f32>>,
    baseline: Option<Array1<f32>>,
    group_ids: Option<Vec<u32>>,
    order: ObjectsOrder,
}

impl TrainingDataBuilder {
    /// Feature bins `[n_features, n_samples]`.
    pub fn features(mut self, features: ArrayView2<u8>) -> Self {
        self.features = Some(features.to_owned());
        self
    }

    pub fn targets(mut self, targets: ArrayView1<f32>) -> Self {
        self.targets = Some(targets.to_owned());
        self
    }

    pub fn weights(mut self, weights: ArrayView1<f32>) -> Self {
        self.weights = Some(weights.to_owned());
        self
    }

    /// Initial prediction per sample.
    pub fn baseline(mut self, baseline: ArrayView1<f32>) -> Self {
        self.baseline = Some(baseline.to_owned());
        self
    }

    pub fn group_ids(mut self, group_ids: Vec<u32>) -> Self {
        self.group_ids = Some(group_ids);
        self
    }

    pub fn order(mut self, order: ObjectsOrder) -> Self {
        self.order = order;
        self
    }

    pub fn build(self) -> Result<TrainingData, DatasetError> {
        let features = self.features.ok_or(DatasetError::MissingFeatures)?;
        let targets = self.targets.ok_or(DatasetError::MissingTargets)?;
        let n_samples = features.ncols();

        check_len("targets", n_samples, targets.len())?;
        if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
            return Err(DatasetError::NonFiniteTarget { sample: i });
        }
        if let Some(w) = &self.weights {
            check_len("weights", n_samples, w.len())?;
            if let Some((i, &weight)) = w
                .iter()
                .enumerate()
                .find(|(_, w)| !w.is_finite() || **w < 0.0)
            {
                return Err(DatasetError::InvalidWeight { sample: i, weight });
            }
        }
        if let Some(b) = &self.baseline {
            check_len("baseline", n_samples, b.len())?;
        }
        let grouping = match &self.group_ids {
            Some(ids) => {
                check_len("group_ids", n_samples, ids.len())?;
                QueryGrouping::from_group_ids(ids)?
            }
            None => QueryGrouping::per_sample(n_samples),
        };

        let n_bins = features
            .rows()
            .into_iter()
            .map(|row| row.iter().copied().max().map_or(1, |m| m as u16 + 1))
            .collect();

        Ok(TrainingData {
            features,
            n_bins,
            targets,
            weights: self.weights,
            baseline: self.baseline,
            group_ids: self.group_ids,
            grouping,
            order: self.order,
        })
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), DatasetError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DatasetError::ShapeMismatch {
            field,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn build_minimal_dataset() {
        let features = array![[0u8, 1, 2], [1, 1, 0]];
        let targets = array![1.0f32, 2.0, 3.0];
        let data = TrainingData::new(features.view(), targets.view()).unwrap();

        assert_eq!(data.n_samples(), 3);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.n_bins(), &[3, 2]);
        assert!(data.grouping().is_per_sample());
        assert_eq!(data.weights_or_uniform(), array![1.0f32, 1.0, 1.0]);
        assert!(!data.is_ordered());
    }

    #[test]
    fn target_length_mismatch() {
        let features = array![[0u8, 1, 2]];
        let targets = array![1.0f32, 2.0];
        let err = TrainingData::new(features.view(), targets.view()).unwrap_err();
        assert_eq!(
            err,
            DatasetError::ShapeMismatch {
                field: "targets",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_negative_weight_and_nan_target() {
        let features = array![[0u8, 1]];
        let err = TrainingData::builder()
            .features(features.view())
            .targets(array![1.0f32, 2.0].view())
            .weights(array![1.0f32, -1.0].view())
            .build()
            .unwrap_err();
        assert!(matches!(err, DatasetError::InvalidWeight { sample: 1, .. }));

        let err = TrainingData::new(features.view(), array![f32::NAN, 1.0].view()).unwrap_err();
        assert_eq!(err, DatasetError::NonFiniteTarget { sample: 0 });
    }

    #[test]
    fn missing_targets() {
        let features = array![[0u8, 1]];
        let err = TrainingData::builder()
            .features(features.view())
            .build()
            .unwrap_err();
        assert_eq!(err, DatasetError::MissingTargets);
    }

    #[test]
    fn subset_keeps_groups_and_optional_columns() {
        let features = array![[0u8, 1, 2, 3, 4]];
        let data = TrainingData::builder()
            .features(features.view())
            .targets(array![0.0f32, 1.0, 2.0, 3.0, 4.0].view())
            .baseline(array![0.1f32, 0.2, 0.3, 0.4, 0.5].view())
            .group_ids(vec![0, 0, 1, 1, 2])
            .build()
            .unwrap();

        let sub = data.subset(&[2, 3, 4]).unwrap();
        assert_eq!(sub.n_samples(), 3);
        assert_eq!(sub.targets(), array![2.0f32, 3.0, 4.0]);
        assert_eq!(sub.baseline().unwrap(), array![0.3f32, 0.4, 0.5]);
        assert_eq!(sub.grouping().query_count(), 2);
    }
}
