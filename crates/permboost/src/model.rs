//! The trained ensemble.

use ndarray::{Array1, ArrayView2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::TrainingData;
use crate::training::weak::{ModelStructure, WeakModel};
use crate::training::{Objective, ObjectiveFn};
use crate::utils::Parallelism;

/// Append-only sum of weak models.
///
/// The raw prediction of a sample is its baseline (0 without one) plus the
/// leaf value of every weak model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "M: Serialize", deserialize = "M: DeserializeOwned"))]
pub struct AdditiveModel<M> {
    weak_models: Vec<M>,
}

impl<M> Default for AdditiveModel<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> AdditiveModel<M> {
    pub fn new() -> Self {
        Self {
            weak_models: Vec::new(),
        }
    }

    pub fn add_weak_model(&mut self, model: M) {
        self.weak_models.push(model);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.weak_models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.weak_models.is_empty()
    }

    /// Keep the first `len` weak models.
    pub fn truncate(&mut self, len: usize) {
        self.weak_models.truncate(len);
    }

    #[inline]
    pub fn weak_models(&self) -> &[M] {
        &self.weak_models
    }

    pub fn into_weak_models(self) -> Vec<M> {
        self.weak_models
    }
}

impl<M: WeakModel> AdditiveModel<M> {
    /// Raw scores of a feature-major bin matrix, without baseline.
    pub fn predict_features(&self, features: ArrayView2<'_, u8>, parallelism: Parallelism) -> Array1<f32> {
        let mut out = Array1::zeros(features.ncols());
        if let Some(slice) = out.as_slice_mut() {
            self.accumulate(features, parallelism, slice);
        }
        out
    }

    /// Raw scores of `data`, starting from its baseline.
    pub fn predict(&self, data: &TrainingData, parallelism: Parallelism) -> Array1<f32> {
        let mut out = match data.baseline() {
            Some(baseline) => baseline.to_owned(),
            None => Array1::zeros(data.n_samples()),
        };
        if let Some(slice) = out.as_slice_mut() {
            self.accumulate(data.features(), parallelism, slice);
        }
        out
    }

    /// Scores of `data` mapped through the objective's output transform.
    pub fn predict_transformed(
        &self,
        data: &TrainingData,
        objective: &Objective,
        parallelism: Parallelism,
    ) -> Array1<f32> {
        self.predict(data, parallelism).mapv(|raw| objective.transform(raw))
    }

    fn accumulate(&self, features: ArrayView2<'_, u8>, parallelism: Parallelism, out: &mut [f32]) {
        for model in &self.weak_models {
            let bins = model.structure().compute_bins(features, parallelism);
            for (o, bin) in out.iter_mut().zip(bins) {
                *o += model.value_at_bin(bin);
            }
        }
    }
}
