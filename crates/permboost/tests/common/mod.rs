//! Shared synthetic data for integration tests.

#![allow(dead_code)]

use ndarray::{Array1, Array2};
use permboost::TrainingData;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Number of quantized features in every generated dataset.
pub const N_FEATURES: usize = 3;

/// Feature-major bins plus a regression target.
///
/// Feature 0 has 16 bins and drives a linear trend, feature 1 has 8 bins and
/// adds a step, feature 2 is 4-bin noise.
pub fn regression_arrays(n_samples: usize, seed: u64) -> (Array2<u8>, Array1<f32>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut features = Array2::zeros((N_FEATURES, n_samples));
    let mut targets = Array1::zeros(n_samples);
    for i in 0..n_samples {
        let f0: u8 = rng.gen_range(0..16);
        let f1: u8 = rng.gen_range(0..8);
        let f2: u8 = rng.gen_range(0..4);
        features[[0, i]] = f0;
        features[[1, i]] = f1;
        features[[2, i]] = f2;
        let step = if f1 > 3 { 1.0 } else { -1.0 };
        targets[i] = f0 as f32 / 4.0 + step + rng.gen_range(-0.1..0.1);
    }
    (features, targets)
}

pub fn regression_data(n_samples: usize, seed: u64) -> TrainingData {
    let (features, targets) = regression_arrays(n_samples, seed);
    TrainingData::new(features.view(), targets.view()).unwrap()
}

/// Labels in {0, 1} that follow feature 1.
pub fn binary_data(n_samples: usize, seed: u64) -> TrainingData {
    let (features, _) = regression_arrays(n_samples, seed);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed ^ 0x5eed);
    let targets = Array1::from_shape_fn(n_samples, |i| {
        let positive = features[[1, i]] > 3;
        // 10% label noise
        let flip = rng.gen_bool(0.1);
        if positive != flip { 1.0 } else { 0.0 }
    });
    TrainingData::new(features.view(), targets.view()).unwrap()
}

/// Regression data split into contiguous queries of `query_size` samples.
pub fn grouped_data(n_samples: usize, query_size: usize, seed: u64) -> TrainingData {
    let (features, targets) = regression_arrays(n_samples, seed);
    let group_ids = (0..n_samples).map(|i| (i / query_size) as u32).collect();
    TrainingData::builder()
        .features(features.view())
        .targets(targets.view())
        .group_ids(group_ids)
        .build()
        .unwrap()
}

pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> f64 {
    let sum: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(&p, &t)| ((p - t) as f64).powi(2))
        .sum();
    sum / predictions.len() as f64
}
