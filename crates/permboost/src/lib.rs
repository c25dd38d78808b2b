//! permboost: ordered gradient boosting of oblivious trees.
//!
//! Every boosting round fits one weak model against the current gradient,
//! accumulates it into running predictions ("cursors") and tracks held-out
//! quality. Gradients used for structure search and leaf estimation come
//! from random permutations of the data, and each fold only sees models
//! estimated on samples before it, so no sample's own target leaks into its
//! residual.
//!
//! # Key Types
//!
//! - [`BoostingConfig`] - Configuration builder
//! - [`TrainingData`] - Binarized features, targets, weights, groups
//! - [`training::DynamicBoosting`] - The boosting loop
//! - [`AdditiveModel`] - The trained ensemble
//!
//! # Example
//!
//! ```
//! use ndarray::{Array1, Array2};
//! use permboost::{BoostingConfig, TrainingData, training};
//!
//! let features = Array2::from_shape_fn((2, 200), |(f, i)| ((i * (f + 1)) % 8) as u8);
//! let targets = Array1::from_shape_fn(200, |i| if i % 8 < 4 { 0.0 } else { 1.0 });
//! let data = TrainingData::new(features.view(), targets.view()).unwrap();
//!
//! let config = BoostingConfig::builder()
//!     .iterations(20)
//!     .learning_rate(0.3)
//!     .build()
//!     .unwrap();
//! let result = training::train(&config, &data, None).unwrap();
//! assert_eq!(result.model.len(), 20);
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod persist;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use config::{BoostingConfig, BoostingType, ConfigError};
pub use data::{DatasetError, TrainingData};
pub use error::TrainError;
pub use model::AdditiveModel;
pub use training::{Objective, ObjectiveFn};
pub use utils::{Parallelism, run_with_threads};
