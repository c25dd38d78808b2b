//! Pointwise objective (loss) functions.
//!
//! An objective maps one prediction and one target to a loss value and its
//! first two derivatives with respect to the prediction. Weighting, slicing
//! and permutation handling live in [`super::target`].
//!
//! # Available Objectives
//!
//! - [`SquaredLoss`]: `0.5 * (p - y)^2`
//! - [`LogisticLoss`]: binary cross-entropy on log-odds, labels in `{0, 1}`
//! - [`Objective::custom`]: any user type implementing [`ObjectiveFn`]

use std::sync::Arc;

// =============================================================================
// Objective Trait
// =============================================================================

/// A differentiable pointwise loss.
///
/// Derivatives follow the loss-minimization convention: `der` is `dL/dp` and
/// `der2` is `d²L/dp²`, which must be non-negative for the Newton step to
/// move downhill.
pub trait ObjectiveFn: Send + Sync {
    /// Name of the objective (for logging).
    fn name(&self) -> &'static str;

    /// Unweighted loss of a single prediction.
    fn loss(&self, prediction: f32, target: f32) -> f64;

    /// `(dL/dp, d²L/dp²)` at `prediction`.
    fn derivatives(&self, prediction: f32, target: f32) -> (f32, f32);

    /// Map a raw score to the objective's output space.
    fn transform(&self, raw: f32) -> f32 {
        raw
    }
}

// =============================================================================
// Squared Loss
// =============================================================================

/// Squared error loss for regression.
///
/// - Loss: `0.5 * (pred - y)^2`
/// - Gradient: `pred - y`
/// - Hessian: `1`
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredLoss;

impl ObjectiveFn for SquaredLoss {
    fn name(&self) -> &'static str {
        "squared"
    }

    #[inline]
    fn loss(&self, prediction: f32, target: f32) -> f64 {
        let diff = (prediction - target) as f64;
        0.5 * diff * diff
    }

    #[inline]
    fn derivatives(&self, prediction: f32, target: f32) -> (f32, f32) {
        (prediction - target, 1.0)
    }
}

// =============================================================================
// Logistic Loss
// =============================================================================

/// Logistic loss (binary cross-entropy) on log-odds.
///
/// - Loss: `-y*log(σ(p)) - (1-y)*log(1-σ(p))`
/// - Gradient: `σ(p) - y`
/// - Hessian: `σ(p) * (1 - σ(p))`, floored to keep Newton steps finite
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticLoss;

const HESS_MIN: f32 = 1e-16;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl ObjectiveFn for LogisticLoss {
    fn name(&self) -> &'static str {
        "logistic"
    }

    #[inline]
    fn loss(&self, prediction: f32, target: f32) -> f64 {
        // log(1 + e^p) - y*p, computed without overflow
        let p = prediction as f64;
        let softplus = if p > 0.0 {
            p + (-p).exp().ln_1p()
        } else {
            p.exp().ln_1p()
        };
        softplus - target as f64 * p
    }

    #[inline]
    fn derivatives(&self, prediction: f32, target: f32) -> (f32, f32) {
        let prob = sigmoid(prediction);
        (prob - target, (prob * (1.0 - prob)).max(HESS_MIN))
    }

    fn transform(&self, raw: f32) -> f32 {
        sigmoid(raw)
    }
}

// =============================================================================
// Objective Enum (Convenience wrapper)
// =============================================================================

/// Objective function enum for configuration.
///
/// Wraps the built-in losses and user implementations behind one cloneable
/// type that itself implements [`ObjectiveFn`].
#[derive(Clone)]
pub enum Objective {
    /// Squared error loss for regression.
    SquaredLoss(SquaredLoss),
    /// Logistic loss for binary classification.
    LogisticLoss(LogisticLoss),
    /// Custom objective (user-provided implementation).
    Custom(Arc<dyn ObjectiveFn>),
}

impl std::fmt::Debug for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SquaredLoss(inner) => f.debug_tuple("SquaredLoss").field(inner).finish(),
            Self::LogisticLoss(inner) => f.debug_tuple("LogisticLoss").field(inner).finish(),
            Self::Custom(inner) => f.debug_tuple("Custom").field(&inner.name()).finish(),
        }
    }
}

impl Objective {
    pub fn squared() -> Self {
        Self::SquaredLoss(SquaredLoss)
    }

    pub fn logistic() -> Self {
        Self::LogisticLoss(LogisticLoss)
    }

    pub fn custom<O: ObjectiveFn + 'static>(objective: O) -> Self {
        Self::Custom(Arc::new(objective))
    }
}

impl Default for Objective {
    fn default() -> Self {
        Self::SquaredLoss(SquaredLoss)
    }
}

impl ObjectiveFn for Objective {
    fn name(&self) -> &'static str {
        match self {
            Self::SquaredLoss(inner) => inner.name(),
            Self::LogisticLoss(inner) => inner.name(),
            Self::Custom(inner) => inner.name(),
        }
    }

    #[inline]
    fn loss(&self, prediction: f32, target: f32) -> f64 {
        match self {
            Self::SquaredLoss(inner) => inner.loss(prediction, target),
            Self::LogisticLoss(inner) => inner.loss(prediction, target),
            Self::Custom(inner) => inner.loss(prediction, target),
        }
    }

    #[inline]
    fn derivatives(&self, prediction: f32, target: f32) -> (f32, f32) {
        match self {
            Self::SquaredLoss(inner) => inner.derivatives(prediction, target),
            Self::LogisticLoss(inner) => inner.derivatives(prediction, target),
            Self::Custom(inner) => inner.derivatives(prediction, target),
        }
    }

    fn transform(&self, raw: f32) -> f32 {
        match self {
            Self::SquaredLoss(inner) => inner.transform(raw),
            Self::LogisticLoss(inner) => inner.transform(raw),
            Self::Custom(inner) => inner.transform(raw),
        }
    }
}
