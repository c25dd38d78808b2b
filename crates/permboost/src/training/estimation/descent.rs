//! Newton / gradient descent over leaf values with optional backtracking.

use crate::config::{LeavesEstimationConfig, LeavesEstimationMethod};

use super::EstimationError;

/// Gradients below this norm end the descent early.
const TOLERANCE: f64 = 1e-20;

/// The interface a descent drives.
///
/// `move_to` sets the current point; the `write_*` methods report quantities
/// at that point.
pub trait LeavesEstimationOracle {
    fn point_dim(&self) -> Result<usize, EstimationError>;

    fn move_to(&mut self, point: &[f32]) -> Result<(), EstimationError>;

    /// Pin coordinates that must not move.
    fn regularize(&self, point: &mut [f32]);

    fn write_value_and_first_derivatives(
        &self,
        value: &mut f64,
        gradient: &mut Vec<f64>,
    ) -> Result<(), EstimationError>;

    fn write_second_derivatives(&self, der2: &mut Vec<f64>) -> Result<(), EstimationError>;

    fn write_weights(&self, weights: &mut Vec<f64>) -> Result<(), EstimationError>;

    /// Publish the final point.
    fn make_estimation_result(&mut self, point: &[f32]) -> Result<(), EstimationError>;
}

/// Diagonal Newton (or weight-normalized gradient) descent.
#[derive(Debug, Clone, Copy)]
pub struct NewtonDescent {
    method: LeavesEstimationMethod,
    iterations: u32,
    backtracking: bool,
    max_backtracking_steps: u32,
}

impl NewtonDescent {
    pub fn from_config(config: &LeavesEstimationConfig) -> Self {
        Self {
            method: config.method,
            iterations: config.iterations,
            backtracking: config.backtracking,
            max_backtracking_steps: config.max_backtracking_steps,
        }
    }

    /// Run the descent from zero and return the final point.
    pub fn optimize<O: LeavesEstimationOracle>(
        &self,
        oracle: &mut O,
    ) -> Result<Vec<f32>, EstimationError> {
        let dim = oracle.point_dim()?;
        let mut point = vec![0.0f32; dim];
        let mut value = 0.0f64;
        let mut gradient = Vec::with_capacity(dim);
        let mut scale = Vec::with_capacity(dim);

        oracle.move_to(&point)?;
        for _ in 0..self.iterations {
            oracle.write_value_and_first_derivatives(&mut value, &mut gradient)?;
            let norm: f64 = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < TOLERANCE {
                break;
            }
            match self.method {
                LeavesEstimationMethod::Newton => oracle.write_second_derivatives(&mut scale)?,
                LeavesEstimationMethod::Gradient => oracle.write_weights(&mut scale)?,
            }
            let direction: Vec<f64> = gradient
                .iter()
                .zip(&scale)
                .map(|(&g, &s)| if s > 0.0 { -g / s } else { 0.0 })
                .collect();

            if !self.backtracking {
                step(&mut point, &direction, 1.0);
                oracle.regularize(&mut point);
                oracle.move_to(&point)?;
                continue;
            }

            let start = point.clone();
            let mut accepted = false;
            let mut step_size = 1.0f64;
            let mut new_value = 0.0f64;
            for _ in 0..=self.max_backtracking_steps {
                point.copy_from_slice(&start);
                step(&mut point, &direction, step_size);
                oracle.regularize(&mut point);
                oracle.move_to(&point)?;
                oracle.write_value_and_first_derivatives(&mut new_value, &mut gradient)?;
                if new_value <= value {
                    accepted = true;
                    break;
                }
                step_size *= 0.5;
            }
            if !accepted {
                point.copy_from_slice(&start);
                oracle.move_to(&point)?;
                tracing::debug!(value, "leaf descent made no progress");
                break;
            }
        }
        Ok(point)
    }
}

#[inline]
fn step(point: &mut [f32], direction: &[f64], step_size: f64) {
    for (p, &d) in point.iter_mut().zip(direction) {
        *p = (*p as f64 + step_size * d) as f32;
    }
}
