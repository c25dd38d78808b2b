//! Quality metrics reported by the boosting loop.

use crate::utils::Parallelism;

use super::objectives::ObjectiveFn;
use super::target::PermutationTarget;

const METRIC_CHUNK: usize = 1 << 14;

/// Weighted mean of the training objective over a target.
///
/// Lower is better.
#[derive(Debug, Clone, Copy)]
pub struct MetricCalcer {
    parallelism: Parallelism,
}

impl MetricCalcer {
    pub fn new(parallelism: Parallelism) -> Self {
        Self { parallelism }
    }

    pub fn name(&self, target: &PermutationTarget) -> &'static str {
        target.objective().name()
    }

    /// `Σ w·loss / Σ w` at `cursor`, which covers the target's slice.
    ///
    /// Chunks are summed in order, so the result does not depend on the
    /// thread count.
    pub fn eval(&self, target: &PermutationTarget, cursor: &[f32]) -> f64 {
        debug_assert_eq!(cursor.len(), target.len());
        let starts: Vec<usize> = (0..cursor.len()).step_by(METRIC_CHUNK).collect();
        let partials = self.parallelism.maybe_par_map(starts, |start| {
            let end = (start + METRIC_CHUNK).min(cursor.len());
            let objective = target.objective();
            let targets = &target.targets()[start..end];
            let weights = &target.weights()[start..end];
            cursor[start..end]
                .iter()
                .zip(targets)
                .zip(weights)
                .fold((0.0f64, 0.0f64), |(loss, weight), ((&p, &y), &w)| {
                    (loss + w as f64 * objective.loss(p, y), weight + w as f64)
                })
        });
        let (loss, weight) = partials
            .into_iter()
            .fold((0.0, 0.0), |(l, w), (pl, pw)| (l + pl, w + pw));
        if weight > 0.0 { loss / weight } else { 0.0 }
    }
}
