//! Decay of split-score noise over the course of training.

/// Multiplier applied to the configured random strength.
///
/// `model_length` is the accumulated shrinkage `iteration * learning_rate`.
/// Close to 1 early in training, it falls towards 0 once the model length
/// exceeds `ln(sample_count)`.
pub fn score_model_length_mult(sample_count: usize, model_length: f64) -> f64 {
    let exp_length = (sample_count.max(1) as f64).ln() - model_length;
    // e / (1 + e) == 1 / (1 + 1/e), stable for large |exp_length|.
    1.0 / (1.0 + (-exp_length).exp())
}
