//! Histogram-based oblivious tree search.
//!
//! Trees are grown level by level. At each level every `(feature, border)`
//! candidate is scored across all queued tasks: leaf values are fitted on a
//! task's learn samples and the resulting second-order loss decrease is
//! measured on its validate samples. In plain boosting both sets coincide.

use std::borrow::Cow;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::{BoostingConfig, LeavesEstimationConfig, TreeParams};
use crate::data::PermutedDataset;
use crate::error::TrainError;
use crate::training::cache::IterationCache;
use crate::training::estimation::{EstimationError, LeavesEstimator};
use crate::training::target::ShiftedTarget;
use crate::utils::Parallelism;

use super::{
    AddModelValue, BinarySplit, ModelStructure, ObliviousTreeModel, ObliviousTreeStructure,
    StructureSearcher, WeakLearner,
};

// =============================================================================
// Learner
// =============================================================================

/// Oblivious tree weak learner.
#[derive(Debug, Clone)]
pub struct ObliviousTreeLearner {
    tree: TreeParams,
    leaves: LeavesEstimationConfig,
    device_count: usize,
    parallelism: Parallelism,
}

impl ObliviousTreeLearner {
    pub fn new(tree: TreeParams, leaves: LeavesEstimationConfig) -> Self {
        Self {
            tree,
            leaves,
            device_count: 1,
            parallelism: Parallelism::Sequential,
        }
    }

    pub fn from_config(config: &BoostingConfig) -> Self {
        Self::new(config.tree, config.leaves).with_device_count(config.device_count)
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_device_count(mut self, device_count: usize) -> Self {
        self.device_count = device_count.max(1);
        self
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.tree.depth
    }
}

impl WeakLearner for ObliviousTreeLearner {
    type Structure = ObliviousTreeStructure;
    type Model = ObliviousTreeModel;
    type Searcher<'a> = ObliviousTreeSearcher<'a>;

    fn create_structure_searcher<'a>(&'a self, dataset: &'a PermutedDataset) -> ObliviousTreeSearcher<'a> {
        ObliviousTreeSearcher {
            learner: self,
            dataset,
            random_strength: 0.0,
            tasks: Vec::new(),
        }
    }

    fn cache_structure(
        &self,
        cache: &mut IterationCache,
        structure: &ObliviousTreeStructure,
        dataset: &PermutedDataset,
    ) {
        let fingerprint = structure.fingerprint();
        if !cache.contains(dataset.id(), fingerprint) {
            let bins = structure.compute_bins(dataset.features(), self.parallelism);
            cache.insert(dataset.id(), fingerprint, bins);
        }
    }

    fn create_estimator<'a>(&self) -> LeavesEstimator<'a, ObliviousTreeModel> {
        LeavesEstimator::new(self.leaves, self.device_count, self.parallelism)
    }

    fn create_add_model_value<'a>(&self, cache: &'a IterationCache) -> AddModelValue<'a, ObliviousTreeModel> {
        AddModelValue::new(cache, self.parallelism)
    }
}

// =============================================================================
// Searcher
// =============================================================================

struct SearchTask<'a> {
    learn: ShiftedTarget<'a>,
    validate: ShiftedTarget<'a>,
}

/// Per-task derivatives and current leaf assignment.
struct TaskState {
    learn_offset: usize,
    learn_der: Vec<f32>,
    learn_der2: Vec<f32>,
    learn_leaf: Vec<u32>,
    validate_offset: usize,
    validate_der: Vec<f32>,
    validate_der2: Vec<f32>,
    validate_leaf: Vec<u32>,
}

#[derive(Clone, Copy, Default)]
struct Stat {
    der: f64,
    der2: f64,
}

impl std::ops::AddAssign for Stat {
    fn add_assign(&mut self, rhs: Self) {
        self.der += rhs.der;
        self.der2 += rhs.der2;
    }
}

impl std::ops::Sub for Stat {
    type Output = Stat;
    fn sub(self, rhs: Self) -> Stat {
        Stat {
            der: self.der - rhs.der,
            der2: self.der2 - rhs.der2,
        }
    }
}

/// Greedy level-wise search over one permutation's dataset.
pub struct ObliviousTreeSearcher<'a> {
    learner: &'a ObliviousTreeLearner,
    dataset: &'a PermutedDataset,
    random_strength: f64,
    tasks: Vec<SearchTask<'a>>,
}

impl<'a> StructureSearcher<'a> for ObliviousTreeSearcher<'a> {
    type Structure = ObliviousTreeStructure;

    fn set_random_strength(&mut self, strength: f64) {
        self.random_strength = strength;
    }

    fn set_target(&mut self, target: ShiftedTarget<'a>) {
        self.tasks.push(SearchTask {
            learn: target.clone(),
            validate: target,
        });
    }

    fn add_task(&mut self, learn: ShiftedTarget<'a>, validate: ShiftedTarget<'a>) {
        self.tasks.push(SearchTask { learn, validate });
    }

    fn fit<R: Rng + ?Sized>(self, rng: &mut R) -> Result<ObliviousTreeStructure, TrainError> {
        if self.tasks.is_empty() {
            return Err(EstimationError::NoTasks.into());
        }
        let parallelism = self.learner.parallelism;
        let l2_reg = self.learner.leaves.l2_reg;
        let features = self.dataset.features();
        let n_bins = self.dataset.n_bins();

        let mut states: Vec<TaskState> = parallelism.maybe_par_map(&self.tasks, |task| {
            let (learn_der, learn_der2) = task.learn.weighted_derivatives();
            let (validate_der, validate_der2) = task.validate.weighted_derivatives();
            TaskState {
                learn_offset: task.learn.slice().left,
                learn_leaf: vec![0; learn_der.len()],
                learn_der,
                learn_der2,
                validate_offset: task.validate.slice().left,
                validate_leaf: vec![0; validate_der.len()],
                validate_der,
                validate_der2,
            }
        });

        let mut splits = Vec::with_capacity(self.learner.tree.depth as usize);
        for depth in 0..self.learner.tree.depth as usize {
            let leaf_count = 1usize << depth;
            let candidates: Vec<(BinarySplit, f64)> = parallelism
                .maybe_par_map(0..features.nrows(), |feature| {
                    let row = features.row(feature);
                    let row: Cow<'_, [u8]> = match row.as_slice() {
                        Some(s) => Cow::Borrowed(s),
                        None => Cow::Owned(row.to_vec()),
                    };
                    score_feature(feature, &row, n_bins[feature] as usize, leaf_count, &states, l2_reg)
                })
                .into_iter()
                .flatten()
                .collect();
            if candidates.is_empty() {
                break;
            }

            let noise_scale = self.random_strength * score_std_dev(&candidates);
            let mut best: Option<(BinarySplit, f64)> = None;
            for &(split, score) in &candidates {
                let noise: f64 = if noise_scale > 0.0 {
                    rng.sample::<f64, _>(StandardNormal) * noise_scale
                } else {
                    0.0
                };
                let perturbed = score + noise;
                if best.is_none_or(|(_, s)| perturbed > s) {
                    best = Some((split, perturbed));
                }
            }
            let Some((split, _)) = best else { break };
            tracing::trace!(depth, feature = split.feature, border = split.border, "selected split");

            let row = features.row(split.feature as usize);
            for state in &mut states {
                for (i, leaf) in state.learn_leaf.iter_mut().enumerate() {
                    if split.goes_right(row[state.learn_offset + i]) {
                        *leaf |= 1 << depth;
                    }
                }
                for (i, leaf) in state.validate_leaf.iter_mut().enumerate() {
                    if split.goes_right(row[state.validate_offset + i]) {
                        *leaf |= 1 << depth;
                    }
                }
            }
            splits.push(split);
        }

        Ok(ObliviousTreeStructure::new(splits))
    }
}

/// Score every border of one feature, summed over tasks.
fn score_feature(
    feature: usize,
    row: &[u8],
    bin_count: usize,
    leaf_count: usize,
    states: &[TaskState],
    l2_reg: f64,
) -> Vec<(BinarySplit, f64)> {
    if bin_count < 2 {
        return Vec::new();
    }
    let mut scores = vec![0.0f64; bin_count - 1];
    let mut learn_hist = vec![Stat::default(); leaf_count * bin_count];
    let mut validate_hist = vec![Stat::default(); leaf_count * bin_count];

    for state in states {
        learn_hist.fill(Stat::default());
        validate_hist.fill(Stat::default());
        fill_histogram(
            &mut learn_hist,
            &row[state.learn_offset..state.learn_offset + state.learn_leaf.len()],
            &state.learn_leaf,
            &state.learn_der,
            &state.learn_der2,
            bin_count,
        );
        fill_histogram(
            &mut validate_hist,
            &row[state.validate_offset..state.validate_offset + state.validate_leaf.len()],
            &state.validate_leaf,
            &state.validate_der,
            &state.validate_der2,
            bin_count,
        );

        for leaf in 0..leaf_count {
            let learn = &learn_hist[leaf * bin_count..(leaf + 1) * bin_count];
            let validate = &validate_hist[leaf * bin_count..(leaf + 1) * bin_count];
            let learn_total = learn.iter().fold(Stat::default(), |mut acc, &s| {
                acc += s;
                acc
            });
            let validate_total = validate.iter().fold(Stat::default(), |mut acc, &s| {
                acc += s;
                acc
            });
            let mut learn_left = Stat::default();
            let mut validate_left = Stat::default();
            for (border, score) in scores.iter_mut().enumerate() {
                learn_left += learn[border];
                validate_left += validate[border];
                *score += leaf_gain(learn_left, validate_left, l2_reg)
                    + leaf_gain(learn_total - learn_left, validate_total - validate_left, l2_reg);
            }
        }
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(border, score)| {
            (
                BinarySplit {
                    feature: feature as u32,
                    border: border as u8,
                },
                score,
            )
        })
        .collect()
}

fn fill_histogram(
    hist: &mut [Stat],
    bins: &[u8],
    leaves: &[u32],
    der: &[f32],
    der2: &[f32],
    bin_count: usize,
) {
    for (((&bin, &leaf), &d), &d2) in bins.iter().zip(leaves).zip(der).zip(der2) {
        hist[leaf as usize * bin_count + bin as usize] += Stat {
            der: d as f64,
            der2: d2 as f64,
        };
    }
}

/// Decrease of the second-order loss on `validate` when the leaf takes the
/// Newton value fitted on `learn`.
#[inline]
fn leaf_gain(learn: Stat, validate: Stat, l2_reg: f64) -> f64 {
    let denominator = learn.der2 + l2_reg;
    if denominator <= 0.0 {
        return 0.0;
    }
    let value = -learn.der / denominator;
    -(value * validate.der + 0.5 * value * value * validate.der2)
}

fn score_std_dev(candidates: &[(BinarySplit, f64)]) -> f64 {
    let n = candidates.len() as f64;
    let mean = candidates.iter().map(|(_, s)| s).sum::<f64>() / n;
    let var = candidates.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}
