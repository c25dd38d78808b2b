//! The ordered boosting loop.
//!
//! Each iteration runs the same phases:
//!
//! 1. **Start**: stop policy, opportunistic snapshot, interruption check
//! 2. **Structure search** on one randomly chosen learn permutation
//! 3. **Caching** of leaf assignments for every dataset
//! 4. **Leaf estimation** for every (permutation, fold) plus the estimation
//!    permutation, batched in a single solve
//! 5. **Model append** to every cursor, after all estimates are done
//! 6. **Metric tracking** on the estimation and test cursors
//!
//! Fold cursors only ever see models estimated on samples before their
//! validate range, which keeps gradients free of target leakage.

use std::io::{Read, Write};

use ndarray::Array2;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{BoostingConfig, BoostingType};
use crate::data::{PermutedDataset, Slice, TrainingData};
use crate::error::TrainError;
use crate::model::AdditiveModel;
use crate::persist::{SnapshotData, SnapshotError, SnapshotRef, read_snapshot, write_snapshot};
use crate::utils::{Parallelism, run_with_threads};

use super::cache::IterationCache;
use super::folds::{Fold, FoldPlanner};
use super::logger::TrainingLogger;
use super::metrics::MetricCalcer;
use super::permutations::{DataSetsHolder, PermutationTargets};
use super::progress::{MetricsHistory, ProgressTracker, StopReason, TrackerState};
use super::random_score::score_model_length_mult;
use super::slots::{Slot, SlotStorage};
use super::weak::{StructureSearcher, WeakLearner, WeakModel};

// =============================================================================
// Result
// =============================================================================

/// Outcome of [`DynamicBoosting::run`].
#[derive(Debug, Clone)]
pub struct BoostingResult<M> {
    pub model: AdditiveModel<M>,
    pub stop_reason: StopReason,
    pub history: MetricsHistory,
    /// Iteration with the lowest test metric, if a test set was given.
    pub best_iteration: Option<usize>,
    /// Raw test predictions after the last iteration.
    pub test_approx: Option<Vec<f32>>,
    /// Raw test predictions at the best iteration, `[1, n_test]`.
    pub best_test_approx: Option<Array2<f64>>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Learn permutation for the next structure search.
///
/// Draws from `0..learn_permutation_count - 1`; with a single learn
/// permutation, always 0.
pub fn select_learn_permutation<R: RngCore + ?Sized>(rng: &mut R, learn_permutation_count: usize) -> usize {
    if learn_permutation_count > 1 {
        (rng.next_u64() % (learn_permutation_count as u64 - 1)) as usize
    } else {
        0
    }
}

/// Whether the estimation permutation gets its own estimation task.
///
/// Plain boosting with a single permutation reuses the sole fold model.
#[inline]
pub fn needs_estimation_task(boosting_type: BoostingType, estimation_permutation: usize) -> bool {
    !(boosting_type == BoostingType::Plain && estimation_permutation == 0)
}

/// Generator for learn-permutation draws and score noise.
///
/// Jumped ahead of `seed`'s stream so it never replays the first shuffle.
pub(crate) fn run_rng(seed: u64) -> Xoshiro256PlusPlus {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    rng.jump();
    rng
}

/// Running predictions of `dataset`'s first `len` samples: its baseline, or 0.
fn initial_cursor(dataset: &PermutedDataset, len: usize) -> Vec<f32> {
    match dataset.baseline() {
        Some(baseline) => baseline[..len].to_vec(),
        None => vec![0.0; len],
    }
}

// =============================================================================
// Run state
// =============================================================================

/// Everything the loop mutates, and what a snapshot captures.
struct RunState<M> {
    rng: Xoshiro256PlusPlus,
    model: AdditiveModel<M>,
    cursors: SlotStorage<Vec<f32>>,
    test_cursor: Option<Vec<f32>>,
    best_test_cursor: Option<Vec<f32>>,
}

impl<M: WeakModel> RunState<M> {
    fn write(&self, tracker: &TrackerState, out: &mut dyn Write) -> Result<(), SnapshotError> {
        let entries = self.cursors.entries();
        let snapshot = SnapshotRef {
            tracker,
            rng: &self.rng,
            model: &self.model,
            fold_cursors: &entries[..entries.len() - 1],
            estimation_cursor: self.cursors.get(Slot::Estimation),
            test_cursor: self.test_cursor.as_deref(),
            best_test_cursor: self.best_test_cursor.as_deref(),
        };
        write_snapshot(out, &snapshot)
    }

    /// Replace the state with a snapshot of a run with the same layout.
    fn restore(&mut self, input: &mut dyn Read) -> Result<TrackerState, SnapshotError> {
        let data: SnapshotData<M> = read_snapshot(input)?;

        if data.model.len() != data.tracker.iteration {
            return Err(SnapshotError::StateMismatch(format!(
                "{} weak models for {} iterations",
                data.model.len(),
                data.tracker.iteration
            )));
        }
        let lengths = |cursors: &[Vec<f32>]| cursors.iter().map(Vec::len).collect::<Vec<_>>();
        let entries = self.cursors.entries();
        if lengths(&data.fold_cursors) != lengths(&entries[..entries.len() - 1])
            || data.estimation_cursor.len() != self.cursors.get(Slot::Estimation).len()
        {
            return Err(SnapshotError::StateMismatch("fold layout changed".into()));
        }
        let same_shape = |a: &Option<Vec<f32>>, b: &Option<Vec<f32>>| {
            a.as_ref().map(Vec::len) == b.as_ref().map(Vec::len)
        };
        if !same_shape(&data.test_cursor, &self.test_cursor)
            || !same_shape(&data.best_test_cursor, &self.best_test_cursor)
        {
            return Err(SnapshotError::StateMismatch("test dataset changed".into()));
        }

        let mut entries = data.fold_cursors;
        entries.push(data.estimation_cursor);
        self.cursors = SlotStorage::from_entries(&self.cursors.fold_counts(), entries)
            .ok_or_else(|| SnapshotError::StateMismatch("fold layout changed".into()))?;
        self.rng = data.rng;
        self.model = data.model;
        self.test_cursor = data.test_cursor;
        self.best_test_cursor = data.best_test_cursor;
        Ok(data.tracker)
    }
}

// =============================================================================
// DynamicBoosting
// =============================================================================

/// Ordered (or plain) boosting of weak models from `W`.
pub struct DynamicBoosting<'d, W: WeakLearner> {
    config: &'d BoostingConfig,
    learner: W,
    learn: Option<&'d TrainingData>,
    test: Option<&'d TrainingData>,
}

impl<'d, W: WeakLearner> DynamicBoosting<'d, W> {
    pub fn new(config: &'d BoostingConfig, learner: W) -> Self {
        Self {
            config,
            learner,
            learn: None,
            test: None,
        }
    }

    pub fn set_data(&mut self, learn: &'d TrainingData, test: Option<&'d TrainingData>) -> &mut Self {
        self.learn = Some(learn);
        self.test = test;
        self
    }

    pub fn learner(&self) -> &W {
        &self.learner
    }

    /// Train until the tracker votes stop or the run is interrupted.
    ///
    /// # Errors
    ///
    /// Configuration and dataset errors are reported before the first
    /// iteration. Estimation and snapshot errors abort the run.
    pub fn run(&self, tracker: &mut ProgressTracker) -> Result<BoostingResult<W::Model>, TrainError> {
        self.config.validate()?;
        let learn = self.learn.ok_or(TrainError::MissingTrainingData)?;
        run_with_threads(self.config.thread_count(), |parallelism| {
            self.run_with(learn, tracker, parallelism)
        })
    }

    fn run_with(
        &self,
        learn: &TrainingData,
        tracker: &mut ProgressTracker,
        parallelism: Parallelism,
    ) -> Result<BoostingResult<W::Model>, TrainError> {
        let config = self.config;
        let logger = TrainingLogger::new(config.verbosity);

        // ---------------------------------------------------------------------
        // Initializing
        // ---------------------------------------------------------------------
        let holder = DataSetsHolder::build(
            learn,
            self.test,
            config.permutation_count,
            config.permutation_block_size,
            config.seed,
            parallelism,
        )?;
        let targets = PermutationTargets::build(&config.objective, &holder)?;
        let n_samples = holder.n_samples();
        let estimation_permutation = holder.estimation_permutation();
        let learn_permutation_count = holder.learn_permutation_count();

        let planner = FoldPlanner::from_config(config);
        let folds: Vec<Vec<Fold>> = (0..learn_permutation_count)
            .map(|p| planner.plan(n_samples, config.fold_len_multiplier, holder.dataset(p).grouping()))
            .collect::<Result<_, _>>()?;
        let fold_counts: Vec<usize> = folds.iter().map(Vec::len).collect();

        tracker.set_has_test(holder.test().is_some());
        let cursors = SlotStorage::from_fn(&fold_counts, |slot| match slot {
            Slot::Fold { permutation, fold } => {
                initial_cursor(holder.dataset(permutation), folds[permutation][fold].cursor_len())
            }
            Slot::Estimation => initial_cursor(holder.estimation_dataset(), n_samples),
        });
        let test_cursor = holder.test().map(|t| initial_cursor(t, t.n_samples()));
        let best_test_cursor = if tracker.need_best_test_cursor() {
            test_cursor.clone()
        } else {
            None
        };
        let mut run = RunState {
            rng: run_rng(config.seed),
            model: AdditiveModel::new(),
            cursors,
            test_cursor,
            best_test_cursor,
        };
        tracker.maybe_restore_from_snapshot(|input| run.restore(input))?;

        logger.info(&format!(
            "Starting training: {} iterations, {} samples, {} permutations, {} folds",
            config.iterations,
            n_samples,
            holder.permutation_count(),
            fold_counts.iter().sum::<usize>()
        ));

        let metric = MetricCalcer::new(parallelism);
        let mut cache = IterationCache::new();

        let stop_reason = loop {
            // -----------------------------------------------------------------
            // IterationStart
            // -----------------------------------------------------------------
            if let Some(reason) = tracker.stop_reason() {
                break reason;
            }
            tracker.maybe_save_snapshot(|state, out| run.write(state, out))?;
            if tracker.is_interrupted() {
                logger.warn(&format!("Training interrupted at iteration {}", tracker.iteration()));
                break StopReason::Interrupted;
            }
            cache.reset();
            let iteration = tracker.iteration();

            // -----------------------------------------------------------------
            // StructureSearch
            // -----------------------------------------------------------------
            let learn_permutation = select_learn_permutation(&mut run.rng, learn_permutation_count);
            let structure = {
                let target = targets.get(learn_permutation);
                let mut searcher = self
                    .learner
                    .create_structure_searcher(holder.dataset(learn_permutation));
                searcher.set_random_strength(
                    config.random_strength
                        * score_model_length_mult(n_samples, iteration as f64 * config.learning_rate),
                );
                match config.boosting_type {
                    BoostingType::Plain => {
                        let cursor = run.cursors.get(Slot::Fold {
                            permutation: learn_permutation,
                            fold: 0,
                        });
                        searcher.set_target(target.at_point(cursor));
                    }
                    BoostingType::Ordered => {
                        for (fold_id, fold) in folds[learn_permutation].iter().enumerate() {
                            let cursor = run.cursors.get(Slot::Fold {
                                permutation: learn_permutation,
                                fold: fold_id,
                            });
                            let learn = target
                                .restrict(fold.estimate_samples)
                                .at_point(&cursor[fold.estimate_samples.range()]);
                            let validate = target
                                .restrict(fold.quality_evaluate_samples)
                                .at_point(&cursor[fold.quality_evaluate_samples.range()]);
                            searcher.add_task(learn, validate);
                        }
                    }
                }
                searcher.fit(&mut run.rng)?
            };

            // -----------------------------------------------------------------
            // Caching
            // -----------------------------------------------------------------
            if let Some(test) = holder.test() {
                self.learner.cache_structure(&mut cache, &structure, test);
            }
            self.learner
                .cache_structure(&mut cache, &structure, holder.estimation_dataset());
            for p in 0..learn_permutation_count {
                self.learner
                    .cache_structure(&mut cache, &structure, holder.dataset(p));
            }

            // -----------------------------------------------------------------
            // LeafEstimation
            // -----------------------------------------------------------------
            let estimate_separately = needs_estimation_task(config.boosting_type, estimation_permutation);
            let mut models: SlotStorage<W::Model> =
                SlotStorage::from_fn(&fold_counts, |_| W::Model::from_structure(structure.clone()));
            {
                let mut estimator = self.learner.create_estimator();
                for (slot, model) in models.iter_mut() {
                    match slot {
                        Slot::Fold { permutation, fold } => {
                            let estimate = folds[permutation][fold].estimate_samples;
                            estimator.add_estimation_task(
                                &cache,
                                targets.get(permutation).restrict(estimate),
                                holder.dataset(permutation),
                                &run.cursors.get(slot)[estimate.range()],
                                model,
                            )?;
                        }
                        Slot::Estimation if estimate_separately => {
                            estimator.add_estimation_task(
                                &cache,
                                targets.get(estimation_permutation).clone(),
                                holder.estimation_dataset(),
                                run.cursors.get(slot),
                                model,
                            )?;
                        }
                        Slot::Estimation => {}
                    }
                }
                estimator.estimate()?;
            }
            for (_, model) in models.iter_mut() {
                model.rescale(config.learning_rate);
            }
            if !estimate_separately {
                let sole = models
                    .get(Slot::Fold {
                        permutation: 0,
                        fold: 0,
                    })
                    .clone();
                models.replace(Slot::Estimation, sole);
            }

            // -----------------------------------------------------------------
            // ModelAppend
            // -----------------------------------------------------------------
            {
                let mut add = self.learner.create_add_model_value(&cache);
                let estimation_model = models.get(Slot::Estimation);
                if let (Some(test), Some(cursor)) = (holder.test(), run.test_cursor.as_mut()) {
                    add.add_task(estimation_model, test, Slice::full(test.n_samples()), cursor)?;
                }
                for (slot, cursor) in run.cursors.iter_mut() {
                    match slot {
                        Slot::Fold { permutation, fold } => {
                            add.add_task(
                                models.get(slot),
                                holder.dataset(permutation),
                                folds[permutation][fold].all_samples(),
                                cursor,
                            )?;
                        }
                        Slot::Estimation => {
                            add.add_task(
                                estimation_model,
                                holder.estimation_dataset(),
                                Slice::full(n_samples),
                                cursor,
                            )?;
                        }
                    }
                }
                add.proceed();
            }
            run.model
                .add_weak_model(models.get(Slot::Estimation).clone());

            // -----------------------------------------------------------------
            // MetricTracking
            // -----------------------------------------------------------------
            let learn_error = metric.eval(
                targets.get(estimation_permutation),
                run.cursors.get(Slot::Estimation),
            );
            tracker.track_learn_errors(learn_error);
            if let (Some(test_target), Some(cursor)) = (targets.test(), run.test_cursor.as_ref()) {
                tracker.track_test_errors(metric.eval(test_target, cursor));
                if tracker.is_best_test_iteration() {
                    if let Some(best) = run.best_test_cursor.as_mut() {
                        best.copy_from_slice(cursor);
                    }
                }
            }
            tracker.finish_iteration();
        };

        // ---------------------------------------------------------------------
        // Finalizing
        // ---------------------------------------------------------------------
        tracker.save_snapshot(|state, out| run.write(state, out))?;
        if let Some(best) = &run.best_test_cursor {
            let approx = Array2::from_shape_fn((1, best.len()), |(_, j)| best[j] as f64);
            tracker.set_best_test_cursor(approx);
        }

        let best_iteration = tracker.best_iteration();
        let mut model = run.model;
        if config.use_best_model {
            if let Some(best) = best_iteration {
                model.truncate(best + 1);
            }
        }
        logger.info(&format!(
            "Training finished after {} iterations ({stop_reason:?}), {} weak models kept",
            tracker.iteration(),
            model.len()
        ));

        Ok(BoostingResult {
            model,
            stop_reason,
            history: tracker.history().clone(),
            best_iteration,
            test_approx: run.test_cursor,
            best_test_approx: tracker.best_test_cursor().cloned(),
        })
    }
}
