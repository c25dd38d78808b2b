//! Property tests for fold planning, permutation selection and snapshots.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use permboost::config::BoostingType;
use permboost::data::QueryGrouping;
use permboost::model::AdditiveModel;
use permboost::persist::{SnapshotRef, read_snapshot, write_snapshot};
use permboost::training::folds::FoldPlanner;
use permboost::training::weak::{BinarySplit, ObliviousTreeModel, ObliviousTreeStructure};
use permboost::training::{TrackerState, select_learn_permutation};

fn query_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..6, 4..400)
}

proptest! {
    #[test]
    fn ordered_folds_tile_the_permutation(
        sizes in query_sizes(),
        min_fold_size in 1usize..200,
        growth in 1.05f64..4.0,
    ) {
        let grouping = QueryGrouping::from_sizes(sizes.iter().copied());
        let n = grouping.n_samples();
        let folds = FoldPlanner::new(BoostingType::Ordered, min_fold_size, 1)
            .plan(n, growth, &grouping)
            .unwrap();

        prop_assert!(!folds.is_empty());
        prop_assert_eq!(folds.last().unwrap().quality_evaluate_samples.right, n);
        for fold in &folds {
            prop_assert_eq!(fold.estimate_samples.left, 0);
            prop_assert_eq!(fold.estimate_samples.right, fold.quality_evaluate_samples.left);
            prop_assert!(!fold.estimate_samples.is_empty());
            prop_assert!(!fold.quality_evaluate_samples.is_empty());
            // Cut points sit on query boundaries.
            let cut = fold.quality_evaluate_samples.left;
            prop_assert_eq!(grouping.query_offset(grouping.query_of(cut)), cut);
        }
        for pair in folds.windows(2) {
            prop_assert_eq!(pair[1].estimate_samples.right, pair[0].quality_evaluate_samples.right);
        }
    }

    #[test]
    fn plain_folds_cover_everything(sizes in query_sizes(), growth in 1.05f64..4.0) {
        let grouping = QueryGrouping::from_sizes(sizes.iter().copied());
        let n = grouping.n_samples();
        let folds = FoldPlanner::new(BoostingType::Plain, 100, 1)
            .plan(n, growth, &grouping)
            .unwrap();

        prop_assert_eq!(folds.len(), 1);
        prop_assert_eq!(folds[0].estimate_samples, folds[0].quality_evaluate_samples);
        prop_assert_eq!(folds[0].all_samples().len(), n);
    }

    #[test]
    fn non_growing_rate_is_rejected(sizes in query_sizes(), growth in 0.0f64..=1.0) {
        let grouping = QueryGrouping::from_sizes(sizes.iter().copied());
        let n = grouping.n_samples();
        for boosting_type in [BoostingType::Ordered, BoostingType::Plain] {
            let result = FoldPlanner::new(boosting_type, 10, 1).plan(n, growth, &grouping);
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn learn_permutation_stays_in_range(seed in any::<u64>(), count in 1usize..16) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        for _ in 0..64 {
            let selected = select_learn_permutation(&mut rng, count);
            if count > 1 {
                prop_assert!(selected < count - 1);
            } else {
                prop_assert_eq!(selected, 0);
            }
        }
    }

    #[test]
    fn snapshot_restores_cursors_bit_for_bit(
        fold_cursors in prop::collection::vec(prop::collection::vec(any::<f32>(), 0..64), 1..6),
        estimation in prop::collection::vec(any::<f32>(), 1..128),
        test in prop::option::of(prop::collection::vec(any::<f32>(), 1..32)),
        leaves in prop::collection::vec(-10.0f32..10.0, 1..5),
        rng_seed in any::<u64>(),
    ) {
        let mut model = AdditiveModel::new();
        for (i, &value) in leaves.iter().enumerate() {
            let structure = ObliviousTreeStructure::new(vec![BinarySplit { feature: i as u32, border: 1 }]);
            model.add_weak_model(ObliviousTreeModel::new(structure, vec![value, -value]));
        }
        let tracker = TrackerState {
            iteration: model.len(),
            ..Default::default()
        };
        let rng = Xoshiro256PlusPlus::seed_from_u64(rng_seed);

        let mut buf = Vec::new();
        write_snapshot(
            &mut buf,
            &SnapshotRef {
                tracker: &tracker,
                rng: &rng,
                model: &model,
                fold_cursors: &fold_cursors,
                estimation_cursor: &estimation,
                test_cursor: test.as_deref(),
                best_test_cursor: test.as_deref(),
            },
        )
        .unwrap();
        let restored = read_snapshot::<_, ObliviousTreeModel>(&mut buf.as_slice()).unwrap();

        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        prop_assert_eq!(restored.fold_cursors.len(), fold_cursors.len());
        for (a, b) in restored.fold_cursors.iter().zip(&fold_cursors) {
            prop_assert_eq!(bits(a), bits(b));
        }
        prop_assert_eq!(bits(&restored.estimation_cursor), bits(&estimation));
        prop_assert_eq!(restored.test_cursor.as_deref().map(bits), test.as_deref().map(bits));
        prop_assert_eq!(restored.model.weak_models(), model.weak_models());
        prop_assert_eq!(restored.tracker, tracker);
        prop_assert_eq!(restored.rng, rng);
    }
}
