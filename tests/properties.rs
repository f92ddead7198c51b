//! Property-based tests for the smoothed-rank model.

use ndcgmf::rank::{ideal_dcg, relaxed_position, softmax, RankContext};
use ndcgmf::{NdcgMf, NdcgMfConfig, Registry};
use proptest::prelude::*;

fn ratings_strategy() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(1u8..=5, 1..12).prop_map(|v| v.into_iter().map(f64::from).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn ideal_dcg_ignores_input_order(
        (ratings, shuffled) in ratings_strategy()
            .prop_flat_map(|r| (Just(r.clone()), Just(r).prop_shuffle())),
    ) {
        prop_assert_eq!(ideal_dcg(&ratings).to_bits(), ideal_dcg(&shuffled).to_bits());
    }

    #[test]
    fn softmax_partitions_unity(
        scores in proptest::collection::vec(-10.0f64..10.0, 1..20),
        beta in 0.1f64..5.0,
    ) {
        let s = softmax(&scores, beta);
        let total: f64 = s.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        for &v in &s {
            prop_assert!(v > 0.0 && v <= 1.0);
        }
    }

    #[test]
    fn positions_stay_within_the_list(
        ratings in ratings_strategy(),
        seed in any::<u64>(),
    ) {
        let predictions: Vec<f64> = ratings
            .iter()
            .enumerate()
            .map(|(k, _)| ((seed.rotate_left(k as u32 * 7) % 1000) as f64 / 100.0) - 5.0)
            .collect();
        let n = ratings.len() as f64;
        let ctx = RankContext::build(&ratings, predictions, 2.0).unwrap();
        for p in 0..ctx.len() {
            let pos = ctx.position(p);
            prop_assert!((1.0..=n).contains(&pos), "position {} outside [1, {}]", pos, n);
        }
        prop_assert!(ctx.gradient_sum().is_finite());
    }

    #[test]
    fn relaxed_position_is_monotone(n in 1usize..50, a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(relaxed_position(n, hi) <= relaxed_position(n, lo));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn every_user_softmax_sums_to_one_after_training(
        cells in proptest::collection::btree_map((0u64..6, 0u64..6), 1u8..=5, 4..20),
        seed in any::<u64>(),
    ) {
        let reg = Registry::from_ratings(cells.into_iter().map(|((u, i), r)| (u, i, f64::from(r)))).unwrap();
        let mut model = NdcgMf::new(&reg, NdcgMfConfig::new(3, 5).with_seed(seed)).unwrap();
        model.train().unwrap();
        for u in 0..reg.num_users() {
            let items: Vec<usize> = reg.user(u).iter().map(|(i, _)| i).collect();
            let total: f64 = items.iter().filter_map(|&i| model.softmax(u, i)).sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
