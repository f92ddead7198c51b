use std::collections::{BTreeMap, HashSet};

use crate::model::FactorizationModel;

/// Held-out rating as `(user index, item index, rating)`.
pub type TestRating = (usize, usize, f64);

fn by_user(test: &[TestRating]) -> BTreeMap<usize, Vec<(usize, f64)>> {
    let mut grouped: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
    for &(u, i, r) in test {
        grouped.entry(u).or_default().push((i, r));
    }
    grouped
}

/// Mean absolute error of `model` over `test`. `None` for an empty test set.
pub fn mae<M: FactorizationModel + ?Sized>(model: &M, test: &[TestRating]) -> Option<f64> {
    if test.is_empty() {
        return None;
    }
    let total: f64 = test.iter().map(|&(u, i, r)| (model.predict(u, i) - r).abs()).sum();
    Some(total / test.len() as f64)
}

/// Precision of the top `n` predictions among each user's test items, where an
/// item is relevant if its test rating is at least `threshold`. Averaged over
/// users with test ratings; `None` if there are none or `n == 0`.
pub fn precision_at<M: FactorizationModel + ?Sized>(
    model: &M,
    test: &[TestRating],
    n: usize,
    threshold: f64,
) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let grouped = by_user(test);
    if grouped.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for (&u, items) in &grouped {
        let mut scored: Vec<(f64, f64)> = items.iter().map(|&(i, r)| (model.predict(u, i), r)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let k = n.min(scored.len());
        let hits = scored[..k].iter().filter(|&&(_, r)| r >= threshold).count();
        sum += hits as f64 / k as f64;
    }
    Some(sum / grouped.len() as f64)
}

/// Binary-relevance NDCG of a ranked list against the set of relevant items.
pub fn ndcg_at_k(actual: &[usize], predicted: &[usize], k: usize) -> f64 {
    if actual.is_empty() || k == 0 {
        return 0.0;
    }
    let k_actual = k.min(predicted.len());
    if k_actual == 0 {
        return 0.0;
    }
    let actual_set: HashSet<usize> = actual.iter().copied().collect();
    let dcg: f64 = predicted[..k_actual]
        .iter()
        .enumerate()
        .filter(|(_, i)| actual_set.contains(*i))
        .map(|(p, _)| 1.0 / (2.0 + p as f64).log2())
        .sum();
    let idcg: f64 = (0..k_actual.min(actual_set.len()))
        .map(|p| 1.0 / (2.0 + p as f64).log2())
        .sum();
    if idcg == 0.0 { 0.0 } else { dcg / idcg }
}
