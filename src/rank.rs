//! Smoothed-rank model behind the NDCG surrogate.
//!
//! For a user `u` with rated items `R(u)` and scores `pred(u, i)`:
//!
//! ```text
//! s(u,i)   = exp(β·pred(u,i)) / Σ_{j∈R(u)} exp(β·pred(u,j))      (Luce choice)
//! pos(u,i) = |R(u)| − (|R(u)| − 1)·s(u,i)                          ∈ [1, |R(u)|]
//! idcg(u)  = Σ_k ln2·(2^r_k − 1) / ln(k + 2)     (ratings sorted descending)
//! c(u,i)   = (2^r(u,i) − 1) / idcg(u) / ln(pos(u,i) + 1)^3
//! g(u,i)   = c(u,i)·s(u,i)
//! ```

use std::f64::consts::LN_2;

/// DCG gain of a rating: `2^r − 1`.
#[inline]
pub fn gain(rating: f64) -> f64 {
    rating.exp2() - 1.0
}

/// Ideal DCG of a rating multiset. Depends only on the values, not their order.
pub fn ideal_dcg(ratings: &[f64]) -> f64 {
    let mut sorted = ratings.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    sorted
        .iter()
        .enumerate()
        .map(|(k, &r)| LN_2 * gain(r) / ((k + 2) as f64).ln())
        .sum()
}

/// Temperature softmax over `scores`, shifted by the maximum so large scores
/// cannot overflow.
pub fn softmax(scores: &[f64], beta: f64) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out: Vec<f64> = scores.iter().map(|&x| (beta * (x - max)).exp()).collect();
    let total: f64 = out.iter().sum();
    for v in out.iter_mut() {
        *v /= total;
    }
    out
}

/// Continuous stand-in for the rank of an item among `n` rated items.
#[inline]
pub fn relaxed_position(n: usize, softmax: f64) -> f64 {
    n as f64 - (n as f64 - 1.0) * softmax
}

/// `c(u,i)`: the gradient term without its softmax factor.
#[inline]
pub fn gradient_coefficient(idcg: f64, rating: f64, position: f64) -> f64 {
    gain(rating) / idcg / (position + 1.0).ln().powi(3)
}

/// Softmax, gradient terms and their sum for one user, aligned with the
/// user's sorted rating list. Taken once per iteration from the user factors
/// and the committed item buffer, so every pass of that iteration sees the
/// same values.
#[derive(Debug, Clone)]
pub struct RankContext {
    predictions: Vec<f64>,
    softmax: Vec<f64>,
    gradient: Vec<f64>,
    gradient_sum: f64,
    idcg: f64,
}

impl RankContext {
    /// `None` for a degenerate user: no ratings, or an ideal DCG that is not a
    /// positive finite number.
    pub fn build(ratings: &[f64], predictions: Vec<f64>, beta: f64) -> Option<Self> {
        debug_assert_eq!(ratings.len(), predictions.len());
        if ratings.is_empty() {
            return None;
        }
        let idcg = ideal_dcg(ratings);
        if !(idcg.is_finite() && idcg > 0.0) {
            return None;
        }
        let n = ratings.len();
        let softmax = softmax(&predictions, beta);
        let gradient: Vec<f64> = ratings
            .iter()
            .zip(&softmax)
            .map(|(&r, &s)| gradient_coefficient(idcg, r, relaxed_position(n, s)) * s)
            .collect();
        let gradient_sum = gradient.iter().sum();
        Some(Self {
            predictions,
            softmax,
            gradient,
            gradient_sum,
            idcg,
        })
    }

    pub fn len(&self) -> usize {
        self.softmax.len()
    }

    pub fn is_empty(&self) -> bool {
        self.softmax.is_empty()
    }

    pub fn idcg(&self) -> f64 {
        self.idcg
    }

    /// Score of the `pos`-th rated item at snapshot time.
    #[inline]
    pub fn prediction(&self, pos: usize) -> f64 {
        self.predictions[pos]
    }

    #[inline]
    pub fn softmax(&self, pos: usize) -> f64 {
        self.softmax[pos]
    }

    pub fn softmax_values(&self) -> &[f64] {
        &self.softmax
    }

    #[inline]
    pub fn position(&self, pos: usize) -> f64 {
        relaxed_position(self.len(), self.softmax[pos])
    }

    /// `g(u,i)` for the `pos`-th rated item.
    #[inline]
    pub fn gradient(&self, pos: usize) -> f64 {
        self.gradient[pos]
    }

    pub fn gradient_sum(&self) -> f64 {
        self.gradient_sum
    }

    /// Aggregate item-side term for the `pos`-th rated item: the direct part
    /// `g·(1 − s)` minus the cross part `s·Σ_{j≠pos} g_j`.
    #[inline]
    pub fn item_term(&self, pos: usize) -> f64 {
        let s = self.softmax[pos];
        let g = self.gradient[pos];
        g * (1.0 - s) - s * (self.gradient_sum - g)
    }

    /// Smoothed NDCG: DCG at the relaxed positions over the ideal DCG.
    pub fn smoothed_ndcg(&self, ratings: &[f64]) -> f64 {
        let dcg: f64 = ratings
            .iter()
            .enumerate()
            .map(|(p, &r)| LN_2 * gain(r) / (self.position(p) + 1.0).ln())
            .sum();
        dcg / self.idcg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ideal_dcg_by_hand() {
        // 5, 3, 1 → 31 + ln2·7/ln3 + ln2·1/ln4
        let expected = 31.0 + LN_2 * 7.0 / 3f64.ln() + LN_2 / 4f64.ln();
        assert!((ideal_dcg(&[1.0, 5.0, 3.0]) - expected).abs() < 1e-12);
        assert_eq!(ideal_dcg(&[]), 0.0);
    }

    #[test]
    fn softmax_is_shift_invariant_and_handles_large_scores() {
        let a = softmax(&[1.0, 2.0, 3.0], 2.0);
        let b = softmax(&[1001.0, 1002.0, 1003.0], 2.0);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
        assert!((a.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(a[2] > a[1] && a[1] > a[0]);
    }

    #[test]
    fn position_extremes() {
        assert_eq!(relaxed_position(5, 1.0), 1.0);
        assert_eq!(relaxed_position(5, 0.0), 5.0);
        assert_eq!(relaxed_position(1, 1.0), 1.0);
    }

    #[test]
    fn single_rating_context() {
        let ctx = RankContext::build(&[4.0], vec![0.3], 2.0).unwrap();
        assert_eq!(ctx.softmax(0), 1.0);
        assert_eq!(ctx.position(0), 1.0);
        // direct part vanishes at s = 1 and there is no cross part
        assert_eq!(ctx.item_term(0), 0.0);
        assert!((ctx.smoothed_ndcg(&[4.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_users_have_no_context() {
        assert!(RankContext::build(&[], vec![], 2.0).is_none());
        assert!(RankContext::build(&[0.0, 0.0], vec![1.0, 2.0], 2.0).is_none());
    }

    #[test]
    fn item_term_follows_the_smoothed_ndcg_slope() {
        let ratings = [5.0, 2.0, 3.0];
        let preds = vec![0.5, -0.2, 0.1];
        let beta = 2.0;
        let ctx = RankContext::build(&ratings, preds.clone(), beta).unwrap();
        let h = 1e-6;
        for p in 0..ratings.len() {
            let mut up = preds.clone();
            up[p] += h;
            let mut down = preds.clone();
            down[p] -= h;
            let ndcg = |x: Vec<f64>| RankContext::build(&ratings, x, beta).unwrap().smoothed_ndcg(&ratings);
            let slope = (ndcg(up) - ndcg(down)) / (2.0 * h);

            // same direction, comparable size
            let ratio = ctx.item_term(p) / slope;
            assert!((0.5..2.0).contains(&ratio), "pos {p}: ratio {ratio}");
        }

        let sum: f64 = (0..3).map(|p| ctx.gradient(p)).sum();
        assert!((ctx.gradient_sum() - sum).abs() < 1e-12);
    }
}
