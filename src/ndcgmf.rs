//! NDCG-MF: matrix factorization trained on a smoothed NDCG surrogate.
//!
//! Each iteration runs three barrier-separated passes:
//!
//! 1. **Item update**: one unit per item writes that item's row of the *live*
//!    item buffer (and its live bias).
//! 2. **User update**: one unit per user writes that user's factors and bias.
//! 3. **Commit**: one unit per item copies its live row into the *committed*
//!    buffer.
//!
//! Cross-entity reads (other items' factors, softmax values, predictions)
//! only ever see the committed buffer and the per-user [`RankContext`] taken at
//! the start of the iteration, so results do not depend on how the
//! dispatcher schedules units.

use std::f64::consts::LN_2;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::config::NdcgMfConfig;
use crate::dispatch::Dispatcher;
use crate::error::{NdcgMfError, Phase, Result};
use crate::factors::LatentState;
use crate::model::FactorizationModel;
use crate::rank::RankContext;
use crate::registry::Registry;

// ── 4-wide unrolled dot / axpy ─────────────────────────────────────────────
#[inline(always)]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    let (mut s0, mut s1, mut s2, mut s3) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    let mut ca = a.chunks_exact(4);
    let mut cb = b.chunks_exact(4);
    for (x, y) in (&mut ca).zip(&mut cb) {
        s0 += x[0] * y[0];
        s1 += x[1] * y[1];
        s2 += x[2] * y[2];
        s3 += x[3] * y[3];
    }
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        s0 += x * y;
    }
    (s0 + s1) + (s2 + s3)
}

#[inline(always)]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// Highest-scoring `n` entries, best first; equal scores keep index order.
pub(crate) fn top_n(mut scored: Vec<(f64, usize)>, n: usize) -> Vec<(usize, f64)> {
    let take = n.min(scored.len());
    if take == 0 {
        return Vec::new();
    }
    let order = |a: &(f64, usize), b: &(f64, usize)| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1));
    scored.select_nth_unstable_by(take - 1, order);
    scored.truncate(take);
    scored.sort_unstable_by(order);
    scored.into_iter().map(|(s, i)| (i, s)).collect()
}

/// Where a model is in its `Idle → Iterating → Done` lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Idle,
    Iterating { iteration: usize },
    Done,
    /// A pass produced unusable values; the model must be rebuilt.
    Failed,
}

/// Per-iteration training record.
#[derive(Debug, Clone)]
pub struct IterationStats {
    pub iteration: usize,
    /// Mean smoothed NDCG over non-degenerate users, measured on the state the
    /// iteration started from.
    pub smoothed_ndcg: f64,
    pub skipped_users: usize,
    pub skipped_items: usize,
    pub elapsed: Duration,
}

/// Rank-sensitive factorization engine.
///
/// Ratings come from a borrowed [`Registry`]. The engine owns the
/// [`LatentState`] and hands it back through [`NdcgMf::into_state`].
pub struct NdcgMf<'a> {
    registry: &'a Registry,
    config: NdcgMfConfig,
    seed: u64,
    state: LatentState,
    dispatcher: Dispatcher,
    training: TrainingState,
    iterations_run: usize,
    history: Vec<IterationStats>,
}

impl<'a> NdcgMf<'a> {
    /// Validate `config` and draw a fresh random state for every user and item.
    pub fn new(registry: &'a Registry, config: NdcgMfConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let state = LatentState::random(
            registry.num_users(),
            registry.num_items(),
            config.num_factors,
            config.biases,
            seed,
        );
        Self::assemble(registry, config, seed, state)
    }

    /// Continue from an existing state. Fails if any buffer is missing or
    /// shaped differently from `registry` and `config`.
    pub fn with_state(registry: &'a Registry, config: NdcgMfConfig, state: LatentState) -> Result<Self> {
        config.validate()?;
        state.check_shape(
            registry.num_users(),
            registry.num_items(),
            config.num_factors,
            config.biases,
        )?;
        let seed = config.seed.unwrap_or(0);
        Self::assemble(registry, config, seed, state)
    }

    fn assemble(registry: &'a Registry, config: NdcgMfConfig, seed: u64, state: LatentState) -> Result<Self> {
        let dispatcher = Dispatcher::new(config.parallel, config.num_threads)?;
        Ok(Self {
            registry,
            config,
            seed,
            state,
            dispatcher,
            training: TrainingState::Idle,
            iterations_run: 0,
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &NdcgMfConfig {
        &self.config
    }

    /// Seed the initial factors were drawn with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn state(&self) -> &LatentState {
        &self.state
    }

    pub fn into_state(self) -> LatentState {
        self.state
    }

    pub fn training_state(&self) -> TrainingState {
        self.training
    }

    pub fn iterations_run(&self) -> usize {
        self.iterations_run
    }

    pub fn history(&self) -> &[IterationStats] {
        &self.history
    }

    /// Run `num_iters` iterations. From `Done` this continues from the current
    /// factors; from `Failed` it refuses to run.
    pub fn train(&mut self) -> Result<()> {
        if self.training == TrainingState::Failed {
            return Err(NdcgMfError::ModelInvalidated);
        }

        info!(
            users = self.registry.num_users(),
            items = self.registry.num_items(),
            ratings = self.registry.num_ratings(),
            factors = self.config.num_factors,
            lambda = self.config.lambda,
            gamma = self.config.gamma,
            beta = self.config.beta,
            biases = self.config.biases,
            seed = self.seed,
            workers = self.dispatcher.num_workers(),
            "training NDCG-MF"
        );
        let started = Instant::now();

        for _ in 0..self.config.num_iters {
            let iteration = self.iterations_run + 1;
            self.training = TrainingState::Iterating { iteration };
            let stats = match self.run_iteration(iteration) {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(iteration, error = %err, "training aborted");
                    self.training = TrainingState::Failed;
                    return Err(err);
                }
            };
            debug!(
                iteration,
                smoothed_ndcg = stats.smoothed_ndcg,
                skipped_users = stats.skipped_users,
                skipped_items = stats.skipped_items,
                elapsed_ms = stats.elapsed.as_secs_f64() * 1e3,
                "iteration done"
            );
            if iteration % 10 == 0 {
                info!(iteration, smoothed_ndcg = stats.smoothed_ndcg, "progress");
            }
            self.history.push(stats);
            self.iterations_run = iteration;
        }

        self.training = TrainingState::Done;
        info!(
            iterations = self.iterations_run,
            total_s = started.elapsed().as_secs_f64(),
            "training finished"
        );
        Ok(())
    }

    /// One full `ItemUpdate → UserUpdate → Commit` sequence.
    pub(crate) fn run_iteration(&mut self, iteration: usize) -> Result<IterationStats> {
        let started = Instant::now();

        let contexts = self.rank_snapshot();
        let (ndcg_sum, scored) = contexts
            .iter()
            .enumerate()
            .filter_map(|(u, c)| c.as_ref().map(|c| c.smoothed_ndcg(self.registry.user(u).ratings)))
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let smoothed_ndcg = if scored > 0 { ndcg_sum / scored as f64 } else { 0.0 };
        let skipped_users = contexts.len() - scored;

        let t = Instant::now();
        let skipped_items = self.update_items(&contexts);
        self.ensure_finite(Phase::ItemUpdate, iteration)?;
        trace!(iteration, phase = %Phase::ItemUpdate, elapsed_us = t.elapsed().as_micros() as u64, "phase done");

        let t = Instant::now();
        self.update_users(&contexts);
        self.ensure_finite(Phase::UserUpdate, iteration)?;
        trace!(iteration, phase = %Phase::UserUpdate, elapsed_us = t.elapsed().as_micros() as u64, "phase done");

        let t = Instant::now();
        self.commit();
        trace!(iteration, phase = %Phase::Commit, elapsed_us = t.elapsed().as_micros() as u64, "phase done");

        Ok(IterationStats {
            iteration,
            smoothed_ndcg,
            skipped_users,
            skipped_items,
            elapsed: started.elapsed(),
        })
    }

    fn ensure_finite(&self, phase: Phase, iteration: usize) -> Result<()> {
        let d = &self.dispatcher;
        let ok = match phase {
            Phase::ItemUpdate => {
                d.all_finite(self.state.items.live.as_slice())
                    && self.state.items.live_bias.as_deref().map_or(true, |b| d.all_finite(b))
            }
            Phase::UserUpdate => {
                d.all_finite(self.state.user_factors.as_slice())
                    && self.state.user_bias.as_deref().map_or(true, |b| d.all_finite(b))
            }
            Phase::Commit => true,
        };
        if ok {
            Ok(())
        } else {
            warn!(iteration, phase = %phase, "non-finite factors");
            Err(NdcgMfError::NonFinite { phase, iteration })
        }
    }

    /// Softmax, gradients and predictions for every user, from the user
    /// factors and the committed item buffer. `None` marks a degenerate user.
    pub(crate) fn rank_snapshot(&self) -> Vec<Option<RankContext>> {
        self.dispatcher
            .map_range(self.registry.num_users(), |u| self.rank_context(u))
    }

    fn rank_context(&self, u: usize) -> Option<RankContext> {
        let user = self.registry.user(u);
        let predictions = user.partners.iter().map(|&i| self.score(u, i as usize)).collect();
        RankContext::build(user.ratings, predictions, self.config.beta)
    }

    /// Item pass: for item `i`, every rater `v` moves the live row along
    /// `p_v` by `β·ln2·(|R(v)|−1)·γ` times the rater's item term, which raises
    /// `v`'s smoothed NDCG; then the row decays by `γ·λ·q_i(committed)`.
    /// Returns the number of skipped (unrated) items.
    pub(crate) fn update_items(&mut self, contexts: &[Option<RankContext>]) -> usize {
        let registry = self.registry;
        let cfg = &self.config;
        let k = cfg.num_factors;
        let user_factors = &self.state.user_factors;
        let items = &mut self.state.items;
        let committed = &items.committed;

        let residuals: Vec<Option<f64>> = self.dispatcher.for_each_row(items.live.as_mut_slice(), k, |i, q_live| {
            let item = registry.item(i);
            if item.num_ratings() == 0 {
                return None;
            }
            let mut residual = 0.0;
            for (v, rating) in item.iter() {
                let Some(ctx) = contexts[v].as_ref() else {
                    continue;
                };
                // the rater's list is sorted by item index
                let Some(pos) = registry.user(v).position_of(i) else {
                    continue;
                };
                let scale = cfg.beta * LN_2 * (ctx.len() as f64 - 1.0) * cfg.gamma;
                axpy(scale * ctx.item_term(pos), user_factors.row(v), q_live);
                residual += rating - ctx.prediction(pos);
            }
            axpy(-cfg.gamma * cfg.lambda, committed.row(i), q_live);
            Some(residual)
        });

        if let (true, Some(live_bias), Some(committed_bias)) =
            (cfg.biases, items.live_bias.as_mut(), items.committed_bias.as_ref())
        {
            for ((b, &bc), r) in live_bias.iter_mut().zip(committed_bias).zip(&residuals) {
                if let Some(residual) = *r {
                    *b += cfg.gamma * (residual - cfg.lambda * bc);
                }
            }
        }

        residuals.iter().filter(|r| r.is_none()).count()
    }

    /// User pass: `p_u += γ·β·(|R(u)|−1)·ln2 · Σ_i g(u,i)·(q_i − Σ_j s_j q_j) − γ·λ·p_u`,
    /// an ascent step on the smoothed NDCG, all item vectors taken from the
    /// committed buffer.
    pub(crate) fn update_users(&mut self, contexts: &[Option<RankContext>]) {
        let registry = self.registry;
        let cfg = &self.config;
        let k = cfg.num_factors;
        let committed = &self.state.items.committed;

        let residuals: Vec<Option<f64>> =
            self.dispatcher
                .for_each_row(self.state.user_factors.as_mut_slice(), k, |u, p_u| {
                    let ctx = contexts[u].as_ref()?;
                    let user = registry.user(u);

                    // softmax-weighted mean of the rated items; q_i minus this
                    // is (1 − s_i)·q_i − Σ_{j≠i} s_j·q_j
                    let mut expected = vec![0.0; k];
                    for (pos, (i, _)) in user.iter().enumerate() {
                        axpy(ctx.softmax(pos), committed.row(i), &mut expected);
                    }

                    let mut grad = vec![0.0; k];
                    let mut residual = 0.0;
                    for (pos, (i, rating)) in user.iter().enumerate() {
                        let g = ctx.gradient(pos);
                        for ((acc, &q), &m) in grad.iter_mut().zip(committed.row(i)).zip(&expected) {
                            *acc += g * (q - m);
                        }
                        residual += rating - ctx.prediction(pos);
                    }

                    let scale = cfg.gamma * cfg.beta * (ctx.len() as f64 - 1.0) * LN_2;
                    let decay = cfg.gamma * cfg.lambda;
                    for (p, &acc) in p_u.iter_mut().zip(&grad) {
                        let shrink = decay * *p;
                        *p += scale * acc - shrink;
                    }
                    Some(residual)
                });

        if let (true, Some(user_bias)) = (cfg.biases, self.state.user_bias.as_mut()) {
            for (b, r) in user_bias.iter_mut().zip(&residuals) {
                if let Some(residual) = *r {
                    let decay = cfg.lambda * *b;
                    *b += cfg.gamma * (residual - decay);
                }
            }
        }
    }

    /// Copy every live item row and bias into the committed buffer, by value.
    pub(crate) fn commit(&mut self) {
        let k = self.config.num_factors;
        let items = &mut self.state.items;
        let live = &items.live;
        self.dispatcher
            .for_each_row(items.committed.as_mut_slice(), k, |i, row| row.copy_from_slice(live.row(i)));
        if let (Some(live_bias), Some(committed_bias)) = (items.live_bias.as_ref(), items.committed_bias.as_mut()) {
            committed_bias.copy_from_slice(live_bias);
        }
    }

    #[inline]
    fn score(&self, u: usize, i: usize) -> f64 {
        let d = dot(self.state.user_factors.row(u), self.state.items.committed.row(i));
        match (self.config.biases, &self.state.user_bias, &self.state.items.committed_bias) {
            (true, Some(bu), Some(bi)) => self.registry.rating_average() + bu[u] + bi[i] + d,
            _ => d,
        }
    }

    /// Predicted rating from the committed item buffer. Panics on an
    /// out-of-range index; see [`NdcgMf::try_predict`].
    pub fn predict(&self, user: usize, item: usize) -> f64 {
        self.score(user, item)
    }

    pub fn try_predict(&self, user: usize, item: usize) -> Result<f64> {
        self.registry.check_user(user)?;
        self.registry.check_item(item)?;
        Ok(self.score(user, item))
    }

    pub fn user_factors(&self, user: usize) -> &[f64] {
        self.state.user_factors.row(user)
    }

    /// Committed factors of `item`.
    pub fn item_factors(&self, item: usize) -> &[f64] {
        self.state.items.committed.row(item)
    }

    /// `None` when biases are disabled.
    pub fn user_bias(&self, user: usize) -> Option<f64> {
        if !self.config.biases {
            return None;
        }
        self.state.user_bias.as_ref().map(|b| b[user])
    }

    /// Committed bias of `item`; `None` when biases are disabled.
    pub fn item_bias(&self, item: usize) -> Option<f64> {
        if !self.config.biases {
            return None;
        }
        self.state.items.committed_bias.as_ref().map(|b| b[item])
    }

    /// Probability that `item` ranks first among `user`'s rated items.
    /// `None` if `user` did not rate `item` or is degenerate.
    pub fn softmax(&self, user: usize, item: usize) -> Option<f64> {
        let pos = self.registry.user(user).position_of(item)?;
        self.rank_context(user).map(|c| c.softmax(pos))
    }

    /// Relaxed rank of `item` among `user`'s rated items, in `[1, |R(user)|]`.
    pub fn position(&self, user: usize, item: usize) -> Option<f64> {
        let pos = self.registry.user(user).position_of(item)?;
        self.rank_context(user).map(|c| c.position(pos))
    }

    /// Ideal DCG of `user`'s ratings; `None` for a degenerate user.
    pub fn idcg(&self, user: usize) -> Option<f64> {
        self.rank_context(user).map(|c| c.idcg())
    }

    /// Top `n` items for `user` by predicted rating, best first.
    pub fn recommend(&self, user: usize, n: usize, exclude_rated: bool) -> Vec<(usize, f64)> {
        let rated = self.registry.user(user);
        let scored: Vec<(f64, usize)> = (0..self.registry.num_items())
            .filter(|&i| !(exclude_rated && rated.position_of(i).is_some()))
            .map(|i| (self.score(user, i), i))
            .collect();
        top_n(scored, n)
    }
}

impl FactorizationModel for NdcgMf<'_> {
    fn train(&mut self) -> Result<()> {
        NdcgMf::train(self)
    }

    fn predict(&self, user: usize, item: usize) -> f64 {
        NdcgMf::predict(self, user, item)
    }

    fn user_factors(&self, user: usize) -> &[f64] {
        NdcgMf::user_factors(self, user)
    }

    fn item_factors(&self, item: usize) -> &[f64] {
        NdcgMf::item_factors(self, item)
    }

    fn num_factors(&self) -> usize {
        self.config.num_factors
    }

    fn lambda(&self) -> f64 {
        self.config.lambda
    }

    fn gamma(&self) -> f64 {
        self.config.gamma
    }
}
