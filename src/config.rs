use serde::{Deserialize, Serialize};

use crate::error::{NdcgMfError, Result};

pub const DEFAULT_LAMBDA: f64 = 0.1;
pub const DEFAULT_GAMMA: f64 = 0.01;
pub const DEFAULT_BETA: f64 = 2.0;

/// Hyperparameters of an NDCG-MF model. Immutable once a model is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdcgMfConfig {
    /// Latent factors per user/item.
    pub num_factors: usize,
    /// Training iterations run by each `train()` call.
    pub num_iters: usize,
    /// Regularization weight.
    pub lambda: f64,
    /// Step size.
    pub gamma: f64,
    /// Softmax temperature.
    pub beta: f64,
    /// Enable user/item bias terms.
    pub biases: bool,
    /// Seed for factor initialization. `None` draws one from the thread RNG.
    pub seed: Option<u64>,
    /// Run passes on worker threads.
    pub parallel: bool,
    /// Dedicated pool size. `None` uses rayon's global pool.
    pub num_threads: Option<usize>,
}

impl Default for NdcgMfConfig {
    fn default() -> Self {
        Self {
            num_factors: 6,
            num_iters: 50,
            lambda: DEFAULT_LAMBDA,
            gamma: DEFAULT_GAMMA,
            beta: DEFAULT_BETA,
            biases: true,
            seed: None,
            parallel: true,
            num_threads: None,
        }
    }
}

impl NdcgMfConfig {
    pub fn new(num_factors: usize, num_iters: usize) -> Self {
        Self {
            num_factors,
            num_iters,
            ..Self::default()
        }
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_biases(mut self, biases: bool) -> Self {
        self.biases = biases;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Check every hyperparameter, reporting the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.num_factors == 0 {
            return Err(NdcgMfError::invalid("num_factors", self.num_factors, "must be > 0"));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(NdcgMfError::invalid("lambda", self.lambda, "must be finite and >= 0"));
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(NdcgMfError::invalid("gamma", self.gamma, "must be finite and > 0"));
        }
        if !self.beta.is_finite() || self.beta <= 0.0 {
            return Err(NdcgMfError::invalid("beta", self.beta, "must be finite and > 0"));
        }
        if self.num_threads == Some(0) {
            return Err(NdcgMfError::invalid("num_threads", 0, "must be > 0 when set"));
        }
        Ok(())
    }
}
