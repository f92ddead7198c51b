//! Error types for NDCG-MF training.

use std::fmt;

use thiserror::Error;

/// Training phase a failure was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Item-factor update pass (writes the live item buffer).
    ItemUpdate,
    /// User-factor update pass.
    UserUpdate,
    /// Live-to-committed copy of the item buffer.
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ItemUpdate => "item update",
            Phase::UserUpdate => "user update",
            Phase::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Errors raised while building a registry, configuring or training a model.
#[derive(Debug, Error)]
pub enum NdcgMfError {
    /// Hyperparameter outside its valid range.
    #[error("invalid hyperparameter {param} = {value}: {constraint}")]
    InvalidHyperparameter {
        /// Parameter name
        param: &'static str,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: &'static str,
    },

    /// No ratings were supplied to the registry.
    #[error("registry has no ratings")]
    EmptyRegistry,

    /// The same (user, item) pair was rated twice.
    #[error("duplicate rating for user code {user}, item code {item}")]
    DuplicateRating {
        /// User code
        user: u64,
        /// Item code
        item: u64,
    },

    /// A rating value is NaN or infinite.
    #[error("non-finite rating for user code {user}, item code {item}")]
    NonFiniteRating {
        /// User code
        user: u64,
        /// Item code
        item: u64,
    },

    /// User or item index past the end of the registry.
    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// "user" or "item"
        kind: &'static str,
        /// Requested index
        index: usize,
        /// Number of entities
        len: usize,
    },

    /// Latent state missing or shaped differently from the registry/config.
    #[error("latent state mismatch for {what}: expected {expected}, got {actual}")]
    StateMismatch {
        /// Which buffer failed the check
        what: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// A pass produced NaN or infinite factors.
    #[error("non-finite values after {phase} pass in iteration {iteration}")]
    NonFinite {
        /// Phase that produced the values
        phase: Phase,
        /// 1-based iteration number
        iteration: usize,
    },

    /// A previous `train()` failed; the factors can no longer be trusted.
    #[error("model invalidated by a failed training run; rebuild it from scratch")]
    ModelInvalidated,

    /// The dispatcher could not start its worker pool.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl NdcgMfError {
    pub(crate) fn invalid(param: &'static str, value: impl fmt::Display, constraint: &'static str) -> Self {
        Self::InvalidHyperparameter {
            param,
            value: value.to_string(),
            constraint,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NdcgMfError>;
