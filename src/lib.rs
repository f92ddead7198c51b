//! Rank-aware matrix factorization for collaborative filtering.
//!
//! `NdcgMf` learns user and item latent vectors by gradient steps on a smoothed
//! NDCG surrogate: each user's rated items are softly ranked with a softmax
//! over predicted scores, and the factors move to push highly rated items to
//! the top of that soft ranking.
//!
//! ```no_run
//! use ndcgmf::{NdcgMf, NdcgMfConfig, Registry};
//!
//! let registry = Registry::from_ratings(vec![(1, 10, 5.0), (1, 20, 2.0), (2, 10, 4.0)])?;
//! let mut model = NdcgMf::new(&registry, NdcgMfConfig::new(6, 50).with_seed(42))?;
//! model.train()?;
//! let top = model.recommend(0, 5, true);
//! # let _ = top;
//! # Ok::<(), ndcgmf::NdcgMfError>(())
//! ```

#[cfg(feature = "python")]
use mimalloc::MiMalloc;

#[cfg(feature = "python")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod factors;
pub mod metrics;
pub mod model;
pub mod ndcgmf;
pub mod rank;
pub mod registry;

#[cfg(feature = "python")]
mod python;

pub use config::NdcgMfConfig;
pub use dispatch::Dispatcher;
pub use error::{NdcgMfError, Phase, Result};
pub use factors::{FactorMatrix, ItemBuffers, LatentState};
pub use model::FactorizationModel;
pub use ndcgmf::{IterationStats, NdcgMf, TrainingState};
pub use rank::RankContext;
pub use registry::{EntityRatings, Registry};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _ndcgmf(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(python::ndcgmf_fit, m)?)?;
    m.add_function(wrap_pyfunction!(python::ndcgmf_recommend_items, m)?)?;
    Ok(())
}
