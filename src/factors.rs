use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{NdcgMfError, Result};

/// Row-major `rows × width` matrix, one latent vector per row.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorMatrix {
    rows: usize,
    width: usize,
    data: Vec<f64>,
}

impl FactorMatrix {
    pub fn zeros(rows: usize, width: usize) -> Self {
        Self {
            rows,
            width,
            data: vec![0.0; rows * width],
        }
    }

    /// Independent uniform draws in `[low, high]`.
    pub fn uniform<R: Rng>(rows: usize, width: usize, low: f64, high: f64, rng: &mut R) -> Self {
        let data = (0..rows * width).map(|_| rng.random_range(low..=high)).collect();
        Self { rows, width, data }
    }

    pub fn from_vec(rows: usize, width: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * width {
            return Err(NdcgMfError::StateMismatch {
                what: "factor matrix",
                expected: rows * width,
                actual: data.len(),
            });
        }
        Ok(Self { rows, width, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.width..(r + 1) * self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.width..(r + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Bitwise equality, so NaN payloads and signed zeros count too.
    pub fn bit_identical(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.width == other.width
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Item factors and biases, double-buffered.
///
/// * `live` is written only by the item-update pass, each item unit touching
///   only its own row and bias.
/// * `committed` is the snapshot every pass reads and prediction uses. It is
///   only written by the commit pass, which copies `live` into it by value.
///
/// Right after a commit the two buffers are bit-identical.
#[derive(Debug, Clone)]
pub struct ItemBuffers {
    pub(crate) live: FactorMatrix,
    pub(crate) committed: FactorMatrix,
    pub(crate) live_bias: Option<Vec<f64>>,
    pub(crate) committed_bias: Option<Vec<f64>>,
}

impl ItemBuffers {
    fn new(factors: FactorMatrix, bias: Option<Vec<f64>>) -> Self {
        Self {
            committed: factors.clone(),
            live: factors,
            committed_bias: bias.clone(),
            live_bias: bias,
        }
    }

    pub fn committed(&self) -> &FactorMatrix {
        &self.committed
    }

    pub fn live(&self) -> &FactorMatrix {
        &self.live
    }

    pub fn committed_bias(&self) -> Option<&[f64]> {
        self.committed_bias.as_deref()
    }

    /// `true` when live and committed hold exactly the same values.
    pub fn is_synchronized(&self) -> bool {
        let bias_eq = match (&self.live_bias, &self.committed_bias) {
            (Some(a), Some(b)) => a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()),
            (None, None) => true,
            _ => false,
        };
        bias_eq && self.live.bit_identical(&self.committed)
    }
}

/// Every learned parameter of a model: user factors, optional user biases and
/// the double-buffered item side.
#[derive(Debug, Clone)]
pub struct LatentState {
    pub(crate) user_factors: FactorMatrix,
    pub(crate) user_bias: Option<Vec<f64>>,
    pub(crate) items: ItemBuffers,
}

impl LatentState {
    /// Uniform `[-1, 1]` initialization. Draw order: user factors, item factors,
    /// then (if enabled) user biases and item biases.
    pub fn random(
        n_users: usize,
        n_items: usize,
        num_factors: usize,
        biases: bool,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let user_factors = FactorMatrix::uniform(n_users, num_factors, -1.0, 1.0, &mut rng);
        let item_factors = FactorMatrix::uniform(n_items, num_factors, -1.0, 1.0, &mut rng);
        let (user_bias, item_bias) = if biases {
            let ub: Vec<f64> = (0..n_users).map(|_| rng.random_range(-1.0..=1.0)).collect();
            let ib: Vec<f64> = (0..n_items).map(|_| rng.random_range(-1.0..=1.0)).collect();
            (Some(ub), Some(ib))
        } else {
            (None, None)
        };
        Self {
            user_factors,
            user_bias,
            items: ItemBuffers::new(item_factors, item_bias),
        }
    }

    /// Assemble a state from existing parameters; both item buffers start from
    /// `item_factors`. Biases must be given for both sides or neither.
    pub fn from_parts(
        user_factors: FactorMatrix,
        user_bias: Option<Vec<f64>>,
        item_factors: FactorMatrix,
        item_bias: Option<Vec<f64>>,
    ) -> Result<Self> {
        if user_factors.width() != item_factors.width() {
            return Err(NdcgMfError::StateMismatch {
                what: "item factor width",
                expected: user_factors.width(),
                actual: item_factors.width(),
            });
        }
        if user_bias.is_some() != item_bias.is_some() {
            return Err(NdcgMfError::StateMismatch {
                what: "bias sides present",
                expected: 2,
                actual: 1,
            });
        }
        Ok(Self {
            user_factors,
            user_bias,
            items: ItemBuffers::new(item_factors, item_bias),
        })
    }

    /// Verify the state fits a registry/config before training touches it.
    pub(crate) fn check_shape(
        &self,
        n_users: usize,
        n_items: usize,
        num_factors: usize,
        biases: bool,
    ) -> Result<()> {
        let mismatch = |what: &'static str, expected: usize, actual: usize| -> Result<()> {
            Err(NdcgMfError::StateMismatch { what, expected, actual })
        };
        if self.user_factors.rows() != n_users {
            return mismatch("user factor rows", n_users, self.user_factors.rows());
        }
        let widths = [
            ("user factor width", &self.user_factors),
            ("live item width", &self.items.live),
            ("committed item width", &self.items.committed),
        ];
        for (what, m) in widths {
            if m.width() != num_factors {
                return mismatch(what, num_factors, m.width());
            }
        }
        for (what, m) in [("live item rows", &self.items.live), ("committed item rows", &self.items.committed)] {
            if m.rows() != n_items {
                return mismatch(what, n_items, m.rows());
            }
        }
        if biases {
            let lens = [
                ("user biases", self.user_bias.as_ref().map(Vec::len), n_users),
                ("live item biases", self.items.live_bias.as_ref().map(Vec::len), n_items),
                ("committed item biases", self.items.committed_bias.as_ref().map(Vec::len), n_items),
            ];
            for (what, len, expected) in lens {
                match len {
                    Some(l) if l == expected => {}
                    other => return mismatch(what, expected, other.unwrap_or(0)),
                }
            }
        }
        Ok(())
    }

    pub fn user_factors(&self) -> &FactorMatrix {
        &self.user_factors
    }

    /// Committed item factors.
    pub fn item_factors(&self) -> &FactorMatrix {
        &self.items.committed
    }

    pub fn items(&self) -> &ItemBuffers {
        &self.items
    }

    pub fn user_bias(&self) -> Option<&[f64]> {
        self.user_bias.as_deref()
    }

    /// Committed item biases.
    pub fn item_bias(&self) -> Option<&[f64]> {
        self.items.committed_bias.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_state_is_bounded_and_synchronized() {
        let s = LatentState::random(4, 5, 3, true, 11);
        assert_eq!(s.user_factors().rows(), 4);
        assert_eq!(s.item_factors().rows(), 5);
        assert!(s.user_factors().as_slice().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(s.item_bias().unwrap().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(s.user_bias().unwrap().len(), 4);
        assert!(s.items().is_synchronized());
        assert!(s.check_shape(4, 5, 3, true).is_ok());
    }

    #[test]
    fn same_seed_same_state() {
        let a = LatentState::random(3, 3, 2, true, 99);
        let b = LatentState::random(3, 3, 2, true, 99);
        let c = LatentState::random(3, 3, 2, true, 100);
        assert!(a.user_factors().bit_identical(b.user_factors()));
        assert!(a.item_factors().bit_identical(b.item_factors()));
        assert!(!a.user_factors().bit_identical(c.user_factors()));
    }

    #[test]
    fn biases_absent_when_disabled() {
        let s = LatentState::random(2, 2, 2, false, 1);
        assert!(s.user_bias().is_none());
        assert!(s.item_bias().is_none());
        assert!(s.check_shape(2, 2, 2, false).is_ok());
        assert!(matches!(
            s.check_shape(2, 2, 2, true),
            Err(NdcgMfError::StateMismatch { what: "user biases", .. })
        ));
    }

    #[test]
    fn shape_check_names_the_buffer() {
        let s = LatentState::random(2, 3, 4, false, 1);
        let err = s.check_shape(2, 3, 5, false).unwrap_err();
        assert!(matches!(err, NdcgMfError::StateMismatch { what: "user factor width", expected: 5, actual: 4 }));
        let err = s.check_shape(2, 4, 4, false).unwrap_err();
        assert!(matches!(err, NdcgMfError::StateMismatch { what: "live item rows", .. }));
    }

    #[test]
    fn from_parts_validates() {
        let uf = FactorMatrix::zeros(2, 3);
        let itf = FactorMatrix::zeros(4, 2);
        assert!(LatentState::from_parts(uf.clone(), None, itf, None).is_err());
        let itf = FactorMatrix::zeros(4, 3);
        assert!(LatentState::from_parts(uf.clone(), Some(vec![0.0; 2]), itf.clone(), None).is_err());
        let s = LatentState::from_parts(uf, None, itf, None).unwrap();
        assert!(s.items().is_synchronized());
        assert!(FactorMatrix::from_vec(2, 2, vec![1.0; 3]).is_err());
    }
}
