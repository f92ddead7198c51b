//! Work-partitioned pass runner.
//!
//! Every pass is a set of independent units, one per user or item index. A unit
//! may only write the row it was handed; everything else it reads must be
//! immutable for the duration of the pass. Each call returns once every unit
//! has finished, so consecutive calls are separated by a full barrier.

use rayon::prelude::*;

use crate::error::{NdcgMfError, Result};

pub struct Dispatcher {
    parallel: bool,
    pool: Option<rayon::ThreadPool>,
}

impl Dispatcher {
    /// `num_threads = None` runs on rayon's global pool.
    pub fn new(parallel: bool, num_threads: Option<usize>) -> Result<Self> {
        let pool = match (parallel, num_threads) {
            (true, Some(n)) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("ndcgmf-worker-{i}"))
                    .build()
                    .map_err(|e| NdcgMfError::ThreadPool(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self { parallel, pool })
    }

    pub fn sequential() -> Self {
        Self {
            parallel: false,
            pool: None,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Worker count a parallel pass fans out to.
    pub fn num_workers(&self) -> usize {
        match (&self.pool, self.parallel) {
            (_, false) => 1,
            (Some(pool), true) => pool.current_num_threads(),
            (None, true) => rayon::current_num_threads(),
        }
    }

    fn install<R, OP>(&self, op: OP) -> R
    where
        R: Send,
        OP: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Run `unit(row_index, row)` once for every `width`-wide row of `buffer`.
    /// Results come back in row order regardless of scheduling.
    pub fn for_each_row<T, F>(&self, buffer: &mut [f64], width: usize, unit: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, &mut [f64]) -> T + Sync + Send,
    {
        debug_assert!(width > 0 && buffer.len() % width == 0);
        if self.parallel {
            self.install(|| {
                buffer
                    .par_chunks_mut(width)
                    .enumerate()
                    .map(|(idx, row)| unit(idx, row))
                    .collect()
            })
        } else {
            buffer
                .chunks_mut(width)
                .enumerate()
                .map(|(idx, row)| unit(idx, row))
                .collect()
        }
    }

    /// Run `unit(index)` for every index in `0..n`, collecting results in index order.
    pub fn map_range<T, F>(&self, n: usize, unit: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        if self.parallel {
            self.install(|| (0..n).into_par_iter().map(&unit).collect())
        } else {
            (0..n).map(unit).collect()
        }
    }

    /// `true` if every value in `buffer` is finite.
    pub fn all_finite(&self, buffer: &[f64]) -> bool {
        if self.parallel {
            self.install(|| buffer.par_iter().all(|v| v.is_finite()))
        } else {
            buffer.iter().all(|v| v.is_finite())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_owned_by_their_unit() {
        for d in [Dispatcher::sequential(), Dispatcher::new(true, Some(3)).unwrap()] {
            let mut buf = vec![0.0; 12];
            let sums = d.for_each_row(&mut buf, 3, |idx, row| {
                for (k, v) in row.iter_mut().enumerate() {
                    *v = (idx * 10 + k) as f64;
                }
                row.iter().sum::<f64>()
            });
            assert_eq!(buf[..3], [0.0, 1.0, 2.0]);
            assert_eq!(buf[9..], [30.0, 31.0, 32.0]);
            assert_eq!(sums, vec![3.0, 33.0, 63.0, 93.0]);
        }
    }

    #[test]
    fn map_range_keeps_index_order() {
        let d = Dispatcher::new(true, None).unwrap();
        let out = d.map_range(100, |i| i * i);
        assert_eq!(out.len(), 100);
        assert!(out.iter().enumerate().all(|(i, &v)| v == i * i));
        assert!(d.map_range(0, |i| i).is_empty());
    }

    #[test]
    fn finite_check() {
        let d = Dispatcher::sequential();
        assert!(d.all_finite(&[1.0, -2.0]));
        assert!(!d.all_finite(&[1.0, f64::NAN]));
        assert!(!Dispatcher::new(true, Some(2)).unwrap().all_finite(&[f64::INFINITY]));
    }

    #[test]
    fn worker_counts() {
        assert_eq!(Dispatcher::sequential().num_workers(), 1);
        assert_eq!(Dispatcher::new(true, Some(2)).unwrap().num_workers(), 2);
        assert!(!Dispatcher::new(false, Some(4)).unwrap().is_parallel());
    }
}
