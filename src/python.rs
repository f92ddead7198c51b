use numpy::{
    IntoPyArray, PyArray1, PyArray2, PyArrayMethods, PyReadonlyArray1, PyReadonlyArray2,
    PyUntypedArrayMethods,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::NdcgMfConfig;
use crate::error::NdcgMfError;
use crate::ndcgmf::{dot, top_n, NdcgMf};
use crate::registry::{csr_row_span, Registry};

fn to_py(e: NdcgMfError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

struct Fitted {
    user_factors: Vec<f64>,
    item_factors: Vec<f64>,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    global_mean: f64,
}

/// Users and items are identified by their CSR row/column index.
fn fit_csr(
    indptr: &[i64],
    indices: &[i32],
    data: &[f64],
    n_users: usize,
    n_items: usize,
    config: NdcgMfConfig,
) -> Result<Fitted, NdcgMfError> {
    let mut triples = Vec::with_capacity(data.len());
    for u in 0..n_users {
        for idx in indptr[u] as usize..indptr[u + 1] as usize {
            triples.push((u as u64, indices[idx] as u64, data[idx]));
        }
    }
    let registry = Registry::from_parts(0..n_users as u64, 0..n_items as u64, triples)?;
    let mut model = NdcgMf::new(&registry, config)?;
    model.train()?;

    let global_mean = registry.rating_average();
    let state = model.into_state();
    Ok(Fitted {
        user_bias: state.user_bias().map_or_else(|| vec![0.0; n_users], <[f64]>::to_vec),
        item_bias: state.item_bias().map_or_else(|| vec![0.0; n_items], <[f64]>::to_vec),
        user_factors: state.user_factors().as_slice().to_vec(),
        item_factors: state.item_factors().as_slice().to_vec(),
        global_mean,
    })
}

#[pyfunction]
#[pyo3(signature = (indptr, indices, data, n_users, n_items, factors, iterations, regularization=0.1, learning_rate=0.01, beta=2.0, biases=true, seed=None, parallel=true))]
pub fn ndcgmf_fit<'py>(
    py: Python<'py>,
    indptr: PyReadonlyArray1<i64>,
    indices: PyReadonlyArray1<i32>,
    data: PyReadonlyArray1<f64>,
    n_users: usize,
    n_items: usize,
    factors: usize,
    iterations: usize,
    regularization: f64,
    learning_rate: f64,
    beta: f64,
    biases: bool,
    seed: Option<u64>,
    parallel: bool,
) -> PyResult<(
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray2<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    f64,
)> {
    let ip = indptr.as_slice()?;
    let ix = indices.as_slice()?;
    let id = data.as_slice()?;
    let well_formed = ip.len() == n_users + 1
        && ip[0] == 0
        && ip.windows(2).all(|w| w[0] <= w[1])
        && ip[n_users] as usize == ix.len()
        && ix.len() == id.len();
    if !well_formed {
        return Err(PyValueError::new_err("indptr/indices/data do not describe an n_users CSR matrix"));
    }
    if ix.iter().any(|&i| i < 0 || i as usize >= n_items) {
        return Err(PyValueError::new_err("item index out of range"));
    }

    let mut config = NdcgMfConfig::new(factors, iterations)
        .with_lambda(regularization)
        .with_gamma(learning_rate)
        .with_beta(beta)
        .with_biases(biases)
        .with_parallel(parallel);
    if let Some(s) = seed {
        config = config.with_seed(s);
    }

    let fitted = py.detach(|| fit_csr(ip, ix, id, n_users, n_items, config)).map_err(to_py)?;

    let ua = PyArray1::from_vec(py, fitted.user_factors).reshape([n_users, factors])?;
    let ia = PyArray1::from_vec(py, fitted.item_factors).reshape([n_items, factors])?;
    Ok((
        ua,
        ia,
        fitted.user_bias.into_pyarray(py),
        fitted.item_bias.into_pyarray(py),
        fitted.global_mean,
    ))
}

#[pyfunction]
#[pyo3(signature = (user_factors, item_factors, user_bias, item_bias, global_mean, user_id, n, exclude_indptr, exclude_indices))]
pub fn ndcgmf_recommend_items<'py>(
    py: Python<'py>,
    user_factors: PyReadonlyArray2<f64>,
    item_factors: PyReadonlyArray2<f64>,
    user_bias: Option<PyReadonlyArray1<f64>>,
    item_bias: Option<PyReadonlyArray1<f64>>,
    global_mean: f64,
    user_id: usize,
    n: usize,
    exclude_indptr: PyReadonlyArray1<i64>,
    exclude_indices: PyReadonlyArray1<i32>,
) -> PyResult<(Bound<'py, PyArray1<i64>>, Bound<'py, PyArray1<f64>>)> {
    let uf = user_factors.as_slice()?;
    let itf = item_factors.as_slice()?;
    let k = user_factors.shape()[1];
    let n_users = user_factors.shape()[0];
    let n_items = item_factors.shape()[0];
    if user_id >= n_users || item_factors.shape()[1] != k {
        return Err(PyValueError::new_err("user_id or factor shapes out of range"));
    }
    let ep = exclude_indptr.as_slice()?;
    let ex = exclude_indices.as_slice()?;
    let excluded = csr_row_span(ep, user_id, ex.len())
        .map(|span| &ex[span])
        .ok_or_else(|| PyValueError::new_err("exclude_indptr does not match exclude_indices"))?;

    let (base, ib) = match (&user_bias, &item_bias) {
        (Some(bu), Some(bi)) => {
            let (bu, bi) = (bu.as_slice()?, bi.as_slice()?);
            if bu.len() != n_users || bi.len() != n_items {
                return Err(PyValueError::new_err("bias lengths do not match the factor matrices"));
            }
            (global_mean + bu[user_id], Some(bi))
        }
        _ => (0.0, None),
    };

    let pu = &uf[user_id * k..(user_id + 1) * k];
    let scored: Vec<(f64, usize)> = (0..n_items)
        .filter(|&i| !excluded.contains(&(i as i32)))
        .map(|i| {
            let b = ib.map_or(0.0, |bi| bi[i]);
            (base + b + dot(pu, &itf[i * k..(i + 1) * k]), i)
        })
        .collect();

    let (ids, scores): (Vec<i64>, Vec<f64>) = top_n(scored, n)
        .into_iter()
        .map(|(i, s)| (i as i64, s))
        .unzip();
    Ok((ids.into_pyarray(py), scores.into_pyarray(py)))
}
