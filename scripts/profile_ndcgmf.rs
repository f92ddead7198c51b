use std::collections::BTreeMap;
use std::time::Instant;

use ndcgmf::metrics::{mae, ndcg_at_k, precision_at, TestRating};
use ndcgmf::{NdcgMf, NdcgMfConfig, Registry};
use tracing_subscriber::EnvFilter;

/// Mean NDCG@k of unseen-item recommendations against test items rated >= 4.
fn mean_ndcg(model: &NdcgMf<'_>, test: &[TestRating], k: usize) -> f64 {
    let mut relevant: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &(u, i, r) in test {
        if r >= 4.0 {
            relevant.entry(u).or_default().push(i);
        }
    }
    let total: f64 = relevant
        .iter()
        .map(|(&u, items)| {
            let ranked: Vec<usize> = model.recommend(u, k, true).into_iter().map(|(i, _)| i).collect();
            ndcg_at_k(items, &ranked, k)
        })
        .sum();
    total / relevant.len().max(1) as f64
}

fn main() -> ndcgmf::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let n_users = 5_000u64;
    let n_items = 2_000u64;
    let k = 16;
    let nnz_per_user = 40u64;

    let mut train = Vec::with_capacity((n_users * nnz_per_user) as usize);
    let mut test: Vec<(u64, u64, f64)> = Vec::new();
    for u in 0..n_users {
        for j in 0..nnz_per_user {
            let i = (u + j * 97) % n_items;
            let rating = (1 + (u * 31 + i * 17) % 5) as f64;
            if j % 10 == 9 {
                test.push((u, i, rating));
            } else {
                train.push((u, i, rating));
            }
        }
    }

    let s0 = Instant::now();
    let registry = Registry::from_ratings(train)?;
    println!(
        "Registry: {} users, {} items, {} ratings in {:.3}s",
        registry.num_users(),
        registry.num_items(),
        registry.num_ratings(),
        s0.elapsed().as_secs_f64()
    );

    let test: Vec<TestRating> = test
        .into_iter()
        .filter_map(|(u, i, r)| Some((registry.user_index(u)?, registry.item_index(i)?, r)))
        .collect();

    for parallel in [false, true] {
        let config = NdcgMfConfig::new(k, 20).with_seed(42).with_parallel(parallel);
        let mut model = NdcgMf::new(&registry, config)?;
        let s0 = Instant::now();
        model.train()?;
        let total = s0.elapsed().as_secs_f64();
        let per_iter = model
            .history()
            .iter()
            .map(|s| s.elapsed.as_secs_f64())
            .sum::<f64>()
            / model.history().len().max(1) as f64;
        println!(
            "parallel={parallel}: total {total:.3}s, {:.1} ms/iter, MAE {:.4}, P@10 {:.4}, NDCG@10 {:.4}",
            per_iter * 1e3,
            mae(&model, &test).unwrap_or(f64::NAN),
            precision_at(&model, &test, 10, 4.0).unwrap_or(f64::NAN),
            mean_ndcg(&model, &test, 10),
        );
    }
    Ok(())
}
