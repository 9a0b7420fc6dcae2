//! Picks a cluster count and assignment over the spectral embedding.
//!
//! `linfa_clustering::KMeans` (the same crate `mecomp-analysis` depends on
//! for exactly this) provides the clustering primitive; no silhouette-score
//! crate exists in the pack, so the score itself -- a direct mean
//! intra/inter-cluster distance computation -- is hand-rolled.
//!
//! Two selection strategies are kept, matching `Remixatron.py`'s `v1`
//! (deprecated) and `v2` (canonical) scans:
//! - v2 scans `k` from 48 down to 3, seeding each fit identically, and keeps
//!   the *last* `k` whose fitness is greater-or-equal to the best seen so
//!   far. Because the scan is descending and ties use `>=`, a tie is won by
//!   the *lower* `k`, not the higher one -- that is the literal behavior of
//!   the scan this crate is grounded on, kept even though it reads as
//!   counter-intuitive (see DESIGN.md).
//! - v1 scans even `k` from 4 to 62 ascending, using a simpler ratio-only
//!   fitness with no orphan penalty.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand_xoshiro::Xoshiro256Plus;
use rand::SeedableRng;

use crate::error::RemixError;
use crate::graph::embedding::Embedding;

pub struct ClusterResult {
    pub k: usize,
    pub labels: Vec<usize>,
}

/// Builds the observation matrix clustering actually runs on for a candidate
/// `k`: `evecs[:, :k] / Cnorm[:, k-1]`, per `spec.md` §4.6 step 1 -- the
/// first `k` eigenvector columns, each row rescaled by the cumulative L2
/// norm of exactly those `k` columns.
fn observations_for_k(embedding: &Embedding, k: usize) -> Array2<f64> {
    let n = embedding.evecs.nrows();
    let mut out = Array2::zeros((n, k));
    for i in 0..n {
        let norm = embedding.cnorm[[i, k - 1]].max(1e-12);
        for c in 0..k {
            out[[i, c]] = embedding.evecs[[i, c]] / norm;
        }
    }
    out
}

/// `embedding.evecs` has one row per beat and one column per eigenvector
/// (`linfa_linalg::eigh` returns eigenvectors as columns); `observations_for_k`
/// slices and row-normalizes it per candidate `k` before handing it to `KMeans`.
pub fn select(embedding: &Embedding, forced_k: Option<usize>, use_v1: bool) -> Result<ClusterResult, RemixError> {
    let n = embedding.evecs.nrows();
    if n < 4 {
        return Ok(ClusterResult {
            k: 1,
            labels: vec![0; n],
        });
    }

    if let Some(k) = forced_k {
        let observations = observations_for_k(embedding, k);
        let labels = fit_predict(&observations, k)?;
        return Ok(ClusterResult { k, labels });
    }

    if use_v1 {
        select_v1(embedding)
    } else {
        select_v2(embedding)
    }
}

fn fit_predict(observations: &Array2<f64>, k: usize) -> Result<Vec<usize>, RemixError> {
    let dataset = DatasetBase::from(observations.clone());
    let rng = Xoshiro256Plus::seed_from_u64(0);
    let model = KMeans::params_with_rng(k, rng)
        .max_n_iterations(300)
        .n_runs(20)
        .tolerance(1e-4)
        .fit(&dataset)
        .map_err(|e| RemixError::Clustering(e.to_string()))?;
    let predicted = model.predict(dataset);
    Ok(predicted.targets().to_vec())
}

fn select_v2(embedding: &Embedding) -> Result<ClusterResult, RemixError> {
    let max_k = (embedding.evecs.nrows() - 1).min(embedding.evecs.ncols()).min(48);
    let mut best: Option<(usize, f64, Vec<usize>)> = None;

    for k in (3..=max_k).rev() {
        let observations = observations_for_k(embedding, k);
        let labels = fit_predict(&observations, k)?;
        let sil = silhouette_score(&observations, &labels);
        let fitness = fitness_v2(k, &labels, sil);
        let keep = match &best {
            None => true,
            Some((_, best_fitness, _)) => fitness >= *best_fitness,
        };
        if keep {
            best = Some((k, fitness, labels));
        }
    }

    best.map(|(k, _, labels)| ClusterResult { k, labels })
        .ok_or_else(|| RemixError::Clustering("no candidate k produced a clustering".into()))
}

fn select_v1(embedding: &Embedding) -> Result<ClusterResult, RemixError> {
    let max_k = (embedding.evecs.nrows() - 1).min(embedding.evecs.ncols()).min(62);
    let mut best: Option<(usize, f64, Vec<usize>)> = None;

    let mut k = 4;
    while k < max_k {
        let observations = observations_for_k(embedding, k);
        let labels = fit_predict(&observations, k)?;
        let fitness = fitness_v1(k, &labels);
        let keep = match &best {
            None => true,
            Some((_, best_fitness, _)) => fitness >= *best_fitness,
        };
        if keep {
            best = Some((k, fitness, labels));
        }
        k += 2;
    }

    best.map(|(k, _, labels)| ClusterResult { k, labels })
        .ok_or_else(|| RemixError::Clustering("no candidate k produced a clustering".into()))
}

/// `k * silhouette * (segments/k) * (0.8 if the shortest segment is an
/// orphan of length 1, else 1.0)`: rewards high separation and enough
/// segment diversity, while penalizing over-fit single-beat segments.
fn fitness_v2(k: usize, labels: &[usize], silhouette: f64) -> f64 {
    let segments = segment_lengths(labels);
    let segment_count = segments.len();
    let ratio = segment_count as f64 / k as f64;
    let min_segment = segments.iter().copied().min().unwrap_or(0);
    let orphan_scaler = if min_segment == 1 { 0.8 } else { 1.0 };

    k as f64 * silhouette * ratio * orphan_scaler
}

fn fitness_v1(k: usize, labels: &[usize]) -> f64 {
    let segments = segment_lengths(labels);
    let mean_len = segments.iter().sum::<usize>() as f64 / segments.len().max(1) as f64;
    mean_len / k as f64
}

fn segment_lengths(labels: &[usize]) -> Vec<usize> {
    let mut segments = Vec::new();
    let mut current_len = 0usize;
    let mut current_label = None;
    for &label in labels {
        if Some(label) == current_label {
            current_len += 1;
        } else {
            if current_len > 0 {
                segments.push(current_len);
            }
            current_label = Some(label);
            current_len = 1;
        }
    }
    if current_len > 0 {
        segments.push(current_len);
    }
    segments
}

/// Mean silhouette coefficient over all observations: for each point, the
/// gap between its mean distance to the nearest *other* cluster and its
/// mean distance to its own cluster, normalized to `[-1, 1]`.
fn silhouette_score(observations: &Array2<f64>, labels: &[usize]) -> f64 {
    let n = observations.nrows();
    let k = labels.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    if k < 2 || n < 2 {
        return 0.0;
    }

    let dist = |i: usize, j: usize| -> f64 {
        (&observations.row(i) - &observations.row(j))
            .mapv(|x| x * x)
            .sum()
            .sqrt()
    };

    let mut scores = Array1::zeros(n);
    for i in 0..n {
        let mut same_sum = 0.0;
        let mut same_n = 0usize;
        let mut other_sums = vec![0.0f64; k];
        let mut other_ns = vec![0usize; k];
        for j in 0..n {
            if i == j {
                continue;
            }
            let d = dist(i, j);
            if labels[j] == labels[i] {
                same_sum += d;
                same_n += 1;
            } else {
                other_sums[labels[j]] += d;
                other_ns[labels[j]] += 1;
            }
        }
        let a = if same_n > 0 { same_sum / same_n as f64 } else { 0.0 };
        let b = (0..k)
            .filter(|&c| c != labels[i] && other_ns[c] > 0)
            .map(|c| other_sums[c] / other_ns[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let b = if b.is_finite() { b } else { a };
        scores[i] = if a.max(b) > 0.0 { (b - a) / a.max(b) } else { 0.0 };
    }
    scores.mean_axis(Axis(0)).map(|m| m[()]).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn silhouette_is_high_for_well_separated_clusters() {
        let observations = arr2(&[
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ]);
        let labels = vec![0, 0, 0, 1, 1, 1];
        let score = silhouette_score(&observations, &labels);
        assert!(score > 0.9, "{score}");
    }

    #[test]
    fn segment_lengths_counts_contiguous_runs() {
        let labels = vec![0, 0, 1, 1, 1, 0];
        assert_eq!(segment_lengths(&labels), vec![2, 3, 1]);
    }

    #[test]
    fn observations_for_k_slices_columns_and_normalizes_by_the_kth_cnorm() {
        // row 0: evecs [3, 4, 0] -> cnorm [3, 5, 5]; row 1: [0, 0, 5] -> [0, 0, 5].
        let embedding = Embedding {
            evecs: arr2(&[[3.0, 4.0, 0.0], [0.0, 0.0, 5.0]]),
            cnorm: arr2(&[[3.0, 5.0, 5.0], [0.0, 0.0, 5.0]]),
        };

        let x1 = observations_for_k(&embedding, 1);
        assert_eq!(x1.dim(), (2, 1));
        assert!((x1[[0, 0]] - 1.0).abs() < 1e-9);

        let x2 = observations_for_k(&embedding, 2);
        assert_eq!(x2.dim(), (2, 2));
        assert!((x2[[0, 0]] - 0.6).abs() < 1e-9);
        assert!((x2[[0, 1]] - 0.8).abs() < 1e-9);
    }
}
