//! Builds the combined self-similarity graph `A` that [`crate::graph::embedding`]
//! spectrally embeds: a width-masked k-NN affinity recurrence matrix `R` over
//! beat-synchronous chroma, diagonal-enhanced and symmetrized, combined with
//! a tri-diagonal MFCC path-similarity matrix `R_path` using the McFee/Ellis
//! balancing weight `mu` from "Learning to Segment Songs with Ordinal Linear
//! Discriminant Analysis" (the combination librosa's own laplacian
//! segmentation example ships, which `Remixatron.py` follows).

use ndarray::{Array1, Array2};

use crate::error::RemixError;

const RECURRENCE_WIDTH: usize = 3;
/// Window of the diagonal median filter that enhances recurrence paths.
const DIAGONAL_MEDIAN_WINDOW: usize = 7;

/// Checked symmetrization: `(M + M^T) / 2`, used for the final combined
/// graph `A`. Mirrors `Remixatron.py`'s `symmetrize_matrix`, which raises on
/// a non-square input instead of silently reshaping it. The k-NN recurrence
/// matrix's own "connect if either direction found it" `max` rule is a
/// separate, local step inside `recurrence_matrix` — not this function.
pub fn symmetrize(matrix: &Array2<f64>) -> Result<Array2<f64>, RemixError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(RemixError::Shape {
            expected: rows,
            rows,
            cols,
        });
    }
    let mut out = matrix.clone();
    for i in 0..rows {
        for j in 0..rows {
            out[[i, j]] = (matrix[[i, j]] + matrix[[j, i]]) / 2.0;
        }
    }
    Ok(out)
}

/// Self-tuning, width-masked k-nearest-neighbor affinity matrix over the
/// columns of `chroma` (one column per beat).
pub fn recurrence_matrix(chroma: &Array2<f64>) -> Array2<f64> {
    let n = chroma.ncols();
    if n == 0 {
        return Array2::zeros((0, 0));
    }
    let k = ((2.0 * (n as f64).log2()).round() as usize).max(3).min(n.saturating_sub(1).max(1));

    let dist = pairwise_sqdist(chroma);

    // Self-tuning bandwidth: distance to the k-th nearest masked neighbor.
    let sigma: Vec<f64> = (0..n)
        .map(|i| {
            let mut row: Vec<f64> = (0..n)
                .filter(|&j| j != i && i.abs_diff(j) >= RECURRENCE_WIDTH)
                .map(|j| dist[[i, j]])
                .collect();
            row.sort_by(|a, b| a.partial_cmp(b).unwrap());
            row.get(k.saturating_sub(1)).copied().unwrap_or(1.0).max(1e-12)
        })
        .collect();

    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            let mut row: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i && i.abs_diff(j) >= RECURRENCE_WIDTH)
                .map(|j| (j, dist[[i, j]]))
                .collect();
            row.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            row.into_iter().take(k).map(|(j, _)| j).collect()
        })
        .collect();

    let mut affinity = Array2::zeros((n, n));
    for i in 0..n {
        for &j in &neighbors[i] {
            let a = (-dist[[i, j]] / (sigma[i] * sigma[j]).sqrt()).exp();
            affinity[[i, j]] = a;
        }
    }
    // sym=True: connect i<->j if either direction's kNN search found it.
    let mut symmetrized = affinity.clone();
    for i in 0..n {
        for j in 0..n {
            symmetrized[[i, j]] = affinity[[i, j]].max(affinity[[j, i]]);
        }
    }
    diagonal_median_filter(&symmetrized)
}

fn pairwise_sqdist(chroma: &Array2<f64>) -> Array2<f64> {
    let n = chroma.ncols();
    let mut dist = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (&chroma.column(i) - &chroma.column(j)).mapv(|x| x * x).sum();
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    dist
}

/// Median-filters along each diagonal to suppress isolated one-off matches,
/// the "timelag" trick of running a 1D filter over diagonals instead of rows.
fn diagonal_median_filter(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    if n == 0 {
        return matrix.clone();
    }
    let mut out = Array2::zeros((n, n));
    for offset in -(n as isize - 1)..(n as isize) {
        let diag: Vec<f64> = (0..n as isize)
            .filter_map(|i| {
                let j = i + offset;
                (0..n as isize).contains(&j).then(|| matrix[[i as usize, j as usize]])
            })
            .collect();
        let filtered = median_filter_1d(&diag, DIAGONAL_MEDIAN_WINDOW);
        let mut idx = 0;
        for i in 0..n as isize {
            let j = i + offset;
            if (0..n as isize).contains(&j) {
                out[[i as usize, j as usize]] = filtered[idx];
                idx += 1;
            }
        }
    }
    out
}

fn median_filter_1d(values: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let stop = (i + half + 1).min(values.len());
            let mut window: Vec<f64> = values[start..stop].to_vec();
            window.sort_by(|a, b| a.partial_cmp(b).unwrap());
            window[window.len() / 2]
        })
        .collect()
}

/// Tri-diagonal path-similarity matrix from frame-to-frame MFCC distance:
/// `R_path[i, i+1] = R_path[i+1, i] = exp(-||mfcc_i - mfcc_{i+1}||^2 / sigma^2)`,
/// `sigma` the mean adjacent-frame distance.
pub fn path_similarity(mfcc: &Array2<f64>) -> Array2<f64> {
    let n = mfcc.ncols();
    let mut out = Array2::zeros((n, n));
    if n < 2 {
        return out;
    }
    let deltas: Vec<f64> = (0..n - 1)
        .map(|i| (&mfcc.column(i) - &mfcc.column(i + 1)).mapv(|x| x * x).sum())
        .collect();
    let sigma = (deltas.iter().sum::<f64>() / deltas.len() as f64).max(1e-12);
    for (i, &d) in deltas.iter().enumerate() {
        let a = (-d / sigma).exp();
        out[[i, i + 1]] = a;
        out[[i + 1, i]] = a;
    }
    out
}

/// Combines `recurrence` and `path` with the McFee/Ellis balancing weight
/// `mu = deg_path . (deg_path + deg_rec) / sum((deg_path + deg_rec)^2)`.
pub fn combine(recurrence: &Array2<f64>, path: &Array2<f64>) -> Array2<f64> {
    let deg_rec: Array1<f64> = recurrence.sum_axis(ndarray::Axis(1));
    let deg_path: Array1<f64> = path.sum_axis(ndarray::Axis(1));

    let s = &deg_path + &deg_rec;
    let denom = s.dot(&s);
    let mu = if denom.abs() < 1e-12 {
        0.5
    } else {
        deg_path.dot(&(&deg_path + &deg_rec)) / denom
    };
    recurrence.mapv(|x| x * mu) + path.mapv(|x| x * (1.0 - mu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn symmetrize_rejects_non_square() {
        let m = Array2::zeros((3, 4));
        assert!(symmetrize(&m).is_err());
    }

    #[test]
    fn symmetrize_is_symmetric() {
        let m = arr2(&[[1.0, 2.0], [0.0, 1.0]]);
        let s = symmetrize(&m).unwrap();
        assert_eq!(s[[0, 1]], s[[1, 0]]);
        assert_eq!(s[[0, 1]], 1.0);
    }

    #[test]
    fn symmetrize_averages_the_golden_example() {
        let m = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let s = symmetrize(&m).unwrap();
        assert_eq!(s, arr2(&[[1.0, 3.0, 5.0], [3.0, 5.0, 7.0], [5.0, 7.0, 9.0]]));
    }

    #[test]
    fn path_similarity_is_tridiagonal() {
        let mfcc = arr2(&[[0.0, 1.0, 10.0], [0.0, 1.0, 10.0]]);
        let path = path_similarity(&mfcc);
        assert_eq!(path[[0, 2]], 0.0);
        assert!(path[[0, 1]] > 0.0);
    }
}
