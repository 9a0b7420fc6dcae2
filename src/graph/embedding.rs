//! Spectral embedding of the combined graph `A`: symmetric normalized
//! Laplacian, eigendecomposition via `linfa_linalg` (the crate
//! `mecomp-analysis` also uses for this purpose), diagonal-median-filtered
//! eigenvectors, cumulative L2-norm normalization.

use linfa_linalg::eigh::{Eigh, EigSort};
use linfa_linalg::Order;
use ndarray::{Array1, Array2, Axis};

use crate::error::RemixError;

/// Window of the median filter run along each eigenvector.
const EIGENVECTOR_MEDIAN_WINDOW: usize = 9;
const HERMITIAN_TOLERANCE: f64 = 1e-8;

/// The spectral embedding handed to [`crate::cluster`]: the (median-
/// filtered, unnormalized) eigenvectors one column per node of the graph in
/// ascending eigenvalue order (column 0 is the trivial constant
/// eigenvector), plus their per-row cumulative L2 norm `cnorm`, so the
/// selector can build `evecs[:, :k] / cnorm[:, k-1]` for each candidate `k`
/// without recomputing the eigendecomposition.
pub struct Embedding {
    pub evecs: Array2<f64>,
    pub cnorm: Array2<f64>,
}

pub fn embed(graph: &Array2<f64>) -> Result<Embedding, RemixError> {
    let laplacian = normalized_laplacian(graph)?;
    check_hermitian(&laplacian)?;

    let (_eigenvalues, eigenvectors) = laplacian
        .eigh()
        .map_err(|e| RemixError::Clustering(format!("eigendecomposition failed: {e:?}")))?
        .sort_eig(Order::Smallest);

    let evecs = median_filter_columns(&eigenvectors, EIGENVECTOR_MEDIAN_WINDOW);
    let cnorm = cumulative_norm(&evecs);
    Ok(Embedding { evecs, cnorm })
}

fn normalized_laplacian(graph: &Array2<f64>) -> Result<Array2<f64>, RemixError> {
    let (rows, cols) = graph.dim();
    if rows != cols {
        return Err(RemixError::Shape {
            expected: rows,
            rows,
            cols,
        });
    }
    let degree: Array1<f64> = graph.sum_axis(Axis(1));
    let inv_sqrt_degree = degree.mapv(|d| if d > 1e-12 { 1.0 / d.sqrt() } else { 0.0 });

    let mut laplacian = Array2::eye(rows);
    for i in 0..rows {
        for j in 0..rows {
            laplacian[[i, j]] -= inv_sqrt_degree[i] * graph[[i, j]] * inv_sqrt_degree[j];
        }
    }
    Ok(laplacian)
}

fn check_hermitian(matrix: &Array2<f64>) -> Result<(), RemixError> {
    let mut max_asym = 0.0f64;
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            max_asym = max_asym.max((matrix[[i, j]] - matrix[[j, i]]).abs());
        }
    }
    if max_asym > HERMITIAN_TOLERANCE {
        return Err(RemixError::NotHermitian(max_asym));
    }
    Ok(())
}

fn median_filter_columns(eigenvectors: &Array2<f64>, window: usize) -> Array2<f64> {
    let (rows, cols) = eigenvectors.dim();
    let mut out = Array2::zeros((rows, cols));
    let half = window / 2;
    for c in 0..cols {
        let column: Vec<f64> = eigenvectors.column(c).to_vec();
        for r in 0..rows {
            let start = r.saturating_sub(half);
            let stop = (r + half + 1).min(rows);
            let mut slice = column[start..stop].to_vec();
            slice.sort_by(|a, b| a.partial_cmp(b).unwrap());
            out[[r, c]] = slice[slice.len() / 2];
        }
    }
    out
}

/// `Cnorm[i, j] = sqrt(Σ_{k≤j} evecs[i, k]²)`: the cumulative L2 norm across
/// eigenvector columns, per row/node -- `Cnorm` in `Remixatron.py`, read by
/// [`crate::cluster`] as `evecs[:, :k] / Cnorm[:, k-1]` for each candidate
/// cluster count `k`.
fn cumulative_norm(eigenvectors: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = eigenvectors.dim();
    let mut out = Array2::zeros((rows, cols));
    for r in 0..rows {
        let mut running = 0.0;
        for c in 0..cols {
            running += eigenvectors[[r, c]] * eigenvectors[[r, c]];
            out[[r, c]] = running.sqrt();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn rejects_non_square() {
        let graph = Array2::zeros((2, 3));
        assert!(embed(&graph).is_err());
    }

    #[test]
    fn embeds_a_simple_symmetric_graph() {
        let graph = arr2(&[[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let embedding = embed(&graph).unwrap();
        assert_eq!(embedding.evecs.dim(), (3, 3));
        assert_eq!(embedding.cnorm.dim(), (3, 3));
    }

    #[test]
    fn cnorm_is_nondecreasing_along_each_row() {
        let graph = arr2(&[[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let embedding = embed(&graph).unwrap();
        for row in embedding.cnorm.rows() {
            for w in row.to_vec().windows(2) {
                assert!(w[1] + 1e-9 >= w[0]);
            }
        }
    }
}
