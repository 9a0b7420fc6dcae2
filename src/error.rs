use thiserror::Error;

/// Crate-wide error type for the remix engine pipeline.
///
/// All variants except [`RemixError::CacheIo`] are fatal: the pipeline stops
/// and returns the error to the caller. A [`RemixError::CacheIo`] is only
/// ever surfaced through `log::warn!` by the code that hits it and is never
/// returned from [`crate::engine::remix`].
#[derive(Error, Debug)]
pub enum RemixError {
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("beat tracking produced zero beats")]
    EmptyBeats,
    #[error("expected a square matrix of shape ({expected}, {expected}), got ({rows}, {cols})")]
    Shape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("graph Laplacian is not hermitian (max asymmetry {0})")]
    NotHermitian(f64),
    #[error("could not read or write the beat cache: {0}")]
    CacheIo(String),
    #[error("clustering failed: {0}")]
    Clustering(String),
}

pub type RemixResult<T> = Result<T, RemixError>;
