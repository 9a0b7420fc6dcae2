//! Beat-synchronous aggregation: collapses a per-analysis-frame feature
//! matrix down to one column per beat by taking the median of the frames
//! falling between consecutive beats, grounded on `ndarray-stats`'
//! `Quantile1dExt` with `Midpoint` interpolation -- the same crate and
//! interpolation mode `temporal::BPMDesc::get_value` already uses for its
//! median BPM.

use ndarray::{Array1, Array2};
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::{Quantile1dExt, QuantileExt};
use noisy_float::prelude::*;

pub fn frame_times(sample_rate: u32, hop: usize, n_frames: usize) -> Vec<f64> {
    (0..n_frames)
        .map(|i| (i * hop) as f64 / f64::from(sample_rate))
        .collect()
}

/// For each beat time, the index of the first analysis frame at or after it.
pub fn beat_frame_indices(beat_times: &[f64], frame_times: &[f64]) -> Vec<usize> {
    beat_times
        .iter()
        .map(|&t| {
            frame_times
                .iter()
                .position(|&ft| ft >= t)
                .unwrap_or(frame_times.len().saturating_sub(1))
        })
        .collect()
}

pub fn sync_median(feature: &Array2<f64>, beat_frames: &[usize]) -> Array2<f64> {
    let n_rows = feature.nrows();
    if beat_frames.is_empty() {
        return Array2::zeros((n_rows, 0));
    }
    let mut out = Array2::zeros((n_rows, beat_frames.len()));
    for (b, window) in beat_windows(beat_frames, feature.ncols()).enumerate() {
        let (start, stop) = window;
        if start >= stop {
            out.column_mut(b).assign(&feature.column(start.min(feature.ncols() - 1)));
            continue;
        }
        let segment = feature.slice(ndarray::s![.., start..stop]);
        for row in 0..n_rows {
            let mut values = segment.row(row).mapv(n64);
            let median = values
                .quantile_mut(n64(0.5), &Midpoint)
                .unwrap_or_else(|_| n64(0.0));
            out[[row, b]] = median.into();
        }
    }
    out
}

pub fn sync_median_1d(feature: &Array1<f64>, beat_frames: &[usize]) -> Array1<f64> {
    if beat_frames.is_empty() {
        return Array1::zeros(0);
    }
    let mut out = Array1::zeros(beat_frames.len());
    for (b, (start, stop)) in beat_windows(beat_frames, feature.len()).enumerate() {
        if start >= stop {
            out[b] = feature[start.min(feature.len() - 1)];
            continue;
        }
        let mut values = feature.slice(ndarray::s![start..stop]).mapv(n64);
        let median = values
            .quantile_mut(n64(0.5), &Midpoint)
            .unwrap_or_else(|_| n64(0.0));
        out[b] = median.into();
    }
    out
}

fn beat_windows(beat_frames: &[usize], n_frames: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
    (0..beat_frames.len()).map(move |i| {
        let start = beat_frames[i];
        let stop = beat_frames.get(i + 1).copied().unwrap_or(n_frames);
        (start.min(n_frames.max(1) - 1), stop.min(n_frames))
    })
}

/// Unused directly but kept so callers can find the global max of a matrix
/// with the same crate/idiom used elsewhere (`chroma::pitch_tuning`'s argmax
/// usage), rather than a hand-rolled fold.
#[allow(dead_code)]
pub(crate) fn global_max(feature: &Array2<f64>) -> f64 {
    *feature.max().unwrap_or(&0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn medians_each_beat_window() {
        let feature = arr2(&[[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]]);
        let frame_times: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let beat_times = vec![0.0, 3.0];
        let beat_frames = beat_frame_indices(&beat_times, &frame_times);
        let synced = sync_median(&feature, &beat_frames);
        assert_eq!(synced.ncols(), 2);
        assert_eq!(synced[[0, 0]], 2.0);
        assert_eq!(synced[[0, 1]], 20.0);
    }
}
