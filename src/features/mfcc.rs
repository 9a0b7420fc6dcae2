//! Mel-frequency cepstral coefficients: STFT power spectrum, triangular mel
//! filterbank, log compression, DCT-II. No MFCC crate exists in the pack, so
//! this reuses `utils::stft` as its spectral backbone (the same transform
//! `chroma::ChromaDesc` builds on) and hand-rolls the filterbank and DCT,
//! both textbook formulas with no numerically interesting alternative.

use ndarray::Array2;

use crate::utils::stft;

const WINDOW: usize = 2048;
const HOP: usize = 512;
const N_MELS: usize = 40;
pub const N_MFCC: usize = 20;

/// Returns an `(N_MFCC, n_frames)` matrix.
pub fn compute(mono: &[f32], sample_rate: u32) -> Array2<f64> {
    let magnitude = stft(mono, WINDOW, HOP);
    let power = magnitude.mapv(|x| x * x);
    let filterbank = mel_filterbank(sample_rate, WINDOW, N_MELS);
    let mel_spectrum = filterbank.dot(&power);
    let log_mel = mel_spectrum.mapv(|x| x.max(1e-10).ln());
    dct2(&log_mel, N_MFCC)
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let n_freqs = n_fft / 2 + 1;
    let nyquist = f64::from(sample_rate) / 2.0;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(nyquist);

    let mel_points: Vec<f64> = (0..=n_mels + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .collect();
    let bin_points: Vec<usize> = mel_points
        .iter()
        .map(|&m| {
            let hz = mel_to_hz(m);
            ((n_fft + 1) as f64 * hz / f64::from(sample_rate))
                .floor()
                .clamp(0.0, (n_freqs - 1) as f64) as usize
        })
        .collect();

    let mut filterbank = Array2::zeros((n_mels, n_freqs));
    for m in 1..=n_mels {
        let (left, center, right) = (bin_points[m - 1], bin_points[m], bin_points[m + 1]);
        for k in left..center.min(n_freqs) {
            if center > left {
                filterbank[[m - 1, k]] = (k - left) as f64 / (center - left) as f64;
            }
        }
        for k in center..right.min(n_freqs) {
            if right > center {
                filterbank[[m - 1, k]] = (right - k) as f64 / (right - center) as f64;
            }
        }
    }
    filterbank
}

/// Orthonormal DCT-II, first `n_out` coefficients, as a dense matrix product
/// so it runs through `ndarray`'s BLAS-backed `dot` rather than nested loops.
fn dct2(log_mel: &Array2<f64>, n_out: usize) -> Array2<f64> {
    let n_mels = log_mel.nrows();
    let mut basis = Array2::zeros((n_out, n_mels));
    for k in 0..n_out {
        let scale = if k == 0 {
            (1.0 / n_mels as f64).sqrt()
        } else {
            (2.0 / n_mels as f64).sqrt()
        };
        for n in 0..n_mels {
            basis[[k, n]] = scale
                * (std::f64::consts::PI / n_mels as f64 * (n as f64 + 0.5) * k as f64).cos();
        }
    }
    basis.dot(log_mel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_has_n_mfcc_rows() {
        let sr = 22050;
        let mono: Vec<f32> = (0..sr * 2)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sr as f32).sin())
            .collect();
        let mfcc = compute(&mono, sr as u32);
        assert_eq!(mfcc.nrows(), N_MFCC);
        assert!(mfcc.ncols() > 0);
    }

    #[test]
    fn filterbank_rows_are_nonnegative_and_triangular() {
        let fb = mel_filterbank(22050, WINDOW, N_MELS);
        assert!(fb.iter().all(|&x| x >= 0.0));
        assert!(fb.iter().any(|&x| x > 0.0));
    }
}
