//! Constant-Q chromagram via recursive octave-halving (Brown & Puckette):
//! the top octave is transformed directly against the full-rate signal, then
//! the signal is low-pass filtered and decimated by two before repeating for
//! the next octave down. `bliss_audio` has no true CQT (only STFT folded into
//! one octave by `chroma::chroma_filter`'s Gaussian bin-mapping), so this
//! reuses that file's `ndarray`/reflect-pad idiom for the per-octave kernel
//! bank instead of inventing a different numerical approach.

use ndarray::{concatenate, s, Array2, Axis};
use rustfft::num_complex::Complex;

use crate::utils::reflect_pad;

pub const BINS_PER_OCTAVE: u32 = 36;
pub const N_OCTAVES: u32 = 7;
/// C1, librosa's default CQT floor.
const FMIN: f64 = 32.70;

/// Returns a `(BINS_PER_OCTAVE * N_OCTAVES, n_frames)` magnitude matrix in
/// dB relative to its own peak, lowest frequency first.
pub fn compute(mono: &[f32], sample_rate: u32, hop_length: usize) -> Array2<f64> {
    let mut signal = mono.to_vec();
    let mut sr = sample_rate;
    let mut hop = hop_length;
    // Processed highest octave first; reversed below.
    let mut octave_mats = Vec::with_capacity(N_OCTAVES as usize);

    for octave in 0..N_OCTAVES {
        let abs_octave = N_OCTAVES - 1 - octave;
        let freqs: Vec<f64> = (0..BINS_PER_OCTAVE)
            .map(|k| FMIN * 2f64.powf(f64::from(abs_octave) + f64::from(k) / f64::from(BINS_PER_OCTAVE)))
            .collect();
        octave_mats.push(octave_kernel_transform(&signal, sr, hop, &freqs));

        if octave + 1 < N_OCTAVES {
            signal = lowpass_decimate(&signal);
            sr = (sr / 2).max(1);
            hop = (hop / 2).max(1);
        }
    }
    octave_mats.reverse();

    let min_frames = octave_mats.iter().map(Array2::ncols).min().unwrap_or(0);
    let trimmed: Vec<Array2<f64>> = octave_mats
        .into_iter()
        .map(|m| m.slice(s![.., ..min_frames]).to_owned())
        .collect();
    let views: Vec<_> = trimmed.iter().map(Array2::view).collect();
    let magnitude = concatenate(Axis(0), &views).expect("equal-width octave CQT slices");
    amplitude_to_db(magnitude)
}

fn octave_kernel_transform(signal: &[f32], sr: u32, hop: usize, freqs: &[f64]) -> Array2<f64> {
    let q = 1.0 / (2f64.powf(1.0 / f64::from(BINS_PER_OCTAVE)) - 1.0);
    let kernel_lens: Vec<usize> = freqs
        .iter()
        .map(|&f| ((q * f64::from(sr) / f).round() as usize).clamp(4, signal.len().max(4)))
        .collect();
    let max_len = *kernel_lens.iter().max().unwrap_or(&4);
    let pad = max_len / 2 + 1;
    let padded = reflect_pad(signal, pad.min((signal.len().saturating_sub(1)) / 2).max(1));

    let n_frames = ((signal.len() as f64) / hop.max(1) as f64).ceil() as usize;
    let mut out = Array2::zeros((freqs.len(), n_frames));

    for (bin, (&freq, &klen)) in freqs.iter().zip(kernel_lens.iter()).enumerate() {
        let kernel = make_kernel(freq, sr, klen);
        for t in 0..n_frames {
            let center = t * hop.max(1) + pad;
            let start = center.saturating_sub(klen / 2);
            let stop = (start + klen).min(padded.len());
            if stop <= start {
                continue;
            }
            let window = &padded[start..stop];
            let mut acc = Complex::new(0.0f64, 0.0);
            for (sample, k) in window.iter().zip(kernel.iter()) {
                acc += k * f64::from(*sample);
            }
            out[[bin, t]] = acc.norm() / klen as f64;
        }
    }
    out
}

fn make_kernel(freq: f64, sr: u32, len: usize) -> Vec<Complex<f64>> {
    (0..len)
        .map(|n| {
            let hann = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / len as f64).cos();
            let phase = -2.0 * std::f64::consts::PI * freq * n as f64 / f64::from(sr);
            Complex::from_polar(hann, phase)
        })
        .collect()
}

/// Binomial 5-tap low-pass (`[1,4,6,4,1]/16`) then downsample by 2. A cheap
/// stand-in for a true half-band polyphase filter.
fn lowpass_decimate(signal: &[f32]) -> Vec<f32> {
    if signal.len() < 5 {
        return signal.to_vec();
    }
    const TAPS: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];
    let padded = reflect_pad(signal, 2);
    let filtered: Vec<f32> = (0..signal.len())
        .map(|i| {
            padded[i..i + 5]
                .iter()
                .zip(TAPS.iter())
                .map(|(&x, &c)| x * c)
                .sum::<f32>()
                / 16.0
        })
        .collect();
    filtered.into_iter().step_by(2).collect()
}

fn amplitude_to_db(magnitude: Array2<f64>) -> Array2<f64> {
    let peak = magnitude.iter().cloned().fold(0.0f64, f64::max).max(1e-10);
    magnitude.mapv(|x| 20.0 * (x.max(1e-10) / peak).log10())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_matches_bins_times_octaves() {
        let sr = 8_000u32;
        let n = sr as usize * 2;
        let mono: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr as f32).sin())
            .collect();
        let cqt = compute(&mono, sr, 256);
        assert_eq!(cqt.nrows(), (BINS_PER_OCTAVE * N_OCTAVES) as usize);
        assert!(cqt.ncols() > 0);
    }

    #[test]
    fn peaks_near_driving_frequency() {
        let sr = 8_000u32;
        let n = sr as usize * 2;
        let freq = 220.0;
        let mono: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        let cqt = compute(&mono, sr, 256);
        let mid_frame = cqt.ncols() / 2;
        let (peak_bin, _) = cqt
            .column(mid_frame)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let peak_freq =
            FMIN * 2f64.powf(peak_bin as f64 / f64::from(BINS_PER_OCTAVE));
        let relative_error = (peak_freq - freq as f64).abs() / freq as f64;
        assert!(relative_error < 0.1, "{peak_freq}");
    }
}
