//! Per-frame RMS amplitude, grounded on `misc::LoudnessDesc`'s frame-energy
//! idiom, kept per-frame (not reduced to a mean/std pair) since the engine
//! needs a beat-synchronous series rather than two summary scalars.

use ndarray::Array1;

const WINDOW: usize = 2048;
const HOP: usize = 512;

pub fn compute(mono: &[f32]) -> Array1<f64> {
    if mono.len() < WINDOW {
        let rms = (mono.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>()
            / mono.len().max(1) as f64)
            .sqrt();
        return Array1::from_elem(1, rms);
    }
    let frames: Vec<f64> = mono
        .windows(WINDOW)
        .step_by(HOP)
        .map(|w| (w.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>() / w.len() as f64).sqrt())
        .collect();
    Array1::from_vec(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_rms() {
        let mono = vec![0.0f32; WINDOW * 4];
        let rms = compute(&mono);
        assert!(rms.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn full_scale_square_wave_has_rms_near_one() {
        let mono = vec![1.0f32; WINDOW * 4];
        let rms = compute(&mono);
        assert!(rms.iter().all(|&x| (x - 1.0).abs() < 1e-6));
    }
}
