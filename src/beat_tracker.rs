//! Beat and downbeat detection.
//!
//! Grounded on `temporal::BPMDesc`, which drives `bliss_audio_aubio_rs::Tempo`
//! hop-by-hop over a mono signal to get a BPM estimate. No Rust equivalent to
//! `madmom`'s joint beat/downbeat DNN exists in this ecosystem, so the same
//! onset-driven `Tempo` object stands in for beat timestamps, and bar
//! position (which beat of the bar each one is) is estimated by picking
//! whichever of a 3/4 or 4/4 grouping makes beat 1 louder than the rest -- see
//! DESIGN.md for the reasoning and its limits.

use bliss_audio_aubio_rs::{OnsetMode, Tempo};
use log::warn;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use ndarray::Array2;
use std::fs::File;
use std::path::Path;

use crate::config::SeedBeat;
use crate::error::RemixError;

const WINDOW_SIZE: usize = 512;
const HOP_SIZE: usize = WINDOW_SIZE / 2;

/// A detected or seeded beat: time in seconds and 1-based bar position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBeat {
    pub seconds: f64,
    pub bar_position: u32,
}

/// Runs onset detection over `mono` at `sample_rate` and groups the resulting
/// beat timestamps into bars of 3 or 4, picking whichever grouping makes the
/// first position in the bar the loudest on average.
pub fn detect(mono: &[f32], sample_rate: u32) -> Result<Vec<RawBeat>, RemixError> {
    let timestamps = track_onsets(mono, sample_rate)?;
    if timestamps.is_empty() {
        return Err(RemixError::EmptyBeats);
    }
    let beats_per_bar = best_bar_length(&timestamps, mono, sample_rate);
    Ok(timestamps
        .into_iter()
        .enumerate()
        .map(|(i, seconds)| RawBeat {
            seconds,
            bar_position: (i % beats_per_bar as usize) as u32 + 1,
        })
        .collect())
}

fn track_onsets(mono: &[f32], sample_rate: u32) -> Result<Vec<f64>, RemixError> {
    let mut tempo = Tempo::new(OnsetMode::SpecFlux, WINDOW_SIZE, HOP_SIZE, sample_rate)
        .map_err(|e| RemixError::Decode(format!("could not init aubio tempo: {e}")))?;

    let mut beats = Vec::new();
    for chunk in mono.chunks(HOP_SIZE) {
        // aubio expects exactly HOP_SIZE samples; zero-pad the final partial chunk.
        let result = if chunk.len() == HOP_SIZE {
            tempo.do_result(chunk)
        } else {
            let mut padded = vec![0.0f32; HOP_SIZE];
            padded[..chunk.len()].copy_from_slice(chunk);
            tempo.do_result(&padded)
        }
        .map_err(|e| RemixError::Decode(format!("aubio tempo error: {e}")))?;

        if result > 0.0 {
            beats.push(f64::from(tempo.get_last_s()));
        }
    }
    Ok(beats)
}

fn best_bar_length(timestamps: &[f64], mono: &[f32], sample_rate: u32) -> u32 {
    [3u32, 4u32]
        .into_iter()
        .map(|bpb| (bpb, downbeat_contrast(timestamps, mono, sample_rate, bpb)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(bpb, _)| bpb)
        .unwrap_or(4)
}

/// Ratio of mean RMS at bar position 1 to mean RMS at the other positions,
/// for a candidate bar length. Higher means a better grouping guess.
fn downbeat_contrast(timestamps: &[f64], mono: &[f32], sample_rate: u32, beats_per_bar: u32) -> f64 {
    let window = (sample_rate as f64 * 0.05) as usize; // 50ms onset window
    let rms_at = |t: f64| -> f64 {
        let center = (t * f64::from(sample_rate)) as usize;
        let start = center.saturating_sub(window / 2);
        let stop = (center + window / 2).min(mono.len());
        if start >= stop {
            return 0.0;
        }
        let slice = &mono[start..stop];
        (slice.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / slice.len() as f64)
            .sqrt()
    };

    let mut downbeat_sum = 0.0;
    let mut downbeat_n = 0usize;
    let mut other_sum = 0.0;
    let mut other_n = 0usize;
    for (i, &t) in timestamps.iter().enumerate() {
        let energy = rms_at(t);
        if i % beats_per_bar as usize == 0 {
            downbeat_sum += energy;
            downbeat_n += 1;
        } else {
            other_sum += energy;
            other_n += 1;
        }
    }
    if downbeat_n == 0 || other_n == 0 {
        return 0.0;
    }
    let downbeat_mean = downbeat_sum / downbeat_n as f64;
    let other_mean = other_sum / other_n as f64;
    if other_mean <= 0.0 {
        return downbeat_mean;
    }
    downbeat_mean / other_mean
}

pub fn from_seed(seed: &[SeedBeat]) -> Result<Vec<RawBeat>, RemixError> {
    if seed.is_empty() {
        return Err(RemixError::EmptyBeats);
    }
    let mut last = f64::MIN;
    for &(t, _) in seed {
        if t < last {
            return Err(RemixError::CacheIo(
                "seeded beats are not strictly increasing in time".into(),
            ));
        }
        last = t;
    }
    Ok(seed
        .iter()
        .map(|&(seconds, bar_position)| RawBeat {
            seconds,
            bar_position,
        })
        .collect())
}

/// Reads a `(N, 2)` `.npy` cache of `[seconds, bar_position]` rows.
pub fn read_cache(path: &Path) -> Result<Vec<RawBeat>, RemixError> {
    let file = File::open(path).map_err(|e| RemixError::CacheIo(e.to_string()))?;
    let arr = Array2::<f64>::read_npy(file).map_err(|e| RemixError::CacheIo(e.to_string()))?;
    if arr.ncols() != 2 {
        return Err(RemixError::CacheIo("expected a (N, 2) cache matrix".into()));
    }
    Ok(arr
        .rows()
        .into_iter()
        .map(|row| RawBeat {
            seconds: row[0],
            bar_position: row[1] as u32,
        })
        .collect())
}

/// Writes the beat cache. Failures are never fatal: the caller logs and
/// moves on, per the crate's cache-I/O-is-advisory error policy.
pub fn write_cache(path: &Path, beats: &[RawBeat]) {
    let mut arr = Array2::<f64>::zeros((beats.len(), 2));
    for (i, beat) in beats.iter().enumerate() {
        arr[[i, 0]] = beat.seconds;
        arr[[i, 1]] = f64::from(beat.bar_position);
    }
    let result = File::create(path).and_then(|file| {
        arr.write_npy(file)
            .map_err(|e| std::io::Error::other(e.to_string()))
    });
    if let Err(e) = result {
        warn!("could not write beat cache to {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(sample_rate: u32, bpm: f64, seconds: f64) -> Vec<f32> {
        let n = (sample_rate as f64 * seconds) as usize;
        let mut signal = vec![0.0f32; n];
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let mut i = 0;
        while i + 8 < n {
            for k in 0..8 {
                signal[i + k] = 1.0;
            }
            i += period;
        }
        signal
    }

    #[test]
    fn tracks_approximately_the_right_number_of_beats() {
        let sr = 22050;
        let signal = click_track(sr, 120.0, 8.0);
        let beats = track_onsets(&signal, sr).unwrap();
        // 120 BPM over 8s is ~16 beats; onset detection is approximate.
        assert!(beats.len() >= 8 && beats.len() <= 24, "{}", beats.len());
    }

    #[test]
    fn seeded_beats_must_be_increasing() {
        let seed = vec![(1.0, 1), (0.5, 2)];
        assert!(from_seed(&seed).is_err());
    }

    #[test]
    fn seeded_beats_round_trip() {
        let seed = vec![(0.0, 1), (0.5, 2), (1.0, 3), (1.5, 4)];
        let beats = from_seed(&seed).unwrap();
        assert_eq!(beats.len(), 4);
        assert_eq!(beats[2].bar_position, 3);
    }
}
