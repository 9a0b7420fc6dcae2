//! Top-level orchestration: decode -> track beats -> extract features ->
//! build the self-similarity graph -> spectrally embed it -> cluster ->
//! assemble beat records -> build the jump graph -> walk a play vector.
//!
//! `async_mode` spawns the whole pipeline on a background thread and hands
//! the caller a one-shot receiver, grounded on `bliss_audio::library`'s
//! worker-thread pattern for long-running analysis jobs.

use std::sync::mpsc;
use std::thread;

use crate::audio;
use crate::beat_tracker;
use crate::beats;
use crate::cluster;
use crate::config::{EngineConfig, EngineOutput};
use crate::error::RemixError;
use crate::features;
use crate::graph::{embedding, recurrence};
use crate::jump_graph;
use crate::playback::PlayWalker;

/// Length of the generated play vector.
const PLAY_VECTOR_LENGTH: usize = 1 << 20;

pub fn remix(config: &EngineConfig) -> Result<EngineOutput, RemixError> {
    let mut diagnostics = Vec::new();

    config.report(0.0, "decoding audio");
    let audio_buffer = audio::load(&config.path)?;
    let mono = audio_buffer.mono();
    diagnostics.push(format!(
        "decoded {:.1}s at {}Hz",
        audio_buffer.duration_sec(),
        audio_buffer.sample_rate
    ));

    config.report(15.0, "tracking beats");
    let raw_beats = match &config.starting_beat_cache {
        Some(seed) => beat_tracker::from_seed(seed)?,
        None => beat_tracker::detect(&mono, audio_buffer.sample_rate)?,
    };
    let tempo_bpm = estimate_tempo(&raw_beats);

    config.report(35.0, "extracting features");
    let feature_set = features::extract(&mono, audio_buffer.sample_rate, &raw_beats);

    config.report(50.0, "building the self-similarity graph");
    let recurrence_matrix = recurrence::recurrence_matrix(&feature_set.chroma);
    let path_matrix = recurrence::path_similarity(&feature_set.mfcc);
    let combined = recurrence::symmetrize(&recurrence::combine(&recurrence_matrix, &path_matrix))?;

    config.report(65.0, "spectral embedding");
    let embedding = embedding::embed(&combined)?;

    config.report(75.0, "clustering");
    let cluster_result = cluster::select(&embedding, config.clusters, config.use_v1_clustering)?;
    diagnostics.push(format!("selected k={}", cluster_result.k));

    config.report(85.0, "assembling beats");
    let raw_audio = audio_buffer.int16_stereo_bytes();
    let start_beat = config.start_beat.min(raw_beats.len().saturating_sub(1));
    let mut beat_records = beats::assemble(
        &raw_beats,
        &cluster_result.labels,
        feature_set.rms.as_slice().unwrap_or(&[]),
        &raw_audio,
        audio_buffer.bytes_per_second(),
        start_beat,
    );
    let segments = beat_records.iter().map(|b| b.segment).max().map(|m| m + 1).unwrap_or(0);

    config.report(92.0, "building the jump graph");
    let last_chance = jump_graph::build(&mut beat_records, start_beat);

    config.report(96.0, "walking the play vector");
    let play_vector = PlayWalker::new(&beat_records, segments, tempo_bpm, start_beat, config.rng_seed)
        .walk(PLAY_VECTOR_LENGTH);
    let outro = beat_records
        .get(last_chance + 1..)
        .map(|tail| tail.to_vec())
        .unwrap_or_default();

    config.report(100.0, "done");

    Ok(EngineOutput {
        duration_sec: audio_buffer.duration_sec(),
        sample_rate: audio_buffer.sample_rate,
        tempo_bpm,
        raw_audio,
        clusters: cluster_result.k,
        segments,
        beats: beat_records,
        outro,
        play_vector,
        diagnostics,
    })
}

fn estimate_tempo(raw_beats: &[beat_tracker::RawBeat]) -> f64 {
    if raw_beats.len() < 2 {
        return 0.0;
    }
    let intervals: Vec<f64> = raw_beats.windows(2).map(|w| w[1].seconds - w[0].seconds).collect();
    let mean_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean_interval <= 0.0 {
        0.0
    } else {
        60.0 / mean_interval
    }
}

/// A handle to a `remix` run happening on a background thread.
pub struct EngineHandle {
    receiver: mpsc::Receiver<Result<EngineOutput, RemixError>>,
}

impl EngineHandle {
    /// Blocks until the background run finishes and returns its result.
    pub fn join(self) -> Result<EngineOutput, RemixError> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(RemixError::Decode("worker thread panicked".into())))
    }
}

/// Spawns `remix` on a background thread; used when `config.async_mode` is
/// set. `config` must be `'static` + `Send` to cross the thread boundary,
/// which holds for `EngineConfig` since its only non-`Send` risk,
/// `progress_callback`, is bounded `Send + Sync` at the type level.
pub fn remix_async(config: EngineConfig) -> EngineHandle {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = remix(&config);
        let _ = tx.send(result);
    });
    EngineHandle { receiver: rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beat_tracker::RawBeat;

    #[test]
    fn estimate_tempo_is_zero_for_fewer_than_two_beats() {
        assert_eq!(estimate_tempo(&[]), 0.0);
    }

    #[test]
    fn estimate_tempo_matches_a_regular_click_track() {
        let beats: Vec<RawBeat> = (0..10)
            .map(|i| RawBeat {
                seconds: i as f64 * 0.5,
                bar_position: 1,
            })
            .collect();
        assert!((estimate_tempo(&beats) - 120.0).abs() < 1e-6);
    }
}
