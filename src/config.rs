use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::beats::Beat;
use crate::playback::PlayEntry;

/// A `(seconds, bar_position)` pair seeding [`crate::beat_tracker`] instead of
/// running onset/downbeat detection.
pub type SeedBeat = (f64, u32);

/// Called after every pipeline stage with a 0-100 completion percentage and a
/// short human-readable message, mirroring `InfiniteJukebox`'s
/// `progress_callback(pct_complete, message)`.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// Tunables for a single [`crate::engine::remix`] invocation.
///
/// Grounded on `bliss_audio::song::AnalysisOptions`: a plain struct with a
/// `Default` impl rather than a builder, since every field already has a
/// sensible default drawn from `Remixatron.py`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    pub path: PathBuf,
    /// Index of the first usable beat: a floor below which beats are never
    /// offered as jump candidates, and the escape-hatch landing spot when
    /// the walker has failed to jump for too long.
    pub start_beat: usize,
    /// Force a specific cluster count instead of running [`crate::cluster`]'s
    /// adaptive selection.
    pub clusters: Option<usize>,
    /// Run the deprecated v1 even-`k` clustering scan instead of the v2
    /// descending silhouette-weighted scan.
    pub use_v1_clustering: bool,
    /// Pre-computed `(seconds, bar_position)` beats, skipping beat tracking.
    pub starting_beat_cache: Option<Vec<SeedBeat>>,
    /// Run the whole pipeline on a background thread; see [`crate::engine::EngineHandle`].
    pub async_mode: bool,
    /// Seed the play-vector RNG for reproducible output. `None` draws entropy
    /// from `rand::thread_rng()`.
    pub rng_seed: Option<u64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            path: PathBuf::new(),
            start_beat: 1,
            clusters: None,
            use_v1_clustering: false,
            starting_beat_cache: None,
            async_mode: false,
            rng_seed: None,
            progress_callback: None,
        }
    }
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            path: path.into(),
            ..Default::default()
        }
    }

    pub(crate) fn report(&self, pct_complete: f32, message: &str) {
        if let Some(cb) = &self.progress_callback {
            cb(pct_complete, message);
        }
    }
}

/// The complete result of [`crate::engine::remix`].
pub struct EngineOutput {
    pub duration_sec: f64,
    pub sample_rate: u32,
    pub tempo_bpm: f64,
    /// Interleaved 16-bit stereo PCM of the (silence-trimmed) input, the
    /// buffer `Beat::start_index`/`stop_index` address into.
    pub raw_audio: Vec<u8>,
    pub clusters: usize,
    pub segments: usize,
    pub beats: Vec<Beat>,
    /// Ordered beat records after `last_chance` -- the tail the walker can
    /// never jump back into, per `spec.md` §6.
    pub outro: Vec<Beat>,
    pub play_vector: Vec<PlayEntry>,
    /// Free-form per-run diagnostics, grounded on `Remixatron.py`'s
    /// `self._extra_diag` instance log buffer.
    pub diagnostics: Vec<String>,
}
