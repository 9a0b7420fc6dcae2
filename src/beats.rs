//! Assembles final [`Beat`] records from tracked beat timestamps, cluster
//! labels and beat-synchronous amplitude: byte-aligned start/stop offsets,
//! segment numbering, in-segment position, quartile bucketing, and a
//! head/tail trim (`start_beat`..`fade`) that reassigns ids afterwards so
//! they stay dense.

use crate::beat_tracker::RawBeat;

/// Bytes per output audio frame: 2 channels * 2 bytes (i16).
const FRAME_BYTES: usize = 4;
/// Threshold (out of `FRAME_BYTES`) past which a beat boundary rounds up to
/// the next frame instead of down.
const FRAME_ROUND_THRESHOLD: f64 = 1.5;
/// A beat is kept in the fade tail while its amplitude stays at or above
/// this fraction of the track's mean beat amplitude.
const FADE_AMPLITUDE_RATIO: f64 = 0.75;

/// One beat of the final play graph.
#[derive(Debug, Clone)]
pub struct Beat {
    pub id: usize,
    pub start: f64,
    pub duration: f64,
    pub start_index: usize,
    pub stop_index: usize,
    pub cluster: usize,
    pub segment: usize,
    /// Position of this beat within its segment, 0-based.
    pub is: usize,
    pub amplitude: f64,
    /// The beat id that immediately musically follows this one; filled in
    /// by [`crate::jump_graph`].
    pub next: usize,
    /// Ids of beats this one may legally jump to; filled in by
    /// [`crate::jump_graph`].
    pub jump_candidates: Vec<usize>,
    pub quartile: usize,
}

/// Byte offset of `seconds` into a buffer sampled at `bytes_per_second`,
/// rounded to the nearest whole output frame using a `1.5`-out-of-4
/// threshold rather than the usual half-frame midpoint.
fn frame_aligned_byte_offset(seconds: f64, bytes_per_second: usize) -> usize {
    let raw_bytes = seconds * bytes_per_second as f64;
    let raw_frames = raw_bytes / FRAME_BYTES as f64;
    let frac_bytes = raw_frames.fract() * FRAME_BYTES as f64;
    let frame_index = if frac_bytes >= FRAME_ROUND_THRESHOLD {
        raw_frames.ceil()
    } else {
        raw_frames.floor()
    };
    (frame_index.max(0.0) as usize) * FRAME_BYTES
}

/// Builds the full prefix beat list (before the `start_beat`/fade trim),
/// then truncates to `[start_beat, fade]` and renumbers ids densely.
pub fn assemble(
    raw_beats: &[RawBeat],
    labels: &[usize],
    amplitudes: &[f64],
    raw_audio: &[u8],
    bytes_per_second: usize,
    start_beat: usize,
) -> Vec<Beat> {
    let n = raw_beats.len();
    let mut beats: Vec<Beat> = Vec::with_capacity(n);
    let mut segment = 0usize;
    let mut is_in_segment = 0usize;
    let mut prev_cluster: Option<usize> = None;

    for i in 0..n {
        let start = raw_beats[i].seconds;
        let duration = raw_beats
            .get(i + 1)
            .map(|b| b.seconds - start)
            .unwrap_or_else(|| (raw_audio.len() / bytes_per_second.max(1)) as f64 - start)
            .max(0.0);
        let start_index = frame_aligned_byte_offset(start, bytes_per_second).min(raw_audio.len());
        let stop_index = frame_aligned_byte_offset(start + duration, bytes_per_second)
            .min(raw_audio.len())
            .max(start_index);

        let cluster = labels.get(i).copied().unwrap_or(0);
        if prev_cluster != Some(cluster) {
            if i > 0 {
                segment += 1;
            }
            is_in_segment = 0;
        } else {
            is_in_segment += 1;
        }
        prev_cluster = Some(cluster);

        let amplitude = amplitudes.get(i).copied().unwrap_or(0.0);

        beats.push(Beat {
            id: i,
            start,
            duration,
            start_index,
            stop_index,
            cluster,
            segment,
            is: is_in_segment,
            amplitude,
            next: (i + 1).min(n.saturating_sub(1)),
            jump_candidates: Vec::new(),
            quartile: quartile_of(i, n),
        });
    }

    trim_to_fade(beats, start_beat)
}

fn quartile_of(id: usize, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (id as f64 / (n as f64 / 4.0)).floor() as usize
}

/// Truncates the prefix list to `[start_beat, fade]`, where `fade` is the
/// last beat whose amplitude is still at least `FADE_AMPLITUDE_RATIO` times
/// the track's mean beat amplitude (walked from the end), then renumbers
/// `id`/`quartile` densely over what remains. `segment`/`is` are left
/// untouched: they describe position within the untruncated cluster runs.
fn trim_to_fade(beats: Vec<Beat>, start_beat: usize) -> Vec<Beat> {
    if beats.is_empty() {
        return beats;
    }
    let mean_amplitude = beats.iter().map(|b| b.amplitude).sum::<f64>() / beats.len() as f64;
    let fade = beats
        .iter()
        .rposition(|b| b.amplitude >= FADE_AMPLITUDE_RATIO * mean_amplitude)
        .unwrap_or(beats.len() - 1);
    let start_beat = start_beat.min(fade);

    let mut truncated: Vec<Beat> = beats.into_iter().take(fade + 1).skip(start_beat).collect();
    let n = truncated.len();
    for (i, beat) in truncated.iter_mut().enumerate() {
        beat.id = i;
        beat.next = (i + 1).min(n.saturating_sub(1));
        beat.quartile = quartile_of(i, n);
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(seconds: &[f64]) -> Vec<RawBeat> {
        seconds
            .iter()
            .enumerate()
            .map(|(i, &s)| RawBeat {
                seconds: s,
                bar_position: (i % 4) as u32 + 1,
            })
            .collect()
    }

    #[test]
    fn assigns_monotonically_increasing_segments_on_cluster_change() {
        let raw_beats = raw(&[0.0, 0.5, 1.0, 1.5]);
        let labels = vec![0, 0, 1, 1];
        let amplitudes = vec![1.0; 4];
        let audio = vec![0u8; 44_100 * 4 * 2];
        let beats = assemble(&raw_beats, &labels, &amplitudes, &audio, 44_100 * 4, 0);
        assert_eq!(beats[0].segment, 0);
        assert_eq!(beats[1].segment, 0);
        assert_eq!(beats[2].segment, 1);
        assert_eq!(beats[3].segment, 1);
        assert_eq!(beats[1].is, 1);
        assert_eq!(beats[2].is, 0);
    }

    #[test]
    fn quartile_buckets_beats_into_four_groups() {
        assert_eq!(quartile_of(0, 100), 0);
        assert_eq!(quartile_of(99, 100), 3);
    }

    #[test]
    fn start_index_is_frame_aligned() {
        let offset = frame_aligned_byte_offset(1.0, 44_100 * 4);
        assert_eq!(offset % FRAME_BYTES, 0);
    }

    #[test]
    fn start_beat_drops_the_leading_beats_and_renumbers_ids() {
        let raw_beats = raw(&[0.0, 0.5, 1.0, 1.5, 2.0]);
        let labels = vec![0, 0, 0, 0, 0];
        let amplitudes = vec![1.0; 5];
        let audio = vec![0u8; 44_100 * 4 * 4];
        let beats = assemble(&raw_beats, &labels, &amplitudes, &audio, 44_100 * 4, 2);
        assert_eq!(beats.len(), 3);
        assert_eq!(beats[0].id, 0);
        assert_eq!(beats[0].start, 1.0);
    }

    #[test]
    fn fade_trims_a_quiet_tail() {
        let raw_beats = raw(&[0.0, 0.5, 1.0, 1.5, 2.0]);
        let labels = vec![0, 0, 0, 0, 0];
        let amplitudes = vec![1.0, 1.0, 1.0, 0.01, 0.01];
        let audio = vec![0u8; 44_100 * 4 * 4];
        let beats = assemble(&raw_beats, &labels, &amplitudes, &audio, 44_100 * 4, 0);
        assert_eq!(beats.len(), 3);
    }
}
