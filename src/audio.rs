//! Decodes a song to stereo 44.1kHz PCM via `symphonia`+`rubato`.
//!
//! Adapted from `bliss_audio::song::decoder::symphonia::SymphoniaDecoder`,
//! which decodes to mono 22050Hz for song-similarity fingerprinting. The
//! remix engine instead needs the native stereo signal (to re-encode the
//! final audio) and a higher sample rate (44.1kHz, librosa's default),
//! plus silence trimming at both ends.

use std::fs::File;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units;

use crate::error::RemixError;

pub const SAMPLE_RATE: u32 = 44_100;
const MAX_DECODE_RETRIES: usize = 3;
/// Frame / hop used by the silence-trim envelope detector.
const TRIM_FRAME: usize = 2048;
const TRIM_HOP: usize = 512;
/// Trim threshold, dB below the signal's peak frame energy.
const TRIM_THRESHOLD_DB: f32 = 60.0;

/// A decoded, trimmed, stereo 44.1kHz audio buffer.
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// Interleaved `[left, right]` samples.
    pub stereo: Vec<[f32; 2]>,
}

impl AudioBuffer {
    pub fn duration_sec(&self) -> f64 {
        self.stereo.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn mono(&self) -> Vec<f32> {
        self.stereo.iter().map(|[l, r]| (l + r) * 0.5).collect()
    }

    /// Interleaved 16-bit PCM, little-endian, matching the byte layout
    /// `Beat::start_index`/`stop_index` address into.
    pub fn int16_stereo_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stereo.len() * 4);
        for [l, r] in &self.stereo {
            for sample in [l, r] {
                let clamped = sample.clamp(-1.0, 1.0);
                let quantized = (clamped * f32::from(i16::MAX)) as i16;
                out.extend_from_slice(&quantized.to_le_bytes());
            }
        }
        out
    }

    pub fn bytes_per_second(&self) -> usize {
        // 2 channels * 2 bytes per i16 sample
        self.sample_rate as usize * 4
    }
}

/// Decode `path`, resample to 44.1kHz stereo, and trim leading/trailing
/// silence. This is the crate's sole entry point into `symphonia`/`rubato`.
pub fn load(path: &Path) -> Result<AudioBuffer, RemixError> {
    let file = File::open(path).map_err(|e| RemixError::Decode(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let hint = Hint::new();
    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| RemixError::Decode(e.to_string()))?;
    let mut format: Box<dyn FormatReader> = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| RemixError::Decode("no supported audio track".into()))?
        .clone();
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| RemixError::Decode(e.to_string()))?;

    let mut stereo: Vec<[f32; 2]> = Vec::new();
    let mut spec: Option<SignalSpec> = None;
    let mut decode_errors = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(RemixError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                decode_errors += 1;
                if decode_errors > MAX_DECODE_RETRIES {
                    return Err(RemixError::Decode("too many decode errors".into()));
                }
                continue;
            }
            Err(e) => return Err(RemixError::Decode(e.to_string())),
        };
        let this_spec = *decoded.spec();
        spec.get_or_insert(this_spec);
        push_frames(decoded, this_spec, &mut stereo);
    }

    let spec = spec.ok_or_else(|| RemixError::Decode("no decodable audio frames".into()))?;
    let resampled = resample_to(stereo, spec.rate, SAMPLE_RATE)?;
    let trimmed = trim_silence(resampled);

    Ok(AudioBuffer {
        sample_rate: SAMPLE_RATE,
        stereo: trimmed,
    })
}

fn push_frames(decoded: AudioBufferRef, spec: SignalSpec, out: &mut Vec<[f32; 2]>) {
    let duration = units::Duration::from(decoded.capacity() as u64);
    let mut buffer = SampleBuffer::<f32>::new(duration, spec);
    buffer.copy_interleaved_ref(decoded);
    let samples = buffer.samples();
    let channels = spec.channels.count().max(1);
    match channels {
        1 => out.extend(samples.iter().map(|&s| [s, s])),
        2 => out.extend(samples.chunks_exact(2).map(|c| [c[0], c[1]])),
        n => out.extend(samples.chunks_exact(n).map(|c| {
            let avg = c.iter().sum::<f32>() / n as f32;
            [avg, avg]
        })),
    }
}

fn resample_to(
    stereo: Vec<[f32; 2]>,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<[f32; 2]>, RemixError> {
    if from_rate == to_rate || stereo.is_empty() {
        return Ok(stereo);
    }
    const CHUNK_SIZE: usize = 1024;
    let mut resampler = FftFixedIn::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 1, 2)
        .map_err(|e| RemixError::Decode(e.to_string()))?;
    let delay = resampler.output_delay();
    let new_length = stereo.len() * to_rate as usize / from_rate as usize;

    let left: Vec<f32> = stereo.iter().map(|s| s[0]).collect();
    let right: Vec<f32> = stereo.iter().map(|s| s[1]).collect();
    let mut left_iter = left.into_iter().peekable();
    let mut right_iter = right.into_iter().peekable();

    let mut output_buffer = resampler.output_buffer_allocate(true);
    let mut out_left = Vec::with_capacity(new_length + delay);
    let mut out_right = Vec::with_capacity(new_length + delay);

    while left_iter.peek().is_some() {
        let chunk_left: Vec<f32> = left_iter
            .by_ref()
            .chain(std::iter::repeat(0.0))
            .take(CHUNK_SIZE)
            .collect();
        let chunk_right: Vec<f32> = right_iter
            .by_ref()
            .chain(std::iter::repeat(0.0))
            .take(CHUNK_SIZE)
            .collect();
        let (_, written) = resampler
            .process_into_buffer(&[&chunk_left, &chunk_right], output_buffer.as_mut_slice(), None)
            .map_err(|e| RemixError::Decode(e.to_string()))?;
        out_left.extend_from_slice(&output_buffer[0][..written]);
        out_right.extend_from_slice(&output_buffer[1][..written]);
    }
    if out_left.len() < new_length + delay {
        let (_, written) = resampler
            .process_partial_into_buffer(
                Option::<&[&[f32]]>::None,
                output_buffer.as_mut_slice(),
                None,
            )
            .map_err(|e| RemixError::Decode(e.to_string()))?;
        out_left.extend_from_slice(&output_buffer[0][..written]);
        out_right.extend_from_slice(&output_buffer[1][..written]);
    }

    let end = (new_length + delay).min(out_left.len());
    let start = delay.min(end);
    Ok(out_left[start..end]
        .iter()
        .zip(out_right[start..end].iter())
        .map(|(&l, &r)| [l, r])
        .collect())
}

/// Trims leading/trailing frames whose mono RMS envelope is more than
/// `TRIM_THRESHOLD_DB` below the buffer's peak frame energy, the same
/// top/tail trim librosa's `effects.trim` performs before analysis.
fn trim_silence(stereo: Vec<[f32; 2]>) -> Vec<[f32; 2]> {
    if stereo.len() < TRIM_FRAME {
        return stereo;
    }
    let mono: Vec<f32> = stereo.iter().map(|[l, r]| (l + r) * 0.5).collect();

    let frame_db: Vec<f32> = mono
        .windows(TRIM_FRAME)
        .step_by(TRIM_HOP)
        .map(|w| {
            let rms = (w.iter().map(|x| x * x).sum::<f32>() / w.len() as f32).sqrt();
            20.0 * rms.max(1e-10).log10()
        })
        .collect();
    if frame_db.is_empty() {
        return stereo;
    }
    let peak_db = frame_db.iter().cloned().fold(f32::MIN, f32::max);
    let threshold = peak_db - TRIM_THRESHOLD_DB;

    let first_loud = frame_db.iter().position(|&db| db > threshold);
    let last_loud = frame_db.iter().rposition(|&db| db > threshold);
    let (Some(first), Some(last)) = (first_loud, last_loud) else {
        return stereo;
    };

    let start = first * TRIM_HOP;
    let stop = ((last * TRIM_HOP) + TRIM_FRAME).min(stereo.len());
    stereo[start..stop].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, n: usize) -> Vec<[f32; 2]> {
        (0..n)
            .map(|i| {
                let t = i as f32 / sr as f32;
                let s = (2.0 * std::f32::consts::PI * freq * t).sin();
                [s, s]
            })
            .collect()
    }

    #[test]
    fn trim_removes_leading_and_trailing_silence() {
        let sr = 44_100;
        let mut signal = vec![[0.0f32; 2]; sr as usize / 2];
        signal.extend(sine(440.0, sr, sr as usize));
        signal.extend(vec![[0.0f32; 2]; sr as usize / 2]);

        let trimmed = trim_silence(signal);
        assert!(trimmed.len() < sr as usize * 2);
        assert!(trimmed.len() >= sr as usize);
    }

    #[test]
    fn int16_round_trip_is_amplitude_preserving() {
        let buf = AudioBuffer {
            sample_rate: SAMPLE_RATE,
            stereo: vec![[0.5, -0.5], [1.0, -1.0]],
        };
        let bytes = buf.int16_stereo_bytes();
        assert_eq!(bytes.len(), 8);
        let first_left = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert!(first_left > 16000 && first_left < 16900);
    }
}
