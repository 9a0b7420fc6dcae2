//! End-to-end smoke test: synthesizes a short click/tone WAV, runs the full
//! `remix` pipeline over it, and checks the output is internally consistent.

use std::fs::File;
use std::io::Write;

use infinite_remix::{remix, EngineConfig};

const SAMPLE_RATE: u32 = 44_100;

/// Writes a minimal 16-bit PCM stereo WAV: two alternating tones with a
/// periodic click track on top, so beat tracking and clustering both have
/// something real to work with.
fn write_test_wav(path: &std::path::Path, seconds: u32) {
    let n = (SAMPLE_RATE * seconds) as usize;
    let bytes_per_sample = 2usize;
    let channels = 2usize;
    let data_len = n * channels * bytes_per_sample;

    let mut file = File::create(path).unwrap();
    file.write_all(b"RIFF").unwrap();
    file.write_all(&((36 + data_len) as u32).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap();
    file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    file.write_all(&(channels as u16).to_le_bytes()).unwrap();
    file.write_all(&SAMPLE_RATE.to_le_bytes()).unwrap();
    let byte_rate = SAMPLE_RATE * channels as u32 * bytes_per_sample as u32;
    file.write_all(&byte_rate.to_le_bytes()).unwrap();
    file.write_all(&((channels * bytes_per_sample) as u16).to_le_bytes()).unwrap();
    file.write_all(&16u16.to_le_bytes()).unwrap();
    file.write_all(b"data").unwrap();
    file.write_all(&(data_len as u32).to_le_bytes()).unwrap();

    let bpm = 120.0;
    let period = (SAMPLE_RATE as f64 * 60.0 / bpm) as usize;
    for i in 0..n {
        let t = i as f64 / SAMPLE_RATE as f64;
        let section = (t / 2.0) as u32 % 2;
        let freq = if section == 0 { 220.0 } else { 330.0 };
        let click = if i % period < 200 { 0.3 } else { 0.0 };
        let sample = 0.4 * (2.0 * std::f64::consts::PI * freq * t).sin() + click;
        let clamped = sample.clamp(-1.0, 1.0);
        let quantized = (clamped * 32000.0) as i16;
        file.write_all(&quantized.to_le_bytes()).unwrap();
        file.write_all(&quantized.to_le_bytes()).unwrap();
    }
}

#[test]
fn remixes_a_synthesized_track_end_to_end() {
    let path = std::env::temp_dir().join("infinite_remix_smoke_test.wav");
    write_test_wav(&path, 12);

    let mut config = EngineConfig::new(&path);
    config.rng_seed = Some(1);
    let output = remix(&config).expect("remix should succeed on a synthesized track");

    assert!(output.beats.len() > 4, "{}", output.beats.len());
    assert!(output.clusters >= 1);
    assert_eq!(output.play_vector.len(), 1 << 20);
    assert!(output.play_vector.iter().all(|e| e.beat < output.beats.len()));
    assert_eq!(output.play_vector[0].beat, 0);
    assert_eq!(output.play_vector[0].seq_pos, 0);
    for beat in &output.beats {
        assert!(beat.stop_index <= output.raw_audio.len());
        assert!(beat.start_index <= beat.stop_index);
    }
    assert!(output.outro.len() <= output.beats.len());

    let _ = std::fs::remove_file(&path);
}
