//! Beat-synchronous feature extraction: constant-Q chroma, MFCC and RMS
//! amplitude, all aggregated down to one column per beat via [`sync`].

pub mod cqt;
pub mod mfcc;
pub mod rms;
pub mod sync;

use ndarray::{Array1, Array2};

use crate::beat_tracker::RawBeat;

pub const HOP_LENGTH: usize = 512;

/// Beat-synchronous features for one song: one column per beat.
pub struct FeatureSet {
    pub chroma: Array2<f64>,
    pub mfcc: Array2<f64>,
    pub rms: Array1<f64>,
}

pub fn extract(mono: &[f32], sample_rate: u32, beats: &[RawBeat]) -> FeatureSet {
    let cqt = cqt::compute(mono, sample_rate, HOP_LENGTH);
    let mfcc = mfcc::compute(mono, sample_rate);
    let rms = rms::compute(mono);

    let n_frames = cqt.ncols().min(mfcc.ncols()).min(rms.len());
    let frame_times = sync::frame_times(sample_rate, HOP_LENGTH, n_frames);
    let beat_times: Vec<f64> = beats.iter().map(|b| b.seconds).collect();
    let beat_frames = sync::beat_frame_indices(&beat_times, &frame_times);

    FeatureSet {
        chroma: sync::sync_median(&cqt.slice(ndarray::s![.., ..n_frames]).to_owned(), &beat_frames),
        mfcc: sync::sync_median(&mfcc.slice(ndarray::s![.., ..n_frames]).to_owned(), &beat_frames),
        rms: sync::sync_median_1d(&rms.slice(ndarray::s![..n_frames]).to_owned(), &beat_frames),
    }
}
