//! Walks the jump graph built by [`crate::jump_graph`] into a concrete play
//! vector: mostly play the next beat in sequence, but occasionally jump to
//! an equivalent beat elsewhere in the track so the song can run forever.
//! A recency FIFO of recently-visited segments keeps a jump from landing
//! back where it just came from, a quartile-distance fallback and a final
//! `start_beat` escape hatch keep a heavily recency-filtered beat from ever
//! truly stalling, and a forced jump after too many straight plays keeps
//! long stretches from degenerating into a plain linear replay.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;

use crate::beats::Beat;

/// One entry of the play vector: which beat plays, and where it sits in its
/// current jump-free run (`seq_pos` out of a `seq_len`-beat target).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayEntry {
    pub beat: usize,
    pub seq_len: usize,
    pub seq_pos: usize,
}

/// Candidate run lengths a new `min_sequence` is drawn from:
/// `16, 20, 24, ..` up to (exclusive) `max_sequence_len`.
fn sequence_choices(max_sequence_len: usize) -> Vec<usize> {
    let choices: Vec<usize> = (16..max_sequence_len).step_by(4).collect();
    if choices.is_empty() {
        vec![max_sequence_len.max(4)]
    } else {
        choices
    }
}

pub struct PlayWalker<'a> {
    beats: &'a [Beat],
    rng: Box<dyn RngCore>,
    recent: VecDeque<usize>,
    recent_capacity: usize,
    max_sequence_len: usize,
    max_beats_between_jumps: usize,
    start_beat: usize,
    n_beats: usize,
}

impl<'a> PlayWalker<'a> {
    /// `tempo_bpm` drives `max_sequence_len` (`round((tempo/120)*48)`,
    /// floored to a multiple of 4); `n_segments` sizes the recency FIFO to
    /// `max(1, round(0.25 * n_segments))`.
    pub fn new(beats: &'a [Beat], n_segments: usize, tempo_bpm: f64, start_beat: usize, seed: Option<u64>) -> Self {
        let rng: Box<dyn RngCore> = match seed {
            Some(seed) => Box::new(ChaCha8Rng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        let raw_max_len = ((tempo_bpm / 120.0) * 48.0).round().max(4.0) as usize;
        let max_sequence_len = (raw_max_len / 4) * 4;
        let recent_capacity = ((0.25 * n_segments as f64).round() as usize).max(1);
        let max_beats_between_jumps = (0.1 * beats.len() as f64).round().max(1.0) as usize;

        Self {
            beats,
            rng,
            recent: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
            max_sequence_len,
            max_beats_between_jumps,
            start_beat: start_beat.min(beats.len().saturating_sub(1)),
            n_beats: beats.len(),
        }
    }

    fn draw_min_sequence(&mut self) -> usize {
        let choices = sequence_choices(self.max_sequence_len);
        choices[self.rng.gen_range(0..choices.len())]
    }

    /// Produces `length` play-vector entries starting at beat 0, the first
    /// of which is always `{beat: 0, seq_len: initial min_sequence, seq_pos: 0}`.
    pub fn walk(&mut self, length: usize) -> Vec<PlayEntry> {
        if self.beats.is_empty() || length == 0 {
            return Vec::new();
        }

        let initial_pick = self.draw_min_sequence();
        let mut min_sequence = initial_pick.max(self.start_beat);
        let mut current_sequence = 0usize;
        let mut beats_since_jump = 0usize;
        let mut failed_jumps = 0usize;
        let mut current = 0usize;

        let mut out = Vec::with_capacity(length);
        out.push(PlayEntry {
            beat: current,
            seq_len: min_sequence,
            seq_pos: 0,
        });
        self.remember_segment(self.beats[current].segment);

        for _ in 1..length {
            current_sequence += 1;
            let jump_by_sequence = current_sequence == min_sequence;
            let jump_by_staleness = beats_since_jump >= self.max_beats_between_jumps;
            let will_jump = jump_by_sequence || jump_by_staleness;

            let mut resolved = None;
            if will_jump {
                resolved = self.resolve_jump(current, &mut beats_since_jump, &mut failed_jumps);
            }

            current = match resolved {
                Some(next) => {
                    current_sequence = 0;
                    beats_since_jump = 0;
                    failed_jumps = 0;
                    min_sequence = self.draw_min_sequence();
                    next
                }
                None => {
                    if !will_jump {
                        beats_since_jump += 1;
                    } else if jump_by_staleness && !jump_by_sequence {
                        // Forced jump couldn't be satisfied: signal "jump ASAP".
                        current_sequence = min_sequence;
                    }
                    self.beats[current].next
                }
            };

            self.remember_segment(self.beats[current].segment);
            out.push(PlayEntry {
                beat: current,
                seq_len: min_sequence,
                seq_pos: current_sequence,
            });
        }

        out
    }

    fn resolve_jump(
        &mut self,
        current: usize,
        beats_since_jump: &mut usize,
        failed_jumps: &mut usize,
    ) -> Option<usize> {
        let beat = &self.beats[current];

        let non_recent: Vec<usize> = beat
            .jump_candidates
            .iter()
            .copied()
            .filter(|&c| !self.recent.contains(&self.beats[c].segment))
            .collect();

        if !non_recent.is_empty() {
            return Some(non_recent[self.rng.gen_range(0..non_recent.len())]);
        }

        *beats_since_jump += 1;
        *failed_jumps += 1;

        if (*failed_jumps as f64) < 0.1 * self.n_beats as f64 {
            return None;
        }

        let own_quartile = beat.quartile;
        let non_quartile: Vec<usize> = beat
            .jump_candidates
            .iter()
            .copied()
            .filter(|&c| self.beats[c].quartile != own_quartile)
            .collect();

        if !non_quartile.is_empty() {
            return non_quartile
                .into_iter()
                .max_by_key(|&c| (c as i64 - current as i64).abs());
        }

        if (*failed_jumps as f64) >= 0.2 * self.n_beats as f64 {
            return Some(self.start_beat);
        }

        None
    }

    fn remember_segment(&mut self, segment: usize) {
        if self.recent.contains(&segment) {
            return;
        }
        self.recent.push_back(segment);
        if self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(n: usize) -> Vec<Beat> {
        (0..n)
            .map(|i| Beat {
                id: i,
                start: i as f64,
                duration: 1.0,
                start_index: 0,
                stop_index: 0,
                cluster: i % 2,
                segment: i / 2,
                is: i % 2,
                amplitude: 1.0,
                next: (i + 1) % n,
                jump_candidates: (0..n).filter(|&j| j != i && j % 2 == i % 2).collect(),
                quartile: i / (n / 4).max(1),
            })
            .collect()
    }

    #[test]
    fn walk_produces_requested_length() {
        let beats = track(16);
        let n_segments = beats.iter().map(|b| b.segment).max().unwrap_or(0) + 1;
        let mut walker = PlayWalker::new(&beats, n_segments, 120.0, 0, Some(42));
        let play = walker.walk(200);
        assert_eq!(play.len(), 200);
        assert!(play.iter().all(|e| e.beat < beats.len()));
    }

    #[test]
    fn seeded_walks_are_deterministic() {
        let beats = track(16);
        let n_segments = beats.iter().map(|b| b.segment).max().unwrap_or(0) + 1;
        let a = PlayWalker::new(&beats, n_segments, 120.0, 0, Some(7)).walk(300);
        let b = PlayWalker::new(&beats, n_segments, 120.0, 0, Some(7)).walk(300);
        assert_eq!(a, b);
    }

    #[test]
    fn first_entry_starts_at_beat_zero_with_seq_pos_zero() {
        let beats = track(16);
        let n_segments = beats.iter().map(|b| b.segment).max().unwrap_or(0) + 1;
        let mut walker = PlayWalker::new(&beats, n_segments, 120.0, 0, Some(1));
        let play = walker.walk(50);
        assert_eq!(play[0].beat, 0);
        assert_eq!(play[0].seq_pos, 0);
    }

    #[test]
    fn never_plays_the_same_beat_twice_in_a_row() {
        let beats = track(16);
        let n_segments = beats.iter().map(|b| b.segment).max().unwrap_or(0) + 1;
        let mut walker = PlayWalker::new(&beats, n_segments, 120.0, 0, Some(3));
        let play = walker.walk(500);
        for pair in play.windows(2) {
            assert_ne!(pair[0].beat, pair[1].beat);
        }
    }
}
