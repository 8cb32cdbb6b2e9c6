//! # Onset Strength Module
//!
//! Reduces each analysis frame to a single onset strength value and keeps a
//! bounded look-back window of those values for periodicity analysis.
//!
//! The onset measure is the positive change in RMS energy of a high-passed
//! frame, computed in the time domain.

use std::collections::VecDeque;
use std::f32::consts::{PI, SQRT_2};

/// Length of the onset look-back window.
pub const HISTORY_SECONDS: f32 = 8.0;

/// Cutoff of the rumble/DC suppression filter.
pub const HIGH_PASS_CUTOFF_HZ: f32 = 100.0;

/// Coefficient of a first-order high-pass filter at [`HIGH_PASS_CUTOFF_HZ`].
pub fn high_pass_alpha(sample_rate: u32) -> f32 {
    let rc = 1.0 / (2.0 * PI * HIGH_PASS_CUTOFF_HZ);
    let dt = 1.0 / sample_rate.max(1) as f32;
    rc / (rc + dt)
}

/// Number of onset samples covering [`HISTORY_SECONDS`] at the given rate.
pub fn history_capacity(sample_rate: u32, hop_size: usize) -> usize {
    ((HISTORY_SECONDS * sample_rate as f32) / hop_size.max(1) as f32).floor() as usize
}

/// Input loudness of a raw frame on a 0-100 scale, where a full-scale sine
/// reads 100.
pub fn input_level(frame: &[f32]) -> u8 {
    if frame.is_empty() {
        return 0;
    }
    let rms = (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
    (rms * SQRT_2 * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Stateful frame-to-onset converter.
///
/// The filter output and the previous frame energy carry over between calls;
/// only [`reset`](Self::reset) clears them. The first frame after construction
/// or reset has nothing to compare against and reports no onset.
#[derive(Debug, Clone)]
pub struct OnsetExtractor {
    alpha: f32,
    filter_state: f32,
    previous_energy: Option<f32>,
}

impl OnsetExtractor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            alpha: high_pass_alpha(sample_rate),
            filter_state: 0.0,
            previous_energy: None,
        }
    }

    /// Recomputes the filter coefficient; filter state is kept.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.alpha = high_pass_alpha(sample_rate);
    }

    /// Computes the onset strength of one frame.
    ///
    /// # Returns
    /// * `max(0, energy - previous_energy)` where energy is the RMS of the
    ///   high-passed frame, or 0 for the first frame
    pub fn process(&mut self, frame: &[f32]) -> f32 {
        let energy = self.filtered_rms(frame);
        let onset = self
            .previous_energy
            .map_or(0.0, |previous| (energy - previous).max(0.0));
        self.previous_energy = Some(energy);
        onset
    }

    // The filter's input history restarts at zero on every frame: frames
    // overlap, so the previous frame's last sample is not this frame's
    // predecessor. Only the output state is recursive across frames.
    fn filtered_rms(&mut self, frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }

        let mut previous_input = 0.0;
        let mut sum_squares = 0.0;
        for &sample in frame {
            let output = self.alpha * (self.filter_state + sample - previous_input);
            self.filter_state = output;
            previous_input = sample;
            sum_squares += output * output;
        }
        (sum_squares / frame.len() as f32).sqrt()
    }

    pub fn filter_state(&self) -> f32 {
        self.filter_state
    }

    /// Energy of the last processed frame, 0 before the first one.
    pub fn previous_energy(&self) -> f32 {
        self.previous_energy.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.filter_state = 0.0;
        self.previous_energy = None;
    }
}

/// Bounded, chronological FIFO of onset samples.
#[derive(Debug, Clone)]
pub struct OnsetHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl OnsetHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Changes the capacity, evicting the oldest samples if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{FRAME_SIZE, HOP_SIZE};

    #[test]
    fn default_history_covers_eight_seconds() {
        assert_eq!(history_capacity(44_100, HOP_SIZE), 689);
        assert_eq!(history_capacity(48_000, HOP_SIZE), 750);
    }

    #[test]
    fn repeated_frames_settle_to_no_onset() {
        let mut extractor = OnsetExtractor::new(44_100);
        let frame = vec![0.5; FRAME_SIZE];
        let mut strengths = Vec::new();
        for _ in 0..20 {
            strengths.push(extractor.process(&frame));
        }
        // The second frame starts from the first frame's filter tail, so its
        // energy is marginally higher. From then on every frame is identical.
        assert_eq!(strengths[0], 0.0);
        assert!(strengths[1] < 1e-5, "got {}", strengths[1]);
        assert!(strengths[2..].iter().all(|&s| s == 0.0));
        assert!(extractor.filter_state().abs() < 1e-3);
    }

    #[test]
    fn first_frame_after_reset_is_not_an_onset() {
        let mut extractor = OnsetExtractor::new(44_100);
        let loud: Vec<f32> = (0..FRAME_SIZE).map(|i| 0.6 * (i as f32 * 0.2).sin()).collect();

        assert_eq!(extractor.process(&loud), 0.0);
        assert!(extractor.previous_energy() > 0.0);

        extractor.process(&vec![0.0; FRAME_SIZE]);
        extractor.reset();
        assert_eq!(extractor.process(&loud), 0.0);
        assert!(extractor.previous_energy() > 0.0);
    }

    #[test]
    fn onset_is_positive_energy_change_only() {
        let mut extractor = OnsetExtractor::new(44_100);
        let quiet: Vec<f32> = (0..FRAME_SIZE).map(|i| 0.05 * (i as f32 * 0.3).sin()).collect();
        let loud: Vec<f32> = quiet.iter().map(|s| s * 10.0).collect();

        assert_eq!(extractor.process(&quiet), 0.0);
        let rise = extractor.process(&loud);
        let fall = extractor.process(&quiet);

        assert!(rise > 0.0);
        assert_eq!(fall, 0.0);
        assert!(extractor.previous_energy() > 0.0);
    }

    #[test]
    fn empty_frame_has_no_energy() {
        let mut extractor = OnsetExtractor::new(44_100);
        assert_eq!(extractor.process(&[]), 0.0);
        assert_eq!(extractor.previous_energy(), 0.0);
    }

    #[test]
    fn reset_clears_filter_and_energy() {
        let mut extractor = OnsetExtractor::new(44_100);
        extractor.process(&vec![0.8; 256]);
        extractor.reset();
        assert_eq!(extractor.filter_state(), 0.0);
        assert_eq!(extractor.previous_energy(), 0.0);
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = OnsetHistory::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            history.push(value);
        }
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);

        history.set_capacity(2);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert_eq!(history.capacity(), 2);
    }

    #[test]
    fn input_level_scale() {
        assert_eq!(input_level(&[]), 0);
        assert_eq!(input_level(&[0.0; 64]), 0);
        let sine: Vec<f32> = (0..4400)
            .map(|i| (2.0 * PI * 441.0 * i as f32 / 44_100.0).sin())
            .collect();
        assert!(input_level(&sine) >= 99);
    }
}
