//! # Tempo Engine Module
//!
//! Ties the onset extractor, onset history, autocorrelation estimator and
//! smoother into a single per-session object driven one frame at a time.
//!
//! The engine owns all of its state and takes `&mut self` for every
//! operation. Callers feeding frames from one thread and changing settings
//! from another must serialize access themselves (a channel into the audio
//! worker, or a mutex around the engine).

use log::{debug, info};

use crate::autocorr::{AutocorrelationEstimator, MIN_HISTORY_FOR_ESTIMATE};
use crate::config::{ConfigError, EngineConfig};
use crate::frames::HOP_SIZE;
use crate::onset::{history_capacity, input_level, OnsetExtractor, OnsetHistory};
use crate::smoother::TempoSmoother;
use crate::TempoResult;

/// Estimation runs on every n-th processed frame.
pub const ESTIMATION_INTERVAL_FRAMES: u64 = 8;

/// Everything derived from the audio stream. Cleared by [`TempoEngine::reset`].
#[derive(Debug, Clone)]
struct EngineState {
    extractor: OnsetExtractor,
    onset_history: OnsetHistory,
    smoother: TempoSmoother,
    frame_counter: u64,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            extractor: OnsetExtractor::new(config.sample_rate),
            onset_history: OnsetHistory::new(history_capacity(config.sample_rate, HOP_SIZE)),
            smoother: TempoSmoother::new(),
            frame_counter: 0,
        }
    }
}

/// Real-time tempo estimator for one detection session.
#[derive(Debug, Clone)]
pub struct TempoEngine {
    config: EngineConfig,
    state: EngineState,
    estimator: AutocorrelationEstimator,
}

impl Default for TempoEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl TempoEngine {
    /// Creates an engine, clamping the configuration into a usable range.
    pub fn new(config: EngineConfig) -> Self {
        let config = config.clamped();
        info!(
            "Tempo engine: {}-{} BPM, {} smoothing, half/double {}, {} Hz",
            config.min_bpm,
            config.max_bpm,
            config.smoothing,
            if config.prefer_half_double { "on" } else { "off" },
            config.sample_rate
        );
        Self {
            state: EngineState::new(&config),
            config,
            estimator: AutocorrelationEstimator::new(),
        }
    }

    /// Creates an engine, rejecting configurations that would need clamping.
    pub fn try_new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_bpm(&self) -> f32 {
        self.state.smoother.current_bpm()
    }

    pub fn frame_counter(&self) -> u64 {
        self.state.frame_counter
    }

    pub fn onset_history_len(&self) -> usize {
        self.state.onset_history.len()
    }

    pub fn onset_history_capacity(&self) -> usize {
        self.state.onset_history.capacity()
    }

    pub fn bpm_history_len(&self) -> usize {
        self.state.smoother.history_len()
    }

    pub fn filter_state(&self) -> f32 {
        self.state.extractor.filter_state()
    }

    pub fn previous_frame_energy(&self) -> f32 {
        self.state.extractor.previous_energy()
    }

    /// Processes one analysis frame.
    ///
    /// Every frame adds one onset sample. Every
    /// [`ESTIMATION_INTERVAL_FRAMES`]-th frame, once at least
    /// [`MIN_HISTORY_FOR_ESTIMATE`] onsets are held, the history is searched for
    /// a tempo and the smoother is updated.
    ///
    /// # Arguments
    /// * `frame` - One frame of mono samples at the configured sample rate
    ///
    /// # Returns
    /// * The current tempo result; `estimated` is set when this frame
    ///   produced an accepted estimate
    pub fn process_frame(&mut self, frame: &[f32]) -> TempoResult {
        let state = &mut self.state;
        state.frame_counter += 1;

        let onset = state.extractor.process(frame);
        state.onset_history.push(onset);

        let due = state.frame_counter % ESTIMATION_INTERVAL_FRAMES == 0
            && state.onset_history.len() >= MIN_HISTORY_FOR_ESTIMATE;

        let mut result = if due {
            match self
                .estimator
                .estimate(state.onset_history.iter(), &self.config, HOP_SIZE)
            {
                Some(estimate) => state.smoother.update(&estimate, &self.config),
                None => state.smoother.status(),
            }
        } else {
            state.smoother.status()
        };

        result.input_level = input_level(frame);
        result
    }

    /// Replaces the configuration. Takes effect on the next estimation cycle;
    /// accumulated history is kept. A sample rate change retunes the filter
    /// and resizes the onset window, dropping the oldest onsets if it shrinks.
    pub fn update_config(&mut self, config: EngineConfig) {
        let config = config.clamped();
        if config.sample_rate != self.config.sample_rate {
            self.state.extractor.set_sample_rate(config.sample_rate);
            self.state
                .onset_history
                .set_capacity(history_capacity(config.sample_rate, HOP_SIZE));
        }
        debug!("Engine config updated: {:?}", config);
        self.config = config;
    }

    /// Clears all derived state. The configuration is kept.
    pub fn reset(&mut self) {
        self.state = EngineState::new(&self.config);
        info!("Tempo engine reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmoothingLevel;
    use crate::frames::FRAME_SIZE;
    use crate::smoother::INITIAL_BPM;

    fn noise_frame(seed: u32) -> Vec<f32> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..FRAME_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 0.2 - 0.1
            })
            .collect()
    }

    #[test]
    fn estimation_waits_for_enough_history() {
        let mut engine = TempoEngine::default();
        let mut estimated = Vec::new();
        for i in 0..64 {
            let frame = noise_frame(i);
            if engine.process_frame(&frame).estimated {
                estimated.push(engine.frame_counter());
            }
        }
        assert!(estimated.iter().all(|&n| n >= MIN_HISTORY_FOR_ESTIMATE as u64 && n % 8 == 0));
        assert_eq!(engine.onset_history_len(), 64);
    }

    #[test]
    fn onset_history_is_bounded_by_window() {
        let mut engine = TempoEngine::default();
        let frame = noise_frame(7);
        for _ in 0..(engine.onset_history_capacity() + 25) {
            engine.process_frame(&frame);
        }
        assert_eq!(engine.onset_history_len(), 689);
    }

    #[test]
    fn config_update_keeps_history() {
        let mut engine = TempoEngine::default();
        for i in 0..100 {
            engine.process_frame(&noise_frame(i));
        }
        engine.update_config(
            engine
                .config()
                .clone()
                .with_bpm_range(90.0, 150.0)
                .with_smoothing(SmoothingLevel::High),
        );
        assert_eq!(engine.onset_history_len(), 100);
        assert_eq!(engine.config().smoothing, SmoothingLevel::High);

        engine.update_config(engine.config().clone().with_sample_rate(8_000));
        assert_eq!(engine.onset_history_capacity(), 125);
        assert_eq!(engine.onset_history_len(), 100);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut engine = TempoEngine::new(EngineConfig::default().with_bpm_range(70.0, 170.0));
        for i in 0..200 {
            engine.process_frame(&noise_frame(i));
        }
        engine.reset();

        assert_eq!(engine.current_bpm(), INITIAL_BPM);
        assert_eq!(engine.onset_history_len(), 0);
        assert_eq!(engine.bpm_history_len(), 0);
        assert_eq!(engine.frame_counter(), 0);
        assert_eq!(engine.filter_state(), 0.0);
        assert_eq!(engine.previous_frame_energy(), 0.0);
        assert_eq!(engine.config().min_bpm, 70.0);
    }

    #[test]
    fn invalid_config_is_clamped_or_rejected() {
        let config = EngineConfig::default().with_bpm_range(200.0, 40.0);
        assert!(TempoEngine::try_new(config.clone()).is_err());

        let engine = TempoEngine::new(config);
        assert_eq!(engine.config().min_bpm, 40.0);
        assert_eq!(engine.config().max_bpm, 200.0);
    }

    #[test]
    fn silence_reports_initial_tempo() {
        let mut engine = TempoEngine::default();
        let silence = vec![0.0; FRAME_SIZE];
        let mut last = TempoResult::default();
        for _ in 0..120 {
            last = engine.process_frame(&silence);
        }
        assert_eq!(last.bpm, INITIAL_BPM);
        assert_eq!(last.input_level, 0);
        assert!(!last.stable);
    }
}
