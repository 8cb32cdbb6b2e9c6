//! # Tempo Smoothing Module
//!
//! Turns noisy per-cycle estimates into the tempo that is actually reported.
//!
//! ## Pipeline
//! 1. Low-confidence estimates are dropped
//! 2. Optional half/double correction against the runner-up lag
//! 3. Exponential smoothing (skipped for the first accepted estimate)
//! 4. Hysteresis so marginal re-estimates do not make the display flicker
//! 5. Stability and an advisory half/double suggestion from recent history

use std::collections::VecDeque;

use log::debug;
use serde::{Serialize, Serializer};

use crate::autocorr::TempoEstimate;
use crate::config::EngineConfig;
use crate::TempoResult;

/// Estimates at or below this confidence are discarded.
pub const MIN_CONFIDENCE: f32 = 30.0;
/// Above this confidence a smoothed value is committed even if it barely moved.
pub const HIGH_CONFIDENCE: f32 = 70.0;
/// Smallest change that is committed without high confidence.
pub const HYSTERESIS_BPM: f32 = 2.0;
/// How close the runner-up must be to half/double the winner.
pub const HALF_DOUBLE_TOLERANCE_BPM: f32 = 3.0;
/// Number of committed tempos kept for stability analysis.
pub const BPM_HISTORY_LEN: usize = 20;
/// Tempo reported before anything has been detected.
pub const INITIAL_BPM: f32 = 120.0;

const STABILITY_WINDOW: usize = 10;
const SUGGESTION_WINDOW: usize = 5;
const MIN_HISTORY_FOR_STABILITY: usize = 5;
const STABLE_THRESHOLD: f32 = 60.0;

/// Octave relationship between a detected and a suggested tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoMultiplier {
    Half,
    Double,
}

impl TempoMultiplier {
    pub fn factor(self) -> f32 {
        match self {
            TempoMultiplier::Half => 0.5,
            TempoMultiplier::Double => 2.0,
        }
    }
}

impl Serialize for TempoMultiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(self.factor())
    }
}

/// Outcome of the half/double check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfDoubleCorrection {
    pub bpm: f32,
    pub multiplier: Option<TempoMultiplier>,
}

/// Replaces `raw_bpm` by its half or double when the runner-up lag points
/// there and the result stays inside the configured range.
pub fn correct_half_double(
    raw_bpm: f32,
    second_best_bpm: f32,
    config: &EngineConfig,
) -> HalfDoubleCorrection {
    let half = raw_bpm / 2.0;
    let double = raw_bpm * 2.0;

    if (second_best_bpm - half).abs() < HALF_DOUBLE_TOLERANCE_BPM && half >= config.min_bpm {
        return HalfDoubleCorrection {
            bpm: half,
            multiplier: Some(TempoMultiplier::Half),
        };
    }
    if (second_best_bpm - double).abs() < HALF_DOUBLE_TOLERANCE_BPM && double <= config.max_bpm {
        return HalfDoubleCorrection {
            bpm: double,
            multiplier: Some(TempoMultiplier::Double),
        };
    }
    HalfDoubleCorrection {
        bpm: raw_bpm,
        multiplier: None,
    }
}

fn round_one_decimal(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

/// Committed tempo plus the recent history it is judged against.
#[derive(Debug, Clone)]
pub struct TempoSmoother {
    current_bpm: f32,
    history: VecDeque<f32>,
}

impl Default for TempoSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoSmoother {
    pub fn new() -> Self {
        Self {
            current_bpm: INITIAL_BPM,
            history: VecDeque::with_capacity(BPM_HISTORY_LEN),
        }
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    /// Committed tempos, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn recent(&self, count: usize) -> Vec<f32> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).copied().collect()
    }

    /// Stability score 0-100 from the spread of the last ten committed
    /// tempos; 0 until five are available.
    pub fn stability(&self) -> f32 {
        if self.history.len() < MIN_HISTORY_FOR_STABILITY {
            return 0.0;
        }
        let recent = self.recent(STABILITY_WINDOW);
        let avg = mean(&recent);
        let variance = recent.iter().map(|v| (v - avg).powi(2)).sum::<f32>() / recent.len() as f32;
        (100.0 - variance.sqrt() * 10.0).max(0.0)
    }

    pub fn is_stable(&self) -> bool {
        self.history.len() > MIN_HISTORY_FOR_STABILITY && self.stability() > STABLE_THRESHOLD
    }

    /// Advisory octave suggestion from the mean of the last five committed
    /// tempos. Never changes the committed tempo.
    pub fn suggested_multiplier(&self, config: &EngineConfig) -> Option<TempoMultiplier> {
        if self.history.len() < SUGGESTION_WINDOW {
            return None;
        }
        let avg = mean(&self.recent(SUGGESTION_WINDOW));
        if avg > 150.0 && avg / 2.0 >= config.min_bpm {
            Some(TempoMultiplier::Half)
        } else if avg < 90.0 && avg * 2.0 <= config.max_bpm {
            Some(TempoMultiplier::Double)
        } else {
            None
        }
    }

    /// The result reported on frames without an accepted estimate.
    pub fn status(&self) -> TempoResult {
        TempoResult {
            bpm: round_one_decimal(self.current_bpm),
            confidence: self.stability().round() as u8,
            stable: self.is_stable(),
            ..TempoResult::default()
        }
    }

    /// Folds one estimate into the committed tempo.
    pub fn update(&mut self, estimate: &TempoEstimate, config: &EngineConfig) -> TempoResult {
        if estimate.confidence <= MIN_CONFIDENCE {
            debug!(
                "Discarding estimate {:.2} BPM at confidence {:.1}",
                estimate.raw_bpm, estimate.confidence
            );
            return self.status();
        }

        let correction = if config.prefer_half_double {
            correct_half_double(estimate.raw_bpm, estimate.second_best_bpm, config)
        } else {
            HalfDoubleCorrection {
                bpm: estimate.raw_bpm,
                multiplier: None,
            }
        };

        let smoothed = if self.history.is_empty() {
            correction.bpm
        } else {
            let alpha = config.smoothing.alpha();
            alpha * correction.bpm + (1.0 - alpha) * self.current_bpm
        };

        if (smoothed - self.current_bpm).abs() > HYSTERESIS_BPM
            || estimate.confidence > HIGH_CONFIDENCE
        {
            self.current_bpm = smoothed;
        }

        if self.history.len() == BPM_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(self.current_bpm);

        TempoResult {
            bpm: round_one_decimal(self.current_bpm),
            confidence: estimate.confidence.clamp(0.0, 100.0).round() as u8,
            stable: self.is_stable(),
            suggested_multiplier: if config.prefer_half_double {
                self.suggested_multiplier(config)
            } else {
                None
            },
            applied_multiplier: correction.multiplier,
            estimated: true,
            input_level: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current_bpm = INITIAL_BPM;
        self.history.clear();
    }
}
