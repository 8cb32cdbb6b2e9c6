// tempo-core/src/lib.rs

//! The core logic for the live tempo detector.
//! This crate is responsible for onset extraction, autocorrelation tempo
//! estimation, smoothing and tap tempo. It is completely headless
//! and contains no UI code; microphone capture is behind the `capture`
//! feature.

pub mod autocorr;
#[cfg(feature = "capture")]
pub mod audio;
pub mod config;
pub mod engine;
pub mod frames;
pub mod onset;
pub mod smoother;
pub mod tap;

use serde::Serialize;

pub use config::{ConfigError, EngineConfig, SmoothingLevel};
pub use engine::TempoEngine;
pub use smoother::TempoMultiplier;
pub use tap::{TapResult, TapTempo, TapTempoTimer};

/// Represents the tempo reported after one processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TempoResult {
    /// Committed tempo, rounded to one decimal.
    pub bpm: f32,
    /// Estimate confidence on accepted estimation cycles, stability otherwise (0-100).
    pub confidence: u8,
    /// Whether recent committed tempos agree closely.
    pub stable: bool,
    /// Advisory octave change based on recent history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_multiplier: Option<TempoMultiplier>,
    /// Half/double correction applied in this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_multiplier: Option<TempoMultiplier>,
    /// Set when this frame ran an estimation cycle whose estimate was accepted.
    pub estimated: bool,
    /// Loudness of the frame, 0-100.
    pub input_level: u8,
}
