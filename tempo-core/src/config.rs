//! # Engine Configuration Module
//!
//! Holds the user-tunable parameters of the tempo engine and the rules that
//! keep them usable. The engine accepts any configuration: out-of-range values
//! are clamped (and logged) on construction and on live updates. Configuration
//! files are held to a stricter standard and rejected with a [`ConfigError`].
//!
//! ## Features
//! - Three closed smoothing presets mapped to fixed EMA coefficients
//! - Lenient clamping for live updates
//! - Strict validation and JSON loading for config files

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::HOP_SIZE;

/// Lower tempo bound used when none (or an unusable one) is supplied.
pub const DEFAULT_MIN_BPM: f32 = 60.0;
/// Upper tempo bound used when none (or an unusable one) is supplied.
pub const DEFAULT_MAX_BPM: f32 = 180.0;
/// Sample rate assumed when the capture side reports none.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Errors raised while validating or loading an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BPM bounds must be positive and finite (got {min_bpm}..{max_bpm})")]
    NonPositiveBpm { min_bpm: f32, max_bpm: f32 },
    #[error("minimum BPM {min_bpm} must be below maximum BPM {max_bpm}")]
    InvertedRange { min_bpm: f32, max_bpm: f32 },
    #[error("maximum BPM {max_bpm} exceeds the {limit:.1} BPM resolvable at {sample_rate} Hz")]
    MaxBpmTooHigh {
        max_bpm: f32,
        limit: f32,
        sample_rate: u32,
    },
    #[error("sample rate must be positive")]
    ZeroSampleRate,
    #[error("unknown smoothing level '{0}' (expected low, medium or high)")]
    UnknownSmoothing(String),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How aggressively the displayed tempo follows new estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SmoothingLevel {
    /// The exponential smoothing coefficient for this preset.
    pub fn alpha(self) -> f32 {
        match self {
            SmoothingLevel::Low => 0.3,
            SmoothingLevel::Medium => 0.15,
            SmoothingLevel::High => 0.05,
        }
    }
}

impl FromStr for SmoothingLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(SmoothingLevel::Low),
            "medium" => Ok(SmoothingLevel::Medium),
            "high" => Ok(SmoothingLevel::High),
            other => Err(ConfigError::UnknownSmoothing(other.to_string())),
        }
    }
}

impl fmt::Display for SmoothingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SmoothingLevel::Low => "low",
            SmoothingLevel::Medium => "medium",
            SmoothingLevel::High => "high",
        };
        f.write_str(name)
    }
}

/// Parameters of a tempo detection session.
///
/// Field names also accept the camelCase spelling used by the settings UI
/// (`minBPM`, `maxBPM`, `preferHalfDouble`, `sampleRate`) when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(alias = "minBPM")]
    pub min_bpm: f32,
    #[serde(alias = "maxBPM")]
    pub max_bpm: f32,
    pub smoothing: SmoothingLevel,
    #[serde(alias = "preferHalfDouble")]
    pub prefer_half_double: bool,
    #[serde(alias = "sampleRate")]
    pub sample_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_bpm: DEFAULT_MIN_BPM,
            max_bpm: DEFAULT_MAX_BPM,
            smoothing: SmoothingLevel::default(),
            prefer_half_double: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// The fastest tempo the onset hop can represent: a lag of one onset sample.
pub fn max_resolvable_bpm(sample_rate: u32) -> f32 {
    60.0 * sample_rate as f32 / HOP_SIZE as f32
}

impl EngineConfig {
    pub fn with_bpm_range(mut self, min_bpm: f32, max_bpm: f32) -> Self {
        self.min_bpm = min_bpm;
        self.max_bpm = max_bpm;
        self
    }

    pub fn with_smoothing(mut self, smoothing: SmoothingLevel) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_half_double(mut self, prefer_half_double: bool) -> Self {
        self.prefer_half_double = prefer_half_double;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Checks the configuration without modifying it.
    ///
    /// # Returns
    /// * `Ok(())` - The configuration can be used as-is
    /// * `Err(e)` - The first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if !is_positive(self.min_bpm) || !is_positive(self.max_bpm) {
            return Err(ConfigError::NonPositiveBpm {
                min_bpm: self.min_bpm,
                max_bpm: self.max_bpm,
            });
        }
        if self.min_bpm >= self.max_bpm {
            return Err(ConfigError::InvertedRange {
                min_bpm: self.min_bpm,
                max_bpm: self.max_bpm,
            });
        }
        let limit = max_resolvable_bpm(self.sample_rate);
        if self.max_bpm > limit {
            return Err(ConfigError::MaxBpmTooHigh {
                max_bpm: self.max_bpm,
                limit,
                sample_rate: self.sample_rate,
            });
        }
        Ok(())
    }

    /// Returns a usable copy of this configuration, repairing whatever
    /// [`validate`](Self::validate) would reject.
    pub fn clamped(mut self) -> Self {
        if self.sample_rate == 0 {
            warn!("Sample rate 0 is invalid, using {} Hz", DEFAULT_SAMPLE_RATE);
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if !is_positive(self.min_bpm) {
            warn!("Minimum BPM {} is invalid, using {}", self.min_bpm, DEFAULT_MIN_BPM);
            self.min_bpm = DEFAULT_MIN_BPM;
        }
        if !is_positive(self.max_bpm) {
            warn!("Maximum BPM {} is invalid, using {}", self.max_bpm, DEFAULT_MAX_BPM);
            self.max_bpm = DEFAULT_MAX_BPM;
        }
        if self.min_bpm > self.max_bpm {
            warn!("BPM range {}..{} is inverted, swapping", self.min_bpm, self.max_bpm);
            std::mem::swap(&mut self.min_bpm, &mut self.max_bpm);
        }

        let limit = max_resolvable_bpm(self.sample_rate);
        if self.max_bpm > limit {
            warn!("Maximum BPM {} exceeds resolvable {:.1}, capping", self.max_bpm, limit);
            self.max_bpm = limit;
        }
        if self.min_bpm >= self.max_bpm {
            warn!("BPM range is empty at {}, widening", self.min_bpm);
            if self.max_bpm + 1.0 <= limit {
                self.max_bpm += 1.0;
            } else {
                self.min_bpm = (self.max_bpm - 1.0).max(self.max_bpm * 0.5);
            }
        }
        self
    }

    /// Parses and validates a JSON configuration. Missing fields take their
    /// default values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }
}

fn is_positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}
