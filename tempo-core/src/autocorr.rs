//! # Autocorrelation Tempo Module
//!
//! Finds the dominant pulse period in the onset history. The history is
//! z-score normalized, then every candidate lag inside the configured tempo
//! range is scored by the mean product of the signal with its shifted copy.
//!
//! The best and second-best scores are tracked in a single scan. The second
//! best is simply the runner-up score seen in scan order, not a separate local
//! maximum, so it can sit right next to the winning lag.

use log::debug;

use crate::config::EngineConfig;

/// Minimum number of onset samples before an estimate is attempted.
pub const MIN_HISTORY_FOR_ESTIMATE: usize = 50;

const MIN_STD_DEV: f32 = 1e-10;

/// Raw output of one estimation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub raw_bpm: f32,
    /// Peak prominence of the best lag, 0-100.
    pub confidence: f32,
    pub second_best_bpm: f32,
}

/// Converts a lag in onset samples to a tempo.
pub fn lag_to_bpm(lag: usize, sample_rate: u32, hop_size: usize) -> f32 {
    60.0 * sample_rate as f32 / (lag as f32 * hop_size as f32)
}

/// Converts a tempo to the (floored) lag in onset samples.
pub fn bpm_to_lag(bpm: f32, sample_rate: u32, hop_size: usize) -> usize {
    (60.0 * sample_rate as f32 / (bpm * hop_size as f32)).floor() as usize
}

/// Z-score normalizes a signal.
///
/// Signals with (near) zero variance are only mean-centered.
pub fn normalize(signal: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(signal.len());
    normalize_into(signal.iter().copied(), &mut out);
    out
}

/// Like [`normalize`], writing into a reusable buffer.
pub fn normalize_into<I>(samples: I, out: &mut Vec<f32>)
where
    I: IntoIterator<Item = f32>,
{
    out.clear();
    out.extend(samples);
    if out.is_empty() {
        return;
    }

    let n = out.len() as f32;
    let mean = out.iter().sum::<f32>() / n;
    out.iter_mut().for_each(|v| *v -= mean);

    let std_dev = (out.iter().map(|v| v * v).sum::<f32>() / n).sqrt();
    if std_dev < MIN_STD_DEV {
        return;
    }
    out.iter_mut().for_each(|v| *v /= std_dev);
}

/// Mean of `signal[i] * signal[i + lag]` over all valid `i`.
pub fn autocorrelation(signal: &[f32], lag: usize) -> f32 {
    if lag >= signal.len() {
        return 0.0;
    }
    let count = signal.len() - lag;
    let sum: f32 = signal[..count]
        .iter()
        .zip(&signal[lag..])
        .map(|(a, b)| a * b)
        .sum();
    sum / count as f32
}

/// Searches an already normalized onset signal for its tempo.
///
/// Lags run from the lag of `max_bpm` up to, but excluding, the lesser of the
/// lag of `min_bpm` and half the signal length. For odd lengths the lag just
/// below half the length is still scanned.
///
/// # Returns
/// * `Some(estimate)` - Best lag converted to BPM, with confidence
/// * `None` - The lag range is empty for this signal length, or no lag
///   correlates positively
pub fn estimate_from_normalized(
    signal: &[f32],
    config: &EngineConfig,
    hop_size: usize,
) -> Option<TempoEstimate> {
    let min_lag = bpm_to_lag(config.max_bpm, config.sample_rate, hop_size).max(1);
    let max_lag = bpm_to_lag(config.min_bpm, config.sample_rate, hop_size);
    let upper = max_lag.min(signal.len().div_ceil(2));
    if min_lag >= upper {
        return None;
    }

    let mut best_lag = min_lag;
    let mut best_score = f32::NEG_INFINITY;
    let mut second_lag = min_lag;
    let mut second_score = f32::NEG_INFINITY;

    for lag in min_lag..upper {
        let score = autocorrelation(signal, lag);
        if score > best_score {
            second_score = best_score;
            second_lag = best_lag;
            best_score = score;
            best_lag = lag;
        } else if score > second_score {
            second_score = score;
            second_lag = lag;
        }
    }

    // A flat or aperiodic history has no positive peak to report.
    if best_score <= 0.0 {
        return None;
    }

    let confidence = if second_score <= 0.0 {
        100.0
    } else {
        (100.0 * (best_score - second_score) / second_score).min(100.0)
    };

    Some(TempoEstimate {
        raw_bpm: lag_to_bpm(best_lag, config.sample_rate, hop_size),
        confidence,
        second_best_bpm: lag_to_bpm(second_lag, config.sample_rate, hop_size),
    })
}

/// Estimator that keeps its normalization buffer between cycles.
#[derive(Debug, Clone, Default)]
pub struct AutocorrelationEstimator {
    scratch: Vec<f32>,
}

impl AutocorrelationEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes the given onset samples and estimates their tempo.
    pub fn estimate<I>(
        &mut self,
        onsets: I,
        config: &EngineConfig,
        hop_size: usize,
    ) -> Option<TempoEstimate>
    where
        I: IntoIterator<Item = f32>,
    {
        normalize_into(onsets, &mut self.scratch);
        let estimate = estimate_from_normalized(&self.scratch, config, hop_size);
        match &estimate {
            Some(e) => debug!(
                "Autocorrelation over {} onsets: {:.2} BPM (confidence {:.1}, runner-up {:.2} BPM)",
                self.scratch.len(),
                e.raw_bpm,
                e.confidence,
                e.second_best_bpm
            ),
            None => debug!(
                "No periodicity found over {} onsets",
                self.scratch.len()
            ),
        }
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::HOP_SIZE;
    use crate::onset::history_capacity;

    fn impulse_train(len: usize, period: usize) -> Vec<f32> {
        (0..len)
            .map(|i| if i % period == 0 { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn periodic_impulses_recover_their_tempo() {
        let config = EngineConfig::default();
        let period = 43;
        let onsets = impulse_train(history_capacity(config.sample_rate, HOP_SIZE), period);

        let estimate = AutocorrelationEstimator::new()
            .estimate(onsets, &config, HOP_SIZE)
            .expect("lag range should not be empty");

        let expected = lag_to_bpm(period, config.sample_rate, HOP_SIZE);
        assert!(
            (estimate.raw_bpm - expected).abs() / expected < 0.01,
            "got {} BPM, expected {}",
            estimate.raw_bpm,
            expected
        );
        assert!(estimate.confidence > 80.0);
    }

    #[test]
    fn normalizing_a_normalized_signal_changes_nothing() {
        let root_two = 2.0_f32.sqrt();
        let signal: Vec<f32> = [root_two, 0.0, -root_two, 0.0]
            .iter()
            .cycle()
            .take(64)
            .copied()
            .collect();

        let normalized = normalize(&signal);
        for (a, b) in signal.iter().zip(&normalized) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn normalization_produces_unit_variance() {
        let normalized = normalize(&[3.0, 5.0, 9.0, 1.0, 2.0]);
        let n = normalized.len() as f32;
        let mean = normalized.iter().sum::<f32>() / n;
        let variance = normalized.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-6);
        assert!((variance - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flat_signal_is_only_centered() {
        assert_eq!(normalize(&[2.0; 8]), vec![0.0; 8]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn short_history_has_no_lag_range() {
        let config = EngineConfig::default();
        // Minimum lag at 180 BPM is 28, so 56 samples leave nothing to scan.
        let onsets = impulse_train(56, 10);
        assert!(estimate_from_normalized(&normalize(&onsets), &config, HOP_SIZE).is_none());
    }

    #[test]
    fn odd_length_scans_lag_below_half() {
        let config = EngineConfig::default();
        let onsets = impulse_train(57, 28);
        let estimate = estimate_from_normalized(&normalize(&onsets), &config, HOP_SIZE)
            .expect("lag 28 is below half of 57");
        assert!((estimate.raw_bpm - lag_to_bpm(28, config.sample_rate, HOP_SIZE)).abs() < 1e-3);
    }

    #[test]
    fn flat_signal_has_no_tempo() {
        let config = EngineConfig::default();
        assert!(estimate_from_normalized(&vec![0.0; 400], &config, HOP_SIZE).is_none());
    }

    #[test]
    fn non_positive_runner_up_gives_full_confidence() {
        let config = EngineConfig::default();
        // Lag 60 is the only aligned lag in range; every other lag is
        // anti-correlated.
        let onsets = impulse_train(400, 60);
        let estimate = estimate_from_normalized(&normalize(&onsets), &config, HOP_SIZE).unwrap();
        assert_eq!(estimate.confidence, 100.0);
        assert!((estimate.raw_bpm - lag_to_bpm(60, config.sample_rate, HOP_SIZE)).abs() < 1e-3);
    }

    #[test]
    fn lag_conversion_round_trips_at_default_rate() {
        let lag = bpm_to_lag(120.0, 44_100, HOP_SIZE);
        assert_eq!(lag, 43);
        assert!((lag_to_bpm(lag, 44_100, HOP_SIZE) - 120.18).abs() < 0.01);
    }
}
