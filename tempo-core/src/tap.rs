//! # Tap Tempo Module
//!
//! Manual tempo entry from discrete tap events, independent of the audio
//! engine. A session starts with the first tap, produces a result from the
//! fourth tap on and ends after three seconds without a tap.
//!
//! [`TapTempo`] is the deterministic core: every operation takes the current
//! instant, so sessions can be replayed in tests. [`TapTempoTimer`] wraps it
//! for interactive use and clears an abandoned session from a timer thread
//! even when no further tap arrives.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;

/// Taps needed before a tempo is reported.
pub const MIN_TAPS: usize = 4;
/// Most recent taps kept in a session.
pub const MAX_TAPS: usize = 16;
/// Inactivity after which a session is abandoned.
pub const TAP_TIMEOUT: Duration = Duration::from_millis(3000);

const IQR_FENCE: f64 = 1.5;

/// Result of a tap session with enough taps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TapResult {
    /// Tempo rounded to one decimal, 0 when no interval survived filtering.
    pub bpm: f64,
    /// Taps currently held in the session.
    pub taps: usize,
    /// Interval consistency, 0-100.
    pub confidence: u8,
}

impl TapResult {
    /// Computes a result from tap timestamps in milliseconds.
    pub fn from_timestamps_ms(timestamps: &[f64]) -> Self {
        let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        let (bpm, confidence) = tempo_from_intervals(&intervals);
        Self {
            bpm,
            taps: timestamps.len(),
            confidence,
        }
    }
}

/// Tap session parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapTempoConfig {
    pub min_taps: usize,
    pub max_taps: usize,
    pub timeout: Duration,
}

impl Default for TapTempoConfig {
    fn default() -> Self {
        Self {
            min_taps: MIN_TAPS,
            max_taps: MAX_TAPS,
            timeout: TAP_TIMEOUT,
        }
    }
}

/// Where a tap session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPhase {
    Empty,
    Accumulating,
    Ready,
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Drops intervals outside 1.5 IQR of the quartiles. Fewer than three
/// intervals are returned as-is.
pub fn reject_outliers(intervals: &[f64]) -> Vec<f64> {
    if intervals.len() < 3 {
        return intervals.to_vec();
    }

    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE * iqr;
    let upper = q3 + IQR_FENCE * iqr;

    intervals
        .iter()
        .copied()
        .filter(|&v| v >= lower && v <= upper)
        .collect()
}

/// Tempo and confidence from inter-tap intervals in milliseconds.
///
/// # Returns
/// * `(bpm, confidence)` - bpm rounded to one decimal; `(0.0, 0)` when no
///   usable interval remains
pub fn tempo_from_intervals(intervals: &[f64]) -> (f64, u8) {
    let kept = reject_outliers(intervals);
    if kept.is_empty() {
        return (0.0, 0);
    }

    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    if mean <= 0.0 {
        return (0.0, 0);
    }
    let bpm = (60_000.0 / mean * 10.0).round() / 10.0;

    let confidence = if kept.len() < 2 {
        50.0
    } else {
        let variance = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / kept.len() as f64;
        let cv = variance.sqrt() / mean;
        ((1.0 - cv * 5.0) * 100.0).clamp(0.0, 100.0)
    };

    (bpm, confidence.round() as u8)
}

/// Tap session state machine.
#[derive(Debug, Clone)]
pub struct TapTempo {
    config: TapTempoConfig,
    taps: VecDeque<Instant>,
    deadline: Option<Instant>,
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new(TapTempoConfig::default())
    }
}

impl TapTempo {
    pub fn new(config: TapTempoConfig) -> Self {
        let config = TapTempoConfig {
            min_taps: config.min_taps.max(2),
            max_taps: config.max_taps.max(config.min_taps.max(2)),
            ..config
        };
        Self {
            taps: VecDeque::with_capacity(config.max_taps),
            deadline: None,
            config,
        }
    }

    pub fn config(&self) -> &TapTempoConfig {
        &self.config
    }

    /// Records a tap now.
    pub fn tap(&mut self) -> Option<TapResult> {
        self.tap_at(Instant::now())
    }

    /// Records a tap at `now`.
    ///
    /// A tap at or past the inactivity deadline starts a new session first,
    /// leaving the same state as [`expire`](Self::expire) followed by a tap.
    ///
    /// # Returns
    /// * `Some(result)` - At least `min_taps` taps are held
    /// * `None` - Not enough taps yet; the tap is still recorded
    pub fn tap_at(&mut self, now: Instant) -> Option<TapResult> {
        if self.expire(now) {
            debug!("Tap gap reached {:?}, starting a new session", self.config.timeout);
        }

        self.taps.push_back(now);
        while self.taps.len() > self.config.max_taps {
            self.taps.pop_front();
        }
        self.deadline = Some(now + self.config.timeout);

        if self.taps.len() < self.config.min_taps {
            return None;
        }
        let result = self.result();
        debug!(
            "Tap {}: {:.1} BPM (confidence {})",
            result.taps, result.bpm, result.confidence
        );
        Some(result)
    }

    fn result(&self) -> TapResult {
        let intervals: Vec<f64> = self
            .taps
            .iter()
            .zip(self.taps.iter().skip(1))
            .map(|(a, b)| b.saturating_duration_since(*a).as_secs_f64() * 1000.0)
            .collect();
        let (bpm, confidence) = tempo_from_intervals(&intervals);
        TapResult {
            bpm,
            taps: self.taps.len(),
            confidence,
        }
    }

    /// Clears the session if its inactivity deadline has passed.
    ///
    /// # Returns
    /// * `true` if the session was cleared
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Clears the session and cancels its deadline.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.taps.clear();
        self.deadline = None;
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn phase(&self) -> TapPhase {
        match self.taps.len() {
            0 => TapPhase::Empty,
            n if n < self.config.min_taps => TapPhase::Accumulating,
            _ => TapPhase::Ready,
        }
    }
}

enum TimerCommand {
    Arm(Instant),
    Cancel,
    Shutdown,
}

/// Thread-safe tap estimator whose session expires on its own.
///
/// Every tap re-arms a timer thread; when a deadline passes without a newer
/// tap the thread expires the session exactly once.
pub struct TapTempoTimer {
    tap: Arc<Mutex<TapTempo>>,
    commands: Sender<TimerCommand>,
    worker: Option<JoinHandle<()>>,
}

impl TapTempoTimer {
    pub fn new() -> Self {
        Self::with_config(TapTempoConfig::default())
    }

    pub fn with_config(config: TapTempoConfig) -> Self {
        let tap = Arc::new(Mutex::new(TapTempo::new(config)));
        let (commands, receiver) = crossbeam_channel::unbounded();
        let timer_tap = Arc::clone(&tap);
        let worker = thread::Builder::new()
            .name("tap-tempo-timer".into())
            .spawn(move || run_timer(timer_tap, receiver))
            .map_err(|e| warn!("Tap timer thread unavailable, taps expire on next tap only: {}", e))
            .ok();

        Self {
            tap,
            commands,
            worker,
        }
    }

    /// Records a tap now and re-arms the inactivity timer.
    pub fn tap(&self) -> Option<TapResult> {
        let (result, deadline) = {
            let mut tap = self.tap.lock();
            let result = tap.tap_at(Instant::now());
            (result, tap.deadline())
        };
        if let Some(deadline) = deadline {
            let _ = self.commands.send(TimerCommand::Arm(deadline));
        }
        result
    }

    /// Clears the session and cancels the pending timer.
    pub fn reset(&self) {
        self.tap.lock().reset();
        let _ = self.commands.send(TimerCommand::Cancel);
    }

    pub fn tap_count(&self) -> usize {
        self.tap.lock().tap_count()
    }

    pub fn phase(&self) -> TapPhase {
        self.tap.lock().phase()
    }
}

impl Default for TapTempoTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TapTempoTimer {
    fn drop(&mut self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_timer(tap: Arc<Mutex<TapTempo>>, commands: crossbeam_channel::Receiver<TimerCommand>) {
    let mut deadline: Option<Instant> = None;
    loop {
        let command = match deadline {
            Some(at) => match commands.recv_deadline(at) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    // A tap racing the timer moves the session deadline, so
                    // expire() leaves that session alone.
                    if tap.lock().expire(Instant::now()) {
                        debug!("Tap session expired after inactivity");
                    }
                    deadline = None;
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            TimerCommand::Arm(at) => deadline = Some(at),
            TimerCommand::Cancel => deadline = None,
            TimerCommand::Shutdown => break,
        }
    }
}
