use std::time::{Duration, Instant};

use tempo_core::tap::{TapPhase, TapTempoConfig, TAP_TIMEOUT};
use tempo_core::{TapResult, TapTempo};

fn tap_all(tapper: &mut TapTempo, start: Instant, offsets_ms: &[u64]) -> Vec<Option<TapResult>> {
    offsets_ms
        .iter()
        .map(|&ms| tapper.tap_at(start + Duration::from_millis(ms)))
        .collect()
}

#[test]
fn test_tap_tempo_exact_case() {
    let mut tapper = TapTempo::default();
    let results = tap_all(&mut tapper, Instant::now(), &[0, 500, 1000, 1500, 2000]);

    let last = results.last().unwrap().expect("five taps give a result");
    assert_eq!(last.bpm, 120.0);
    assert_eq!(last.confidence, 100);
    assert_eq!(last.taps, 5);
}

#[test]
fn test_fewer_than_four_taps_give_no_result() {
    let mut tapper = TapTempo::default();
    let results = tap_all(&mut tapper, Instant::now(), &[0, 600, 1200]);
    assert!(results.iter().all(Option::is_none));
    assert_eq!(tapper.tap_count(), 3);
    assert_eq!(tapper.phase(), TapPhase::Accumulating);
}

#[test]
fn test_outlier_does_not_skew_tempo() {
    // The 3500 ms interval would pull a plain mean towards 47 BPM.
    let result = TapResult::from_timestamps_ms(&[0.0, 500.0, 1000.0, 1500.0, 5000.0]);
    assert!((result.bpm - 120.0).abs() < 0.5, "got {}", result.bpm);
}

#[test]
fn test_inactivity_starts_fresh_session() {
    let start = Instant::now();
    let mut tapper = TapTempo::default();
    tap_all(&mut tapper, start, &[0, 500, 1000, 1500]);
    assert_eq!(tapper.phase(), TapPhase::Ready);

    let gap = 1500 + TAP_TIMEOUT.as_millis() as u64 + 1;
    assert!(tap_all(&mut tapper, start, &[gap])[0].is_none());
    assert_eq!(tapper.tap_count(), 1);
}

#[test]
fn test_custom_minimum_taps() {
    let mut tapper = TapTempo::new(TapTempoConfig {
        min_taps: 2,
        ..TapTempoConfig::default()
    });
    let results = tap_all(&mut tapper, Instant::now(), &[0, 750]);
    let result = results[1].expect("two taps are enough");
    assert_eq!(result.bpm, 80.0);
    assert_eq!(result.confidence, 50);
}
