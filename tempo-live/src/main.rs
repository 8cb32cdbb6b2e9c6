//! # Tempo Live - Headless Tempo Detector
//!
//! Listens to the default input device and reports the detected tempo while
//! accepting tap tempo from the keyboard.
//!
//! ## Architecture
//! - **Main Thread**: Reads stdin; every line is a tap, `r` resets, `q` quits
//! - **Audio Thread**: Owns the capture stream and the tempo engine
//! - **Communication**: Crossbeam channels for frames, control and shutdown

use std::io::BufRead;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use tempo_core::{EngineConfig, SmoothingLevel, TapTempoTimer, TempoEngine, audio};

/// Command line options. Flags override values from `--config`.
#[derive(Debug, Parser)]
#[command(name = "tempo-live", version, about = "Live tempo detection with tap tempo fallback")]
struct Args {
    /// JSON engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Slowest tempo to consider
    #[arg(long)]
    min_bpm: Option<f32>,

    /// Fastest tempo to consider
    #[arg(long)]
    max_bpm: Option<f32>,

    /// Smoothing preset: low, medium or high
    #[arg(long)]
    smoothing: Option<SmoothingLevel>,

    /// Disable half/double tempo correction
    #[arg(long)]
    no_half_double: bool,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("loading engine config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(min_bpm) = self.min_bpm {
            config.min_bpm = min_bpm;
        }
        if let Some(max_bpm) = self.max_bpm {
            config.max_bpm = max_bpm;
        }
        if let Some(smoothing) = self.smoothing {
            config.smoothing = smoothing;
        }
        if self.no_half_double {
            config.prefer_half_double = false;
        }
        Ok(config)
    }
}

/// Messages from the main thread to the audio worker.
#[derive(Debug, Clone, Copy)]
enum Control {
    Reset,
}

/// Audio worker thread management structure.
///
/// Handles the dedicated audio processing thread and provides
/// a way to shut it down gracefully.
struct AudioWorker {
    control_tx: Sender<Control>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    /// Spawns the audio thread. Capture is opened inside the thread because
    /// the stream handle is not `Send` on every platform.
    fn start(config: EngineConfig) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let thread_handle = thread::spawn(move || run_audio_thread(config, control_rx, shutdown_rx));
        Self {
            control_tx,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        }
    }

    fn reset(&self) {
        let _ = self.control_tx.send(Control::Reset);
    }

    fn shutdown(mut self) {
        info!("Shutting down audio worker...");
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

fn run_audio_thread(config: EngineConfig, control_rx: Receiver<Control>, shutdown_rx: Receiver<()>) {
    // Bounded so a stalled engine drops frames instead of growing memory.
    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);

    let (stream, sample_rate) = match audio::start_audio_capture(frame_tx) {
        Ok(tuple) => tuple,
        Err(e) => {
            error!("Fatal error starting audio: {:#}", e);
            return;
        }
    };

    let mut engine = TempoEngine::new(config.with_sample_rate(sample_rate));
    info!("Listening... press Enter to tap, 'r' + Enter to reset, 'q' + Enter to quit");

    loop {
        crossbeam_channel::select! {
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => {
                    let result = engine.process_frame(&frame);
                    if result.estimated {
                        let hint = result
                            .suggested_multiplier
                            .map(|m| format!(" (try x{})", m.factor()))
                            .unwrap_or_default();
                        info!(
                            "{:6.1} BPM  confidence {:3}  {}  level {:3}{}",
                            result.bpm,
                            result.confidence,
                            if result.stable { "stable  " } else { "settling" },
                            result.input_level,
                            hint
                        );
                    }
                }
                Err(_) => {
                    warn!("Audio channel closed");
                    break;
                }
            },
            recv(control_rx) -> msg => match msg {
                Ok(Control::Reset) => engine.reset(),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                info!("Received shutdown signal");
                break;
            },
        }
    }

    if let Err(e) = stream.pause() {
        warn!("Error pausing stream: {}", e);
    }
    drop(stream);
    info!("Audio thread finished");
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.engine_config()?;

    let worker = AudioWorker::start(config);
    let taps = TapTempoTimer::new();

    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        match line.trim() {
            "q" => break,
            "r" => {
                worker.reset();
                taps.reset();
            }
            _ => match taps.tap() {
                Some(tap) => info!(
                    "Tap tempo {:6.1} BPM  confidence {:3}  ({} taps)",
                    tap.bpm, tap.confidence, tap.taps
                ),
                None => info!("Tap {}", taps.tap_count()),
            },
        }
    }

    worker.shutdown();
    Ok(())
}
