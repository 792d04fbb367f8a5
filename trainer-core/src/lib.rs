// trainer-core/src/lib.rs

//! The core logic for the pitch and chord trainer.
//! This crate is responsible for audio capture, frame preprocessing, note
//! and chord recognition, and result stabilization. It is completely
//! headless and contains no UI code.

pub mod audio;
pub mod chord;
pub mod clock;
pub mod config;
pub mod error;
pub mod fft;
pub mod peaks;
pub mod pitch;
pub mod preprocess;
pub mod session;
pub mod stabilizer;
pub mod tuning;
pub mod worker;

pub use audio::SampleFrame;
pub use config::{DetectionMode, SessionConfig};
pub use error::ConfigError;
pub use session::DetectorSession;
pub use stabilizer::LockTier;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Represents the result of a single analysis cycle.
///
/// A cycle without a label is normal and frequent (silence, uncertainty, a
/// chord cycle between two analyses); it still carries the live level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub mode: DetectionMode,
    /// Pitch class (note modes) or chord name (chord mode).
    pub label: Option<String>,
    /// 0-100.
    pub confidence: Option<u8>,
    /// Smoothed frequency in Hz (note modes).
    pub frequency: Option<f32>,
    /// Octave of the nearest tempered note (note modes).
    pub octave: Option<i32>,
    /// Deviation from the nearest tempered note (note modes).
    pub cents_deviation: Option<f32>,
    pub lock: Option<LockTier>,
    /// The label has repeated long enough to be trusted.
    pub stable: bool,
    /// RMS of the raw frame.
    pub level: f32,
    /// The frame passed the signal gate.
    pub has_signal: bool,
    /// Pitch classes behind the last chord analysis, strongest first.
    pub detected_pitch_classes: Vec<String>,
    /// Session clock reading of the cycle.
    pub timestamp_ms: u64,
}

impl DetectionEvent {
    pub(crate) fn empty(mode: DetectionMode, timestamp_ms: u64, level: f32, has_signal: bool) -> Self {
        Self {
            mode,
            label: None,
            confidence: None,
            frequency: None,
            octave: None,
            cents_deviation: None,
            lock: None,
            stable: false,
            level,
            has_signal,
            detected_pitch_classes: Vec::new(),
            timestamp_ms,
        }
    }

    pub fn is_detection(&self) -> bool {
        self.label.is_some()
    }
}

/// Live input level, written by the analysis thread and read by anyone.
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        let level = if level.is_finite() { level } else { 0.0 };
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_meter_is_shared() {
        let meter = LevelMeter::new();
        let reader = meter.clone();
        assert_eq!(reader.get(), 0.0);
        meter.set(0.42);
        assert_eq!(reader.get(), 0.42);
        meter.set(f32::NAN);
        assert_eq!(reader.get(), 0.0);
    }
}
