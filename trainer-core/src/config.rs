//! Session configuration.
//!
//! One struct per component, aggregated in [`SessionConfig`]. Every struct is
//! `#[serde(default)]`, so a partial JSON document only overrides the fields
//! it names.

use crate::chord::ChordConfig;
use crate::error::{ConfigError, MIN_FRAME_SIZE};
use crate::peaks::PeakConfig;
use crate::pitch::{PitchConfig, SmoothingConfig};
use crate::preprocess::PreprocessConfig;
use crate::stabilizer::StabilizerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the session listens for. Chosen once by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    #[default]
    GuitarNote,
    PianoNote,
    Chord,
}

impl DetectionMode {
    pub const ALL: [DetectionMode; 3] = [
        DetectionMode::GuitarNote,
        DetectionMode::PianoNote,
        DetectionMode::Chord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMode::GuitarNote => "guitar-note",
            DetectionMode::PianoNote => "piano-note",
            DetectionMode::Chord => "chord",
        }
    }

    pub fn is_note(self) -> bool {
        !matches!(self, DetectionMode::Chord)
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ConfigError::invalid("mode", format!("unknown mode `{s}` (guitar-note, piano-note, chord)"))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: DetectionMode,
    pub sample_rate: u32,
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Minimum time between two chord analyses.
    pub chord_analysis_interval_ms: u64,
    /// Capacity of the capture-to-analysis frame queue (1 or 2).
    pub frame_queue_capacity: usize,
    pub preprocess: PreprocessConfig,
    pub pitch: PitchConfig,
    pub smoothing: SmoothingConfig,
    pub peaks: PeakConfig,
    pub chord: ChordConfig,
    pub stabilizer: StabilizerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_mode(DetectionMode::default(), 48_000)
    }
}

impl SessionConfig {
    /// Per-mode defaults.
    ///
    /// | mode | range | YIN threshold | gate floor | lock |
    /// |---|---|---|---|---|
    /// | guitar-note | 70-1200 Hz | 0.10 | 0.025 | off |
    /// | piano-note | 27.5-4200 Hz | 0.15 | 0.020 | off |
    /// | chord | - | - | 0.005 | on |
    pub fn for_mode(mode: DetectionMode, sample_rate: u32) -> Self {
        let mut preprocess = PreprocessConfig::default();
        let mut pitch = PitchConfig::default();
        let mut stabilizer = StabilizerConfig::default();

        match mode {
            DetectionMode::GuitarNote => {
                pitch.min_freq = 70.0;
                pitch.max_freq = 1200.0;
                pitch.threshold = 0.10;
                preprocess.gate_floor = 0.025;
                stabilizer.lock_enabled = false;
            }
            DetectionMode::PianoNote => {
                pitch.min_freq = 27.5;
                pitch.max_freq = 4200.0;
                pitch.threshold = 0.15;
                preprocess.gate_floor = 0.020;
                stabilizer.lock_enabled = false;
            }
            DetectionMode::Chord => {
                preprocess.gate_floor = 0.005;
                stabilizer.lock_enabled = true;
            }
        }

        Self {
            mode,
            sample_rate,
            frame_size: 4096,
            chord_analysis_interval_ms: 200,
            frame_queue_capacity: 2,
            preprocess,
            pitch,
            smoothing: SmoothingConfig::default(),
            peaks: PeakConfig::default(),
            chord: ChordConfig::default(),
            stabilizer,
        }
    }

    /// Checks every value a session depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::FrameTooSmall {
                got: self.frame_size,
                min: MIN_FRAME_SIZE,
            });
        }
        if !(1..=2).contains(&self.frame_queue_capacity) {
            return Err(ConfigError::invalid("frame_queue_capacity", "must be 1 or 2"));
        }

        let pitch = &self.pitch;
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(pitch.min_freq > 0.0 && pitch.max_freq > pitch.min_freq && pitch.max_freq <= nyquist) {
            return Err(ConfigError::InvalidFrequencyRange {
                min_hz: pitch.min_freq,
                max_hz: pitch.max_freq,
            });
        }
        // The longest period must fit twice into a frame.
        if self.mode.is_note() && (self.sample_rate as f32 / pitch.min_freq) > (self.frame_size / 2) as f32 {
            return Err(ConfigError::invalid(
                "pitch.min_freq",
                format!(
                    "{} Hz needs frames of at least {} samples",
                    pitch.min_freq,
                    2 * (self.sample_rate as f32 / pitch.min_freq).ceil() as usize
                ),
            ));
        }
        unit_interval("pitch.threshold", pitch.threshold)?;
        unit_interval("pitch.agreement_tolerance", pitch.agreement_tolerance)?;

        let smoothing = &self.smoothing;
        unit_interval("smoothing.fast_alpha", smoothing.fast_alpha)?;
        unit_interval("smoothing.slow_alpha", smoothing.slow_alpha)?;

        let peaks = &self.peaks;
        if !(peaks.min_freq > 0.0 && peaks.max_freq > peaks.min_freq) {
            return Err(ConfigError::InvalidFrequencyRange {
                min_hz: peaks.min_freq,
                max_hz: peaks.max_freq,
            });
        }
        if peaks.neighbors == 0 || peaks.max_peaks == 0 {
            return Err(ConfigError::invalid("peaks", "neighbors and max_peaks must be positive"));
        }

        let pre = &self.preprocess;
        if !(pre.gate_floor >= 0.0 && pre.gate_ceiling >= pre.gate_floor) {
            return Err(ConfigError::invalid("preprocess.gate_ceiling", "must not be below gate_floor"));
        }
        unit_interval("preprocess.noise_adapt_rate", pre.noise_adapt_rate)?;

        if self.chord.min_matches == 0 {
            return Err(ConfigError::invalid("chord.min_matches", "must be positive"));
        }

        let stab = &self.stabilizer;
        if stab.max_entries == 0 || stab.min_occurrences == 0 {
            return Err(ConfigError::invalid(
                "stabilizer",
                "max_entries and min_occurrences must be positive",
            ));
        }
        if !(stab.lock_threshold <= stab.good_threshold && stab.good_threshold <= stab.high_threshold) {
            return Err(ConfigError::invalid(
                "stabilizer",
                "lock thresholds must satisfy lock <= good <= high",
            ));
        }

        Ok(())
    }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults() {
        let guitar = SessionConfig::for_mode(DetectionMode::GuitarNote, 48_000);
        assert_eq!(guitar.pitch.min_freq, 70.0);
        assert_eq!(guitar.preprocess.gate_floor, 0.025);
        assert!(!guitar.stabilizer.lock_enabled);

        let piano = SessionConfig::for_mode(DetectionMode::PianoNote, 44_100);
        assert_eq!(piano.pitch.max_freq, 4200.0);
        assert_eq!(piano.pitch.threshold, 0.15);

        let chord = SessionConfig::for_mode(DetectionMode::Chord, 48_000);
        assert!(chord.stabilizer.lock_enabled);
        assert_eq!(chord.preprocess.gate_floor, 0.005);

        for mode in DetectionMode::ALL {
            assert_eq!(SessionConfig::for_mode(mode, 48_000).validate(), Ok(()));
        }
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.sample_rate = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSampleRate));

        let mut config = SessionConfig::default();
        config.frame_size = 64;
        assert!(matches!(config.validate(), Err(ConfigError::FrameTooSmall { got: 64, .. })));

        let mut config = SessionConfig::default();
        config.pitch.min_freq = 900.0;
        config.pitch.max_freq = 300.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrequencyRange { .. })));

        let mut config = SessionConfig::default();
        config.pitch.threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "pitch.threshold", .. })
        ));

        let mut config = SessionConfig::default();
        config.frame_queue_capacity = 0;
        assert!(config.validate().is_err());

        // Piano range at 1024 samples cannot hold a 27.5 Hz period twice
        let mut config = SessionConfig::for_mode(DetectionMode::PianoNote, 44_100);
        config.frame_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in DetectionMode::ALL {
            assert_eq!(mode.as_str().parse::<DetectionMode>(), Ok(mode));
        }
        assert!("banjo".parse::<DetectionMode>().is_err());
        let json = serde_json::to_string(&DetectionMode::PianoNote).unwrap();
        assert_eq!(json, "\"piano-note\"");
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "frame_size": 8192, "stabilizer": { "lock_threshold": 80 } }"#).unwrap();
        assert_eq!(config.frame_size, 8192);
        assert_eq!(config.stabilizer.lock_threshold, 80);
        assert_eq!(config.stabilizer.high_threshold, 91);
        assert_eq!(config.pitch, PitchConfig::default());
    }
}
