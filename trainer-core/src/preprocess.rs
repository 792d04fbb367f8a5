//! # Frame Preprocessing Module
//!
//! Cleans a captured frame before any analysis runs on it.
//!
//! ## Steps
//! 1. Non-finite samples are zeroed
//! 2. RMS of the raw frame is measured (this is the live input level)
//! 3. The level is compared against an adaptive gate
//! 4. DC offset is removed
//! 5. A Hann-windowed copy is made for the frequency-domain path
//!
//! The period detector works on the centered samples; only the spectrum is
//! taken from the windowed copy. Frames that fail the gate are still
//! prepared, but callers must not run pitch or chord analysis on them.

use serde::{Deserialize, Serialize};

/// Tuning constants for the silence/noise gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Minimum RMS a frame needs to count as signal.
    pub gate_floor: f32,
    /// The gate never rises above this RMS, however noisy the room gets.
    pub gate_ceiling: f32,
    /// Gate = max(floor, multiplier * trailing noise RMS).
    pub noise_multiplier: f32,
    /// EMA rate for the trailing noise estimate.
    pub noise_adapt_rate: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            gate_floor: 0.025,
            gate_ceiling: 0.1,
            noise_multiplier: 3.0,
            noise_adapt_rate: 0.05,
        }
    }
}

/// Result of preprocessing one frame.
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    /// DC-free samples.
    pub centered: Vec<f32>,
    /// DC-free, Hann-windowed samples.
    pub windowed: Vec<f32>,
    /// RMS of the raw frame.
    pub rms: f32,
    /// Gate threshold the frame was compared against.
    pub threshold: f32,
    /// Whether the frame passed the gate.
    pub has_signal: bool,
}

/// Stateful preprocessor; owns the trailing noise estimate.
#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    config: PreprocessConfig,
    noise_rms: Option<f32>,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            noise_rms: None,
        }
    }

    /// Current adaptive gate threshold.
    pub fn gate_threshold(&self) -> f32 {
        let adaptive = self
            .noise_rms
            .map(|noise| noise * self.config.noise_multiplier)
            .unwrap_or(0.0);
        adaptive
            .min(self.config.gate_ceiling)
            .max(self.config.gate_floor)
    }

    pub fn process(&mut self, raw: &[f32]) -> PreprocessedFrame {
        let mut samples = raw.to_vec();
        let bad = sanitize(&mut samples);
        if bad > 0 {
            log::warn!("[PREPROCESS] zeroed {} non-finite samples", bad);
        }

        let level = rms(&samples);
        let threshold = self.gate_threshold();
        let has_signal = !samples.is_empty() && level >= threshold;

        if !has_signal {
            self.track_noise(level);
        }

        remove_dc_offset(&mut samples);
        let mut windowed = samples.clone();
        apply_hann_window(&mut windowed);

        PreprocessedFrame {
            centered: samples,
            windowed,
            rms: level,
            threshold,
            has_signal,
        }
    }

    pub fn reset(&mut self) {
        self.noise_rms = None;
    }

    fn track_noise(&mut self, level: f32) {
        let rate = self.config.noise_adapt_rate;
        self.noise_rms = Some(match self.noise_rms {
            Some(noise) => noise * (1.0 - rate) + level * rate,
            None => level,
        });
    }
}

/// Replaces non-finite samples with silence and returns how many were replaced.
fn sanitize(samples: &mut [f32]) -> usize {
    let mut replaced = 0;
    for sample in samples.iter_mut() {
        if !sample.is_finite() {
            *sample = 0.0;
            replaced += 1;
        }
    }
    replaced
}

/// Root mean square of a signal; 0.0 for an empty slice.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Removes the DC offset from a signal by making its average value zero.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window, `0.5 * (1 - cos(2πi / (N-1)))`, in place.
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / 48_000.0).sin())
            .collect()
    }

    #[test]
    fn dc_offset_is_removed() {
        let mut signal = vec![0.5, 1.5, 0.5, 1.5];
        remove_dc_offset(&mut signal);
        assert_eq!(signal, vec![-0.5, 0.5, -0.5, 0.5]);
    }

    #[test]
    fn hann_window_tapers_edges() {
        let mut signal = vec![1.0; 9];
        apply_hann_window(&mut signal);
        assert!(signal[0].abs() < 1e-6);
        assert!(signal[8].abs() < 1e-6);
        assert!((signal[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn silence_is_gated_out() {
        let mut pre = FramePreprocessor::new(PreprocessConfig::default());
        let frame = pre.process(&vec![0.0; 4096]);
        assert!(!frame.has_signal);
        assert_eq!(frame.rms, 0.0);
        assert!(frame.windowed.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn loud_sine_passes_gate() {
        let mut pre = FramePreprocessor::new(PreprocessConfig::default());
        let frame = pre.process(&sine(440.0, 0.5, 4096));
        assert!(frame.has_signal);
        assert!((frame.rms - 0.5 / 2.0_f32.sqrt()).abs() < 0.01);
    }

    #[test]
    fn gate_rises_with_trailing_noise() {
        let mut pre = FramePreprocessor::new(PreprocessConfig::default());
        let hum = sine(60.0, 0.03, 4096); // rms ~0.021, under the floor
        for _ in 0..50 {
            pre.process(&hum);
        }
        let threshold = pre.gate_threshold();
        assert!(threshold > 0.05, "threshold {threshold}");
        assert!(threshold <= 0.1);

        // A tone that would pass the bare floor is now treated as noise
        let faint = pre.process(&sine(440.0, 0.06, 4096));
        assert!(!faint.has_signal);

        pre.reset();
        assert_eq!(pre.gate_threshold(), 0.025);
    }

    #[test]
    fn non_finite_samples_do_not_poison_level() {
        let mut pre = FramePreprocessor::new(PreprocessConfig::default());
        let mut raw = sine(440.0, 0.5, 1024);
        raw[10] = f32::NAN;
        raw[20] = f32::INFINITY;
        let frame = pre.process(&raw);
        assert!(frame.rms.is_finite());
        assert!(frame.centered.iter().all(|s| s.is_finite()));
        assert!(frame.windowed.iter().all(|s| s.is_finite()));
    }
}
