//! # Pitch Detection Module
//!
//! Single-note fundamental frequency estimation.
//!
//! ## Features
//! - YIN difference-function detector with parabolic refinement
//! - Normalized autocorrelation detector used as a cross-check
//! - Octave-error correction against the running estimate
//! - Adaptive exponential smoothing

use crate::tuning::{self, PitchClass};
use serde::{Deserialize, Serialize};

/// Frequency bounds and thresholds for the estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub min_freq: f32,
    pub max_freq: f32,
    /// Absolute threshold on the cumulative-mean-normalized difference.
    pub threshold: f32,
    /// Run the autocorrelation estimator alongside YIN.
    pub cross_check: bool,
    /// Both estimates are averaged when they differ by less than this
    /// fraction of their mean.
    pub agreement_tolerance: f32,
    /// Minimum normalized autocorrelation for a lag to count as periodic.
    pub autocorr_clarity: f32,
    /// The chosen autocorrelation peak must reach this fraction of the best one.
    pub autocorr_peak_ratio: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            min_freq: 70.0,
            max_freq: 1200.0,
            threshold: 0.1,
            cross_check: true,
            agreement_tolerance: 0.15,
            autocorr_clarity: 0.5,
            autocorr_peak_ratio: 0.9,
        }
    }
}

/// Controls how the raw estimate is folded into the reported frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// EMA coefficient when the new estimate is close to the smoothed value.
    pub fast_alpha: f32,
    /// EMA coefficient when the new estimate jumps away.
    pub slow_alpha: f32,
    /// "Close" means within this many cents.
    pub close_cents: f32,
    /// A jump seen this many cycles in a row restarts smoothing at the new value.
    pub jump_persistence: u32,
    /// Relative tolerance around the octave ratios 2, 0.5, 4 and 0.25.
    pub octave_tolerance: f32,
    /// Octave corrections in a row after which the raw octave is accepted.
    pub octave_persistence: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            fast_alpha: 0.5,
            slow_alpha: 0.2,
            close_cents: 50.0,
            jump_persistence: 3,
            octave_tolerance: 0.05,
            octave_persistence: 4,
        }
    }
}

/// A raw YIN detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YinPitch {
    pub frequency: f32,
    /// Normalized difference at the chosen lag (0 = perfectly periodic).
    pub aperiodicity: f32,
}

/// One analysis cycle's note result.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEstimate {
    /// Smoothed frequency in Hz.
    pub frequency: f32,
    /// Deviation from the nearest tempered note in cents.
    pub deviation_cents: f32,
    pub pitch_class: PitchClass,
    /// Octave of the nearest tempered note.
    pub octave: i32,
    /// Periodicity-based confidence, 0-100.
    pub confidence: u8,
}

/// Converts a frequency range to a lag range that fits the signal.
fn lag_range(len: usize, sample_rate: u32, min_freq: f32, max_freq: f32) -> Option<(usize, usize)> {
    if sample_rate == 0 || min_freq <= 0.0 || max_freq <= min_freq {
        return None;
    }
    let sr = sample_rate as f32;
    let tau_min = ((sr / max_freq).floor() as usize).max(2);
    let tau_max = ((sr / min_freq).floor() as usize).min(len / 2);
    if tau_max < tau_min + 2 {
        return None;
    }
    Some((tau_min, tau_max))
}

/// Vertex offset of the parabola through three equally spaced points,
/// relative to the middle one and clamped to one sample.
pub(crate) fn parabolic_offset(y1: f32, y2: f32, y3: f32) -> f32 {
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-12 {
        return 0.0;
    }
    let shift = (y1 - y3) / (2.0 * denominator);
    if shift.is_finite() { shift.clamp(-1.0, 1.0) } else { 0.0 }
}

/// YIN pitch detection over the lag range implied by `[min_freq, max_freq]`.
///
/// 1. Squared-difference function over a fixed comparison window
/// 2. Cumulative mean normalization (guarded against a zero running sum)
/// 3. First lag under `threshold`, then walk down to the local minimum
/// 4. Parabolic interpolation around the minimum
/// 5. Reject frequencies outside the range
///
/// # Returns
/// * `Some(pitch)` - Detected frequency and its aperiodicity
/// * `None` - No periodic component (silence, noise, or out of range)
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: u32,
    min_freq: f32,
    max_freq: f32,
    threshold: f32,
) -> Option<YinPitch> {
    let (tau_min, tau_max) = lag_range(signal.len(), sample_rate, min_freq, max_freq)?;
    let window = signal.len() - tau_max;

    // --- Step 1: Difference function ---
    let mut yin_buffer = vec![0.0_f32; tau_max + 1];
    for tau in 1..=tau_max {
        let mut diff = 0.0;
        for i in 0..window {
            let delta = signal[i] - signal[i + tau];
            diff += delta * delta;
        }
        yin_buffer[tau] = diff;
    }

    // --- Step 2: Cumulative mean normalized difference ---
    let mut running_sum = 0.0;
    yin_buffer[0] = 1.0;
    for tau in 1..=tau_max {
        running_sum += yin_buffer[tau];
        if running_sum > 1e-12 {
            yin_buffer[tau] *= tau as f32 / running_sum;
        } else {
            yin_buffer[tau] = 1.0;
        }
    }

    // --- Step 3: First dip under the threshold, then its true minimum ---
    let mut period = (tau_min..=tau_max).find(|&tau| yin_buffer[tau] < threshold)?;
    while period < tau_max && yin_buffer[period + 1] < yin_buffer[period] {
        period += 1;
    }

    // --- Step 4: Parabolic interpolation for better precision ---
    let period_float = if period > 1 && period < tau_max {
        period as f32
            + parabolic_offset(
                yin_buffer[period - 1],
                yin_buffer[period],
                yin_buffer[period + 1],
            )
    } else {
        period as f32
    };

    // --- Step 5: Range check ---
    let frequency = sample_rate as f32 / period_float;
    if frequency.is_finite() && frequency >= min_freq && frequency <= max_freq {
        Some(YinPitch {
            frequency,
            aperiodicity: yin_buffer[period].clamp(0.0, 1.0),
        })
    } else {
        None
    }
}

/// Autocorrelation pitch detection used to cross-check YIN.
///
/// Picks the first local maximum of the normalized autocorrelation that
/// reaches both `clarity` and `peak_ratio` times the strongest in-range
/// maximum, so a doubled period does not win over the true one.
pub fn detect_pitch_autocorrelation(
    signal: &[f32],
    sample_rate: u32,
    min_freq: f32,
    max_freq: f32,
    clarity: f32,
    peak_ratio: f32,
) -> Option<f32> {
    let (tau_min, tau_max) = lag_range(signal.len(), sample_rate, min_freq, max_freq)?;
    // One extra lag on each side of the range for peak tests and refinement.
    let window = signal.len() - tau_max - 1;

    let energy: f32 = signal[..window].iter().map(|s| s * s).sum();
    if energy <= 1e-12 {
        return None;
    }

    let mut acf = vec![0.0_f32; tau_max + 2];
    for tau in (tau_min - 1)..=(tau_max + 1) {
        let sum: f32 = (0..window).map(|i| signal[i] * signal[i + tau]).sum();
        acf[tau] = sum / energy;
    }

    let is_peak = |tau: usize| acf[tau] > acf[tau - 1] && acf[tau] >= acf[tau + 1];
    let best = (tau_min..=tau_max)
        .filter(|&tau| is_peak(tau))
        .map(|tau| acf[tau])
        .fold(f32::NEG_INFINITY, f32::max);
    if !best.is_finite() || best < clarity {
        return None;
    }

    let cutoff = (best * peak_ratio).max(clarity);
    let tau = (tau_min..=tau_max).find(|&tau| is_peak(tau) && acf[tau] >= cutoff)?;

    let shift = parabolic_offset(acf[tau - 1], acf[tau], acf[tau + 1]);
    let frequency = sample_rate as f32 / (tau as f32 + shift);
    (frequency.is_finite() && frequency >= min_freq && frequency <= max_freq).then_some(frequency)
}

/// Combines the primary and secondary estimates.
///
/// When they agree within `tolerance` of their mean, the mean is returned;
/// otherwise the primary estimate wins.
pub fn cross_validate(primary: f32, secondary: Option<f32>, tolerance: f32) -> f32 {
    match secondary {
        Some(secondary) => {
            let mean = (primary + secondary) / 2.0;
            if mean > 0.0 && (primary - secondary).abs() / mean < tolerance {
                mean
            } else {
                primary
            }
        }
        None => primary,
    }
}

/// Folds raw estimates into a stable reading, correcting octave errors.
#[derive(Debug, Clone)]
pub struct PitchSmoother {
    config: SmoothingConfig,
    smoothed: Option<f32>,
    pending_jumps: u32,
    pending_octaves: u32,
}

const OCTAVE_RATIOS: [f32; 4] = [2.0, 0.5, 4.0, 0.25];

impl PitchSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            smoothed: None,
            pending_jumps: 0,
            pending_octaves: 0,
        }
    }

    pub fn value(&self) -> Option<f32> {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
        self.pending_jumps = 0;
        self.pending_octaves = 0;
    }

    fn restart(&mut self, frequency: f32) -> f32 {
        self.smoothed = Some(frequency);
        self.pending_jumps = 0;
        self.pending_octaves = 0;
        frequency
    }

    /// Octave ratio the new estimate sits at relative to the previous one, if any.
    fn octave_ratio(&self, ratio: f32) -> Option<f32> {
        OCTAVE_RATIOS
            .iter()
            .copied()
            .find(|&target| (ratio / target - 1.0).abs() < self.config.octave_tolerance)
    }

    /// Feeds one raw estimate and returns the smoothed frequency.
    pub fn update(&mut self, raw: f32) -> f32 {
        let Some(previous) = self.smoothed else {
            return self.restart(raw);
        };

        let mut frequency = raw;
        match self.octave_ratio(raw / previous) {
            Some(ratio) => {
                self.pending_octaves += 1;
                if self.pending_octaves >= self.config.octave_persistence {
                    log::debug!("[PITCH] octave change to {:.1} Hz accepted", raw);
                    return self.restart(raw);
                }
                frequency = raw / ratio;
            }
            None => self.pending_octaves = 0,
        }

        let distance = tuning::calculate_cents_deviation(frequency, previous).abs();
        let alpha = if distance <= self.config.close_cents {
            self.pending_jumps = 0;
            self.config.fast_alpha
        } else {
            self.pending_jumps += 1;
            if self.pending_jumps >= self.config.jump_persistence {
                return self.restart(frequency);
            }
            self.config.slow_alpha
        };

        let next = previous * (1.0 - alpha) + frequency * alpha;
        self.smoothed = Some(next);
        next
    }
}

/// Single-note estimator: YIN, cross-check, smoothing and note mapping.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    config: PitchConfig,
    smoother: PitchSmoother,
}

impl PitchEstimator {
    pub fn new(config: PitchConfig, smoothing: SmoothingConfig) -> Self {
        Self {
            config,
            smoother: PitchSmoother::new(smoothing),
        }
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    /// Estimates the note in a gated, preprocessed frame.
    pub fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> Option<NoteEstimate> {
        let cfg = &self.config;
        let yin = detect_pitch_yin(signal, sample_rate, cfg.min_freq, cfg.max_freq, cfg.threshold)?;

        let raw = if cfg.cross_check {
            let secondary = detect_pitch_autocorrelation(
                signal,
                sample_rate,
                cfg.min_freq,
                cfg.max_freq,
                cfg.autocorr_clarity,
                cfg.autocorr_peak_ratio,
            );
            cross_validate(yin.frequency, secondary, cfg.agreement_tolerance)
        } else {
            yin.frequency
        };

        let frequency = self.smoother.update(raw);
        let nearest = tuning::find_nearest_note(frequency);
        let deviation_cents = tuning::calculate_cents_deviation(frequency, nearest.frequency);
        log::trace!(
            "[PITCH] raw {:.2} Hz (yin {:.2}), smoothed {:.2} Hz -> {}",
            raw,
            yin.frequency,
            frequency,
            nearest.name
        );

        Some(NoteEstimate {
            frequency,
            deviation_cents,
            pitch_class: tuning::pitch_class_of(frequency),
            octave: nearest.octave,
            confidence: (100.0 * (1.0 - yin.aperiodicity)).round().clamp(0.0, 100.0) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48_000;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    #[test]
    fn yin_finds_sine_frequency() {
        for &freq in &[82.41, 110.0, 196.0, 440.0, 659.25, 1000.0] {
            let signal = sine(freq, 4096);
            let pitch = detect_pitch_yin(&signal, SR, 70.0, 1200.0, 0.1)
                .unwrap_or_else(|| panic!("no pitch for {freq}"));
            let error = (pitch.frequency - freq).abs() / freq;
            assert!(error < 0.01, "{freq} Hz detected as {}", pitch.frequency);
            assert!(pitch.aperiodicity < 0.1);
        }
    }

    #[test]
    fn yin_rejects_silence_and_out_of_range() {
        assert!(detect_pitch_yin(&vec![0.0; 4096], SR, 70.0, 1200.0, 0.1).is_none());
        // 50 Hz: no lag in range repeats the waveform
        assert!(detect_pitch_yin(&sine(50.0, 4096), SR, 70.0, 1200.0, 0.1).is_none());
        assert!(detect_pitch_yin(&[0.1; 8], SR, 70.0, 1200.0, 0.1).is_none());
    }

    #[test]
    fn autocorrelation_agrees_with_yin() {
        let signal = sine(220.0, 4096);
        let freq = detect_pitch_autocorrelation(&signal, SR, 70.0, 1200.0, 0.5, 0.9).unwrap();
        assert!((freq - 220.0).abs() / 220.0 < 0.01, "acf gave {freq}");
        assert!(detect_pitch_autocorrelation(&vec![0.0; 4096], SR, 70.0, 1200.0, 0.5, 0.9).is_none());
    }

    #[test]
    fn cross_validation_prefers_mean_only_when_close() {
        assert_eq!(cross_validate(440.0, Some(444.0), 0.15), 442.0);
        assert_eq!(cross_validate(440.0, Some(220.0), 0.15), 440.0);
        assert_eq!(cross_validate(440.0, None, 0.15), 440.0);
    }

    #[test]
    fn smoother_corrects_octave_jump_for_one_cycle() {
        let mut smoother = PitchSmoother::new(SmoothingConfig::default());
        for _ in 0..5 {
            smoother.update(220.0);
        }
        let after_jump = smoother.update(440.0);
        assert!((after_jump - 220.0).abs() < 1.0, "jumped to {after_jump}");
        let after_drop = smoother.update(110.0);
        assert!((after_drop - 220.0).abs() < 1.0);
        let quad = smoother.update(880.0);
        assert!((quad - 220.0).abs() < 1.0);
    }

    #[test]
    fn smoother_accepts_persistent_octave() {
        let mut smoother = PitchSmoother::new(SmoothingConfig::default());
        smoother.update(220.0);
        let mut last = 0.0;
        for _ in 0..4 {
            last = smoother.update(440.0);
        }
        assert_eq!(last, 440.0);
    }

    #[test]
    fn smoother_follows_a_new_note() {
        let mut smoother = PitchSmoother::new(SmoothingConfig::default());
        smoother.update(440.0);
        // A to C: far jump, damped at first
        let first = smoother.update(523.25);
        assert!(first > 440.0 && first < 523.25);
        let mut last = first;
        for _ in 0..6 {
            last = smoother.update(523.25);
        }
        assert!((last - 523.25).abs() < 0.5, "settled at {last}");
    }

    #[test]
    fn estimator_reports_note_and_cents() {
        let mut estimator = PitchEstimator::new(PitchConfig::default(), SmoothingConfig::default());
        let signal = sine(440.0, 4096);
        let mut estimate = None;
        for _ in 0..5 {
            estimate = estimator.estimate(&signal, SR);
        }
        let estimate = estimate.unwrap();
        assert_eq!(estimate.pitch_class, PitchClass::A);
        assert_eq!(estimate.octave, 4);
        assert!(estimate.deviation_cents.abs() < 10.0);
        assert!(estimate.confidence > 90);
    }
}
