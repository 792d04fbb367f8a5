//! # Spectral Peak Module
//!
//! Finds candidate note fundamentals in a dB magnitude spectrum.
//!
//! ## Steps
//! 1. Local maxima above an adaptive floor, inside the musical band
//! 2. Parabolic refinement of frequency and level
//! 3. Harmonic suppression, strongest peak first
//! 4. Reference fundamentals (open guitar strings) always survive

use crate::fft::{DB_FLOOR, SpectralFrame};
use crate::pitch::parabolic_offset;
use serde::{Deserialize, Serialize};

/// A spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Refined frequency in Hz.
    pub frequency: f32,
    /// Refined level in dB.
    pub amplitude: f32,
}

impl Peak {
    /// Level above the spectrum floor; always non-negative.
    pub fn strength(&self) -> f32 {
        (self.amplitude - DB_FLOOR).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// A peak must strictly exceed this many bins on each side.
    pub neighbors: usize,
    /// Absolute lower bound of the adaptive floor, dB.
    pub floor_db: f32,
    /// Peaks further than this below the frame maximum are ignored, dB.
    pub below_max_db: f32,
    /// Peaks must sit this far above the frame mean, dB.
    pub above_mean_db: f32,
    pub min_freq: f32,
    pub max_freq: f32,
    /// Strongest candidates kept before harmonic suppression.
    pub max_candidates: usize,
    pub max_harmonic_order: u32,
    /// Ratio tolerance for 2nd and 3rd harmonics.
    pub low_order_tolerance: f32,
    /// Ratio tolerance for higher harmonics.
    pub high_order_tolerance: f32,
    /// A peak this many times stronger than a fundamental is not its harmonic.
    pub dominance_ratio: f32,
    /// Frequencies kept even when they look like harmonics.
    pub reference_fundamentals: Vec<f32>,
    pub reference_tolerance_hz: f32,
    /// Strength multiplier applied to reference fundamentals.
    pub reference_boost: f32,
    pub max_peaks: usize,
}

/// Open-string frequencies of a guitar in standard tuning (E2 A2 D3 G3 B3 E4).
pub const GUITAR_OPEN_STRINGS: [f32; 6] = [82.41, 110.0, 146.83, 196.0, 246.94, 329.63];

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            neighbors: 2,
            floor_db: -60.0,
            below_max_db: 45.0,
            above_mean_db: 10.0,
            min_freq: 80.0,
            max_freq: 1200.0,
            max_candidates: 20,
            max_harmonic_order: 8,
            low_order_tolerance: 0.05,
            high_order_tolerance: 0.08,
            dominance_ratio: 1.5,
            reference_fundamentals: GUITAR_OPEN_STRINGS.to_vec(),
            reference_tolerance_hz: 3.0,
            reference_boost: 1.2,
            max_peaks: 12,
        }
    }
}

/// Finds local maxima of the spectrum.
///
/// Non-finite bins are treated as [`DB_FLOOR`]. The floor a peak must clear
/// is the largest of the absolute floor, the frame maximum minus
/// `below_max_db` and the frame mean plus `above_mean_db`.
///
/// # Returns
/// Peaks inside the band, strongest first, at most `max_candidates`.
pub fn find_peaks(frame: &SpectralFrame, config: &PeakConfig) -> Vec<Peak> {
    let k = config.neighbors.max(1);
    let values: Vec<f32> = frame
        .magnitudes_db()
        .iter()
        .map(|&db| if db.is_finite() { db.max(DB_FLOOR) } else { DB_FLOOR })
        .collect();
    if values.len() < 2 * k + 1 {
        return Vec::new();
    }

    let max = values.iter().copied().fold(DB_FLOOR, f32::max);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let floor = config
        .floor_db
        .max(max - config.below_max_db)
        .max(mean + config.above_mean_db);

    let mut peaks = Vec::new();
    for i in k..values.len() - k {
        let value = values[i];
        if value <= floor {
            continue;
        }
        let is_peak = (1..=k).all(|d| value > values[i - d] && value > values[i + d]);
        if !is_peak {
            continue;
        }

        let (left, right) = (values[i - 1], values[i + 1]);
        let offset = parabolic_offset(left, value, right);
        let frequency = frame.bin_frequency(i as f32 + offset);
        if frequency < config.min_freq || frequency > config.max_freq {
            continue;
        }
        let amplitude = value - 0.25 * (left - right) * offset;
        peaks.push(Peak {
            frequency,
            amplitude,
        });
    }

    peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
    peaks.truncate(config.max_candidates);
    log::trace!(
        "[PEAKS] {} candidates above {:.1} dB (max {:.1}, mean {:.1})",
        peaks.len(),
        floor,
        max,
        mean
    );
    peaks
}

fn is_reference(peak: &Peak, config: &PeakConfig) -> bool {
    config
        .reference_fundamentals
        .iter()
        .any(|&reference| (peak.frequency - reference).abs() <= config.reference_tolerance_hz)
}

/// Whether `peak` is an integer harmonic of `fundamental`.
fn is_harmonic_of(peak: &Peak, fundamental: &Peak, config: &PeakConfig) -> bool {
    if fundamental.frequency <= 0.0 {
        return false;
    }
    let ratio = peak.frequency / fundamental.frequency;
    let order = ratio.round();
    if order < 2.0 || order > config.max_harmonic_order as f32 {
        return false;
    }
    let tolerance = if order <= 3.0 {
        config.low_order_tolerance
    } else {
        config.high_order_tolerance
    };
    (ratio - order).abs() < tolerance
        && peak.strength() <= fundamental.strength() * config.dominance_ratio
}

/// Removes peaks that are harmonics of a stronger peak.
///
/// Peaks are visited strongest first. Reference fundamentals are always
/// kept and boosted; every other peak is dropped when it lies on a harmonic
/// of an already accepted one.
pub fn suppress_harmonics(candidates: &[Peak], config: &PeakConfig) -> Vec<Peak> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));

    let mut fundamentals: Vec<Peak> = Vec::with_capacity(sorted.len());
    for peak in sorted {
        if is_reference(&peak, config) {
            log::trace!("[PEAKS] reference fundamental at {:.1} Hz", peak.frequency);
            fundamentals.push(Peak {
                amplitude: DB_FLOOR + peak.strength() * config.reference_boost,
                ..peak
            });
            continue;
        }
        if let Some(parent) = fundamentals
            .iter()
            .find(|fundamental| is_harmonic_of(&peak, fundamental, config))
        {
            log::trace!(
                "[PEAKS] {:.1} Hz dropped as harmonic of {:.1} Hz",
                peak.frequency,
                parent.frequency
            );
            continue;
        }
        fundamentals.push(peak);
    }

    fundamentals.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
    fundamentals.truncate(config.max_peaks);
    fundamentals
}

/// Peak picking followed by harmonic suppression.
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    config: PeakConfig,
}

impl PeakExtractor {
    pub fn new(config: PeakConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PeakConfig {
        &self.config
    }

    /// Fundamental candidates of a spectral frame, strongest first.
    pub fn extract(&self, frame: &SpectralFrame) -> Vec<Peak> {
        let candidates = find_peaks(frame, &self.config);
        suppress_harmonics(&candidates, &self.config)
    }
}
