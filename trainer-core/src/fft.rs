//! # Fast Fourier Transform (FFT) Module
//!
//! Produces the dB magnitude spectrum used by chord analysis.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planner cached per frame length
//! - Magnitudes normalized by frame length and expressed in dB
//! - Output clamped to [`DB_FLOOR`] so a spectral frame never holds -inf/NaN

use rustfft::{FftPlanner, num_complex::Complex};
use std::fmt;

/// Lowest magnitude a spectral bin can report, in dB.
pub const DB_FLOOR: f32 = -100.0;

/// Magnitude spectrum of one frame: one dB value per bin up to Nyquist.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    magnitudes_db: Vec<f32>,
    sample_rate: u32,
    fft_size: usize,
}

impl SpectralFrame {
    /// Wraps a host-supplied spectrum. `magnitudes_db` covers the bins from DC
    /// up to (excluding) Nyquist, so the transform size is twice its length.
    pub fn new(magnitudes_db: Vec<f32>, sample_rate: u32) -> Self {
        let fft_size = magnitudes_db.len() * 2;
        Self {
            magnitudes_db,
            sample_rate,
            fft_size,
        }
    }

    pub fn magnitudes_db(&self) -> &[f32] {
        &self.magnitudes_db
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.magnitudes_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes_db.is_empty()
    }

    /// Center frequency of a bin in Hz.
    pub fn bin_frequency(&self, bin: f32) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        bin * self.sample_rate as f32 / self.fft_size as f32
    }
}

/// Cached FFT planner.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer").finish_non_exhaustive()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Performs a forward FFT on an already windowed signal.
    ///
    /// The planner keeps the plan for each length it has seen, so repeated
    /// calls with the same frame size do not re-plan.
    pub fn perform_fft(&mut self, windowed: &[f32]) -> Vec<Complex<f32>> {
        let fft = self.planner.plan_fft_forward(windowed.len());

        let mut buffer: Vec<Complex<f32>> = windowed
            .iter()
            .map(|&sample| Complex { re: sample, im: 0.0 })
            .collect();

        fft.process(&mut buffer);
        buffer
    }

    /// Computes the dB spectrum of a windowed frame.
    pub fn spectral_frame(&mut self, windowed: &[f32], sample_rate: u32) -> SpectralFrame {
        if windowed.is_empty() {
            return SpectralFrame::new(Vec::new(), sample_rate);
        }
        let spectrum = self.perform_fft(windowed);
        SpectralFrame {
            magnitudes_db: spectrum_to_db(&spectrum),
            sample_rate,
            fft_size: windowed.len(),
        }
    }
}

/// Converts a complex spectrum into dB magnitudes for the bins below Nyquist.
///
/// Magnitudes are normalized by the transform length before the
/// `20·log10` conversion and clamped to [`DB_FLOOR`].
pub fn spectrum_to_db(spectrum: &[Complex<f32>]) -> Vec<f32> {
    let n = spectrum.len();
    if n == 0 {
        return Vec::new();
    }
    spectrum
        .iter()
        .take(n / 2)
        .map(|c| {
            let magnitude = c.norm() / n as f32; // .norm() is sqrt(re^2 + im^2)
            let db = 20.0 * magnitude.log10();
            if db.is_finite() { db.max(DB_FLOOR) } else { DB_FLOOR }
        })
        .collect()
}
