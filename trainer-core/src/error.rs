//! Errors raised while building a detector session.
//!
//! Per-frame anomalies (silence, non-finite samples, nothing recognised) are
//! not errors; they surface as an empty [`crate::DetectionEvent`].

use thiserror::Error;

/// Smallest frame the session accepts.
pub const MIN_FRAME_SIZE: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,

    #[error("frame size {got} is below the minimum of {min} samples")]
    FrameTooSmall { got: usize, min: usize },

    #[error("invalid frequency range: {min_hz} Hz to {max_hz} Hz")]
    InvalidFrequencyRange { min_hz: f32, max_hz: f32 },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
