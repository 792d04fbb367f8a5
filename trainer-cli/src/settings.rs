//! Session configuration from defaults, an optional JSON file and flags.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use trainer_core::audio::PREFERRED_SAMPLE_RATE;
use trainer_core::{DetectionMode, SessionConfig};

/// Builds the session configuration.
///
/// The mode comes from the command line, else from the file, else the
/// default. The file is then laid over that mode's defaults, so it only
/// needs to name the values it changes.
///
/// # Arguments
/// * `mode` - Mode given on the command line, if any
/// * `file` - Path of a JSON configuration file, if any
pub fn load(mode: Option<DetectionMode>, file: Option<&Path>) -> Result<SessionConfig> {
    let overrides = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading configuration {}", path.display()))?;
            serde_json::from_str::<Value>(&text)
                .with_context(|| format!("parsing configuration {}", path.display()))?
        }
        None => Value::Object(Default::default()),
    };
    resolve(mode, overrides)
}

fn resolve(mode: Option<DetectionMode>, overrides: Value) -> Result<SessionConfig> {
    let file_mode = match overrides.get("mode") {
        Some(value) => Some(serde_json::from_value::<DetectionMode>(value.clone()).context("invalid `mode`")?),
        None => None,
    };
    let mode = mode.or(file_mode).unwrap_or_default();

    let mut merged = serde_json::to_value(SessionConfig::for_mode(mode, PREFERRED_SAMPLE_RATE))?;
    merge(&mut merged, overrides);
    let mut config: SessionConfig = serde_json::from_value(merged).context("invalid configuration")?;
    config.mode = mode;
    Ok(config)
}

/// Adopts the input device's sample rate and validates the result.
///
/// Rate-dependent limits, such as the longest period a frame can hold,
/// only mean something once the real rate is known.
pub fn for_device(mut config: SessionConfig, sample_rate: u32) -> Result<SessionConfig> {
    config.sample_rate = sample_rate;
    config
        .validate()
        .with_context(|| format!("configuration unusable at {sample_rate} Hz"))?;
    Ok(config)
}

/// Recursively overwrites `base` with the values present in `overlay`.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_overrides_sit_on_mode_defaults() {
        let config = resolve(
            Some(DetectionMode::PianoNote),
            json!({ "pitch": { "threshold": 0.2 }, "frame_size": 8192 }),
        )
        .unwrap();
        assert_eq!(config.mode, DetectionMode::PianoNote);
        assert_eq!(config.pitch.threshold, 0.2);
        // Untouched piano defaults survive the merge
        assert_eq!(config.pitch.min_freq, 27.5);
        assert_eq!(config.preprocess.gate_floor, 0.020);
        assert_eq!(config.frame_size, 8192);
    }

    #[test]
    fn mode_precedence() {
        let from_file = resolve(None, json!({ "mode": "chord" })).unwrap();
        assert_eq!(from_file.mode, DetectionMode::Chord);
        assert!(from_file.stabilizer.lock_enabled);

        let from_flag = resolve(Some(DetectionMode::GuitarNote), json!({ "mode": "chord" })).unwrap();
        assert_eq!(from_flag.mode, DetectionMode::GuitarNote);

        assert_eq!(resolve(None, json!({})).unwrap(), SessionConfig::default());
        assert!(resolve(None, json!({ "mode": "banjo" })).is_err());
    }

    #[test]
    fn device_rate_is_validated() {
        let piano = resolve(Some(DetectionMode::PianoNote), json!({})).unwrap();
        let config = for_device(piano.clone(), 48_000).unwrap();
        assert_eq!(config.sample_rate, 48_000);

        // A0 needs more than 2048 samples of lag at 96 kHz
        assert!(for_device(piano, 96_000).is_err());

        let larger = resolve(Some(DetectionMode::PianoNote), json!({ "frame_size": 8192 })).unwrap();
        assert_eq!(for_device(larger, 96_000).unwrap().sample_rate, 96_000);
    }
}
