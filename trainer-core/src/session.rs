//! # Detector Session
//!
//! Owns every piece of per-session state: the noise gate, the pitch
//! smoother, the chord analysis schedule, the stabilizer and the level meter.
//! One session serves one mode for its whole life; a new mode means a new
//! session.

use crate::audio::SampleFrame;
use crate::chord::ChordMatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::{DetectionMode, SessionConfig};
use crate::error::ConfigError;
use crate::fft::{SpectralFrame, SpectrumAnalyzer};
use crate::peaks::PeakExtractor;
use crate::pitch::PitchEstimator;
use crate::preprocess::{FramePreprocessor, PreprocessedFrame};
use crate::stabilizer::{Candidate, Stabilized, Stabilizer};
use crate::tuning::PitchClass;
use crate::{DetectionEvent, LevelMeter};
use std::time::Duration;

struct NotePipeline {
    estimator: PitchEstimator,
}

struct ChordPipeline {
    analyzer: SpectrumAnalyzer,
    extractor: PeakExtractor,
    matcher: ChordMatcher,
    interval: Duration,
    last_analysis: Option<Duration>,
    detected: Vec<PitchClass>,
}

/// Mode-specific analysis, chosen once at construction.
enum Pipeline {
    Note(NotePipeline),
    Chord(ChordPipeline),
}

pub struct DetectorSession {
    config: SessionConfig,
    clock: Box<dyn Clock>,
    preprocessor: FramePreprocessor,
    pipeline: Pipeline,
    stabilizer: Stabilizer,
    level: LevelMeter,
}

impl std::fmt::Debug for DetectorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorSession")
            .field("mode", &self.config.mode)
            .field("sample_rate", &self.config.sample_rate)
            .field("frame_size", &self.config.frame_size)
            .finish_non_exhaustive()
    }
}

impl DetectorSession {
    /// Creates a session on the system clock.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock::new())
    }

    /// Creates a session that reads time from `clock`.
    pub fn with_clock(config: SessionConfig, clock: impl Clock + 'static) -> Result<Self, ConfigError> {
        config.validate()?;

        let pipeline = match config.mode {
            DetectionMode::GuitarNote | DetectionMode::PianoNote => Pipeline::Note(NotePipeline {
                estimator: PitchEstimator::new(config.pitch.clone(), config.smoothing.clone()),
            }),
            DetectionMode::Chord => Pipeline::Chord(ChordPipeline {
                analyzer: SpectrumAnalyzer::new(),
                extractor: PeakExtractor::new(config.peaks.clone()),
                matcher: ChordMatcher::new(config.chord.clone()),
                interval: Duration::from_millis(config.chord_analysis_interval_ms),
                last_analysis: None,
                detected: Vec::new(),
            }),
        };

        log::info!(
            "[SESSION] {} session at {} Hz, {} samples per frame",
            config.mode,
            config.sample_rate,
            config.frame_size
        );

        Ok(Self {
            preprocessor: FramePreprocessor::new(config.preprocess.clone()),
            stabilizer: Stabilizer::new(config.stabilizer.clone()),
            pipeline,
            clock: Box::new(clock),
            level: LevelMeter::new(),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> DetectionMode {
        self.config.mode
    }

    /// Handle to the live input level.
    pub fn level_meter(&self) -> LevelMeter {
        self.level.clone()
    }

    /// Runs one analysis cycle on a captured frame.
    pub fn process_frame(&mut self, frame: &SampleFrame) -> DetectionEvent {
        self.process_frame_with_spectrum(frame, None)
    }

    /// Runs one analysis cycle, using a host-supplied spectrum for chord
    /// analysis instead of computing one from the frame.
    pub fn process_frame_with_spectrum(
        &mut self,
        frame: &SampleFrame,
        spectrum: Option<&SpectralFrame>,
    ) -> DetectionEvent {
        let now = self.clock.now();
        let prepared = self.preprocessor.process(&frame.samples);
        self.level.set(prepared.rms);

        let mut event = DetectionEvent::empty(
            self.config.mode,
            now.as_millis() as u64,
            prepared.rms,
            prepared.has_signal,
        );

        if !prepared.has_signal || frame.sample_rate == 0 {
            let out = self.stabilizer.on_silence(now);
            apply(&mut event, out);
            return event;
        }

        match &mut self.pipeline {
            Pipeline::Note(note) => {
                note_cycle(note, &mut self.stabilizer, &prepared, frame.sample_rate, now, &mut event)
            }
            Pipeline::Chord(chord) => chord_cycle(
                chord,
                &mut self.stabilizer,
                &prepared,
                frame,
                spectrum,
                now,
                &mut event,
            ),
        }
        event
    }

    /// Clears smoothing, noise estimate, history, lock and level.
    pub fn reset(&mut self) {
        self.preprocessor.reset();
        self.stabilizer.reset();
        self.level.set(0.0);
        match &mut self.pipeline {
            Pipeline::Note(note) => note.estimator.reset(),
            Pipeline::Chord(chord) => {
                chord.last_analysis = None;
                chord.detected.clear();
            }
        }
        log::info!("[SESSION] state reset");
    }
}

fn apply(event: &mut DetectionEvent, out: Stabilized) {
    event.label = out.label;
    event.confidence = out.confidence;
    event.stable = out.stable;
    event.lock = out.lock;
}

fn note_cycle(
    note: &mut NotePipeline,
    stabilizer: &mut Stabilizer,
    prepared: &PreprocessedFrame,
    sample_rate: u32,
    now: Duration,
    event: &mut DetectionEvent,
) {
    let Some(estimate) = note.estimator.estimate(&prepared.centered, sample_rate) else {
        let out = stabilizer.update(now, None);
        // Only a lock may keep a label through an unpitched cycle
        if out.lock.is_some() {
            apply(event, out);
        }
        return;
    };

    let label = estimate.pitch_class.as_str();
    let out = stabilizer.update(now, Some(Candidate::new(label, estimate.confidence)));

    event.frequency = Some(estimate.frequency);
    event.octave = Some(estimate.octave);
    event.cents_deviation = Some(estimate.deviation_cents);
    if out.lock.is_some() {
        apply(event, out);
    } else {
        event.stable = out.stable && out.label.as_deref() == Some(label);
        event.label = Some(label.to_string());
        event.confidence = Some(estimate.confidence);
    }
}

fn chord_cycle(
    chord: &mut ChordPipeline,
    stabilizer: &mut Stabilizer,
    prepared: &PreprocessedFrame,
    frame: &SampleFrame,
    spectrum: Option<&SpectralFrame>,
    now: Duration,
    event: &mut DetectionEvent,
) {
    if stabilizer.high_locked(now) || !chord.analysis_due(now, frame) {
        event.detected_pitch_classes = names(&chord.detected);
        apply(event, stabilizer.current(now));
        return;
    }
    chord.last_analysis = Some(now);

    let computed;
    let spectral = match spectrum {
        Some(spectral) => spectral,
        None => {
            computed = chord.analyzer.spectral_frame(&prepared.windowed, frame.sample_rate);
            &computed
        }
    };

    let peaks = chord.extractor.extract(spectral);
    let candidate = chord.matcher.match_peaks(&peaks);
    chord.detected = candidate
        .as_ref()
        .map(|c| c.detected.clone())
        .unwrap_or_default();
    if let Some(c) = &candidate {
        log::debug!(
            "[SESSION] chord cycle: {} ({}%, {:?}) from {:?}",
            c.name,
            c.confidence,
            c.kind,
            chord.detected
        );
    }

    let out = stabilizer.update(now, candidate.map(|c| Candidate::new(c.name, c.confidence)));
    event.detected_pitch_classes = names(&chord.detected);
    apply(event, out);
}

impl ChordPipeline {
    /// Whether this frame is the one nearest to the next scheduled analysis.
    fn analysis_due(&self, now: Duration, frame: &SampleFrame) -> bool {
        let Some(last) = self.last_analysis else {
            return true;
        };
        let half_frame = frame.duration() / 2;
        now.saturating_sub(last) + half_frame >= self.interval
    }
}

fn names(classes: &[PitchClass]) -> Vec<String> {
    classes.iter().map(|pc| pc.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const SR: u32 = 48_000;

    fn sine_frame(freqs: &[f32], amplitude: f32, len: usize) -> SampleFrame {
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / SR as f32;
                freqs
                    .iter()
                    .map(|f| amplitude * (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum()
            })
            .collect();
        SampleFrame::new(samples, SR)
    }

    #[test]
    fn silence_yields_no_detection() {
        for mode in DetectionMode::ALL {
            let clock = ManualClock::new();
            let mut session =
                DetectorSession::with_clock(SessionConfig::for_mode(mode, SR), clock.clone()).unwrap();
            let event = session.process_frame(&SampleFrame::new(vec![0.0; 4096], SR));
            assert!(!event.is_detection());
            assert!(!event.has_signal);
            assert_eq!(event.level, 0.0);
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = SessionConfig::default();
        config.sample_rate = 0;
        assert!(DetectorSession::new(config).is_err());
    }

    #[test]
    fn chord_analysis_is_rate_limited() {
        let clock = ManualClock::new();
        let mut config = SessionConfig::for_mode(DetectionMode::Chord, SR);
        // Keep the matcher from locking so every cycle goes through the schedule
        config.stabilizer.lock_enabled = false;
        let mut session = DetectorSession::with_clock(config, clock.clone()).unwrap();
        let frame = sine_frame(&[261.63, 329.63, 392.0], 0.25, 4096);

        let first = session.process_frame(&frame);
        assert!(!first.detected_pitch_classes.is_empty());
        let analysed_at = session_last_analysis(&session);
        assert_eq!(analysed_at, Some(Duration::ZERO));

        clock.advance(Duration::from_millis(85));
        session.process_frame(&frame);
        assert_eq!(session_last_analysis(&session), Some(Duration::ZERO));

        clock.advance(Duration::from_millis(85));
        session.process_frame(&frame);
        assert_eq!(session_last_analysis(&session), Some(Duration::from_millis(170)));
    }

    fn session_last_analysis(session: &DetectorSession) -> Option<Duration> {
        match &session.pipeline {
            Pipeline::Chord(chord) => chord.last_analysis,
            Pipeline::Note(_) => None,
        }
    }

    #[test]
    fn reset_clears_level_and_lock() {
        let clock = ManualClock::new();
        let mut session =
            DetectorSession::with_clock(SessionConfig::for_mode(DetectionMode::Chord, SR), clock.clone())
                .unwrap();
        let meter = session.level_meter();
        let event = session.process_frame(&sine_frame(&[261.63, 329.63, 392.0], 0.25, 4096));
        assert!(event.lock.is_some());
        assert!(meter.get() > 0.0);

        session.reset();
        assert_eq!(meter.get(), 0.0);
        clock.advance(Duration::from_millis(10));
        let event = session.process_frame(&SampleFrame::new(vec![0.0; 4096], SR));
        assert!(event.label.is_none());
        assert!(event.lock.is_none());
    }
}
