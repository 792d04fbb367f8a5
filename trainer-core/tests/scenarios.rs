use std::f32::consts::PI;
use std::time::Duration;

use trainer_core::clock::{Clock, ManualClock};
use trainer_core::fft::SpectrumAnalyzer;
use trainer_core::peaks::{PeakConfig, PeakExtractor};
use trainer_core::preprocess::apply_hann_window;
use trainer_core::{DetectionEvent, DetectionMode, DetectorSession, LockTier, SampleFrame, SessionConfig};

const SR: u32 = 48_000;
const FRAME: usize = 4096;

const C_MAJOR: [f32; 3] = [261.63, 329.63, 392.0];
const A_MINOR: [f32; 3] = [220.0, 261.63, 329.63];

/// Phase-continuous sum of sines, cut into consecutive frames.
struct Tone {
    partials: Vec<(f32, f32)>,
    position: usize,
}

impl Tone {
    fn new(freqs: &[f32], amplitude: f32) -> Self {
        Self {
            partials: freqs.iter().map(|&f| (f, amplitude)).collect(),
            position: 0,
        }
    }

    fn with_partials(partials: &[(f32, f32)]) -> Self {
        Self {
            partials: partials.to_vec(),
            position: 0,
        }
    }

    fn next_frame(&mut self) -> SampleFrame {
        let start = self.position;
        self.position += FRAME;
        let samples = (start..start + FRAME)
            .map(|i| {
                let t = i as f32 / SR as f32;
                self.partials
                    .iter()
                    .map(|&(f, a)| a * (2.0 * PI * f * t).sin())
                    .sum()
            })
            .collect();
        SampleFrame::new(samples, SR)
    }
}

fn silence() -> SampleFrame {
    SampleFrame::new(vec![0.0; FRAME], SR)
}

fn frame_period() -> Duration {
    Duration::from_secs_f64(FRAME as f64 / SR as f64)
}

/// Session on a manual clock that advances one frame per cycle.
struct Harness {
    clock: ManualClock,
    session: DetectorSession,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = ManualClock::new();
        let session = DetectorSession::with_clock(config, clock.clone()).expect("valid config");
        Self { clock, session }
    }

    fn mode(mode: DetectionMode) -> Self {
        Self::new(SessionConfig::for_mode(mode, SR))
    }

    fn feed(&mut self, frame: &SampleFrame) -> DetectionEvent {
        let event = self.session.process_frame(frame);
        self.clock.advance(frame_period());
        event
    }

    fn feed_tone(&mut self, tone: &mut Tone, frames: usize) -> Vec<DetectionEvent> {
        (0..frames).map(|_| self.feed(&tone.next_frame())).collect()
    }
}

#[test]
fn sustained_a4_converges_on_concert_pitch() {
    let mut harness = Harness::mode(DetectionMode::GuitarNote);
    let events = harness.feed_tone(&mut Tone::new(&[440.0], 0.5), 12);

    let last = events.last().unwrap();
    assert_eq!(last.label.as_deref(), Some("A"));
    assert_eq!(last.octave, Some(4));
    let frequency = last.frequency.unwrap();
    assert!((frequency - 440.0).abs() < 5.0, "settled on {frequency} Hz");
    assert!(last.cents_deviation.unwrap().abs() < 10.0);
    assert!(last.stable);
    assert!(last.lock.is_none(), "note modes never lock");
    assert!(events.iter().all(|e| e.label.as_deref() == Some("A")));
}

#[test]
fn a_minor_chord_is_recognised() {
    // Low open voicing and the same chord an octave up
    for voicing in [A_MINOR, [440.0, 523.25, 659.25]] {
        let mut harness = Harness::mode(DetectionMode::Chord);
        let events = harness.feed_tone(&mut Tone::new(&voicing, 0.25), 8);

        let first = events.iter().find(|e| e.is_detection()).expect("no chord reported");
        assert_eq!(first.label.as_deref(), Some("Am"), "voicing {voicing:?}");
        assert!(first.confidence.unwrap() >= 70);
        for class in ["A", "C", "E"] {
            assert!(
                first.detected_pitch_classes.iter().any(|pc| pc == class),
                "{class} missing from {:?}",
                first.detected_pitch_classes
            );
        }
    }
}

#[test]
fn c_major_is_not_reported_as_minor() {
    let mut harness = Harness::mode(DetectionMode::Chord);
    let events = harness.feed_tone(&mut Tone::new(&C_MAJOR, 0.25), 8);

    let labelled: Vec<_> = events.iter().filter(|e| e.is_detection()).collect();
    assert!(!labelled.is_empty());
    for event in labelled {
        assert_eq!(event.label.as_deref(), Some("C"));
        assert!(event.confidence.unwrap() >= 70);
    }
}

#[test]
fn octave_error_is_held_back_until_it_persists() {
    let mut harness = Harness::mode(DetectionMode::GuitarNote);
    harness.feed_tone(&mut Tone::new(&[220.0], 0.5), 8);

    let mut upper = Tone::new(&[440.0], 0.5);
    for _ in 0..3 {
        let event = harness.feed(&upper.next_frame());
        let frequency = event.frequency.unwrap();
        assert!((frequency - 220.0).abs() < 5.0, "jumped to {frequency} Hz");
    }

    let event = harness.feed(&upper.next_frame());
    let frequency = event.frequency.unwrap();
    assert!((frequency - 440.0).abs() < 5.0, "octave change not accepted: {frequency} Hz");
    assert_eq!(event.octave, Some(4));
}

#[test]
fn harmonics_of_a_tone_are_not_fundamentals() {
    let frame = Tone::with_partials(&[(220.0, 0.5), (440.0, 0.25), (660.0, 0.125)]).next_frame();
    let mut windowed = frame.samples.clone();
    apply_hann_window(&mut windowed);

    let spectrum = SpectrumAnalyzer::new().spectral_frame(&windowed, SR);
    let peaks = PeakExtractor::new(PeakConfig::default()).extract(&spectrum);

    assert!(!peaks.is_empty());
    assert!((peaks[0].frequency - 220.0).abs() < 2.0, "strongest peak at {}", peaks[0].frequency);
    for harmonic in [440.0, 660.0] {
        assert!(
            peaks.iter().all(|p| (p.frequency - harmonic).abs() > 10.0),
            "harmonic {harmonic} kept in {peaks:?}"
        );
    }
}

#[test]
fn repeated_frames_give_a_steady_report() {
    let mut config = SessionConfig::for_mode(DetectionMode::Chord, SR);
    config.stabilizer.lock_enabled = false;
    let mut harness = Harness::new(config);
    let frame = Tone::new(&C_MAJOR, 0.25).next_frame();
    let events: Vec<_> = (0..16).map(|_| harness.feed(&frame)).collect();

    let start = events
        .iter()
        .position(|e| e.is_detection())
        .expect("chord never became stable");
    let reported = &events[start..];
    assert!(reported.iter().all(|e| e.label.as_deref() == Some("C") && e.stable));
    for pair in reported.windows(2) {
        assert!(pair[1].confidence >= pair[0].confidence);
    }

    let mut harness = Harness::mode(DetectionMode::GuitarNote);
    let frame = Tone::new(&[196.0], 0.5).next_frame();
    let events: Vec<_> = (0..10).map(|_| harness.feed(&frame)).collect();
    let tail: Vec<f32> = events[5..].iter().map(|e| e.frequency.unwrap()).collect();
    let spread = tail.iter().copied().fold(f32::MIN, f32::max) - tail.iter().copied().fold(f32::MAX, f32::min);
    assert!(spread < 1.0, "readings wander: {tail:?}");
}

#[test]
fn high_lock_holds_then_releases() {
    let mut harness = Harness::mode(DetectionMode::Chord);

    let first = harness.feed(&Tone::new(&C_MAJOR, 0.25).next_frame());
    assert_eq!(first.label.as_deref(), Some("C"));
    assert_eq!(first.lock, Some(LockTier::High));

    // A different chord while locked is not reported
    let mut minor = Tone::new(&A_MINOR, 0.25);
    while harness.clock.now() < Duration::from_millis(3900) {
        let event = harness.feed(&minor.next_frame());
        assert_eq!(event.label.as_deref(), Some("C"));
        assert_eq!(event.lock, Some(LockTier::High));
    }

    harness.clock.set(Duration::from_millis(4100));
    let released = harness.feed(&silence());
    assert!(released.label.is_none());
    assert!(released.lock.is_none());

    let events = harness.feed_tone(&mut minor, 6);
    let reported = events.iter().find(|e| e.is_detection()).expect("no chord after release");
    assert_eq!(reported.label.as_deref(), Some("Am"));
}

#[test]
fn silence_and_garbage_never_panic() {
    for mode in DetectionMode::ALL {
        let mut harness = Harness::mode(mode);

        let event = harness.feed(&silence());
        assert!(!event.is_detection());
        assert_eq!(event.level, 0.0);

        let mut noisy = Tone::new(&[330.0], 0.4).next_frame();
        for i in (0..noisy.samples.len()).step_by(97) {
            noisy.samples[i] = if i % 2 == 0 { f32::NAN } else { f32::INFINITY };
        }
        let event = harness.feed(&noisy);
        assert!(event.level.is_finite());
        if let Some(frequency) = event.frequency {
            assert!(frequency.is_finite());
        }
        if let Some(cents) = event.cents_deviation {
            assert!(cents.is_finite());
        }

        let event = harness.feed(&SampleFrame::new(vec![f32::NAN; FRAME], SR));
        assert!(!event.has_signal);
        assert_eq!(event.level, 0.0);
    }
}

#[test]
fn piano_mode_covers_the_keyboard() {
    for (frequency, octave) in [(65.41, 2), (2093.0, 7)] {
        let mut harness = Harness::mode(DetectionMode::PianoNote);
        let events = harness.feed_tone(&mut Tone::new(&[frequency], 0.5), 6);
        let last = events.last().unwrap();

        let detected = last.frequency.expect("no pitch");
        assert!(
            (detected - frequency).abs() / frequency < 0.01,
            "{frequency} Hz detected as {detected} Hz"
        );
        assert_eq!(last.label.as_deref(), Some("C"));
        assert_eq!(last.octave, Some(octave));
    }
}

#[test]
fn events_serialize_for_hosts() {
    let mut harness = Harness::mode(DetectionMode::Chord);
    let event = harness.feed(&Tone::new(&C_MAJOR, 0.25).next_frame());
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["mode"], "chord");
    assert_eq!(json["label"], "C");
    assert_eq!(json["lock"], "high");
}
