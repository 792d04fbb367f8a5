//! # Trainer - Command Line Host
//!
//! Listens on the default microphone and prints what the detector hears.
//! With `--expected` it turns into an exercise: it keeps listening until the
//! expected note or chord has been reported often enough in a row.
//!
//! ## Architecture
//! - **Audio Thread**: cpal callback re-framing input into the frame queue
//! - **Analysis Thread**: `DetectorWorker` running one session
//! - **Main Thread**: prints events and applies the exercise judgement

mod judge;
mod settings;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cpal::traits::StreamTrait;
use crossbeam_channel::RecvTimeoutError;
use judge::{DEFAULT_REQUIRED_MATCHES, ExerciseJudge, Verdict};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use trainer_core::audio::{InputDevice, frame_channel};
use trainer_core::worker::DetectorWorker;
use trainer_core::{DetectionEvent, DetectionMode, DetectorSession};

#[derive(Parser, Debug)]
#[command(name = "trainer", version, about = "Real-time note and chord recognition")]
struct Args {
    /// What to listen for
    #[arg(short, long)]
    mode: Option<DetectionMode>,

    /// Note or chord the learner should play (e.g. "A", "Am", "Bb")
    #[arg(short, long)]
    expected: Option<String>,

    /// Consecutive matching events needed to pass
    #[arg(long, default_value_t = DEFAULT_REQUIRED_MATCHES)]
    required_matches: usize,

    /// JSON file overriding the mode defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Samples per analysis frame
    #[arg(long)]
    frame_size: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    max_seconds: Option<f64>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = settings::load(args.mode, args.config.as_deref())?;
    if let Some(frame_size) = args.frame_size {
        config.frame_size = frame_size;
    }

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut judge = match &args.expected {
        Some(expected) => match ExerciseJudge::new(expected, args.required_matches) {
            Some(judge) => Some(judge),
            None => bail!("`{expected}` is not a note or chord name"),
        },
        None => None,
    };

    // Settings are checked at the device's rate before any audio flows
    let input = InputDevice::open_default().context("Input unavailable")?;
    let sample_rate = input.sample_rate();
    let config = settings::for_device(config, sample_rate)?;

    let (sender, frames) = frame_channel(config.frame_queue_capacity);
    let stream = input.start(sender.clone(), config.frame_size).context("Input unavailable")?;

    let session = DetectorSession::new(config)?;
    let worker = DetectorWorker::spawn(session, frames)?;
    log::info!("[MAIN] Listening at {} Hz", sample_rate);
    match &judge {
        Some(judge) => eprintln!("Play {} ({} matches in a row to pass)", judge.expected(), args.required_matches),
        None => eprintln!("Listening..."),
    }

    let deadline = args.max_seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    let mut last_printed: Option<String> = None;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            eprintln!("Time is up");
            break;
        }

        let event = match worker.events().recv_timeout(Duration::from_millis(250)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("[MAIN] Analysis thread stopped");
                break;
            }
        };

        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else if event.label != last_printed {
            println!("{}", describe(&event));
            last_printed = event.label.clone();
        }

        if let Some(judge) = judge.as_mut() {
            if judge.observe(&event) == Verdict::Success {
                eprintln!("Correct: {}", judge.expected());
                break;
            }
        }
    }

    if let Err(err) = stream.pause() {
        log::warn!("[MAIN] Could not pause input stream: {}", err);
    }
    drop(stream);
    worker.stop();

    if sender.dropped() > 0 {
        log::warn!("[MAIN] {} frames dropped while analysis was busy", sender.dropped());
    }

    match judge {
        Some(judge) if !judge.succeeded() => bail!("{} was not recognised", judge.expected()),
        _ => Ok(()),
    }
}

/// One human-readable line per change of the reported label.
fn describe(event: &DetectionEvent) -> String {
    let Some(label) = &event.label else {
        return format!("--          level {:.3}", event.level);
    };

    let mut line = format!("{:<4} {:>3}%", label, event.confidence.unwrap_or(0));
    if let (Some(frequency), Some(octave), Some(cents)) = (event.frequency, event.octave, event.cents_deviation) {
        line.push_str(&format!("  {}{} {:.1} Hz {:+.0} cents", label, octave, frequency, cents));
    }
    if !event.detected_pitch_classes.is_empty() {
        line.push_str(&format!("  [{}]", event.detected_pitch_classes.join(" ")));
    }
    if let Some(tier) = event.lock {
        line.push_str(&format!("  locked ({:?})", tier));
    } else if event.stable {
        line.push_str("  stable");
    }
    line
}
