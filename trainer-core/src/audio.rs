//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! It provides functions for setting up audio streams, selecting appropriate devices,
//! and streaming fixed-size frames to the analysis pipeline.
//!
//! ## Features
//! - Automatic audio device selection
//! - Mono f32 input preferred, multi-channel input down-mixed
//! - Re-framing of callback buffers to the analysis frame size
//! - Bounded hand-off that drops the oldest frame instead of queueing stale audio

use anyhow::{Result, anyhow, bail};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default number of samples per analysis frame (~85 ms at 48 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Sample rate requested from the device when it offers a choice.
pub const PREFERRED_SAMPLE_RATE: u32 = 48_000;

/// A fixed-length block of mono samples in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock span of the frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Producer side of the capture-to-analysis queue.
///
/// When the queue is full the oldest frame is discarded, so the consumer
/// always works on the freshest audio.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: Sender<SampleFrame>,
    overflow: Receiver<SampleFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Queues a frame, evicting the oldest one if needed.
    ///
    /// Never blocks; safe to call from the audio callback.
    pub fn push(&self, frame: SampleFrame) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.overflow.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Frames discarded so far because analysis fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Creates the frame queue. Capacity is clamped to 1..=2 frames.
pub fn frame_channel(capacity: usize) -> (FrameSender, Receiver<SampleFrame>) {
    let (tx, rx) = bounded(capacity.clamp(1, 2));
    let sender = FrameSender {
        tx,
        overflow: rx.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

/// Down-mixes interleaved callback buffers and cuts them into fixed frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_size: usize,
    channels: usize,
    buffer: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, channels: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            channels: channels.max(1),
            buffer: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Appends interleaved samples and returns every completed frame.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        if self.channels == 1 {
            self.buffer.extend_from_slice(interleaved);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.buffer.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        let mut frames = Vec::new();
        // While we have enough data for a full frame, cut it off the front.
        while self.buffer.len() >= self.frame_size {
            frames.push(self.buffer[..self.frame_size].to_vec());
            self.buffer.drain(..self.frame_size);
        }
        frames
    }
}

/// Default input device together with the configuration capture will use.
///
/// Selecting the device is separate from starting the stream so a host can
/// check its settings against the real sample rate before audio flows.
pub struct InputDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl InputDevice {
    /// Selects the default input device and an f32 configuration, mono and
    /// close to 48 kHz if possible.
    ///
    /// # Returns
    /// * `Ok(input)` - Device and chosen configuration
    /// * `Err(e)` - No device or no usable format
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        log::info!("[AUDIO] Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let config = match find_supported_config(configs, PREFERRED_SAMPLE_RATE) {
            Some(range) => {
                let rate = PREFERRED_SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
                range.with_sample_rate(cpal::SampleRate(rate))
            }
            None => {
                let fallback = device.default_input_config()?;
                if fallback.sample_format() != cpal::SampleFormat::F32 {
                    bail!("No suitable f32 input format found");
                }
                fallback
            }
        };

        Ok(Self { device, config })
    }

    /// Rate the stream will deliver, in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    /// Starts the stream.
    ///
    /// The callback re-frames the input and pushes it into `sink`.
    ///
    /// # Arguments
    /// * `sink` - Producer side of the frame queue
    /// * `frame_size` - Samples per frame delivered to the analysis thread
    pub fn start(self, sink: FrameSender, frame_size: usize) -> Result<cpal::Stream> {
        let sample_rate = self.sample_rate();
        let channels = self.config.channels() as usize;
        let config: cpal::StreamConfig = self.config.into();

        log::info!(
            "[AUDIO] Selected {} Hz, {} channel(s), {} samples per frame",
            sample_rate,
            channels,
            frame_size
        );

        let err_fn = |err| log::error!("[AUDIO] An error occurred on the audio stream: {}", err);

        let mut assembler = FrameAssembler::new(frame_size, channels);

        let stream = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for samples in assembler.push(data) {
                    sink.push(SampleFrame::new(samples, sample_rate));
                }
            },
            err_fn,
            None,
        )?;

        stream.play()?;

        Ok(stream)
    }
}

/// Starts audio capture from the default input device.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and sample rate
/// * `Err(e)` - No device, no usable format, or the stream failed to start
pub fn start_audio_capture(sink: FrameSender, frame_size: usize) -> Result<(cpal::Stream, u32)> {
    let input = InputDevice::open_default()?;
    let sample_rate = input.sample_rate();
    Ok((input.start(sink, frame_size)?, sample_rate))
}

/// Finds the best supported f32 input configuration.
///
/// Mono beats multi-channel; among equals, the range closest to
/// `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels() != 1, distance)
        })
}
