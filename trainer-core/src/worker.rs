//! Dedicated analysis thread.
//!
//! The worker owns a [`DetectorSession`] and runs one cycle per frame taken
//! from the capture queue, pushing a [`DetectionEvent`] for each. Stopping
//! joins the thread and hands the reset session back.

use crate::audio::SampleFrame;
use crate::session::DetectorSession;
use crate::{DetectionEvent, LevelMeter};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::thread::{self, JoinHandle};

/// Events buffered for a slow consumer before new ones are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Audio worker thread management structure.
pub struct DetectorWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<DetectorSession>>,
    events: Receiver<DetectionEvent>,
    level: LevelMeter,
}

impl DetectorWorker {
    /// Starts the analysis thread.
    ///
    /// # Arguments
    /// * `session` - Session the thread will own until [`stop`](Self::stop)
    /// * `frames` - Consumer side of the capture queue
    pub fn spawn(session: DetectorSession, frames: Receiver<SampleFrame>) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (event_tx, events) = bounded(EVENT_QUEUE_CAPACITY);
        let level = session.level_meter();

        let thread_handle = thread::Builder::new()
            .name("detector".into())
            .spawn(move || run(session, frames, shutdown_rx, event_tx))?;

        Ok(Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
            events,
            level,
        })
    }

    /// Detection events, one per processed frame.
    pub fn events(&self) -> &Receiver<DetectionEvent> {
        &self.events
    }

    pub fn level_meter(&self) -> LevelMeter {
        self.level.clone()
    }

    /// Signals shutdown, waits for the thread and returns its reset session.
    pub fn stop(mut self) -> Option<DetectorSession> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Option<DetectorSession> {
        let handle = self.thread_handle.take()?;
        let _ = self.shutdown_tx.try_send(());
        match handle.join() {
            Ok(session) => Some(session),
            Err(_) => {
                log::error!("[WORKER] Analysis thread panicked");
                None
            }
        }
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run(
    mut session: DetectorSession,
    frames: Receiver<SampleFrame>,
    shutdown_rx: Receiver<()>,
    events: Sender<DetectionEvent>,
) -> DetectorSession {
    log::info!("[WORKER] Analysis loop started ({})", session.mode());
    let mut dropped_events = 0u64;

    loop {
        crossbeam_channel::select! {
            recv(frames) -> msg => match msg {
                Ok(frame) => {
                    let event = session.process_frame(&frame);
                    // A stop that arrived mid-cycle wins; the result is stale.
                    if !shutdown_rx.is_empty() {
                        log::debug!("[WORKER] Discarding event of in-flight frame");
                        break;
                    }
                    match events.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped_events += 1;
                            if dropped_events.is_power_of_two() {
                                log::warn!("[WORKER] Event consumer is behind, {} events dropped", dropped_events);
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            log::info!("[WORKER] Event receiver gone");
                            break;
                        }
                    }
                }
                Err(_) => {
                    log::info!("[WORKER] Frame channel closed");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                log::info!("[WORKER] Received shutdown signal");
                break;
            },
        }
    }

    session.reset();
    log::info!("[WORKER] Analysis loop finished");
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame_channel;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{DetectionMode, SessionConfig};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Clock that requests shutdown the first time a cycle reads it.
    struct StopOnRead {
        shutdown_tx: Sender<()>,
        read: Arc<AtomicBool>,
    }

    impl Clock for StopOnRead {
        fn now(&self) -> Duration {
            self.read.store(true, Ordering::SeqCst);
            let _ = self.shutdown_tx.try_send(());
            Duration::ZERO
        }
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48_000.0).sin())
            .collect()
    }

    #[test]
    fn processes_frames_and_returns_reset_session() {
        let clock = ManualClock::new();
        let session = DetectorSession::with_clock(
            SessionConfig::for_mode(DetectionMode::GuitarNote, 48_000),
            clock.clone(),
        )
        .unwrap();
        let (sender, frames) = frame_channel(2);
        let worker = DetectorWorker::spawn(session, frames).unwrap();
        let level = worker.level_meter();

        sender.push(SampleFrame::new(sine(440.0, 4096), 48_000));
        let event = worker
            .events()
            .recv_timeout(Duration::from_secs(5))
            .expect("no event");
        assert_eq!(event.label.as_deref(), Some("A"));
        assert!(level.get() > 0.3);

        let session = worker.stop().expect("session returned");
        assert_eq!(session.level_meter().get(), 0.0);
    }

    #[test]
    fn stop_during_a_cycle_discards_its_event() {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let read = Arc::new(AtomicBool::new(false));
        let clock = StopOnRead {
            shutdown_tx,
            read: read.clone(),
        };
        let session = DetectorSession::with_clock(
            SessionConfig::for_mode(DetectionMode::GuitarNote, 48_000),
            clock,
        )
        .unwrap();

        let (frame_tx, frames) = bounded(1);
        frame_tx.send(SampleFrame::new(sine(440.0, 4096), 48_000)).unwrap();
        let (event_tx, events) = bounded(EVENT_QUEUE_CAPACITY);

        let session = run(session, frames, shutdown_rx, event_tx);

        assert!(read.load(Ordering::SeqCst), "frame was never analysed");
        assert!(events.try_recv().is_err());
        assert_eq!(session.level_meter().get(), 0.0);
        assert!(frame_tx.is_empty());
    }

    #[test]
    fn closing_the_frame_queue_ends_the_loop() {
        let session = DetectorSession::with_clock(SessionConfig::default(), ManualClock::new()).unwrap();
        let (sender, frames) = frame_channel(1);
        let worker = DetectorWorker::spawn(session, frames).unwrap();
        drop(sender);
        assert!(worker.stop().is_some());
    }
}
