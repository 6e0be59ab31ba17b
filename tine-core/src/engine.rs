//! # Analysis Engine Module
//!
//! Runs a `TunerSession` on a dedicated worker thread. Audio arrives through
//! a lock-free SPSC ring (filled by the capture callback or any other
//! producer), is cut into overlapping analysis windows and analyzed in
//! order. Results leave through a bounded crossbeam channel.
//!
//! ## Features
//! - Frames stamped by their position in the audio (sample clock), anchored
//!   to a monotonic wall clock when the stream starts or stalls
//! - Phase/lock polling while no audio arrives, so gaps still fall through
//!   to dropout and listening
//! - Control channel for threshold, manual override, reset and shutdown
//! - Idempotent `stop()` that discards unprocessed audio and joins the worker

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{info, warn};
use ringbuf::Consumer;

use crate::config::{StartOptions, TunerConfig};
use crate::error::{Result, TunerError};
use crate::frames::FrameAccumulator;
use crate::session::{TunerEvent, TunerSession};
use crate::TunerStatus;

/// Capacity of the outgoing event channel.
pub const EVENT_CAPACITY: usize = 256;

/// How long the worker waits for control messages between ring drains.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How far the audio clock may lag the wall clock before it is re-anchored.
const RESYNC_MS: f64 = 100.0;

/// Something the engine published.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One analyzed window
    Pitch(TunerEvent),
    /// Phase or lock changed outside of an analyzed window (buffer gap,
    /// reset, manual override)
    Status(TunerStatus),
}

enum Control {
    SetThreshold(f64),
    SetManualOverride(Option<i32>),
    Reset,
    Shutdown,
}

/// Handle to a running analysis worker.
pub struct TunerEngine {
    control_tx: Sender<Control>,
    events_rx: Receiver<EngineEvent>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl TunerEngine {
    /// Validates the options, builds a fresh session and starts the worker.
    ///
    /// # Arguments
    /// * `options` - Window, hop, threshold and sample rate of the incoming audio
    /// * `config` - Pipeline tunables
    /// * `samples` - Consumer half of the sample ring; the producer half
    ///   belongs to whoever captures audio
    ///
    /// # Returns
    /// * `Ok(engine)` - The worker is running
    /// * `Err(e)` - Invalid options or the thread could not be spawned
    pub fn start(options: StartOptions, config: TunerConfig, samples: Consumer<f32>) -> Result<Self> {
        options.validate()?;
        config.validate()?;

        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            clock: StreamClock::new(options.sample_rate, options.buffer_size, options.hop()),
            accumulator: FrameAccumulator::new(options.buffer_size, options.hop()),
            scratch: vec![0.0; options.hop()],
            session: TunerSession::new(options, config),
            samples,
            events: events_tx,
            control: control_rx,
            dropped: Arc::clone(&dropped),
            started: Instant::now(),
            last_status: TunerStatus::default(),
        };

        let handle = thread::Builder::new()
            .name("tine-engine".to_string())
            .spawn(move || worker.run())
            .map_err(|e| TunerError::Engine(format!("failed to spawn worker: {}", e)))?;

        info!("[ENGINE] Started");
        Ok(Self {
            control_tx,
            events_rx,
            dropped,
            worker: Some(handle),
        })
    }

    /// Receiver for the published events, in analysis order.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events_rx
    }

    /// Events discarded because the receiver fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Hot-updates the YIN threshold; the session clamps it into range.
    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        self.send(Control::SetThreshold(threshold))
    }

    pub fn set_manual_override(&self, midi: Option<i32>) -> Result<()> {
        self.send(Control::SetManualOverride(midi))
    }

    /// Returns the session to its neutral state and drops buffered audio.
    pub fn reset(&self) -> Result<()> {
        self.send(Control::Reset)
    }

    /// Stops the worker and waits for it to exit. Audio still in the ring
    /// is discarded. Calling it again does nothing.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let _ = self.control_tx.send(Control::Shutdown);
        if handle.join().is_err() {
            warn!("[ENGINE] Worker panicked");
        }
        info!("[ENGINE] Stopped");
    }

    fn send(&self, control: Control) -> Result<()> {
        if self.worker.is_none() {
            return Err(TunerError::Engine("engine is stopped".to_string()));
        }
        self.control_tx
            .send(control)
            .map_err(|_| TunerError::Engine("worker has exited".to_string()))
    }
}

impl Drop for TunerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    session: TunerSession,
    accumulator: FrameAccumulator,
    samples: Consumer<f32>,
    scratch: Vec<f32>,
    events: Sender<EngineEvent>,
    control: Receiver<Control>,
    dropped: Arc<AtomicU64>,
    started: Instant,
    clock: StreamClock,
    last_status: TunerStatus,
}

impl Worker {
    fn run(mut self) {
        let control = self.control.clone();
        loop {
            crossbeam_channel::select! {
                recv(control) -> msg => match msg {
                    Ok(Control::SetThreshold(threshold)) => self.session.set_threshold(threshold),
                    Ok(Control::SetManualOverride(midi)) => {
                        let now = self.clock.poll_ms(self.now_ms());
                        self.session.set_manual_override(midi, now);
                        self.publish_status(self.session.status());
                    }
                    Ok(Control::Reset) => {
                        self.discard_pending();
                        self.session.reset();
                        self.publish_status(self.session.status());
                    }
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                default(POLL_INTERVAL) => {}
            }

            if self.drain() == 0 {
                let now = self.clock.poll_ms(self.now_ms());
                let status = self.session.poll(now);
                self.publish_status(status);
            }
        }
        self.discard_pending();
    }

    fn publish_status(&mut self, status: TunerStatus) {
        if status != self.last_status {
            self.last_status = status;
            publish(&self.events, &self.dropped, EngineEvent::Status(status));
        }
    }

    /// Analyzes every complete window in the ring. Returns the number of
    /// samples consumed.
    fn drain(&mut self) -> usize {
        let Self {
            session,
            accumulator,
            samples,
            scratch,
            events,
            dropped,
            started,
            clock,
            last_status,
            ..
        } = self;

        let available = samples.len();
        if available == 0 {
            return 0;
        }
        clock.anchor(available, elapsed_ms(*started));

        let mut consumed = 0;
        loop {
            let n = samples.pop_slice(scratch);
            if n == 0 {
                break;
            }
            consumed += n;
            clock.consume(n);
            accumulator.push(&scratch[..n], |frame| {
                let event = session.process_buffer(frame, clock.next_frame_ms());
                *last_status = event.status;
                publish(events, dropped, EngineEvent::Pitch(event));
            });
        }
        consumed
    }

    fn discard_pending(&mut self) {
        while self.samples.pop_slice(&mut self.scratch) > 0 {}
        self.accumulator.reset();
        self.clock.reset();
    }

    fn now_ms(&self) -> f64 {
        elapsed_ms(self.started)
    }
}

/// Maps positions in the sample stream to session milliseconds.
///
/// Frame `k` ends at sample `window + k * hop`; its timestamp is the stream
/// origin plus that position at the sample rate. The origin is taken from
/// the wall clock when audio first arrives, and moved forward when the audio
/// falls more than `RESYNC_MS` behind (a capture stall).
#[derive(Debug, Clone)]
struct StreamClock {
    sample_rate: f64,
    window: u64,
    hop: u64,
    origin_ms: Option<f64>,
    consumed: u64,
    next_frame_end: u64,
    last_frame_ms: f64,
}

impl StreamClock {
    fn new(sample_rate: f64, window: usize, hop: usize) -> Self {
        Self {
            sample_rate,
            window: window as u64,
            hop: hop as u64,
            origin_ms: None,
            consumed: 0,
            next_frame_end: window as u64,
            last_frame_ms: f64::NEG_INFINITY,
        }
    }

    fn samples_ms(&self, samples: u64) -> f64 {
        samples as f64 * 1000.0 / self.sample_rate
    }

    /// Called with the samples waiting in the ring at wall time `now_ms`,
    /// before they are consumed. The newest of them is taken to be "now".
    fn anchor(&mut self, available: usize, now_ms: f64) {
        let end = self.consumed + available as u64;
        let lagging = self
            .origin_ms
            .is_none_or(|origin| now_ms - (origin + self.samples_ms(end)) > RESYNC_MS);
        if lagging {
            self.origin_ms = Some(now_ms - self.samples_ms(end));
        }
    }

    fn consume(&mut self, samples: usize) {
        self.consumed += samples as u64;
    }

    fn next_frame_ms(&mut self) -> f64 {
        let origin = self.origin_ms.unwrap_or(0.0);
        let timestamp = origin + self.samples_ms(self.next_frame_end);
        self.next_frame_end += self.hop;
        self.last_frame_ms = self.last_frame_ms.max(timestamp);
        timestamp
    }

    /// Time for evaluations without audio; never behind the last frame.
    fn poll_ms(&self, now_ms: f64) -> f64 {
        now_ms.max(self.last_frame_ms)
    }

    fn reset(&mut self) {
        *self = Self::new(self.sample_rate, self.window as usize, self.hop as usize);
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn publish(events: &Sender<EngineEvent>, dropped: &AtomicU64, event: EngineEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if count.is_power_of_two() {
                warn!("[ENGINE] Event receiver is behind, {} events dropped", count);
            }
        }
        // Nobody is listening any more; keep analyzing until shutdown.
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::SignalPhase;
    use ringbuf::RingBuffer;
    use std::f64::consts::PI;

    fn tone(freq: f64, seconds: f64) -> Vec<f32> {
        let len = (48_000.0 * seconds) as usize;
        (0..len)
            .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / 48_000.0).sin()) as f32)
            .collect()
    }

    fn wait_for<F>(engine: &TunerEngine, timeout: Duration, mut found: F) -> bool
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(event) = engine.events().recv_timeout(Duration::from_millis(50)) {
                if found(&event) {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_stream_clock_spreads_a_burst_over_its_audio_time() {
        let mut clock = StreamClock::new(48_000.0, 2048, 1024);
        // Two seconds arrive at once at t = 5 s: the newest sample is "now"
        clock.anchor(96_000, 5000.0);
        clock.consume(96_000);
        let first = clock.next_frame_ms();
        let second = clock.next_frame_ms();
        assert!((first - (3000.0 + 2048.0 / 48.0)).abs() < 1e-9);
        assert!((second - first - 1024.0 / 48.0).abs() < 1e-9);
        assert_eq!(clock.poll_ms(0.0), second);
        assert_eq!(clock.poll_ms(6000.0), 6000.0);
    }

    #[test]
    fn test_stream_clock_resyncs_after_stall() {
        let mut clock = StreamClock::new(48_000.0, 2048, 1024);
        clock.anchor(480, 100.0);
        clock.consume(480);
        assert_eq!(clock.origin_ms, Some(90.0));

        // Small scheduling lag keeps the sample clock
        clock.anchor(480, 120.0);
        clock.consume(480);
        assert_eq!(clock.origin_ms, Some(90.0));

        // A long stall moves the origin forward
        clock.anchor(480, 1000.0);
        clock.consume(480);
        assert_eq!(clock.origin_ms, Some(970.0));

        clock.reset();
        assert_eq!(clock.origin_ms, None);
        assert_eq!(clock.consumed, 0);
    }

    #[test]
    fn test_burst_of_audio_acquires_lock() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(1 << 17).split();
        let engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();

        // Two seconds of in-tune audio in a single push
        let samples = tone(440.0, 2.0);
        assert_eq!(producer.push_slice(&samples), samples.len());

        let mut span: Option<(f64, f64)> = None;
        let locked = wait_for(&engine, Duration::from_secs(5), |event| match event {
            EngineEvent::Pitch(e) => {
                let ts = e.pitch.timestamp_ms;
                span = Some(span.map_or((ts, ts), |(first, _)| (first, ts)));
                e.lock_acquired
            }
            EngineEvent::Status(_) => false,
        });
        assert!(locked);
        let (first, last) = span.unwrap();
        // Stamped by audio position, not by processing time
        assert!(last - first >= 400.0);
    }

    #[test]
    fn test_rejects_invalid_options() {
        let (_producer, consumer) = RingBuffer::<f32>::new(1024).split();
        let options = StartOptions {
            buffer_size: 64,
            ..StartOptions::default()
        };
        let result = TunerEngine::start(options, TunerConfig::default(), consumer);
        assert!(matches!(result, Err(TunerError::InvalidOption(_))));
    }

    #[test]
    fn test_analyzes_ring_audio() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(1 << 16).split();
        let mut engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();

        let samples = tone(440.0, 0.5);
        assert_eq!(producer.push_slice(&samples), samples.len());

        let resolved = wait_for(&engine, Duration::from_secs(5), |event| {
            matches!(event, EngineEvent::Pitch(e) if e.note_name() == Some("A4"))
        });
        assert!(resolved);
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_gap_in_audio_falls_through_to_listening() {
        let (mut producer, consumer) = RingBuffer::<f32>::new(1 << 16).split();
        let engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();
        producer.push_slice(&tone(440.0, 0.5));

        let mut saw_dropout = false;
        let listening = wait_for(&engine, Duration::from_secs(5), |event| match event {
            EngineEvent::Status(status) => {
                saw_dropout |= status.phase == SignalPhase::Dropout;
                saw_dropout && status.phase == SignalPhase::Listening
            }
            EngineEvent::Pitch(_) => false,
        });
        assert!(saw_dropout);
        assert!(listening);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_producer, consumer) = RingBuffer::<f32>::new(4096).split();
        let mut engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();
        assert!(engine.set_threshold(0.2).is_ok());
        engine.stop();
        engine.stop();
        assert!(matches!(engine.set_threshold(0.1), Err(TunerError::Engine(_))));
        assert!(engine.reset().is_err());
    }
}
