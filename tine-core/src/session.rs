//! # Tuner Session
//!
//! One tuning session: the estimator and every piece of derived state
//! (smoother history, resolved note, signal phase, lock) with an explicit
//! init/reset lifecycle. Sessions share nothing, so several can run side by
//! side.
//!
//! The session is driven with buffers and timestamps; it never looks at a
//! clock itself. `poll` covers gaps between buffers and `advance` steps the
//! idle relaxation of the displayed needle.

use log::{debug, info};
use serde::Serialize;

use crate::config::{StartOptions, TunerConfig, clamp_threshold};
use crate::lock::{LockDetector, LockEvaluation};
use crate::phase::{IdleDecay, PhaseInput, PhaseTracker, SignalPhase};
use crate::pitch::PitchEstimator;
use crate::resolver::{HarmonicResolver, Resolution};
use crate::smoothing::{SmoothedEstimate, TemporalSmoother};
use crate::tuning::NoteBoundary;
use crate::{PitchEvent, TunerStatus};

/// Everything the session produced for one buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunerEvent {
    /// Raw per-buffer estimate
    pub pitch: PitchEvent,
    pub smoothed: SmoothedEstimate,
    /// Note the smoothed reading was resolved to, if any
    pub resolution: Option<Resolution>,
    pub status: TunerStatus,
    /// True on the buffer where the lock was acquired
    pub lock_acquired: bool,
}

impl TunerEvent {
    /// Label of the resolved note, e.g. "A4".
    pub fn note_name(&self) -> Option<&'static str> {
        self.resolution.map(|r| r.boundary.name())
    }

    pub fn cents(&self) -> Option<f64> {
        self.resolution.map(|r| r.cents)
    }
}

#[derive(Debug, Clone)]
pub struct TunerSession {
    options: StartOptions,
    config: TunerConfig,
    estimator: PitchEstimator,
    smoother: TemporalSmoother,
    resolver: HarmonicResolver,
    boundary: Option<NoteBoundary>,
    last_resolution: Option<Resolution>,
    phase: PhaseTracker,
    lock: LockDetector,
    needle: IdleDecay,
    manual_note: Option<i32>,
}

impl TunerSession {
    /// Creates a session with fresh state. Options and config are expected to
    /// be validated by the caller (`TunerEngine::start` does).
    pub fn new(options: StartOptions, config: TunerConfig) -> Self {
        let estimator = PitchEstimator::new(options.sample_rate, options.buffer_size, options.threshold)
            .with_variant(options.estimator)
            .with_reference(config.reference_a4_hz);
        info!(
            "[SESSION] New session: {} Hz, window {}, hop {}, threshold {:.3}, A4 = {} Hz",
            estimator.sample_rate(),
            estimator.window(),
            options.hop(),
            estimator.threshold(),
            config.reference_a4_hz
        );
        Self {
            smoother: TemporalSmoother::new(config.smoother.clone()),
            resolver: HarmonicResolver::new(config.resolver.clone(), config.reference_a4_hz),
            phase: PhaseTracker::new(config.phase.clone()),
            needle: IdleDecay::new(config.phase.decay_rate),
            boundary: None,
            last_resolution: None,
            lock: LockDetector::new(),
            manual_note: None,
            estimator,
            options,
            config,
        }
    }

    pub fn options(&self) -> &StartOptions {
        &self.options
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.estimator.threshold()
    }

    /// Hot-updates the estimator threshold (clamped into `[0.001, 0.999]`).
    pub fn set_threshold(&mut self, threshold: f64) {
        let clamped = clamp_threshold(threshold);
        self.estimator.set_threshold(clamped);
        self.options.threshold = clamped;
        debug!("[SESSION] Threshold set to {:.3}", clamped);
    }

    /// Pins the displayed note to `midi` (or releases the pin with `None`).
    /// While pinned, cents are measured against that note and the phase is
    /// held at tracking.
    pub fn set_manual_override(&mut self, midi: Option<i32>, now_ms: f64) {
        if self.manual_note == midi {
            return;
        }
        self.manual_note = midi;
        self.boundary = midi.map(|m| NoteBoundary::from_midi(m, self.config.reference_a4_hz));
        self.last_resolution = None;
        self.lock.reset();
        self.phase.set_manual(midi.is_some(), now_ms);
        info!("[SESSION] Manual override: {:?}", midi);
    }

    pub fn manual_override(&self) -> Option<i32> {
        self.manual_note
    }

    pub fn status(&self) -> TunerStatus {
        TunerStatus {
            phase: self.phase.phase(),
            locked: self.lock.is_locked(),
        }
    }

    pub fn boundary(&self) -> Option<&NoteBoundary> {
        self.boundary.as_ref()
    }

    pub fn phase_tracker(&self) -> &PhaseTracker {
        &self.phase
    }

    /// Current needle offset in cents; relaxes to 0 while listening.
    pub fn needle_offset(&self) -> f64 {
        self.needle.offset()
    }

    /// Runs the whole pipeline on one analysis buffer.
    pub fn process_buffer(&mut self, samples: &[f32], timestamp_ms: f64) -> TunerEvent {
        let estimate = self.estimator.estimate(samples);

        let smoothed = if estimate.is_valid {
            self.smoother
                .add(estimate.frequency_hz, estimate.probability, timestamp_ms)
        } else {
            self.smoother.add(0.0, 0.0, timestamp_ms)
        };

        let resolution = self.resolve(&smoothed);
        if let Some(resolution) = resolution {
            self.boundary = Some(resolution.boundary);
        }
        self.last_resolution = resolution;

        let previous_phase = self.phase.phase();
        let phase = self.phase.evaluate(PhaseInput {
            updated_at_ms: self.smoother.updated_at_ms(),
            confidence: smoothed.confidence,
            has_note: resolution.is_some(),
            now_ms: timestamp_ms,
        });

        let evaluation = self.evaluate_lock(resolution, timestamp_ms);
        self.after_phase_change(previous_phase, phase);

        if phase != SignalPhase::Listening {
            if let Some(resolution) = resolution {
                self.needle.set(resolution.cents);
            }
        }

        TunerEvent {
            pitch: PitchEvent::from_estimate(&estimate, timestamp_ms),
            smoothed,
            resolution,
            status: self.status(),
            lock_acquired: evaluation.acquired,
        }
    }

    /// Re-evaluates phase and lock without new audio, e.g. during a gap in
    /// the buffer stream. Stale readings release the lock.
    pub fn poll(&mut self, now_ms: f64) -> TunerStatus {
        let previous_phase = self.phase.phase();
        let has_recent = self
            .smoother
            .updated_at_ms()
            .is_some_and(|at| now_ms - at <= self.config.phase.recent_ms);
        let phase = self.phase.evaluate(PhaseInput {
            updated_at_ms: self.smoother.updated_at_ms(),
            confidence: self.smoother.current().confidence,
            has_note: self.last_resolution.is_some(),
            now_ms,
        });
        if !has_recent && self.manual_note.is_none() {
            self.lock.evaluate(
                0.0,
                None,
                self.config.lock.threshold_cents,
                self.config.lock.dwell_ms,
                now_ms,
            );
        }
        self.after_phase_change(previous_phase, phase);
        self.status()
    }

    /// Steps the idle needle relaxation by `dt_secs`. Only moves while
    /// listening; returns the current offset.
    pub fn advance(&mut self, dt_secs: f64) -> f64 {
        if self.phase.phase() == SignalPhase::Listening {
            self.needle.advance(dt_secs)
        } else {
            self.needle.offset()
        }
    }

    /// Returns every derived entity to its defaults. The manual override and
    /// the threshold survive.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.phase.reset();
        self.lock.reset();
        self.needle.set(0.0);
        self.last_resolution = None;
        self.boundary = self
            .manual_note
            .map(|m| NoteBoundary::from_midi(m, self.config.reference_a4_hz));
        debug!("[SESSION] Reset");
    }

    fn resolve(&self, smoothed: &SmoothedEstimate) -> Option<Resolution> {
        let frequency = smoothed.frequency_hz?;
        if smoothed.confidence < self.config.resolve_min_confidence {
            return None;
        }
        match self.manual_note {
            Some(midi) => {
                let boundary = NoteBoundary::from_midi(midi, self.config.reference_a4_hz);
                Some(Resolution {
                    boundary,
                    cents: boundary.cents_from(frequency),
                    divisor: 1,
                })
            }
            None => self.resolver.resolve(frequency, self.boundary.as_ref()),
        }
    }

    fn evaluate_lock(&mut self, resolution: Option<Resolution>, now_ms: f64) -> LockEvaluation {
        let (cents, note) = match resolution {
            Some(r) => (r.cents, Some(r.boundary.midi)),
            None => (0.0, None),
        };
        self.lock.evaluate(
            cents,
            note,
            self.config.lock.threshold_cents,
            self.config.lock.dwell_ms,
            now_ms,
        )
    }

    // Long silence returns the tracking state to neutral.
    fn after_phase_change(&mut self, previous: SignalPhase, current: SignalPhase) {
        if current == SignalPhase::Listening && previous != SignalPhase::Listening {
            debug!("[SESSION] Silence: clearing history, note and lock");
            self.smoother.reset();
            self.lock.reset();
            self.last_resolution = None;
            if self.manual_note.is_none() {
                self.boundary = None;
            }
        }
    }
}
