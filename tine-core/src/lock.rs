//! # Lock Detector
//!
//! Decides when the instrument is "in tune". Entering the lock needs the
//! reading to stay inside the threshold for a full dwell window; leaving it
//! needs a larger deviation (release threshold), so a reading sitting right
//! at the threshold does not flicker.

use log::debug;
use serde::Serialize;

const MIN_THRESHOLD_CENTS: f64 = 0.5;
const MIN_DWELL_MS: f64 = 120.0;

/// Release threshold for a given entry threshold (already clamped).
pub fn release_threshold(threshold_cents: f64) -> f64 {
    (threshold_cents + 0.5).max(threshold_cents * 1.75)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LockState {
    pub locked: bool,
    /// When the current run inside the entry threshold began
    pub lock_start_ms: Option<f64>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LockEvaluation {
    pub state: LockState,
    /// Rising edge: the lock was acquired on this evaluation
    pub acquired: bool,
    /// Falling edge: the lock was lost on this evaluation
    pub released: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LockDetector {
    state: LockState,
    note: Option<i32>,
}

impl LockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.locked
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Evaluates one reading.
    ///
    /// `note` is the resolved note identity (MIDI number), `None` when no note
    /// is resolved. A change of identity drops the lock immediately.
    pub fn evaluate(
        &mut self,
        cents: f64,
        note: Option<i32>,
        threshold_cents: f64,
        dwell_ms: f64,
        now_ms: f64,
    ) -> LockEvaluation {
        let threshold = threshold_cents.max(MIN_THRESHOLD_CENTS);
        let dwell = dwell_ms.max(MIN_DWELL_MS);
        let release = release_threshold(threshold);
        let was_locked = self.state.locked;

        if let (Some(previous), Some(current)) = (self.note, note) {
            if previous != current {
                self.state = LockState::default();
            }
        }
        self.note = note;

        let deviation = if cents.is_finite() { cents.abs() } else { f64::INFINITY };
        let inside = note.is_some() && deviation <= threshold;

        if inside {
            let started = *self.state.lock_start_ms.get_or_insert(now_ms);
            if now_ms - started >= dwell {
                self.state.locked = true;
            }
        } else {
            self.state.lock_start_ms = None;
        }

        if self.state.locked && (note.is_none() || deviation >= release) {
            self.state.locked = false;
        }

        let acquired = !was_locked && self.state.locked;
        let released = was_locked && !self.state.locked;
        if acquired {
            debug!("[LOCK] acquired on note {:?} at {:.1} ms", note, now_ms);
        } else if released {
            debug!("[LOCK] released at {:.1} ms ({:+.2} cents)", now_ms, cents);
        }

        LockEvaluation {
            state: self.state,
            acquired,
            released,
        }
    }
}
