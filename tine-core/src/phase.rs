//! # Signal-Quality State Machine
//!
//! Classifies the live stream as listening, stabilizing, tracking or dropout
//! from the recency and confidence of smoothed updates. Re-evaluated once per
//! buffer (or per poll during buffer gaps); all times are milliseconds on the
//! session clock.
//!
//! A brief loss right after reliable tracking enters `Dropout` and freezes
//! for a short window instead of snapping to "no signal". When the freeze
//! expires without recovery the machine falls through to `Listening`.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::PhaseConfig;

// Displayed offsets below this magnitude snap to rest.
const REST_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPhase {
    #[default]
    Listening,
    Stabilizing,
    Tracking,
    Dropout,
}

impl fmt::Display for SignalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalPhase::Listening => "listening",
            SignalPhase::Stabilizing => "stabilizing",
            SignalPhase::Tracking => "tracking",
            SignalPhase::Dropout => "dropout",
        };
        f.write_str(label)
    }
}

/// What the machine sees on one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseInput {
    /// Timestamp of the last smoothed estimate, if any
    pub updated_at_ms: Option<f64>,
    pub confidence: f64,
    /// Whether a note is currently resolved
    pub has_note: bool,
    pub now_ms: f64,
}

#[derive(Debug, Clone)]
pub struct PhaseTracker {
    config: PhaseConfig,
    phase: SignalPhase,
    last_change_ms: f64,
    freeze_until_ms: Option<f64>,
    last_heard_ms: Option<f64>,
    last_reliable_ms: Option<f64>,
    manual: bool,
}

impl PhaseTracker {
    pub fn new(config: PhaseConfig) -> Self {
        Self {
            config,
            phase: SignalPhase::Listening,
            last_change_ms: 0.0,
            freeze_until_ms: None,
            last_heard_ms: None,
            last_reliable_ms: None,
            manual: false,
        }
    }

    pub fn phase(&self) -> SignalPhase {
        self.phase
    }

    pub fn last_change_ms(&self) -> f64 {
        self.last_change_ms
    }

    pub fn freeze_until_ms(&self) -> Option<f64> {
        self.freeze_until_ms
    }

    pub fn last_heard_ms(&self) -> Option<f64> {
        self.last_heard_ms
    }

    /// When the pending post-dropout re-check is due, if one is scheduled.
    /// Callers without fresh audio should evaluate again at that time.
    pub fn next_deadline_ms(&self) -> Option<f64> {
        match self.phase {
            SignalPhase::Dropout => self.freeze_until_ms,
            _ => None,
        }
    }

    pub fn is_frozen(&self, now_ms: f64) -> bool {
        self.phase == SignalPhase::Dropout
            && self.freeze_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Manual override forces `Tracking` and bypasses the rules until
    /// cleared.
    pub fn set_manual(&mut self, manual: bool, now_ms: f64) {
        self.manual = manual;
        if manual {
            self.transition(SignalPhase::Tracking, now_ms);
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn reset(&mut self) {
        let manual = self.manual;
        *self = Self::new(self.config.clone());
        self.manual = manual;
        if manual {
            self.phase = SignalPhase::Tracking;
        }
    }

    /// Runs one evaluation and returns the resulting phase.
    pub fn evaluate(&mut self, input: PhaseInput) -> SignalPhase {
        let now = input.now_ms;
        if self.manual {
            self.transition(SignalPhase::Tracking, now);
            return self.phase;
        }

        let has_recent = input
            .updated_at_ms
            .is_some_and(|at| now - at <= self.config.recent_ms);
        let usable = has_recent && input.has_note;
        let is_reliable = usable && input.confidence >= self.config.reliable_confidence;
        let is_semi_reliable = usable && input.confidence >= self.config.semi_reliable_confidence;

        if usable {
            self.last_heard_ms = Some(now);
        }

        // 1. Frozen dropout: hold still.
        if self.is_frozen(now) {
            return self.phase;
        }

        let next = if is_reliable {
            self.last_reliable_ms = Some(now);
            SignalPhase::Tracking
        } else if is_semi_reliable {
            SignalPhase::Stabilizing
        } else if self.phase == SignalPhase::Dropout {
            // Freeze expired without recovery.
            SignalPhase::Listening
        } else if self
            .last_reliable_ms
            .is_some_and(|at| now - at <= self.config.dropout_window_ms)
        {
            self.freeze_until_ms = Some(now + self.config.freeze_ms);
            SignalPhase::Dropout
        } else if self
            .last_heard_ms
            .is_none_or(|at| now - at >= self.config.silence_ms)
        {
            SignalPhase::Listening
        } else {
            SignalPhase::Stabilizing
        };

        self.transition(next, now);
        self.phase
    }

    fn transition(&mut self, next: SignalPhase, now_ms: f64) {
        if next == self.phase {
            return;
        }
        debug!("[PHASE] {} -> {} at {:.1} ms", self.phase, next, now_ms);
        if next != SignalPhase::Dropout {
            self.freeze_until_ms = None;
        }
        if next == SignalPhase::Listening {
            // A fresh start needs fresh history before any dropout.
            self.last_reliable_ms = None;
            self.last_heard_ms = None;
        }
        self.phase = next;
        self.last_change_ms = now_ms;
    }
}

/// Relaxes a displayed offset toward rest while the tuner is idle.
///
/// A discrete-time integrator of `d(offset)/dt = -rate * offset`, stepped
/// explicitly with `advance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleDecay {
    offset: f64,
    rate: f64,
}

impl IdleDecay {
    pub fn new(rate: f64) -> Self {
        Self { offset: 0.0, rate }
    }

    pub fn set(&mut self, offset: f64) {
        self.offset = if offset.is_finite() { offset } else { 0.0 };
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_at_rest(&self) -> bool {
        self.offset == 0.0
    }

    /// Steps the decay by `dt_secs` and returns the new offset.
    pub fn advance(&mut self, dt_secs: f64) -> f64 {
        if dt_secs > 0.0 && dt_secs.is_finite() {
            self.offset *= (-self.rate * dt_secs).exp();
        }
        if self.offset.abs() < REST_EPSILON {
            self.offset = 0.0;
        }
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(updated_at_ms: Option<f64>, confidence: f64, has_note: bool, now_ms: f64) -> PhaseInput {
        PhaseInput {
            updated_at_ms,
            confidence,
            has_note,
            now_ms,
        }
    }

    fn tracked() -> PhaseTracker {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        for step in 0..=6 {
            let now = step as f64 * 50.0;
            tracker.evaluate(input(Some(now), 0.7, true, now));
        }
        tracker
    }

    #[test]
    fn test_cold_start_is_listening() {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        assert_eq!(tracker.phase(), SignalPhase::Listening);
        assert_eq!(tracker.evaluate(input(None, 0.0, false, 0.0)), SignalPhase::Listening);
        assert_eq!(tracker.evaluate(input(Some(0.0), 0.0, false, 100.0)), SignalPhase::Listening);
    }

    #[test]
    fn test_reliable_updates_reach_tracking() {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        let mut phases = Vec::new();
        for step in 0..=6 {
            let now = step as f64 * 50.0;
            phases.push(tracker.evaluate(input(Some(now), 0.7, true, now)));
        }
        assert!(phases.iter().all(|&p| p == SignalPhase::Tracking));
    }

    #[test]
    fn test_semi_reliable_is_stabilizing() {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        assert_eq!(tracker.evaluate(input(Some(0.0), 0.5, true, 0.0)), SignalPhase::Stabilizing);
    }

    #[test]
    fn test_weak_signal_without_history_is_stabilizing() {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        // Heard but unreliable: no dropout possible, not silent either
        tracker.evaluate(input(Some(0.0), 0.5, true, 0.0));
        assert_eq!(tracker.evaluate(input(Some(0.0), 0.1, false, 100.0)), SignalPhase::Stabilizing);
        // Still nothing usable after the silence window
        assert_eq!(tracker.evaluate(input(Some(0.0), 0.1, false, 600.0)), SignalPhase::Listening);
    }

    #[test]
    fn test_silence_after_tracking_goes_through_dropout_to_listening() {
        let mut tracker = tracked();
        let last_update = 300.0;

        // Still recent: stays tracking
        assert_eq!(tracker.evaluate(input(Some(last_update), 0.7, true, 500.0)), SignalPhase::Tracking);

        // Update stale but reliable within 320 ms: dropout with freeze
        let phase = tracker.evaluate(input(Some(last_update), 0.7, true, 560.0));
        assert_eq!(phase, SignalPhase::Dropout);
        assert_eq!(tracker.freeze_until_ms(), Some(710.0));
        assert_eq!(tracker.next_deadline_ms(), Some(710.0));

        // Frozen: nothing moves
        assert_eq!(tracker.evaluate(input(Some(last_update), 0.0, false, 650.0)), SignalPhase::Dropout);

        // Re-check after freeze falls through to listening
        assert_eq!(tracker.evaluate(input(Some(last_update), 0.0, false, 710.0)), SignalPhase::Listening);
        assert_eq!(tracker.next_deadline_ms(), None);

        // And stays there
        assert_eq!(tracker.evaluate(input(Some(last_update), 0.0, false, 1000.0)), SignalPhase::Listening);
    }

    #[test]
    fn test_heard_time_advances_while_frozen() {
        let mut tracker = tracked();
        assert_eq!(tracker.evaluate(input(Some(300.0), 0.0, false, 560.0)), SignalPhase::Dropout);
        assert_eq!(tracker.last_heard_ms(), Some(300.0));

        // A usable but weak reading inside the freeze: phase holds, heard moves
        assert_eq!(tracker.evaluate(input(Some(650.0), 0.2, true, 650.0)), SignalPhase::Dropout);
        assert_eq!(tracker.last_heard_ms(), Some(650.0));
        assert_eq!(tracker.last_change_ms(), 560.0);
    }

    #[test]
    fn test_dropout_recovers_to_tracking() {
        let mut tracker = tracked();
        assert_eq!(tracker.evaluate(input(Some(300.0), 0.0, false, 320.0)), SignalPhase::Dropout);
        // Signal is back after the freeze window
        assert_eq!(tracker.evaluate(input(Some(480.0), 0.75, true, 480.0)), SignalPhase::Tracking);
        assert_eq!(tracker.freeze_until_ms(), None);
    }

    #[test]
    fn test_no_dropout_without_recent_reliable_history() {
        let mut tracker = tracked();
        // Long gap: by the first evaluation the reliable history is too old
        assert_eq!(tracker.evaluate(input(Some(300.0), 0.0, false, 900.0)), SignalPhase::Listening);

        // Cold start after listening can't drop out either
        tracker.evaluate(input(Some(1000.0), 0.5, true, 1000.0));
        assert_eq!(tracker.phase(), SignalPhase::Stabilizing);
        assert_ne!(tracker.evaluate(input(Some(1000.0), 0.0, false, 1050.0)), SignalPhase::Dropout);
    }

    #[test]
    fn test_manual_override_forces_tracking() {
        let mut tracker = PhaseTracker::new(PhaseConfig::default());
        tracker.set_manual(true, 0.0);
        assert_eq!(tracker.phase(), SignalPhase::Tracking);
        assert_eq!(tracker.evaluate(input(None, 0.0, false, 5000.0)), SignalPhase::Tracking);

        tracker.set_manual(false, 5000.0);
        assert_eq!(tracker.evaluate(input(None, 0.0, false, 5100.0)), SignalPhase::Listening);
    }

    #[test]
    fn test_idle_decay() {
        let mut decay = IdleDecay::new(2.8);
        decay.set(10.0);
        let after = decay.advance(0.5);
        assert!((after - 10.0 * (-1.4f64).exp()).abs() < 1e-9);

        // Monotone relaxation that ends exactly at rest
        let mut previous = after;
        for _ in 0..400 {
            let next = decay.advance(1.0 / 60.0);
            assert!(next.abs() <= previous.abs());
            previous = next;
        }
        assert!(decay.is_at_rest());
        assert_eq!(decay.offset(), 0.0);

        // Zero or negative steps change nothing
        decay.set(5.0);
        assert_eq!(decay.advance(0.0), 5.0);
        assert_eq!(decay.advance(-1.0), 5.0);
    }
}
