// tine-core/src/lib.rs

//! The core logic for the Tine tuner.
//! This crate is responsible for pitch detection, smoothing, octave
//! correction, signal-quality classification and lock decisions. It is
//! completely headless and contains no UI code.
//!
//! ## Features
//! - YIN fundamental estimation on fixed-size buffers (`pitch`)
//! - Sliding-median and EMA smoothing (`smoothing`)
//! - Harmonic divisor resolution with note continuity (`resolver`)
//! - Listening / stabilizing / tracking / dropout state machine (`phase`)
//! - Dwell-gated, hysteretic "in tune" lock (`lock`)
//! - A self-contained `TunerSession` and a threaded `TunerEngine`
//! - Microphone capture through cpal (`audio`, behind the `capture` feature)

#[cfg(feature = "capture")]
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod lock;
pub mod phase;
pub mod pitch;
pub mod resolver;
pub mod session;
pub mod smoothing;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use config::{EstimatorVariant, StartOptions, TunerConfig};
pub use engine::{EngineEvent, TunerEngine};
pub use error::{Result, TunerError};
pub use phase::SignalPhase;
pub use pitch::{PitchEstimate, PitchEstimator};
pub use session::{TunerEvent, TunerSession};
pub use tuning::NoteBoundary;

/// The raw result of one analyzed buffer, stamped with its capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchEvent {
    pub is_valid: bool,
    /// The detected fundamental in Hz.
    pub frequency_hz: f64,
    /// Fractional MIDI number.
    pub midi: f64,
    /// Deviation from the nearest note in cents.
    pub cents: f64,
    /// The name of the nearest note, empty when invalid.
    pub note_name: &'static str,
    /// The confidence of the detection (0.0 to 1.0).
    pub probability: f64,
    pub timestamp_ms: f64,
}

impl PitchEvent {
    pub fn from_estimate(estimate: &PitchEstimate, timestamp_ms: f64) -> Self {
        Self {
            is_valid: estimate.is_valid,
            frequency_hz: estimate.frequency_hz,
            midi: estimate.midi,
            cents: estimate.cents,
            note_name: estimate.note_name,
            probability: estimate.probability,
            timestamp_ms,
        }
    }
}

/// The pair a display needs besides the reading itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TunerStatus {
    pub phase: SignalPhase,
    pub locked: bool,
}
