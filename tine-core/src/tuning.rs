//! # Musical Tuning Module
//!
//! Equal-temperament note math shared by the estimator and the resolver.
//! Everything is expressed against a configurable reference A4 so the whole
//! pipeline can be calibrated (A440, A442, baroque A415, ...).
//!
//! ## Features
//! - MIDI <-> frequency conversion
//! - Note naming for the full MIDI range (C-1 to G9)
//! - Cent deviation calculations
//! - `NoteBoundary`: the discrete note an estimate is compared against

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Standard concert pitch.
pub const DEFAULT_REFERENCE_A4: f64 = 440.0;

/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Note labels for every MIDI number (0..=127).
///
/// Computed once so the real-time path can hand out `&'static str` labels
/// without formatting a `String` per buffer.
static MIDI_NOTE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    (0..128i32)
        .map(|midi| {
            let pitch_class = midi.rem_euclid(12) as usize;
            let octave = midi.div_euclid(12) - 1;
            format!("{}{}", NOTE_NAMES[pitch_class], octave)
        })
        .collect()
});

/// Returns the label of a MIDI note, e.g. `69 -> "A4"`.
///
/// Outside the MIDI range only the pitch class is returned (`"A"`), since
/// there is no octave label worth displaying for such notes.
pub fn note_name(midi: i32) -> &'static str {
    if (0..128).contains(&midi) {
        MIDI_NOTE_NAMES[midi as usize].as_str()
    } else {
        NOTE_NAMES[midi.rem_euclid(12) as usize]
    }
}

/// Fractional MIDI number of a frequency.
pub fn midi_from_frequency(freq: f64, reference_a4_hz: f64) -> f64 {
    A4_MIDI as f64 + 12.0 * (freq / reference_a4_hz).log2()
}

/// Frequency of a (possibly fractional) MIDI number.
pub fn frequency_from_midi(midi: f64, reference_a4_hz: f64) -> f64 {
    reference_a4_hz * 2.0_f64.powf((midi - A4_MIDI as f64) / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// The discrete note (pitch class + octave) an estimate is being compared
/// against, together with its reference frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteBoundary {
    pub midi: i32,
    pub reference_frequency_hz: f64,
}

impl NoteBoundary {
    /// Builds the boundary for an exact MIDI note.
    pub fn from_midi(midi: i32, reference_a4_hz: f64) -> Self {
        Self {
            midi,
            reference_frequency_hz: frequency_from_midi(midi as f64, reference_a4_hz),
        }
    }

    /// Finds the nearest boundary to a frequency, or `None` for a frequency
    /// that is not a usable pitch (non-finite or non-positive).
    pub fn nearest(freq: f64, reference_a4_hz: f64) -> Option<Self> {
        if !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let midi = midi_from_frequency(freq, reference_a4_hz).round();
        if !midi.is_finite() || midi.abs() > i32::MAX as f64 {
            return None;
        }
        Some(Self::from_midi(midi as i32, reference_a4_hz))
    }

    /// Signed deviation of `freq` from this boundary in cents.
    pub fn cents_from(&self, freq: f64) -> f64 {
        calculate_cents_deviation(freq, self.reference_frequency_hz)
    }

    pub fn name(&self) -> &'static str {
        note_name(self.midi)
    }
}
