//! # Pitch Detection Module
//!
//! Per-buffer fundamental-frequency estimation with the YIN algorithm.
//!
//! The estimator is stateless across buffers apart from its scratch space:
//! the difference and cumulative-mean-normalized buffers are sized once per
//! detector so the hot path never allocates. It never panics and never
//! blocks; every failure is reported as an invalid `PitchEstimate`.
//!
//! ## Features
//! - Absolute-threshold dip search with descent to the local minimum
//! - Global-minimum fallback when no dip crosses the threshold
//! - Parabolic interpolation for sub-sample accuracy
//! - Optional RMS noise gate (`EstimatorVariant::GatedYin`)

use serde::Serialize;

use crate::config::{EstimatorVariant, clamp_threshold};
use crate::tuning::{self, DEFAULT_REFERENCE_A4};

/// Result of analyzing one buffer.
///
/// When `is_valid` is false none of the other fields carry meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitchEstimate {
    pub is_valid: bool,
    pub frequency_hz: f64,
    /// Fractional MIDI number (69.0 = A4 at the reference pitch)
    pub midi: f64,
    /// Deviation from the nearest equal-tempered note
    pub cents: f64,
    pub note_name: &'static str,
    /// YIN confidence, `1 - d'(tau)`, in `[0, 1]`
    pub probability: f64,
}

impl PitchEstimate {
    pub const INVALID: PitchEstimate = PitchEstimate {
        is_valid: false,
        frequency_hz: 0.0,
        midi: 0.0,
        cents: 0.0,
        note_name: "",
        probability: 0.0,
    };
}

impl Default for PitchEstimate {
    fn default() -> Self {
        Self::INVALID
    }
}

/// A YIN detector bound to one sample rate and analysis window.
#[derive(Debug, Clone)]
pub struct PitchEstimator {
    sample_rate: f64,
    window: usize,
    max_lag: usize,
    threshold: f64,
    reference_a4_hz: f64,
    variant: EstimatorVariant,
    difference: Vec<f64>,
    cumulative: Vec<f64>,
    last_result: PitchEstimate,
}

impl PitchEstimator {
    /// Creates a detector for `window`-sample buffers. The threshold is
    /// clamped into `[0.001, 0.999]`.
    pub fn new(sample_rate: f64, window: usize, threshold: f64) -> Self {
        let max_lag = window / 2;
        Self {
            sample_rate,
            window,
            max_lag,
            threshold: clamp_threshold(threshold),
            reference_a4_hz: DEFAULT_REFERENCE_A4,
            variant: EstimatorVariant::Yin,
            difference: vec![0.0; max_lag + 1],
            cumulative: vec![1.0; max_lag + 1],
            last_result: PitchEstimate::INVALID,
        }
    }

    pub fn with_variant(mut self, variant: EstimatorVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Calibrates the MIDI/cents mapping to a reference A4.
    pub fn with_reference(mut self, reference_a4_hz: f64) -> Self {
        if reference_a4_hz.is_finite() && reference_a4_hz > 0.0 {
            self.reference_a4_hz = reference_a4_hz;
        }
        self
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = clamp_threshold(threshold);
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn last_result(&self) -> &PitchEstimate {
        &self.last_result
    }

    /// Estimates the fundamental of the first `window` samples of `buffer`.
    pub fn estimate(&mut self, buffer: &[f32]) -> PitchEstimate {
        self.last_result = self.run(buffer).unwrap_or(PitchEstimate::INVALID);
        self.last_result
    }

    fn run(&mut self, buffer: &[f32]) -> Option<PitchEstimate> {
        if buffer.len() < self.window || self.max_lag < 2 {
            return None;
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return None;
        }
        let signal = &buffer[..self.window];

        // --- Noise Gate: RMS below the gate is silence, not a pitch ---
        if let EstimatorVariant::GatedYin { min_rms } = self.variant {
            let energy = signal.iter().map(|&s| s as f64 * s as f64).sum::<f64>();
            let rms = (energy / signal.len() as f64).sqrt();
            if !rms.is_finite() || rms < min_rms as f64 {
                return None;
            }
        }

        self.compute_difference(signal);
        self.compute_cumulative_mean_normalized();

        let (tau, probability) = self.absolute_threshold()?;

        let refined_tau = if tau > 1 && tau < self.max_lag {
            parabolic_interpolation(tau, &self.cumulative)
        } else {
            tau as f64
        };
        if !refined_tau.is_finite() || refined_tau <= 0.0 {
            return None;
        }

        let frequency = self.sample_rate / refined_tau;
        if !frequency.is_finite() || frequency <= 0.0 {
            return None;
        }

        let midi = tuning::midi_from_frequency(frequency, self.reference_a4_hz);
        if !midi.is_finite() {
            return None;
        }
        // A flat difference curve (silence, DC) leaves nothing to trust.
        let probability = probability.clamp(0.0, 1.0);
        if probability <= 0.0 {
            return None;
        }
        let nearest = midi.round();

        Some(PitchEstimate {
            is_valid: true,
            frequency_hz: frequency,
            midi,
            cents: (midi - nearest) * 100.0,
            note_name: tuning::note_name(nearest as i32),
            probability,
        })
    }

    // --- Step 1: squared difference function ---
    fn compute_difference(&mut self, signal: &[f32]) {
        let n = signal.len();
        self.difference[0] = 0.0;
        for tau in 1..=self.max_lag {
            let mut sum = 0.0;
            for i in 0..(n - tau) {
                let delta = signal[i] as f64 - signal[i + tau] as f64;
                sum += delta * delta;
            }
            self.difference[tau] = sum;
        }
    }

    // --- Step 2: cumulative mean normalized difference ---
    fn compute_cumulative_mean_normalized(&mut self) {
        self.cumulative[0] = 1.0;
        let mut running_sum = 0.0;
        for tau in 1..=self.max_lag {
            running_sum += self.difference[tau];
            self.cumulative[tau] = if running_sum == 0.0 {
                1.0
            } else {
                self.difference[tau] * tau as f64 / running_sum
            };
        }
    }

    // --- Step 3: first dip below threshold, else the global minimum ---
    fn absolute_threshold(&self) -> Option<(usize, f64)> {
        let values = &self.cumulative;
        let mut tau = 2;
        while tau <= self.max_lag {
            if values[tau] < self.threshold {
                while tau < self.max_lag && values[tau + 1] < values[tau] {
                    tau += 1;
                }
                return Some((tau, 1.0 - values[tau]));
            }
            tau += 1;
        }

        let (candidate, min_value) = values[2..=self.max_lag]
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .fold((0, f64::INFINITY), |(best_tau, best), (offset, &v)| {
                if v < best { (offset + 2, v) } else { (best_tau, best) }
            });

        if candidate == 0 || !min_value.is_finite() {
            return None;
        }
        Some((candidate, 1.0 - min_value))
    }
}

/// Refines a lag to sub-sample accuracy from its two neighbours.
fn parabolic_interpolation(tau: usize, values: &[f64]) -> f64 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f64;
    }
    let y0 = values[tau - 1];
    let y1 = values[tau];
    let y2 = values[tau + 1];

    let denominator = y0 - 2.0 * y1 + y2;
    if denominator.abs() < 1e-12 {
        return tau as f64;
    }
    tau as f64 + (y0 - y2) / (2.0 * denominator)
}

/// One-shot YIN estimate over a whole buffer.
///
/// Allocates a detector sized to `signal`; use `PitchEstimator` on the
/// real-time path.
pub fn detect_pitch_yin(signal: &[f32], sample_rate: f64, threshold: f64) -> PitchEstimate {
    PitchEstimator::new(sample_rate, signal.len(), threshold).estimate(signal)
}
