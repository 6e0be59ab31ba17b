//! # Octave/Harmonic Resolver
//!
//! Time-domain estimators regularly lock onto a harmonic of the true
//! fundamental. The resolver tests the smoothed frequency divided by small
//! integers, scores each candidate against its nearest note, and prefers
//! staying on the previously resolved note while that remains plausible.
//! Single step and constant time per buffer.

use serde::Serialize;

use crate::config::ResolverConfig;
use crate::tuning::{DEFAULT_REFERENCE_A4, NoteBoundary};

// Score penalty per extra divisor step.
const OVERALL_DIVISOR_PENALTY: f64 = 4.0;
const CONTINUITY_DIVISOR_PENALTY: f64 = 2.0;

/// The note a frequency was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub boundary: NoteBoundary,
    /// Signed deviation of `frequency / divisor` from the boundary
    pub cents: f64,
    pub divisor: u32,
}

#[derive(Debug, Clone)]
pub struct HarmonicResolver {
    config: ResolverConfig,
    reference_a4_hz: f64,
}

impl Default for HarmonicResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default(), DEFAULT_REFERENCE_A4)
    }
}

impl HarmonicResolver {
    pub fn new(config: ResolverConfig, reference_a4_hz: f64) -> Self {
        Self {
            config,
            reference_a4_hz,
        }
    }

    /// Maps `frequency_hz` to a note, correcting octave errors.
    ///
    /// Each divisor `d` scores `|cents| + (d - 1) * 4` against its nearest
    /// note. With a `previous` note, candidates within `continuity_max_cents`
    /// (55) of that note itself score `|cents| + (d - 1) * 2` and win over
    /// any fresh match. Because the band is measured against the previous
    /// note and not the candidate's nearest one, a reading 50 to 55 cents
    /// off still stays on the previous note even though another note is
    /// nearer.
    ///
    /// Returns `None` when no divisor yields a candidate in range.
    pub fn resolve(&self, frequency_hz: f64, previous: Option<&NoteBoundary>) -> Option<Resolution> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return None;
        }

        let mut best_overall: Option<(f64, Resolution)> = None;
        let mut best_continuity: Option<(f64, Resolution)> = None;

        for divisor in 1..=self.config.max_divisor.max(1) {
            let candidate = frequency_hz / divisor as f64;
            if candidate < self.config.min_frequency_hz {
                continue;
            }
            let step = (divisor - 1) as f64;

            if let Some(boundary) = NoteBoundary::nearest(candidate, self.reference_a4_hz) {
                let cents = boundary.cents_from(candidate);
                let score = cents.abs() + step * OVERALL_DIVISOR_PENALTY;
                if best_overall.as_ref().is_none_or(|(best, _)| score < *best) {
                    best_overall = Some((score, Resolution { boundary, cents, divisor }));
                }
            }

            // Continuity is measured against the previous note itself, so a
            // slow drift can stay on it slightly past the half-semitone point.
            if let Some(previous) = previous {
                let cents = previous.cents_from(candidate);
                if cents.is_finite() && cents.abs() <= self.config.continuity_max_cents {
                    let score = cents.abs() + step * CONTINUITY_DIVISOR_PENALTY;
                    if best_continuity.as_ref().is_none_or(|(best, _)| score < *best) {
                        best_continuity = Some((
                            score,
                            Resolution {
                                boundary: *previous,
                                cents,
                                divisor,
                            },
                        ));
                    }
                }
            }
        }

        best_continuity.or(best_overall).map(|(_, resolution)| resolution)
    }
}
