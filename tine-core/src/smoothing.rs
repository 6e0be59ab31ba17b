//! # Temporal Smoothing
//!
//! Turns the raw per-buffer estimates into a steadier reading: a sliding
//! median over the most recent valid frequencies rejects single-frame jumps,
//! and an exponential moving average tracks how confident the estimator has
//! been lately.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::SmootherConfig;
use crate::tuning::calculate_cents_deviation;

/// Smoothed view of the recent estimates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SmoothedEstimate {
    /// Median of the recent valid frequencies, `None` once history is cleared
    pub frequency_hz: Option<f64>,
    /// EMA of the estimator probability, in `[0, 1]`
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    config: SmootherConfig,
    history: VecDeque<f64>,
    // Sorted copy of `history` for the median; sized once.
    scratch: Vec<f64>,
    confidence: f64,
    frequency_hz: Option<f64>,
    updated_at_ms: Option<f64>,
    last_was_outlier: bool,
}

impl TemporalSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        let capacity = config.window.max(1);
        Self {
            config,
            history: VecDeque::with_capacity(capacity + 1),
            scratch: Vec::with_capacity(capacity + 1),
            confidence: 0.0,
            frequency_hz: None,
            updated_at_ms: None,
            last_was_outlier: false,
        }
    }

    /// Feeds one raw estimate. A non-positive or non-finite frequency is an
    /// invalid frame: it zeroes confidence and clears the median history.
    pub fn add(&mut self, raw_frequency: f64, raw_probability: f64, timestamp_ms: f64) -> SmoothedEstimate {
        self.updated_at_ms = Some(timestamp_ms);

        if !raw_frequency.is_finite() || raw_frequency <= 0.0 {
            self.confidence = 0.0;
            self.history.clear();
            self.frequency_hz = None;
            self.last_was_outlier = false;
            return self.current();
        }

        let probability = if raw_probability.is_finite() {
            raw_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.confidence += (probability - self.confidence) * self.config.alpha;
        self.confidence = self.confidence.clamp(0.0, 1.0);

        // Flagged only; the median below already absorbs the frame.
        self.last_was_outlier = match self.median() {
            Some(median) => {
                calculate_cents_deviation(raw_frequency, median).abs() > self.config.outlier_cents
            }
            None => false,
        };

        self.history.push_back(raw_frequency);
        while self.history.len() > self.config.window.max(1) {
            self.history.pop_front();
        }
        self.frequency_hz = self.median();

        self.current()
    }

    pub fn current(&self) -> SmoothedEstimate {
        SmoothedEstimate {
            frequency_hz: self.frequency_hz,
            confidence: self.confidence,
        }
    }

    /// Timestamp of the last `add`, valid or not.
    pub fn updated_at_ms(&self) -> Option<f64> {
        self.updated_at_ms
    }

    /// Whether the last valid frame sat further than the outlier limit from
    /// the running median.
    pub fn last_was_outlier(&self) -> bool {
        self.last_was_outlier
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.confidence = 0.0;
        self.frequency_hz = None;
        self.updated_at_ms = None;
        self.last_was_outlier = false;
    }

    fn median(&mut self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        self.scratch.clear();
        self.scratch.extend(self.history.iter().copied());
        self.scratch.sort_by(|a, b| a.total_cmp(b));
        Some(middle(&self.scratch))
    }
}

fn middle(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
