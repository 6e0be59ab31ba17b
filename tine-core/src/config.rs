//! Configuration for a tuner session.
//!
//! `StartOptions` describes the audio framing and the estimator, and is
//! fixed for the lifetime of a session (apart from the threshold, which can be
//! hot-updated). `TunerConfig` groups every tunable of the downstream
//! pipeline. Both deserialize from partial JSON: missing fields take their
//! defaults.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::tuning::DEFAULT_REFERENCE_A4;

/// Estimator threshold bounds; values outside are clamped.
pub const MIN_THRESHOLD: f64 = 0.001;
pub const MAX_THRESHOLD: f64 = 0.999;

/// Smallest analysis window accepted by `StartOptions::validate`.
pub const MIN_BUFFER_SIZE: usize = 256;

pub fn clamp_threshold(threshold: f64) -> f64 {
    if threshold.is_nan() {
        return StartOptions::default().threshold;
    }
    threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Which fundamental estimator a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorVariant {
    /// Plain YIN with absolute threshold and global-minimum fallback.
    #[default]
    Yin,
    /// YIN behind an RMS noise gate; buffers quieter than `min_rms` are
    /// reported invalid without running the difference function.
    GatedYin { min_rms: f32 },
}

/// Session start options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Analysis window in samples (default: 2048)
    pub buffer_size: usize,
    /// Samples between consecutive analysis windows (default: buffer_size / 2)
    pub hop_size: Option<usize>,
    /// YIN absolute threshold (default: 0.15)
    pub threshold: f64,
    /// Sample rate in Hz (default: 48000)
    pub sample_rate: f64,
    pub estimator: EstimatorVariant,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            hop_size: None,
            threshold: 0.15,
            sample_rate: 48_000.0,
            estimator: EstimatorVariant::Yin,
        }
    }
}

impl StartOptions {
    /// Effective hop, always within `1..=buffer_size`.
    pub fn hop(&self) -> usize {
        let hop = self.hop_size.unwrap_or(self.buffer_size / 2);
        hop.clamp(1, self.buffer_size.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(TunerError::InvalidOption(format!(
                "buffer_size {} is below the minimum of {}",
                self.buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(TunerError::InvalidOption(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if let Some(hop) = self.hop_size {
            if hop == 0 || hop > self.buffer_size {
                return Err(TunerError::InvalidOption(format!(
                    "hop_size {} must be within 1..={}",
                    hop, self.buffer_size
                )));
            }
        }
        if let EstimatorVariant::GatedYin { min_rms } = self.estimator {
            if !(min_rms.is_finite() && min_rms >= 0.0) {
                return Err(TunerError::InvalidOption(format!(
                    "gate min_rms must be non-negative, got {}",
                    min_rms
                )));
            }
        }
        Ok(())
    }
}

/// Temporal smoother parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Median window length in frames (default: 15)
    pub window: usize,
    /// EMA coefficient for confidence (default: 0.15)
    pub alpha: f64,
    /// Deviation from the running median that flags a frame as an outlier
    /// (default: 50 cents)
    pub outlier_cents: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            window: 15,
            alpha: 0.15,
            outlier_cents: 50.0,
        }
    }
}

/// Octave/harmonic resolver parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidates below this frequency are skipped (default: 20 Hz)
    pub min_frequency_hz: f64,
    /// Largest integer divisor tested (default: 4)
    pub max_divisor: u32,
    /// Largest deviation at which the previous note is kept (default: 55)
    pub continuity_max_cents: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 20.0,
            max_divisor: 4,
            continuity_max_cents: 55.0,
        }
    }
}

/// Signal-quality state machine parameters. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    pub recent_ms: f64,
    pub reliable_confidence: f64,
    pub semi_reliable_confidence: f64,
    /// How long after the last reliable update a loss still counts as dropout
    pub dropout_window_ms: f64,
    pub freeze_ms: f64,
    pub silence_ms: f64,
    /// Idle decay rate for displayed offsets while listening, per second
    pub decay_rate: f64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            recent_ms: 220.0,
            reliable_confidence: 0.68,
            semi_reliable_confidence: 0.35,
            dropout_window_ms: 320.0,
            freeze_ms: 150.0,
            silence_ms: 500.0,
            decay_rate: 2.8,
        }
    }
}

/// Lock detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub threshold_cents: f64,
    pub dwell_ms: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            threshold_cents: 2.0,
            dwell_ms: 400.0,
        }
    }
}

/// Every tunable of the pipeline downstream of the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Reference pitch for A4 in Hz (default: 440.0)
    pub reference_a4_hz: f64,
    /// Smoothed confidence required before a note is resolved (default: 0.35)
    pub resolve_min_confidence: f64,
    pub smoother: SmootherConfig,
    pub resolver: ResolverConfig,
    pub phase: PhaseConfig,
    pub lock: LockConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            reference_a4_hz: DEFAULT_REFERENCE_A4,
            resolve_min_confidence: 0.35,
            smoother: SmootherConfig::default(),
            resolver: ResolverConfig::default(),
            phase: PhaseConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl TunerConfig {
    /// Loads a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: TunerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TunerError::InvalidOption(msg));

        if !(self.reference_a4_hz.is_finite() && self.reference_a4_hz > 0.0) {
            return invalid(format!("reference_a4_hz must be positive, got {}", self.reference_a4_hz));
        }
        if self.smoother.window == 0 {
            return invalid("smoother.window must be at least 1".to_string());
        }
        if !(self.smoother.alpha > 0.0 && self.smoother.alpha <= 1.0) {
            return invalid(format!("smoother.alpha must be in (0, 1], got {}", self.smoother.alpha));
        }
        if self.resolver.max_divisor == 0 {
            return invalid("resolver.max_divisor must be at least 1".to_string());
        }
        if self.phase.semi_reliable_confidence > self.phase.reliable_confidence {
            return invalid(format!(
                "phase.semi_reliable_confidence ({}) exceeds reliable_confidence ({})",
                self.phase.semi_reliable_confidence, self.phase.reliable_confidence
            ));
        }
        let durations = [
            ("phase.recent_ms", self.phase.recent_ms),
            ("phase.dropout_window_ms", self.phase.dropout_window_ms),
            ("phase.freeze_ms", self.phase.freeze_ms),
            ("phase.silence_ms", self.phase.silence_ms),
            ("phase.decay_rate", self.phase.decay_rate),
            ("lock.threshold_cents", self.lock.threshold_cents),
            ("lock.dwell_ms", self.lock.dwell_ms),
        ];
        for (name, value) in durations {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{} must be non-negative, got {}", name, value));
            }
        }
        Ok(())
    }
}
