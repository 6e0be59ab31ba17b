//! Error types for configuring and running a tuner session.
//!
//! The signal path itself never fails: malformed or silent input is reported
//! through invalid estimates and signal phases. Only setup and lifecycle
//! operations return these errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunerError {
    /// A start option or config value is out of its valid range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Reading a config file failed.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// A config file is not valid JSON for `TunerConfig`.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The analysis worker could not be started.
    #[error("engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, TunerError>;
