//! Offline analysis of a recorded or synthetic signal.
//!
//! Frames are stamped with the sample clock (end of each window), so a file
//! analyzes exactly as it would have live, only faster.

use std::io::Write;

use anyhow::Result;
use tine_core::frames::FrameAccumulator;
use tine_core::{StartOptions, TunerConfig, TunerSession};

use crate::report::{Reporter, Summary};

pub fn analyze<W: Write>(
    samples: &[f32],
    options: StartOptions,
    config: TunerConfig,
    reporter: &mut Reporter<W>,
) -> Result<Summary> {
    options.validate()?;
    config.validate()?;

    let rate = options.sample_rate;
    let window = options.buffer_size;
    let hop = options.hop();
    let mut session = TunerSession::new(options, config);
    let mut accumulator = FrameAccumulator::new(window, hop);
    let mut summary = Summary::default();
    let mut end_sample = window;
    let mut write_result = Ok(());

    accumulator.push(samples, |frame| {
        let timestamp_ms = end_sample as f64 / rate * 1000.0;
        end_sample += hop;
        let event = session.process_buffer(frame, timestamp_ms);
        summary.record(&event);
        if write_result.is_ok() {
            write_result = reporter.event(&event);
        }
    });
    write_result?;

    Ok(summary)
}
