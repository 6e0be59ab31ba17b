//! # Audio Capture Module
//!
//! Real-time microphone capture using CPAL (Cross-Platform Audio Library).
//! The input callback only copies samples into the SPSC ring that feeds the
//! `TunerEngine`; it never allocates, locks or blocks.
//!
//! ## Features
//! - Default input device selection
//! - f32 config selection closest to the requested sample rate
//! - Multi-channel input reduced to its first channel
//! - Ring overflow counted instead of blocking the audio thread

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, warn};
use ringbuf::Producer;

/// A running input stream. Dropping it stops capture.
pub struct CaptureHandle {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
    overflow: Arc<AtomicU64>,
}

impl CaptureHandle {
    /// The rate the device actually runs at. Use it for `StartOptions`.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples dropped because the ring was full.
    pub fn overflowed_samples(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn pause(&self) -> Result<()> {
        self.stream.pause()?;
        Ok(())
    }
}

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Picks the f32 configuration closest to `target_rate`
/// 3. Installs a callback that pushes mono samples into `producer`
///
/// # Arguments
/// * `producer` - Producer half of the sample ring read by the engine
/// * `target_rate` - Desired sample rate in Hz
///
/// # Returns
/// * `Ok(handle)` - Running stream and its real sample rate
/// * `Err(e)` - Error if audio setup fails
pub fn start_capture(mut producer: Producer<f32>, target_rate: u32) -> Result<CaptureHandle> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("[CAPTURE] Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let config: cpal::StreamConfig = config.into();

    info!("[CAPTURE] Selected {} Hz, {} channel(s)", sample_rate, channels);

    let overflow = Arc::new(AtomicU64::new(0));
    let callback_overflow = Arc::clone(&overflow);
    let stride = channels.max(1) as usize;

    let err_fn = |err| error!("[CAPTURE] An error occurred on the audio stream: {}", err);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let dropped = if stride == 1 {
                data.len() - producer.push_slice(data)
            } else {
                data.chunks(stride)
                    .filter(|frame| producer.push(frame[0]).is_err())
                    .count()
            };
            if dropped > 0 {
                callback_overflow.fetch_add(dropped as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(CaptureHandle {
        stream,
        sample_rate,
        channels,
        overflow,
    })
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only 32-bit float configurations qualify. Among those, a range that
/// contains the target wins, then the closest range edge; mono breaks ties.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No f32 configuration offered
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    let best = configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0 as i64;
            let max = c.max_sample_rate().0 as i64;
            let target = target_rate as i64;
            let distance = if (min..=max).contains(&target) {
                0
            } else {
                (min - target).abs().min((max - target).abs())
            };
            (distance, c.channels() != 1, c.channels())
        });
    if best.is_none() {
        warn!("[CAPTURE] Device offers no f32 input configuration");
    }
    best
}
