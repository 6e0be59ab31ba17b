// tine-cli/src/main.rs

//! # Tine Console Tuner
//!
//! Drives `tine-core` from a WAV file, a synthetic tone or the microphone
//! and prints the reading stream.

mod offline;
mod report;
mod source;

use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use log::info;
use tine_core::{StartOptions, TunerConfig};

use report::{Reporter, Summary};
use source::Source;

/// Default run time for `--live`.
const DEFAULT_LIVE_SECONDS: f64 = 30.0;

const USAGE: &str = "Usage: tine [OPTIONS] <--wav PATH | --sine FREQ[:SECONDS] | --live>\n\
     \n\
     --wav PATH             Analyze a WAV file (multi-channel input is down-mixed)\n\
     --sine FREQ[:SECONDS]  Analyze a synthetic sine tone\n\
     --live                 Analyze the default microphone (needs the `capture` feature)\n\
     --seconds S            Live run time (default: 30)\n\
     --config FILE          Tuner config as JSON; missing fields keep defaults\n\
     --threshold T          YIN threshold (default: 0.15)\n\
     --buffer N             Analysis window in samples (default: 2048)\n\
     --reference HZ         Reference pitch for A4 (default: 440)\n\
     --json                 Emit one JSON object per line (JSONL)\n";

#[derive(Debug, Clone, PartialEq)]
struct Args {
    source: Source,
    config: Option<PathBuf>,
    json: bool,
    threshold: Option<f64>,
    buffer_size: Option<usize>,
    reference_a4_hz: Option<f64>,
    live_seconds: f64,
}

/// Parses command line arguments. `Ok(None)` means help was requested.
fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut args = raw.into_iter();
    let mut source = None;
    let mut config = None;
    let mut json = false;
    let mut threshold = None;
    let mut buffer_size = None;
    let mut reference_a4_hz = None;
    let mut live_seconds = DEFAULT_LIVE_SECONDS;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| anyhow!("{} requires a value", name));
        let next_source = match arg.as_str() {
            "--wav" => Some(Source::Wav(PathBuf::from(value("--wav")?))),
            "--sine" => Some(Source::parse_sine(&value("--sine")?)?),
            "--live" => Some(Source::Live),
            "--seconds" => {
                live_seconds = value("--seconds")?.parse().context("--seconds expects a number")?;
                None
            }
            "--config" => {
                config = Some(PathBuf::from(value("--config")?));
                None
            }
            "--threshold" => {
                threshold = Some(value("--threshold")?.parse().context("--threshold expects a number")?);
                None
            }
            "--buffer" => {
                buffer_size = Some(value("--buffer")?.parse().context("--buffer expects an integer")?);
                None
            }
            "--reference" => {
                reference_a4_hz = Some(value("--reference")?.parse().context("--reference expects a number")?);
                None
            }
            "--json" => {
                json = true;
                None
            }
            "--help" | "-h" => return Ok(None),
            other => bail!("unknown argument '{}'\n\n{}", other, USAGE),
        };
        if let Some(next) = next_source {
            if source.replace(next).is_some() {
                bail!("only one of --wav, --sine and --live may be given");
            }
        }
    }

    let source = source.ok_or_else(|| anyhow!("no audio source given\n\n{}", USAGE))?;
    Ok(Some(Args {
        source,
        config,
        json,
        threshold,
        buffer_size,
        reference_a4_hz,
        live_seconds,
    }))
}

fn main() -> Result<()> {
    env_logger::init();

    let Some(args) = parse_args(env::args().skip(1))? else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let mut config = match &args.config {
        Some(path) => TunerConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TunerConfig::default(),
    };
    if let Some(reference) = args.reference_a4_hz {
        config.reference_a4_hz = reference;
    }

    let mut options = StartOptions::default();
    if let Some(threshold) = args.threshold {
        options.threshold = threshold;
    }
    if let Some(buffer_size) = args.buffer_size {
        options.buffer_size = buffer_size;
    }

    let stdout = io::stdout();
    let mut reporter = Reporter::new(stdout.lock(), args.json);

    let summary = match &args.source {
        Source::Wav(path) => {
            let (samples, sample_rate) = source::load_wav(path)?;
            info!(
                "[MAIN] Loaded {} ({} samples at {} Hz)",
                path.display(),
                samples.len(),
                sample_rate
            );
            options.sample_rate = sample_rate as f64;
            offline::analyze(&samples, options, config, &mut reporter)?
        }
        Source::Sine { frequency_hz, seconds } => {
            let samples = source::sine(*frequency_hz, *seconds, options.sample_rate);
            offline::analyze(&samples, options, config, &mut reporter)?
        }
        Source::Live => run_live(options, config, args.live_seconds, &mut reporter)?,
    };

    reporter.summary(&summary)?;
    Ok(())
}

#[cfg(feature = "capture")]
fn run_live<W: io::Write>(
    options: StartOptions,
    config: TunerConfig,
    seconds: f64,
    reporter: &mut Reporter<W>,
) -> Result<Summary> {
    use std::time::Duration;

    use log::warn;
    use ringbuf::RingBuffer;
    use tine_core::audio;
    use tine_core::{EngineEvent, TunerEngine};

    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be positive, got {}", seconds);
    }

    // A few windows of headroom between the callback and the worker.
    let (producer, consumer) = RingBuffer::<f32>::new(options.buffer_size * 16).split();
    let capture = audio::start_capture(producer, options.sample_rate as u32)?;
    let options = StartOptions {
        sample_rate: capture.sample_rate() as f64,
        ..options
    };
    let mut engine = TunerEngine::start(options, config, consumer)?;
    info!("[MAIN] Listening for {:.1} s", seconds);

    let deadline = crossbeam_channel::after(Duration::from_secs_f64(seconds));
    let mut summary = Summary::default();
    loop {
        crossbeam_channel::select! {
            recv(engine.events()) -> msg => match msg {
                Ok(EngineEvent::Pitch(event)) => {
                    summary.record(&event);
                    reporter.event(&event)?;
                }
                Ok(EngineEvent::Status(status)) => {
                    summary.final_status = status;
                    reporter.status(&status)?;
                }
                Err(_) => break,
            },
            recv(deadline) -> _ => break,
        }
    }

    engine.stop();
    if let Err(e) = capture.pause() {
        warn!("[MAIN] Error pausing stream: {}", e);
    }
    if capture.overflowed_samples() > 0 {
        warn!("[MAIN] {} samples dropped on ring overflow", capture.overflowed_samples());
    }
    if engine.dropped_events() > 0 {
        warn!("[MAIN] {} events dropped", engine.dropped_events());
    }
    Ok(summary)
}

#[cfg(not(feature = "capture"))]
fn run_live<W: io::Write>(
    _options: StartOptions,
    _config: TunerConfig,
    _seconds: f64,
    _reporter: &mut Reporter<W>,
) -> Result<Summary> {
    bail!("live capture is not available: rebuild with `--features capture`")
}
