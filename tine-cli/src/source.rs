//! Audio sources the CLI can analyze.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

/// Default length of a synthetic tone when none is given.
pub const DEFAULT_SINE_SECONDS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Wav(PathBuf),
    Sine { frequency_hz: f64, seconds: f64 },
    Live,
}

impl Source {
    /// Parses the `FREQ[:SECONDS]` argument of `--sine`.
    pub fn parse_sine(arg: &str) -> Result<Self> {
        let (freq, seconds) = match arg.split_once(':') {
            Some((freq, seconds)) => (freq, Some(seconds)),
            None => (arg, None),
        };
        let frequency_hz: f64 = freq
            .trim()
            .parse()
            .with_context(|| format!("invalid sine frequency '{}'", freq))?;
        let seconds = match seconds {
            Some(s) => s
                .trim()
                .parse()
                .with_context(|| format!("invalid sine duration '{}'", s))?,
            None => DEFAULT_SINE_SECONDS,
        };
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            bail!("sine frequency must be positive, got {}", frequency_hz);
        }
        if !(seconds.is_finite() && seconds > 0.0) {
            bail!("sine duration must be positive, got {}", seconds);
        }
        Ok(Source::Sine { frequency_hz, seconds })
    }
}

/// Generates a half-scale sine tone.
pub fn sine(frequency_hz: f64, seconds: f64, sample_rate: f64) -> Vec<f32> {
    let len = (seconds * sample_rate).round() as usize;
    (0..len)
        .map(|i| (0.5 * (2.0 * PI * frequency_hz * i as f64 / sample_rate).sin()) as f32)
        .collect()
}

/// Loads a WAV file as mono f32 samples; multi-channel files are averaged
/// down to one channel.
///
/// # Returns
/// * `Ok((samples, sample_rate))`
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(anyhow!("{} declares zero channels", path.display()));
    }
    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sine() {
        assert_eq!(
            Source::parse_sine("440").unwrap(),
            Source::Sine {
                frequency_hz: 440.0,
                seconds: DEFAULT_SINE_SECONDS
            }
        );
        assert_eq!(
            Source::parse_sine("82.41:1.5").unwrap(),
            Source::Sine {
                frequency_hz: 82.41,
                seconds: 1.5
            }
        );
        assert!(Source::parse_sine("abc").is_err());
        assert!(Source::parse_sine("440:0").is_err());
        assert!(Source::parse_sine("-5").is_err());
    }

    #[test]
    fn test_sine_length_and_range() {
        let tone = sine(440.0, 0.5, 48_000.0);
        assert_eq!(tone.len(), 24_000);
        assert!(tone.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_load_wav_downmixes_stereo() {
        let path = std::env::temp_dir().join(format!("tine-cli-test-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(16_384_i16).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (samples, rate) = load_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rate, 8_000);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|s| (s - 0.25).abs() < 1e-4));
    }
}
