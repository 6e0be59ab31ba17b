//! Printing of the event stream, as aligned text or JSON lines.

use std::io::{self, Write};

use serde::Serialize;
use tine_core::{TunerEvent, TunerStatus};

/// Totals over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub frames: usize,
    pub valid_frames: usize,
    pub lock_acquisitions: usize,
    pub last_note: Option<&'static str>,
    pub last_cents: Option<f64>,
    pub final_status: TunerStatus,
}

impl Summary {
    pub fn record(&mut self, event: &TunerEvent) {
        self.frames += 1;
        if event.pitch.is_valid {
            self.valid_frames += 1;
        }
        if event.lock_acquired {
            self.lock_acquisitions += 1;
        }
        if let Some(resolution) = event.resolution {
            self.last_note = Some(resolution.boundary.name());
            self.last_cents = Some(resolution.cents);
        }
        self.final_status = event.status;
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Event(&'a TunerEvent),
    Status(&'a TunerStatus),
    Summary(&'a Summary),
}

pub struct Reporter<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn event(&mut self, event: &TunerEvent) -> io::Result<()> {
        if self.json {
            return self.json_line(&Line::Event(event));
        }

        let ts = event.pitch.timestamp_ms;
        match event.resolution {
            Some(resolution) => writeln!(
                self.out,
                "{:>9.1} ms  {:<4} {:>+7.2} cents  {:>8.2} Hz  p={:.2}  [{}{}]",
                ts,
                resolution.boundary.name(),
                resolution.cents,
                event.pitch.frequency_hz,
                event.pitch.probability,
                event.status.phase,
                if event.status.locked { ", locked" } else { "" }
            )?,
            None => writeln!(self.out, "{:>9.1} ms  --  [{}]", ts, event.status.phase)?,
        }
        if event.lock_acquired {
            writeln!(
                self.out,
                "{:>9.1} ms  IN TUNE ({})",
                ts,
                event.note_name().unwrap_or("?")
            )?;
        }
        Ok(())
    }

    pub fn status(&mut self, status: &TunerStatus) -> io::Result<()> {
        if self.json {
            return self.json_line(&Line::Status(status));
        }
        writeln!(
            self.out,
            "             --  [{}{}]",
            status.phase,
            if status.locked { ", locked" } else { "" }
        )
    }

    pub fn summary(&mut self, summary: &Summary) -> io::Result<()> {
        if self.json {
            return self.json_line(&Line::Summary(summary));
        }
        writeln!(self.out)?;
        writeln!(self.out, "Summary:")?;
        writeln!(self.out, "  Frames: {} ({} valid)", summary.frames, summary.valid_frames)?;
        writeln!(self.out, "  Lock acquisitions: {}", summary.lock_acquisitions)?;
        match (summary.last_note, summary.last_cents) {
            (Some(note), Some(cents)) => writeln!(self.out, "  Last note: {} ({:+.2} cents)", note, cents)?,
            _ => writeln!(self.out, "  Last note: none")?,
        }
        writeln!(
            self.out,
            "  Final state: {}{}",
            summary.final_status.phase,
            if summary.final_status.locked { ", locked" } else { "" }
        )
    }

    fn json_line(&mut self, line: &Line<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, line)?;
        writeln!(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tine_core::SignalPhase;

    #[test]
    fn test_status_json_line() {
        let mut reporter = Reporter::new(Vec::new(), true);
        reporter
            .status(&TunerStatus {
                phase: SignalPhase::Dropout,
                locked: false,
            })
            .unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["phase"], "dropout");
        assert_eq!(value["locked"], false);
    }

    #[test]
    fn test_text_summary() {
        let summary = Summary {
            frames: 10,
            valid_frames: 8,
            lock_acquisitions: 1,
            last_note: Some("E2"),
            last_cents: Some(-1.25),
            final_status: TunerStatus {
                phase: SignalPhase::Tracking,
                locked: true,
            },
        };
        let mut reporter = Reporter::new(Vec::new(), false);
        reporter.summary(&summary).unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.contains("Frames: 10 (8 valid)"));
        assert!(text.contains("Last note: E2 (-1.25 cents)"));
        assert!(text.contains("Final state: tracking, locked"));
    }
}
