//! End-to-end tests: synthetic audio through the full session pipeline.

use std::f64::consts::PI;

use tine_core::frames::FrameAccumulator;
use tine_core::{SignalPhase, StartOptions, TunerConfig, TunerEvent, TunerSession};

const RATE: f64 = 48_000.0;

fn tone(freq: f64, seconds: f64) -> Vec<f32> {
    let len = (RATE * seconds) as usize;
    (0..len)
        .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / RATE).sin()) as f32)
        .collect()
}

/// Runs `samples` through a session, stamping frames with the sample clock.
fn run(session: &mut TunerSession, samples: &[f32], start_sample: usize) -> Vec<TunerEvent> {
    let window = session.options().buffer_size;
    let hop = session.options().hop();
    let mut accumulator = FrameAccumulator::new(window, hop);
    let mut end_sample = start_sample + window;
    let mut events = Vec::new();
    accumulator.push(samples, |frame| {
        events.push(session.process_buffer(frame, end_sample as f64 / RATE * 1000.0));
        end_sample += hop;
    });
    events
}

#[test]
fn test_a440_for_one_second_locks_in_tune() {
    let options = StartOptions {
        threshold: 0.15,
        sample_rate: RATE,
        ..StartOptions::default()
    };
    let mut session = TunerSession::new(options, TunerConfig::default());
    let events = run(&mut session, &tone(440.0, 1.0), 0);

    // Exactly one false -> true edge of `locked`
    let edges = events
        .windows(2)
        .filter(|pair| !pair[0].status.locked && pair[1].status.locked)
        .count();
    assert_eq!(edges, 1);
    assert_eq!(events.iter().filter(|e| e.lock_acquired).count(), 1);

    let last = events.last().unwrap();
    assert!(last.status.locked);
    assert_eq!(last.note_name(), Some("A4"));
    assert!(last.cents().unwrap().abs() < 2.0);
}

#[test]
fn test_phase_sequence_for_tone_then_silence() {
    let mut session = TunerSession::new(StartOptions::default(), TunerConfig::default());
    let mut samples = tone(329.63, 1.0);
    samples.extend(std::iter::repeat_n(0.0f32, RATE as usize));
    let events = run(&mut session, &samples, 0);

    let mut phases: Vec<SignalPhase> = events.iter().map(|e| e.status.phase).collect();
    phases.dedup();
    assert_eq!(
        phases,
        vec![
            SignalPhase::Listening,
            SignalPhase::Stabilizing,
            SignalPhase::Tracking,
            SignalPhase::Dropout,
            SignalPhase::Listening,
        ]
    );
    assert!(session.boundary().is_none());
    assert!(!session.status().locked);
}

#[test]
fn test_octave_jump_stays_on_established_note() {
    let mut session = TunerSession::new(StartOptions::default(), TunerConfig::default());

    // Establish E2, then the signal collapses onto its second harmonic
    let events = run(&mut session, &tone(82.41, 1.0), 0);
    assert_eq!(events.last().unwrap().note_name(), Some("E2"));

    let events = run(&mut session, &tone(164.81, 0.5), RATE as usize);
    for event in &events {
        let resolution = event.resolution.unwrap();
        assert_eq!(resolution.boundary.name(), "E2");
        assert!(resolution.cents.abs() < 5.0);
    }
    assert_eq!(events.last().unwrap().resolution.unwrap().divisor, 2);
}

#[test]
fn test_sessions_are_independent() {
    let mut first = TunerSession::new(StartOptions::default(), TunerConfig::default());
    let mut second = TunerSession::new(StartOptions::default(), TunerConfig::default());

    run(&mut first, &tone(440.0, 1.0), 0);
    let events = run(&mut second, &tone(220.0, 0.3), 0);

    assert_eq!(first.boundary().map(|b| b.midi), Some(69));
    assert_eq!(events.last().unwrap().note_name(), Some("A3"));
}
