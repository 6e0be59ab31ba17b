//! The threaded engine fed in real time through the sample ring.

use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use ringbuf::RingBuffer;
use tine_core::{EngineEvent, SignalPhase, StartOptions, TunerConfig, TunerEngine};

const RATE: f64 = 48_000.0;
// 10 ms of audio per push
const CHUNK: usize = 480;

fn tone(freq: f64, seconds: f64) -> Vec<f32> {
    let len = (RATE * seconds) as usize;
    (0..len)
        .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / RATE).sin()) as f32)
        .collect()
}

#[test]
fn test_realtime_stream_acquires_lock() {
    let (mut producer, consumer) = RingBuffer::<f32>::new(1 << 15).split();
    let mut engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();

    let samples = tone(440.0, 1.5);
    let mut acquired = false;
    let mut last_note = None;
    for chunk in samples.chunks(CHUNK) {
        producer.push_slice(chunk);
        thread::sleep(Duration::from_millis(10));
        while let Ok(event) = engine.events().try_recv() {
            if let EngineEvent::Pitch(event) = event {
                acquired |= event.lock_acquired;
                if let Some(name) = event.note_name() {
                    last_note = Some(name);
                }
            }
        }
    }

    // Let the worker catch up with the tail of the ring
    let deadline = Instant::now() + Duration::from_secs(2);
    while !acquired && Instant::now() < deadline {
        if let Ok(EngineEvent::Pitch(event)) = engine.events().recv_timeout(Duration::from_millis(50)) {
            acquired |= event.lock_acquired;
        }
    }

    assert!(acquired, "lock was never acquired");
    assert_eq!(last_note, Some("A4"));
    engine.stop();
}

#[test]
fn test_reset_and_manual_override_through_control_channel() {
    let (mut producer, consumer) = RingBuffer::<f32>::new(1 << 16).split();
    let engine = TunerEngine::start(StartOptions::default(), TunerConfig::default(), consumer).unwrap();

    engine.set_manual_override(Some(70)).unwrap();
    producer.push_slice(&tone(440.0, 0.5));

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut pinned = None;
    while pinned.is_none() && Instant::now() < deadline {
        if let Ok(EngineEvent::Pitch(event)) = engine.events().recv_timeout(Duration::from_millis(50)) {
            pinned = event.resolution;
        }
    }
    let pinned = pinned.expect("no resolved event");
    assert_eq!(pinned.boundary.midi, 70);
    assert!((pinned.cents + 100.0).abs() < 2.0);

    engine.set_manual_override(None).unwrap();
    engine.reset().unwrap();

    // With the pin released and the session reset, silence settles in listening
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut settled = false;
    while Instant::now() < deadline {
        match engine.events().recv_timeout(Duration::from_millis(50)) {
            Ok(EngineEvent::Status(status)) if status.phase == SignalPhase::Listening => {
                settled = true;
                break;
            }
            _ => {}
        }
    }
    assert!(settled);
}
