//! Looper scenarios driven through a live `LooperRuntime`: the length and
//! mixing passes run on their own threads, tests wait for their effects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use resobox_looper::playback::ManualClock;
use resobox_looper::{BlockShape, Looper, LooperCommand, LooperConfig, LooperRuntime, CHANNELS};

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn start(sample_rate: u32, tracks: usize) -> (LooperRuntime, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = LooperConfig {
        sample_rate,
        tracks,
        layer_prealloc_secs: 0.05,
        ..LooperConfig::default()
    };
    let looper = Arc::new(Looper::with_clock(config, clock.clone()));
    let runtime = LooperRuntime::start(looper).expect("runtime starts");
    (runtime, clock)
}

fn block(frames: usize, value: f32) -> Vec<f32> {
    vec![value; frames * CHANNELS]
}

#[test]
fn second_layer_is_padded_to_loop_phase() {
    let (runtime, clock) = start(48_000, 2);
    let looper = runtime.looper();

    // one second loop on track 1
    looper.start_recording(1);
    looper.record(&block(48_000, 0.1), 48_000);
    looper.stop_recording(1);
    wait_until("first mix", || looper.audio_len() == 48_000);

    looper.play();
    clock.advance(Duration::from_millis(200));
    looper.get_next_samples(128, BlockShape::stereo(128));
    assert!((looper.elapsed() - 0.2).abs() < 1e-9);

    looper.start_recording(0);
    looper.record(&block(128, 1.0), 128);

    assert_eq!(looper.get_state().tracks[0].layers[0].samples_len, 9_728);
    looper.stop_recording(0);

    let track = looper.track(0).expect("track 0");
    let samples = track.layer_samples(0).expect("finished layer");
    assert_eq!(samples.len() / CHANNELS, 9_728);
    assert!(samples[..9_600 * CHANNELS].iter().all(|&s| s == 0.0));
    assert!(samples[9_600 * CHANNELS..].iter().all(|&s| s == 1.0));
}

#[test]
fn background_mix_follows_stop_recording() {
    let (runtime, _) = start(1_000, 2);
    let looper = runtime.looper();
    let mut rx = looper.subscribe();

    looper.start_recording(0);
    looper.record(&block(100, 1.0), 100);
    // nothing is mixed while the layer is still recording
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(looper.audio_len(), 0);

    looper.stop_recording(0);
    wait_until("track length", || looper.tracks()[0].audio_len() == 100);
    wait_until("mix of track 0", || looper.audio_len() == 100);
    assert!(rx.has_changed().unwrap_or(false));
    assert_eq!(rx.borrow_and_update().audio_len, 100);

    looper.apply(LooperCommand::StartRecording { track: 1 });
    looper.record(&block(300, 0.5), 300);
    looper.apply(LooperCommand::StopRecording { track: 1 });
    wait_until("mix of both tracks", || looper.audio_len() == 300);

    let mixed = looper.mixed_samples();
    assert!(mixed.samples().iter().all(|&s| s == 1.5));
    assert!((looper.audio_duration() - 0.3).abs() < 1e-12);

    looper.apply(LooperCommand::ClearAllLayers { track: 1 });
    wait_until("remix after clear", || looper.audio_len() == 100);
}

#[test]
fn overdub_overflow_splits_at_loop_length() {
    let (runtime, _) = start(1_000, 1);
    let looper = runtime.looper();
    let track = looper.track(0).expect("track 0");

    looper.start_recording(0);
    looper.record(&block(200, 1.0), 200);
    looper.stop_recording(0);
    wait_until("loop length", || track.audio_len() == 200);

    // elapsed is zero while stopped, so the overdub starts without padding
    looper.start_recording(0);
    looper.record(&block(150, 2.0), 150);
    looper.record(&block(100, 3.0), 100);

    let state = looper.get_state();
    let layers = &state.tracks[0].layers;
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[1].samples_len, 200);
    assert!(!layers[1].is_recording);
    assert_eq!(layers[2].samples_len, 50);
    assert!(layers[2].is_recording);

    let second = track.layer_samples(1).expect("second layer");
    assert!(second[150 * CHANNELS..].iter().all(|&s| s == 3.0));

    looper.stop_recording(0);
    wait_until("mix with overdub", || {
        let mixed = looper.mixed_samples();
        mixed.audio_len() == 200 && mixed.samples()[0] == 1.0 + 2.0 + 3.0
    });
}

#[test]
fn shutdown_stops_background_passes() {
    let (mut runtime, _) = start(1_000, 1);
    let looper = Arc::clone(runtime.looper());
    runtime.shutdown();

    looper.start_recording(0);
    looper.record(&block(10, 1.0), 10);
    looper.stop_recording(0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(looper.tracks()[0].audio_len(), 0);

    // detached passes still work
    looper.refresh_track_lengths();
    assert!(looper.mix_if_needed());
    assert_eq!(looper.audio_len(), 10);
}
