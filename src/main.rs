//! `resobox`: run the looper against the default audio devices.
//! Control commands are read from stdin, one JSON object per line, e.g.
//! `{"command":"start_recording","track":0}`. `state`, `metrics` and `quit`
//! are accepted as plain words.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use resobox_looper::audio::{self, fx::Passthrough};
use resobox_looper::{
    init_tracing, spawn_control_loop, Looper, LooperCommand, LooperConfig, LooperRuntime,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("RESOBOX_CONFIG"))
        .map(PathBuf::from)
}

fn load_config() -> LooperConfig {
    let Some(path) = config_path() else {
        info!("no config path given, using defaults");
        return LooperConfig::default();
    };
    LooperConfig::load_from_file(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "config load failed, using defaults");
        LooperConfig::default()
    })
}

fn log_status(looper: &Looper) {
    let state = looper.get_state();
    info!(
        playing = state.is_playing,
        audio_len = state.audio_len,
        audio_duration = state.audio_duration,
        elapsed = state.elapsed,
        "looper status"
    );
    for (name, summary) in looper.metrics().summary() {
        info!(
            metric = %name,
            p50_us = summary.p50_us,
            p95_us = summary.p95_us,
            p99_us = summary.p99_us,
            count = summary.count,
            "timing"
        );
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    info!("resobox starting");

    let config = load_config();
    let looper = Arc::new(Looper::new(config));

    let mut runtime = match LooperRuntime::start(Arc::clone(&looper)) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start looper workers");
            return;
        }
    };

    // Keeps the streams alive for the lifetime of main.
    let device = match audio::start_duplex(Arc::clone(&looper), Box::new(Passthrough)) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "audio device failed to start, running without audio");
            None
        }
    };

    let (control, control_thread) = match spawn_control_loop(Arc::clone(&looper)) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "failed to start control loop");
            return;
        }
    };

    let mut mix_rx = looper.subscribe();
    tokio::spawn(async move {
        while mix_rx.changed().await.is_ok() {
            let info = *mix_rx.borrow_and_update();
            debug!(
                generation = info.generation,
                audio_len = info.audio_len,
                audio_duration = info.audio_duration,
                "mix updated"
            );
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                match line.trim() {
                    "" => {}
                    "quit" => break,
                    "state" => println!("{}", looper.get_state().to_json()),
                    "metrics" => match serde_json::to_string(&looper.metrics().summary()) {
                        Ok(json) => println!("{json}"),
                        Err(e) => warn!(error = %e, "metrics serialization failed"),
                    },
                    other => match LooperCommand::parse(other) {
                        Ok(command) => {
                            control.send(command);
                        }
                        Err(e) => warn!(input = other, error = %e, "invalid command"),
                    },
                }
            }
            _ = status.tick() => {
                log_status(&looper);
                if let Some(device) = &device {
                    let levels = device.levels();
                    info!(
                        input_rms = levels.input(),
                        output_rms = levels.output(),
                        input_overruns = levels.input_overruns(),
                        "levels"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    drop(device);
    drop(control);
    let _ = control_thread.join();
    runtime.shutdown();
    info!("resobox stopped");
}
