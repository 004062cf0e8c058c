//! Control-plane commands.
//! Commands arrive off the real-time thread (UI, socket, stdin) and are
//! applied synchronously. The control loop runs on a dedicated OS thread
//! draining an unbounded crossbeam channel, so senders never block.

use std::sync::Arc;

use crossbeam_channel as cb;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LooperError;
use crate::looper::Looper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LooperCommand {
    StartRecording { track: usize },
    StopRecording { track: usize },
    ClearAllLayers { track: usize },
    RemoveLastLayer { track: usize },
    PlayTrack { track: usize },
    StopTrack { track: usize },
    ToggleTrack { track: usize },
    Play,
    Stop,
    ToggleStartStop,
}

impl LooperCommand {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl Looper {
    /// Apply one control command.
    pub fn apply(&self, command: LooperCommand) {
        debug!(?command, "apply_command");
        match command {
            LooperCommand::StartRecording { track } => self.start_recording(track),
            LooperCommand::StopRecording { track } => self.stop_recording(track),
            LooperCommand::ClearAllLayers { track } => self.clear_all_layers(track),
            LooperCommand::RemoveLastLayer { track } => self.remove_last_layer(track),
            LooperCommand::PlayTrack { track } => self.play_track(track),
            LooperCommand::StopTrack { track } => self.stop_track(track),
            LooperCommand::ToggleTrack { track } => self.toggle_track(track),
            LooperCommand::Play => self.play(),
            LooperCommand::Stop => self.stop(),
            LooperCommand::ToggleStartStop => {
                self.toggle_start_stop();
            }
        }
    }
}

/// Sending side of the control loop.
#[derive(Clone)]
pub struct ControlSender {
    tx: cb::Sender<LooperCommand>,
}

impl ControlSender {
    /// Queue a command. Never blocks; returns false once the loop has exited.
    pub fn send(&self, command: LooperCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Spawn the control loop. It exits when every `ControlSender` is dropped.
pub fn spawn_control_loop(
    looper: Arc<Looper>,
) -> Result<(ControlSender, std::thread::JoinHandle<()>), LooperError> {
    let (tx, rx) = cb::unbounded::<LooperCommand>();
    let handle = std::thread::Builder::new()
        .name("looper-control".into())
        .spawn(move || {
            loop {
                match rx.recv() {
                    Ok(command) => looper.apply(command),
                    Err(cb::RecvError) => {
                        info!("control channel closed, exiting control loop");
                        break;
                    }
                }
            }
        })?;
    Ok((ControlSender { tx }, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LooperConfig;

    #[test]
    fn parses_tagged_json() {
        let cmd = LooperCommand::parse(r#"{"command":"start_recording","track":2}"#).unwrap();
        assert_eq!(cmd, LooperCommand::StartRecording { track: 2 });
        let cmd = LooperCommand::parse(" {\"command\":\"toggle_start_stop\"}\n").unwrap();
        assert_eq!(cmd, LooperCommand::ToggleStartStop);
    }

    #[test]
    fn unknown_command_is_error() {
        assert!(LooperCommand::parse(r#"{"command":"rewind"}"#).is_err());
        assert!(LooperCommand::parse(r#"{"command":"stop_recording"}"#).is_err());
    }

    #[test]
    fn apply_routes_to_looper() {
        let looper = Looper::new(LooperConfig::default());
        looper.apply(LooperCommand::Play);
        assert!(looper.is_playing());
        looper.apply(LooperCommand::StartRecording { track: 0 });
        assert!(looper.tracks()[0].is_recording());
        looper.apply(LooperCommand::StopRecording { track: 0 });
        assert!(!looper.tracks()[0].is_recording());
        looper.apply(LooperCommand::RemoveLastLayer { track: 0 });
        assert_eq!(looper.tracks()[0].layer_count(), 0);
        looper.apply(LooperCommand::StopTrack { track: 0 });
        assert!(!looper.tracks()[0].is_playing());
        looper.apply(LooperCommand::ToggleStartStop);
        assert!(!looper.is_playing());
    }

    #[test]
    fn control_loop_drains_and_exits() {
        let looper = Arc::new(Looper::new(LooperConfig::default()));
        let (sender, handle) = spawn_control_loop(Arc::clone(&looper)).unwrap();
        assert!(sender.send(LooperCommand::StartRecording { track: 0 }));
        assert!(sender.send(LooperCommand::Play));
        drop(sender);
        handle.join().unwrap();
        assert!(looper.is_playing());
        assert!(looper.tracks()[0].is_recording());
    }
}
