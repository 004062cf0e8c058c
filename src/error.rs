//! Error types for the looper crate.
//! The real-time and control paths never return errors; these cover
//! configuration loading, worker spawning and the audio device binding.

use crate::config::ConfigError;

#[derive(Debug)]
pub enum LooperError {
    Config(ConfigError),
    Spawn(std::io::Error),
    Device(String),
    /// The looper's maintenance threads were already started.
    AlreadyStarted,
}

impl std::fmt::Display for LooperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LooperError::Config(e) => write!(f, "config error: {e}"),
            LooperError::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
            LooperError::Device(msg) => write!(f, "audio device error: {msg}"),
            LooperError::AlreadyStarted => write!(f, "looper runtime already started"),
        }
    }
}

impl std::error::Error for LooperError {}

impl From<ConfigError> for LooperError {
    fn from(e: ConfigError) -> Self {
        LooperError::Config(e)
    }
}

impl From<std::io::Error> for LooperError {
    fn from(e: std::io::Error) -> Self {
        LooperError::Spawn(e)
    }
}
