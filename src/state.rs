//! Read-only status snapshot for external reporting.
//! Carries flags and lengths only; raw sample data is never included.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerState {
    pub is_recording: bool,
    pub record_start_time: Option<f64>,
    pub sample_rate: u32,
    pub samples_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackState {
    pub sample_rate: u32,
    pub is_playing: bool,
    pub is_recording: bool,
    pub audio_len: usize,
    pub audio_duration: f64,
    pub layers: Vec<LayerState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooperState {
    pub sample_rate: u32,
    pub is_playing: bool,
    pub tracks: Vec<TrackState>,
    pub audio_len: usize,
    pub audio_duration: f64,
    pub elapsed: f64,
}

impl LooperState {
    pub fn to_json(&self) -> String {
        // Only plain numbers, bools and strings: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Published after every mixing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MixInfo {
    pub generation: u64,
    pub audio_len: usize,
    pub audio_duration: f64,
}
