//! Per-track recording phase: Idle → Recording → Idle.
//! A track cycles through many layers; each one passes through this machine
//! once, and at most one layer per track is in `Recording` at any instant.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackPhase {
    Idle,
    Recording,
}

impl std::fmt::Display for TrackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackPhase::Idle => write!(f, "Idle"),
            TrackPhase::Recording => write!(f, "Recording"),
        }
    }
}

/// Why a phase transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseCause {
    /// Explicit start/stop from the control plane.
    Control,
    /// The recording layer reached the loop length and spilled into a new layer.
    Overflow,
    /// The recording layer was removed.
    Removed,
}

impl TrackPhase {
    pub fn from_recording(is_recording: bool) -> Self {
        if is_recording {
            TrackPhase::Recording
        } else {
            TrackPhase::Idle
        }
    }

    /// Returns whether transitioning from `self` to `next` is valid for `cause`.
    pub fn can_transition_to(self, next: TrackPhase, cause: PhaseCause) -> bool {
        matches!(
            (self, next, cause),
            (TrackPhase::Idle, TrackPhase::Recording, PhaseCause::Control)
                | (TrackPhase::Recording, TrackPhase::Idle, PhaseCause::Control)
                | (TrackPhase::Recording, TrackPhase::Idle, PhaseCause::Removed)
                // overflow ends one layer and opens the next without leaving Recording
                | (TrackPhase::Recording, TrackPhase::Recording, PhaseCause::Overflow)
        )
    }
}
