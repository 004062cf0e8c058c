//! Layer: one uninterrupted recording pass on a track.
//! Samples are stored interleaved stereo in a single growable buffer with a
//! running frame counter. While recording the buffer is exclusively owned by
//! the layer; once recording stops it is frozen behind an `Arc` so the mixing
//! pass can snapshot it without copying.

use std::sync::Arc;

use crate::config::CHANNELS;

enum LayerSamples {
    Open(Vec<f32>),
    Frozen(Arc<Vec<f32>>),
}

pub struct Layer {
    samples: LayerSamples,
    len_frames: usize,
    is_recording: bool,
    /// Loop-relative time (seconds) at which the layer was created mid-cycle.
    record_start_time: Option<f64>,
    sample_rate: u32,
    is_first_record: bool,
    modified: bool,
}

impl Layer {
    /// Create an empty layer on top of pre-reserved `storage`.
    pub fn new(sample_rate: u32, is_recording: bool, mut storage: Vec<f32>) -> Self {
        storage.clear();
        let mut layer = Self {
            samples: LayerSamples::Open(storage),
            len_frames: 0,
            is_recording,
            record_start_time: None,
            sample_rate,
            is_first_record: true,
            modified: false,
        };
        if !is_recording {
            layer.freeze();
        }
        layer
    }

    /// Create a recording layer and immediately record `initial_frames` at `elapsed`.
    pub fn with_initial(
        sample_rate: u32,
        storage: Vec<f32>,
        initial_frames: &[f32],
        elapsed: f64,
    ) -> Self {
        let mut layer = Self::new(sample_rate, true, storage);
        layer.record_start_time = Some(elapsed);
        layer.record(initial_frames, elapsed);
        layer
    }

    /// Append interleaved stereo frames. The first call prepends
    /// `round(elapsed * sample_rate)` frames of silence.
    pub fn record(&mut self, new_frames: &[f32], elapsed: f64) {
        let LayerSamples::Open(buf) = &mut self.samples else {
            debug_assert!(false, "record on a frozen layer");
            return;
        };

        if self.is_first_record {
            let silence_frames = silence_frames(elapsed, self.sample_rate);
            buf.resize(buf.len() + silence_frames * CHANNELS, 0.0);
            self.len_frames += silence_frames;
            self.is_first_record = false;
        }

        buf.extend_from_slice(new_frames);
        self.len_frames += new_frames.len() / CHANNELS;
        self.modified = true;
    }

    pub fn start_recording(&mut self) {
        if let LayerSamples::Open(_) = self.samples {
            self.is_recording = true;
        }
    }

    /// Stop recording. The layer becomes immutable from here on.
    pub fn stop_recording(&mut self) {
        self.is_recording = false;
        self.freeze();
    }

    fn freeze(&mut self) {
        if let LayerSamples::Open(buf) = &mut self.samples {
            let buf = std::mem::take(buf);
            self.samples = LayerSamples::Frozen(Arc::new(buf));
        }
    }

    /// Frozen samples whose buffer still carries spare capacity. The caller
    /// copies them off the track lock and hands the copy to `replace_frozen`.
    pub fn uncompacted(&self) -> Option<Arc<Vec<f32>>> {
        match &self.samples {
            LayerSamples::Frozen(buf) if buf.capacity() > buf.len() => Some(Arc::clone(buf)),
            _ => None,
        }
    }

    /// Swap the frozen buffer `current` for `compacted`. Returns the buffer
    /// that was taken out, or `compacted` itself if the layer no longer holds
    /// `current`. Either way the caller drops it outside the track lock.
    pub fn replace_frozen(
        &mut self,
        current: &Arc<Vec<f32>>,
        compacted: Arc<Vec<f32>>,
    ) -> Arc<Vec<f32>> {
        match &mut self.samples {
            LayerSamples::Frozen(buf) if Arc::ptr_eq(buf, current) => {
                std::mem::replace(buf, compacted)
            }
            _ => compacted,
        }
    }

    /// Shared handle to the samples of a finished layer.
    pub fn frozen_samples(&self) -> Option<Arc<Vec<f32>>> {
        match &self.samples {
            LayerSamples::Frozen(buf) => Some(Arc::clone(buf)),
            LayerSamples::Open(_) => None,
        }
    }

    /// Length in frames, without touching the sample data.
    #[inline]
    pub fn samples_len(&self) -> usize {
        self.len_frames
    }

    /// Whether `record` ran since the last check. Clears the flag.
    pub fn check_and_reset_modified(&mut self) -> bool {
        std::mem::replace(&mut self.modified, false)
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn record_start_time(&self) -> Option<f64> {
        self.record_start_time
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn silence_frames(elapsed: f64, sample_rate: u32) -> usize {
    let frames = (elapsed * sample_rate as f64).round();
    if frames.is_finite() && frames > 0.0 {
        frames as usize
    } else {
        0
    }
}
