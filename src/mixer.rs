//! Cross-track mixing: sums finished layers into one stereo loop buffer.
//! Layers shorter than the longest one are tiled (repeated, then truncated)
//! so every layer loops within the composite.

use std::sync::Arc;

use crate::config::CHANNELS;

/// The composite loop published to the playback path. Replaced wholesale,
/// never mutated after publication.
#[derive(Debug, Default)]
pub struct MixedBuffer {
    samples: Vec<f32>,
    audio_len: usize,
    audio_duration: f64,
    generation: u64,
}

impl MixedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, generation: u64) -> Self {
        let audio_len = samples.len() / CHANNELS;
        Self {
            samples,
            audio_len,
            audio_duration: audio_len as f64 / sample_rate as f64,
            generation,
        }
    }

    /// Interleaved stereo samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Length in frames.
    pub fn audio_len(&self) -> usize {
        self.audio_len
    }

    pub fn audio_duration(&self) -> f64 {
        self.audio_duration
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.audio_len == 0
    }
}

/// Mix interleaved stereo layers into a buffer as long as the longest layer.
pub fn mix_layers(layers: &[Arc<Vec<f32>>]) -> Vec<f32> {
    let max_len = layers.iter().map(|l| l.len() / CHANNELS).max().unwrap_or(0);
    let mut out = vec![0.0f32; max_len * CHANNELS];
    for layer in layers {
        add_looped(&mut out, layer);
    }
    out
}

/// Add `layer` into `out`, repeating it when it is shorter than `out`.
pub fn add_looped(out: &mut [f32], layer: &[f32]) {
    let layer_len = (layer.len() / CHANNELS) * CHANNELS;
    if layer_len == 0 {
        return;
    }
    let layer = &layer[..layer_len];
    for chunk in out.chunks_mut(layer_len) {
        for (o, s) in chunk.iter_mut().zip(layer) {
            *o += *s;
        }
    }
}
