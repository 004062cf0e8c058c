//! Track: an independent recording lane holding an ordered set of layers.
//! The track decides which layer receives incoming frames, splits a recording
//! layer at the loop boundary when it overflows, and exposes a cached loop
//! length that its background length pass keeps up to date.
//!
//! Lock scope: `layers` is guarded by the track's own mutex. Critical sections
//! are O(layers) or O(block), so the real-time record path never waits on a
//! long scan. Sample copies (export, compaction) and large deallocations
//! happen after the lock is released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{LooperConfig, CHANNELS};
use crate::layer::Layer;
use crate::phase::{PhaseCause, TrackPhase};
use crate::state::{LayerState, TrackState};
use crate::worker::Notifier;

struct TrackLayers {
    layers: Vec<Layer>,
    /// Pre-reserved storage for the next layer, so overflow on the real-time
    /// thread does not allocate.
    spare: Option<Vec<f32>>,
    /// Set when layers finish, disappear or are added finished.
    structure_changed: bool,
}

pub struct Track {
    index: usize,
    sample_rate: u32,
    is_playing: AtomicBool,
    is_recording: AtomicBool,
    audio_len: AtomicUsize,
    /// Overflow splits since the last length pass, logged from there.
    pending_overflows: AtomicUsize,
    inner: Mutex<TrackLayers>,
    prealloc_samples: usize,
    length_wake: Notifier,
    mix_wake: Notifier,
}

impl Track {
    pub fn new(
        index: usize,
        config: &LooperConfig,
        length_wake: Notifier,
        mix_wake: Notifier,
    ) -> Self {
        let prealloc_samples = config.layer_prealloc_samples();
        Self {
            index,
            sample_rate: config.sample_rate,
            is_playing: AtomicBool::new(config.tracks_start_playing),
            is_recording: AtomicBool::new(false),
            audio_len: AtomicUsize::new(0),
            pending_overflows: AtomicUsize::new(0),
            inner: Mutex::new(TrackLayers {
                layers: Vec::new(),
                spare: Some(Vec::with_capacity(prealloc_samples)),
                structure_changed: false,
            }),
            prealloc_samples,
            length_wake,
            mix_wake,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append a new layer. With `initial = Some((frames, elapsed))` the layer
    /// records `frames` immediately, padded with silence for `elapsed`.
    /// A new recording layer closes the one recording before it.
    pub fn add_layer(&self, is_recording: bool, initial: Option<(&[f32], f64)>) {
        let mut inner = self.inner.lock();
        let closed = Self::push_layer(&mut inner, self.sample_rate, is_recording, initial);
        if is_recording {
            self.is_recording.store(true, Ordering::Release);
        }
        if !is_recording || closed > 0 {
            inner.structure_changed = true;
            drop(inner);
            self.wake_workers();
        }
    }

    /// Push a layer, stopping any layer still recording if the new one
    /// records. Returns how many layers were stopped.
    fn push_layer(
        inner: &mut TrackLayers,
        sample_rate: u32,
        is_recording: bool,
        initial: Option<(&[f32], f64)>,
    ) -> usize {
        let mut closed = 0;
        if is_recording {
            for layer in inner.layers.iter_mut().filter(|l| l.is_recording()) {
                layer.stop_recording();
                closed += 1;
            }
        }

        let storage = inner.spare.take().unwrap_or_default();
        let layer = match initial {
            Some((frames, elapsed)) => {
                let mut layer = Layer::with_initial(sample_rate, storage, frames, elapsed);
                if !is_recording {
                    layer.stop_recording();
                }
                layer
            }
            None => Layer::new(sample_rate, is_recording, storage),
        };
        inner.layers.push(layer);
        closed
    }

    /// Route `frame_count` interleaved stereo frames to the recording layer, if any.
    ///
    /// A layer may grow up to the track's loop length. Frames past that
    /// boundary end the layer and seed a fresh recording layer at `elapsed`.
    /// With no established loop length (first recording) the layer grows freely.
    pub fn record(&self, new_frames: &[f32], frame_count: usize, elapsed: f64) {
        let frame_count = frame_count.min(new_frames.len() / CHANNELS);
        let new_frames = &new_frames[..frame_count * CHANNELS];
        let audio_len = self.audio_len.load(Ordering::Acquire);

        let mut inner = self.inner.lock();
        let Some(pos) = inner.layers.iter().position(|l| l.is_recording()) else {
            return;
        };

        let current_len = inner.layers[pos].samples_len();
        if audio_len == 0 || current_len + frame_count <= audio_len {
            inner.layers[pos].record(new_frames, elapsed);
            return;
        }

        // Overflow: the old layer takes exactly up to the loop length.
        let fits = audio_len.saturating_sub(current_len).min(frame_count);
        let layer = &mut inner.layers[pos];
        if fits > 0 {
            layer.record(&new_frames[..fits * CHANNELS], elapsed);
        }
        layer.stop_recording();
        self.pending_overflows.fetch_add(1, Ordering::Relaxed);

        let rest = &new_frames[fits * CHANNELS..];
        Self::push_layer(&mut inner, self.sample_rate, true, Some((rest, elapsed)));
        inner.structure_changed = true;
        drop(inner);
        self.wake_workers();
    }

    pub fn is_any_layer_recording(&self) -> bool {
        self.inner.lock().layers.iter().any(|l| l.is_recording())
    }

    /// Whether anything changed since the last call. Drains every layer's
    /// modified flag, so call it once per check cycle.
    pub fn needs_mixing(&self) -> bool {
        let mut inner = self.inner.lock();
        let mut changed = std::mem::replace(&mut inner.structure_changed, false);
        for layer in inner.layers.iter_mut() {
            changed |= layer.check_and_reset_modified();
        }
        changed
    }

    pub fn start_recording(&self) {
        let from = TrackPhase::from_recording(self.is_recording());
        let to = TrackPhase::Recording;
        if !from.can_transition_to(to, PhaseCause::Control) {
            debug!(track = self.index, %from, "start_recording ignored: already recording");
            return;
        }

        self.is_recording.store(true, Ordering::Release);
        self.add_layer(true, None);
        info!(track = self.index, %from, %to, "track_phase");
    }

    /// Stop recording on the recording layer, if any.
    pub fn stop_recording(&self) {
        let was_recording = self.is_recording.swap(false, Ordering::AcqRel);
        {
            let mut inner = self.inner.lock();
            for layer in inner.layers.iter_mut().filter(|l| l.is_recording()) {
                layer.stop_recording();
            }
            inner.structure_changed = true;
        }
        self.wake_workers();
        let from = TrackPhase::from_recording(was_recording);
        if from.can_transition_to(TrackPhase::Idle, PhaseCause::Control) {
            info!(track = self.index, %from, to = %TrackPhase::Idle, "track_phase");
        }
    }

    /// Remove every layer.
    pub fn clear_all_layers(&self) {
        let removed = {
            let mut inner = self.inner.lock();
            inner.structure_changed = true;
            std::mem::take(&mut inner.layers)
        };
        if removed.iter().any(Layer::is_recording) {
            self.end_recording_by_removal();
        }
        self.wake_workers();
        info!(track = self.index, layers = removed.len(), "layers_cleared");
    }

    /// Remove the last layer. Removing the recording layer ends recording.
    pub fn remove_last_layer(&self) {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.layers.pop();
            if removed.is_some() {
                inner.structure_changed = true;
            }
            removed
        };
        if let Some(layer) = removed {
            if layer.is_recording() {
                self.end_recording_by_removal();
            }
            self.wake_workers();
            info!(track = self.index, samples_len = layer.samples_len(), "last_layer_removed");
        }
    }

    /// Length pass: recompute the loop length from finished layers, compact
    /// their storage and replenish the spare layer buffer. Returns the new length.
    pub fn refresh_audio_len(&self) -> usize {
        let (max_len, need_spare, pending) = {
            let inner = self.inner.lock();
            let mut max_len = 0;
            let mut pending = Vec::new();
            for (i, layer) in inner.layers.iter().enumerate() {
                if layer.is_recording() {
                    continue;
                }
                max_len = max_len.max(layer.samples_len());
                if let Some(buf) = layer.uncompacted() {
                    pending.push((i, buf));
                }
            }
            (max_len, inner.spare.is_none(), pending)
        };

        let overflows = self.pending_overflows.swap(0, Ordering::Relaxed);
        if overflows > 0 {
            debug!(
                track = self.index,
                overflows,
                phase = %TrackPhase::Recording,
                cause = ?PhaseCause::Overflow,
                "layer_overflow"
            );
        }

        let previous = self.audio_len.swap(max_len, Ordering::AcqRel);
        if previous != max_len {
            debug!(track = self.index, audio_len = max_len, previous, "track_audio_len");
        }

        if !pending.is_empty() {
            self.compact_layers(pending);
        }

        if need_spare {
            let storage = Vec::with_capacity(self.prealloc_samples);
            let mut inner = self.inner.lock();
            if inner.spare.is_none() {
                inner.spare = Some(storage);
            }
        }
        max_len
    }

    /// Replace frozen buffers carrying spare capacity with exact-size copies.
    /// Copies are made before taking the lock; old buffers are dropped after.
    fn compact_layers(&self, pending: Vec<(usize, Arc<Vec<f32>>)>) {
        let copies: Vec<_> = pending
            .into_iter()
            .map(|(i, current)| {
                let copy = Arc::new(current.as_slice().to_vec());
                (i, current, copy)
            })
            .collect();

        let released: Vec<(Arc<Vec<f32>>, Arc<Vec<f32>>)> = {
            let mut inner = self.inner.lock();
            copies
                .into_iter()
                .map(|(i, current, copy)| {
                    let out = match inner.layers.get_mut(i) {
                        Some(layer) => layer.replace_frozen(&current, copy),
                        None => copy,
                    };
                    (current, out)
                })
                .collect()
        };
        drop(released);
    }

    /// Cached loop length in frames (max length of finished layers).
    pub fn audio_len(&self) -> usize {
        self.audio_len.load(Ordering::Acquire)
    }

    pub fn audio_duration(&self) -> f64 {
        self.audio_len() as f64 / self.sample_rate as f64
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_playing(&self, playing: bool) -> bool {
        self.is_playing.swap(playing, Ordering::AcqRel)
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    pub fn layer_count(&self) -> usize {
        self.inner.lock().layers.len()
    }

    /// Shared handles to every finished layer, in recording order.
    pub fn finished_layers(&self) -> Vec<Arc<Vec<f32>>> {
        self.inner
            .lock()
            .layers
            .iter()
            .filter(|l| !l.is_recording())
            .filter_map(Layer::frozen_samples)
            .collect()
    }

    /// Shared handle to a finished layer's samples, interleaved stereo.
    /// `None` for an out-of-range index or the layer still recording.
    pub fn layer_samples(&self, layer_index: usize) -> Option<Arc<Vec<f32>>> {
        let inner = self.inner.lock();
        inner.layers.get(layer_index).and_then(Layer::frozen_samples)
    }

    pub fn snapshot(&self) -> TrackState {
        let layers = self
            .inner
            .lock()
            .layers
            .iter()
            .map(|l| LayerState {
                is_recording: l.is_recording(),
                record_start_time: l.record_start_time(),
                sample_rate: l.sample_rate(),
                samples_len: l.samples_len(),
            })
            .collect();
        TrackState {
            sample_rate: self.sample_rate,
            is_playing: self.is_playing(),
            is_recording: self.is_recording(),
            audio_len: self.audio_len(),
            audio_duration: self.audio_duration(),
            layers,
        }
    }

    fn end_recording_by_removal(&self) {
        let from = TrackPhase::from_recording(self.is_recording.swap(false, Ordering::AcqRel));
        if from.can_transition_to(TrackPhase::Idle, PhaseCause::Removed) {
            info!(track = self.index, %from, to = %TrackPhase::Idle, "track_phase");
        }
    }

    fn wake_workers(&self) {
        self.length_wake.notify();
        self.mix_wake.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(sample_rate: u32) -> Track {
        let config = LooperConfig {
            sample_rate,
            layer_prealloc_secs: 0.1,
            ..LooperConfig::default()
        };
        Track::new(0, &config, Notifier::detached(), Notifier::detached())
    }

    fn block(frames: usize, value: f32) -> Vec<f32> {
        vec![value; frames * CHANNELS]
    }

    /// Record `frames` into a finished first layer and publish its length.
    fn with_loop(track: &Track, frames: usize) {
        track.start_recording();
        track.record(&block(frames, 0.5), frames, 0.0);
        track.stop_recording();
        assert_eq!(track.refresh_audio_len(), frames);
    }

    #[test]
    fn first_recording_grows_without_limit() {
        let t = track(1000);
        t.start_recording();
        for _ in 0..10 {
            t.record(&block(128, 1.0), 128, 0.0);
        }
        assert_eq!(t.layer_count(), 1);
        assert_eq!(t.snapshot().layers[0].samples_len, 1280);
        // recording layers do not count toward the loop length
        assert_eq!(t.refresh_audio_len(), 0);
    }

    #[test]
    fn overflow_splits_at_loop_boundary() {
        let t = track(1000);
        with_loop(&t, 300);

        t.start_recording();
        t.record(&block(250, 1.0), 250, 0.0);
        // 50 frames fit, 78 spill into a new layer
        t.record(&block(128, 2.0), 128, 0.0);

        let state = t.snapshot();
        assert_eq!(state.layers.len(), 3);
        assert!(!state.layers[1].is_recording);
        assert_eq!(state.layers[1].samples_len, 300);
        assert!(state.layers[2].is_recording);
        assert_eq!(state.layers[2].samples_len, 78);
        assert_eq!(state.layers[2].record_start_time, Some(0.0));

        // the layer still recording is not exported
        assert!(t.layer_samples(2).is_none());
        let truncated = t.layer_samples(1).unwrap();
        assert!(truncated[250 * CHANNELS..].iter().all(|&s| s == 2.0));

        t.stop_recording();
        let spilled = t.layer_samples(2).unwrap();
        assert!(spilled.iter().all(|&s| s == 2.0));
        assert_eq!(t.pending_overflows.load(Ordering::Relaxed), 1);
        t.refresh_audio_len();
        assert_eq!(t.pending_overflows.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn exact_fit_does_not_overflow() {
        let t = track(1000);
        with_loop(&t, 256);
        t.start_recording();
        t.record(&block(128, 1.0), 128, 0.0);
        t.record(&block(128, 1.0), 128, 0.0);
        assert_eq!(t.layer_count(), 2);
        assert!(t.is_any_layer_recording());
    }

    #[test]
    fn overflow_layer_gets_silence_for_elapsed() {
        let t = track(1000);
        with_loop(&t, 100);
        t.start_recording();
        t.record(&block(100, 1.0), 100, 0.0);
        t.record(&block(10, 1.0), 10, 0.02);
        let state = t.snapshot();
        assert_eq!(state.layers[2].samples_len, 20 + 10);
        assert_eq!(state.layers[2].record_start_time, Some(0.02));
    }

    #[test]
    fn record_without_recording_layer_is_dropped() {
        let t = track(1000);
        t.record(&block(16, 1.0), 16, 0.0);
        assert_eq!(t.layer_count(), 0);
    }

    #[test]
    fn start_recording_twice_adds_one_layer() {
        let t = track(1000);
        t.start_recording();
        t.start_recording();
        assert_eq!(t.layer_count(), 1);
        assert!(t.is_recording());
    }

    #[test]
    fn new_recording_layer_closes_previous() {
        let t = track(1000);
        t.add_layer(true, None);
        t.record(&block(2, 0.5), 2, 0.0);
        t.add_layer(true, Some((&block(4, 1.0), 0.0)));

        let state = t.snapshot();
        let recording = state.layers.iter().filter(|l| l.is_recording).count();
        assert_eq!(recording, 1);
        assert!(state.layers[1].is_recording);
        assert!(t.is_recording());
        assert!(t.needs_mixing());

        // frames go to the newest layer
        t.record(&block(3, 1.0), 3, 0.0);
        assert_eq!(t.snapshot().layers[1].samples_len, 7);
        assert_eq!(t.snapshot().layers[0].samples_len, 2);

        t.stop_recording();
        assert!(!t.is_any_layer_recording());
    }

    #[test]
    fn export_shares_finished_layer_without_copying() {
        let t = track(1000);
        with_loop(&t, 32);
        let exported = t.layer_samples(0).unwrap();
        let finished = t.finished_layers();
        assert!(Arc::ptr_eq(&exported, &finished[0]));
        assert!(t.layer_samples(1).is_none());
    }

    #[test]
    fn length_pass_compacts_finished_layers() {
        let t = track(1000);
        t.start_recording();
        t.record(&block(10, 1.0), 10, 0.0);
        t.stop_recording();
        // an export held across the pass keeps its data
        let held = t.layer_samples(0).unwrap();
        assert!(held.capacity() > held.len());

        assert_eq!(t.refresh_audio_len(), 10);
        let compacted = t.layer_samples(0).unwrap();
        assert!(!Arc::ptr_eq(&held, &compacted));
        assert_eq!(compacted.capacity(), compacted.len());
        assert_eq!(held.as_slice(), compacted.as_slice());
    }

    #[test]
    fn needs_mixing_drains_once() {
        let t = track(1000);
        t.start_recording();
        t.record(&block(4, 1.0), 4, 0.0);
        assert!(t.needs_mixing());
        assert!(!t.needs_mixing());
        t.stop_recording();
        assert!(t.needs_mixing());
        assert!(!t.needs_mixing());
    }

    #[test]
    fn remove_last_layer_stops_recording_layer() {
        let t = track(1000);
        with_loop(&t, 50);
        t.start_recording();
        t.record(&block(10, 1.0), 10, 0.0);
        t.remove_last_layer();
        assert_eq!(t.layer_count(), 1);
        assert!(!t.is_any_layer_recording());
        assert!(!t.is_recording());
        assert!(t.needs_mixing());

        // recording can start again afterwards
        t.start_recording();
        assert_eq!(t.layer_count(), 2);
    }

    #[test]
    fn remove_from_empty_track_is_noop() {
        let t = track(1000);
        t.remove_last_layer();
        assert_eq!(t.layer_count(), 0);
        assert!(!t.needs_mixing());
    }

    #[test]
    fn clear_resets_loop_length() {
        let t = track(1000);
        with_loop(&t, 500);
        t.start_recording();
        t.clear_all_layers();
        assert_eq!(t.layer_count(), 0);
        assert!(!t.is_recording());
        assert_eq!(t.refresh_audio_len(), 0);
        assert_eq!(t.audio_duration(), 0.0);
    }

    #[test]
    fn finished_layers_skip_recording_layer() {
        let t = track(1000);
        with_loop(&t, 64);
        t.start_recording();
        t.record(&block(8, 1.0), 8, 0.0);
        let finished = t.finished_layers();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].len(), 64 * CHANNELS);
    }

    #[test]
    fn audio_duration_follows_sample_rate() {
        let t = track(48_000);
        with_loop(&t, 24_000);
        assert!((t.audio_duration() - 0.5).abs() < 1e-9);
    }
}
