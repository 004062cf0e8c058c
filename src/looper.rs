//! Looper: owns a fixed set of tracks, builds the cross-track mix and serves
//! the real-time callback.
//!
//! Lock scopes:
//! - each track guards its own layers;
//! - `mix_lock` serializes mixing passes, while the published buffer sits in
//!   an `RwLock<Arc<_>>` that is held only long enough to clone or swap the `Arc`.
//! Tracks never take the mixing locks and the mixing pass only takes a track
//! lock to snapshot finished layers, so there is no lock ordering hazard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel as cb;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LooperConfig;
use crate::error::LooperError;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::mixer::{mix_layers, MixedBuffer};
use crate::playback::{BlockShape, Clock, PlaybackCursor, SystemClock};
use crate::state::{LooperState, MixInfo};
use crate::track::Track;
use crate::worker::{spawn_worker, Notifier, WorkerHandle, WorkerSpec};

pub struct Looper {
    config: LooperConfig,
    is_playing: AtomicBool,
    tracks: Vec<Track>,

    length_rx: Mutex<Option<Vec<(Notifier, cb::Receiver<()>)>>>,
    mix_wake: Notifier,
    mix_rx: Mutex<Option<cb::Receiver<()>>>,

    mix_lock: Mutex<()>,
    mixed: RwLock<Arc<MixedBuffer>>,
    /// Buffers swapped out while the playback path may still hold them; freed
    /// by a later mixing pass so deallocation stays off the audio thread.
    retired: Mutex<Vec<Arc<MixedBuffer>>>,
    generation: AtomicU64,
    /// Set by track play/stop so a remix happens even if no layer changed.
    force_remix: AtomicBool,
    mix_tx: watch::Sender<MixInfo>,

    playback: Mutex<PlaybackCursor>,
    elapsed_bits: AtomicU64,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl Looper {
    pub fn new(config: LooperConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: LooperConfig, clock: Arc<dyn Clock>) -> Self {
        let (mix_wake, mix_rx) = Notifier::channel();
        let mut length_rx = Vec::with_capacity(config.tracks);
        let tracks: Vec<Track> = (0..config.tracks)
            .map(|i| {
                let (length_wake, rx) = Notifier::channel();
                length_rx.push((length_wake.clone(), rx));
                Track::new(i, &config, length_wake, mix_wake.clone())
            })
            .collect();
        let (mix_tx, _) = watch::channel(MixInfo::default());

        let metrics = Arc::new(MetricsRegistry::new());
        metrics.register(metric_names::CALLBACK);

        info!(
            sample_rate = config.sample_rate,
            tracks = config.tracks,
            block_frames = config.block_frames,
            "looper created"
        );

        Self {
            is_playing: AtomicBool::new(false),
            tracks,
            length_rx: Mutex::new(Some(length_rx)),
            mix_wake,
            mix_rx: Mutex::new(Some(mix_rx)),
            mix_lock: Mutex::new(()),
            mixed: RwLock::new(Arc::new(MixedBuffer::default())),
            retired: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            force_remix: AtomicBool::new(false),
            mix_tx,
            playback: Mutex::new(PlaybackCursor::new()),
            elapsed_bits: AtomicU64::new(0f64.to_bits()),
            clock,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    // --- Real-time path ---

    /// Route a block of interleaved stereo frames to every recording track.
    pub fn record(&self, new_frames: &[f32], frame_count: usize) {
        let elapsed = self.elapsed();
        for track in self.tracks.iter().filter(|t| t.is_recording()) {
            track.record(new_frames, frame_count, elapsed);
        }
    }

    /// Next playback block as a freshly allocated buffer of `shape.samples()` samples.
    pub fn get_next_samples(&self, frame_count: usize, shape: BlockShape) -> Vec<f32> {
        let mut out = vec![0.0; shape.samples()];
        self.fill_next_samples(frame_count, shape, &mut out);
        out
    }

    /// Write the next playback block into `out`. Silence when stopped or when
    /// no loop has been mixed yet.
    pub fn fill_next_samples(&self, frame_count: usize, shape: BlockShape, out: &mut [f32]) {
        if !self.is_playing() {
            out[..shape.samples()].fill(0.0);
            return;
        }
        let mixed = Arc::clone(&self.mixed.read());
        let now = self.clock.now();
        let elapsed = self.playback.lock().fill(&mixed, now, frame_count, shape, out);
        self.elapsed_bits.store(elapsed.to_bits(), Ordering::Release);
    }

    /// Current phase within the loop cycle, in seconds.
    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.elapsed_bits.load(Ordering::Acquire))
    }

    // --- Transport ---

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    /// Start playback from the loop start.
    pub fn play(&self) {
        if !self.is_playing.swap(true, Ordering::AcqRel) {
            self.playback.lock().restart(self.clock.now());
            info!("playback started");
        }
    }

    pub fn stop(&self) {
        if self.is_playing.swap(false, Ordering::AcqRel) {
            info!("playback stopped");
        }
    }

    /// Returns whether the looper is playing afterwards.
    pub fn toggle_start_stop(&self) -> bool {
        if self.is_playing() {
            self.stop();
            false
        } else {
            self.play();
            true
        }
    }

    // --- Track control. Out-of-range indices are ignored. ---

    fn with_track(&self, index: usize, op: &'static str, f: impl FnOnce(&Track)) {
        match self.tracks.get(index) {
            Some(track) => f(track),
            None => debug!(
                track = index,
                op,
                tracks = self.tracks.len(),
                "track index out of range, ignored"
            ),
        }
    }

    pub fn start_recording(&self, track_index: usize) {
        self.with_track(track_index, "start_recording", Track::start_recording);
    }

    pub fn stop_recording(&self, track_index: usize) {
        self.with_track(track_index, "stop_recording", Track::stop_recording);
    }

    pub fn clear_all_layers(&self, track_index: usize) {
        self.with_track(track_index, "clear_all_layers", Track::clear_all_layers);
    }

    pub fn remove_last_layer(&self, track_index: usize) {
        self.with_track(track_index, "remove_last_layer", Track::remove_last_layer);
    }

    pub fn play_track(&self, track_index: usize) {
        self.with_track(track_index, "play_track", |t| self.set_track_playing(t, true));
    }

    pub fn stop_track(&self, track_index: usize) {
        self.with_track(track_index, "stop_track", |t| self.set_track_playing(t, false));
    }

    pub fn toggle_track(&self, track_index: usize) {
        self.with_track(track_index, "toggle_track", |t| {
            self.set_track_playing(t, !t.is_playing())
        });
    }

    fn set_track_playing(&self, track: &Track, playing: bool) {
        if track.set_playing(playing) != playing {
            self.force_remix.store(true, Ordering::Release);
            self.mix_wake.notify();
            info!(track = track.index(), playing, "track_playing_changed");
        }
    }

    // --- Maintenance passes ---

    /// Run every track's length pass once.
    pub fn refresh_track_lengths(&self) {
        for track in &self.tracks {
            track.refresh_audio_len();
        }
    }

    /// Whether a mixing pass is due: a playing track that is not recording has
    /// changed, or a track's playing flag flipped. Drains change flags.
    fn needs_mixing(&self) -> bool {
        let forced = self.force_remix.swap(false, Ordering::AcqRel);
        let changed = self
            .tracks
            .iter()
            .any(|t| t.is_playing() && !t.is_any_layer_recording() && t.needs_mixing());
        forced || changed
    }

    /// Mixing pass: remix if anything relevant changed. Returns whether it mixed.
    pub fn mix_if_needed(&self) -> bool {
        let _guard = self.mix_lock.lock();
        if !self.needs_mixing() {
            return false;
        }
        self.mix_locked();
        true
    }

    /// Unconditionally rebuild and publish the mixed buffer.
    pub fn mix_now(&self) {
        let _guard = self.mix_lock.lock();
        self.mix_locked();
    }

    fn mix_locked(&self) {
        let layers: Vec<Arc<Vec<f32>>> = self
            .tracks
            .iter()
            .filter(|t| t.is_playing())
            .flat_map(Track::finished_layers)
            .collect();

        let samples = mix_layers(&layers);
        drop(layers);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let buffer = Arc::new(MixedBuffer::new(samples, self.config.sample_rate, generation));
        let info = MixInfo {
            generation,
            audio_len: buffer.audio_len(),
            audio_duration: buffer.audio_duration(),
        };

        let previous = std::mem::replace(&mut *self.mixed.write(), buffer);
        {
            let mut retired = self.retired.lock();
            retired.push(previous);
            retired.retain(|b| Arc::strong_count(b) > 1);
        }

        self.mix_tx.send_replace(info);
        debug!(
            generation,
            audio_len = info.audio_len,
            audio_duration = info.audio_duration,
            "mix published"
        );
    }

    // --- Read side ---

    /// The most recently published mix.
    pub fn mixed_samples(&self) -> Arc<MixedBuffer> {
        Arc::clone(&self.mixed.read())
    }

    pub fn audio_len(&self) -> usize {
        self.mixed.read().audio_len()
    }

    pub fn audio_duration(&self) -> f64 {
        self.mixed.read().audio_duration()
    }

    /// Receive a `MixInfo` after every mixing pass.
    pub fn subscribe(&self) -> watch::Receiver<MixInfo> {
        self.mix_tx.subscribe()
    }

    pub fn get_state(&self) -> LooperState {
        let mixed = self.mixed_samples();
        LooperState {
            sample_rate: self.config.sample_rate,
            is_playing: self.is_playing(),
            tracks: self.tracks.iter().map(Track::snapshot).collect(),
            audio_len: mixed.audio_len(),
            audio_duration: mixed.audio_duration(),
            elapsed: self.elapsed(),
        }
    }
}

/// Owns the background maintenance threads of a looper: one length pass per
/// track and one mixing pass. Dropping the runtime stops and joins them.
pub struct LooperRuntime {
    looper: Arc<Looper>,
    token: CancellationToken,
    workers: Vec<WorkerHandle>,
}

impl LooperRuntime {
    /// Start the maintenance threads. A looper can be started only once.
    pub fn start(looper: Arc<Looper>) -> Result<Self, LooperError> {
        let length_wakes = looper
            .length_rx
            .lock()
            .take()
            .ok_or(LooperError::AlreadyStarted)?;
        let mix_rx = looper
            .mix_rx
            .lock()
            .take()
            .ok_or(LooperError::AlreadyStarted)?;

        let token = CancellationToken::new();
        let metrics = Arc::clone(looper.metrics());
        let mut runtime = Self {
            looper: Arc::clone(&looper),
            token: token.clone(),
            workers: Vec::with_capacity(length_wakes.len() + 1),
        };

        for (index, wake) in length_wakes.into_iter().enumerate() {
            let worker_looper = Arc::clone(&looper);
            let handle = spawn_worker(
                WorkerSpec {
                    name: format!("track-len-{index}"),
                    interval: looper.config().length_poll_interval(),
                    metric: metric_names::LENGTH_PASS,
                },
                token.child_token(),
                wake,
                Arc::clone(&metrics),
                move || {
                    if let Some(track) = worker_looper.track(index) {
                        track.refresh_audio_len();
                    }
                    true
                },
            )?;
            runtime.workers.push(handle);
        }

        let worker_looper = Arc::clone(&looper);
        let handle = spawn_worker(
            WorkerSpec {
                name: "looper-mix".into(),
                interval: looper.config().mix_poll_interval(),
                metric: metric_names::MIX_PASS,
            },
            token.child_token(),
            (looper.mix_wake.clone(), mix_rx),
            metrics,
            move || worker_looper.mix_if_needed(),
        )?;
        runtime.workers.push(handle);

        info!(workers = runtime.workers.len(), "looper runtime started");
        Ok(runtime)
    }

    pub fn looper(&self) -> &Arc<Looper> {
        &self.looper
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }

    /// Cancel and join every worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.token.cancel();
        for worker in self.workers.iter_mut() {
            worker.shutdown();
        }
        self.workers.clear();
        info!("looper runtime stopped");
    }
}

impl Drop for LooperRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
