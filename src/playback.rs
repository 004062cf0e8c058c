//! Playback cursor over the published mixed buffer.
//! Hands out one callback block at a time with sample-accurate wraparound and
//! tracks the loop phase (`elapsed`) that new layers use for silence padding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::CHANNELS;
use crate::mixer::MixedBuffer;

/// Monotonic time source. Abstracted so playback timing can be driven by hand.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_us.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.now_us.store(to.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.now_us.load(Ordering::SeqCst))
    }
}

/// Frame and channel count the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    pub frames: usize,
    pub channels: usize,
}

impl BlockShape {
    pub fn stereo(frames: usize) -> Self {
        Self {
            frames,
            channels: CHANNELS,
        }
    }

    pub fn samples(&self) -> usize {
        self.frames * self.channels
    }
}

#[derive(Debug, Default)]
pub struct PlaybackCursor {
    cursor: usize,
    start_time: Option<Duration>,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the loop start and anchor the phase clock at `now`.
    pub fn restart(&mut self, now: Duration) {
        self.cursor = 0;
        self.start_time = Some(now);
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Write the next block into `out` (`shape.samples()` long) and return the
    /// loop phase in seconds.
    ///
    /// While the loop has no duration the cursor stays pinned at zero and the
    /// phase clock keeps re-anchoring, so a newly established loop starts from
    /// its beginning. `frame_count` frames are taken from the cursor, wrapping
    /// at the buffer end; if that slice is shorter than `shape.frames` it is
    /// repeated to fill the block. Channels past stereo are silent.
    pub fn fill(
        &mut self,
        mixed: &MixedBuffer,
        now: Duration,
        frame_count: usize,
        shape: BlockShape,
        out: &mut [f32],
    ) -> f64 {
        let out = &mut out[..shape.samples()];
        let duration = mixed.audio_duration();

        let elapsed = if duration > 0.0 {
            let start = *self.start_time.get_or_insert(now);
            now.saturating_sub(start).as_secs_f64() % duration
        } else {
            self.restart(now);
            0.0
        };

        let len = mixed.audio_len();
        if len == 0 || frame_count == 0 || shape.channels == 0 {
            out.fill(0.0);
            return elapsed;
        }

        // A new mix may be shorter than the previous one.
        let cursor = self.cursor % len;
        let tail = len - cursor;
        let end = cursor + frame_count;
        let slice_len = if end > len { tail + end % len } else { frame_count };

        let src = mixed.samples();
        for (i, frame) in out.chunks_mut(shape.channels).enumerate() {
            let j = i % slice_len;
            let src_frame = if j < tail { cursor + j } else { j - tail };
            let base = src_frame * CHANNELS;
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = if ch < CHANNELS { src[base + ch] } else { 0.0 };
            }
        }

        self.cursor = end % len;
        elapsed
    }
}
