//! Frame ring: fixed pre-allocated circular buffer of interleaved stereo
//! frames carrying input from the capture callback to the output callback.
//! No dynamic allocation after construction.

use crate::config::CHANNELS;

/// Fixed-size ring of interleaved f32 stereo frames. When full, the oldest
/// frames are overwritten.
pub struct FrameRing {
    buffer: Box<[f32]>,
    write_pos: usize,
    read_pos: usize,
    len: usize,
    capacity: usize,
}

impl FrameRing {
    /// Create a ring holding `capacity_frames` stereo frames.
    pub fn new(capacity_frames: usize) -> Self {
        let capacity = capacity_frames.max(1);
        Self {
            buffer: vec![0.0; capacity * CHANNELS].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            len: 0,
            capacity,
        }
    }

    /// Write interleaved stereo frames. Returns the number of frames that
    /// overwrote unread data.
    #[inline]
    pub fn write(&mut self, frames: &[f32]) -> usize {
        let mut overwritten = 0;
        for frame in frames.chunks_exact(CHANNELS) {
            let base = self.write_pos * CHANNELS;
            self.buffer[base..base + CHANNELS].copy_from_slice(frame);
            self.write_pos = (self.write_pos + 1) % self.capacity;
            if self.len == self.capacity {
                self.read_pos = (self.read_pos + 1) % self.capacity;
                overwritten += 1;
            } else {
                self.len += 1;
            }
        }
        overwritten
    }

    /// Read up to `output.len() / 2` frames. Returns the number of frames read.
    #[inline]
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = (output.len() / CHANNELS).min(self.len);
        for frame in output.chunks_exact_mut(CHANNELS).take(to_read) {
            let base = self.read_pos * CHANNELS;
            frame.copy_from_slice(&self.buffer[base..base + CHANNELS]);
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        self.len -= to_read;
        to_read
    }

    /// Number of unread frames.
    #[inline]
    pub fn available(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(values: &[f32]) -> Vec<f32> {
        values.iter().flat_map(|&v| [v, -v]).collect()
    }

    #[test]
    fn reads_back_in_order() {
        let mut ring = FrameRing::new(8);
        ring.write(&frames(&[1.0, 2.0, 3.0]));
        assert_eq!(ring.available(), 3);

        let mut out = vec![0.0; 4];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, frames(&[1.0, 2.0]));
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut ring = FrameRing::new(3);
        assert_eq!(ring.write(&frames(&[1.0, 2.0, 3.0, 4.0, 5.0])), 2);
        let mut out = vec![0.0; 6];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, frames(&[3.0, 4.0, 5.0]));
    }

    #[test]
    fn short_read_leaves_tail_untouched() {
        let mut ring = FrameRing::new(4);
        ring.write(&frames(&[7.0]));
        let mut out = vec![9.0; 4];
        assert_eq!(ring.read(&mut out), 1);
        assert_eq!(out, vec![7.0, -7.0, 9.0, 9.0]);
    }
}
