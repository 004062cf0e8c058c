//! Level metering: per-block RMS smoothed by a moving average over the
//! last `window` blocks. Updated from the audio callback, read anywhere.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// RMS over a block of interleaved samples.
#[inline]
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Moving average of block RMS values over a fixed window. Pre-allocated.
pub struct RmsMeter {
    values: Box<[f32]>,
    pos: usize,
    count: usize,
    sum: f64,
}

impl RmsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            values: vec![0.0; window.max(1)].into_boxed_slice(),
            pos: 0,
            count: 0,
            sum: 0.0,
        }
    }

    /// Add one block and return the current moving average.
    #[inline]
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        let rms = compute_rms(samples);
        let window = self.values.len();
        if self.count == window {
            self.sum -= self.values[self.pos] as f64;
        } else {
            self.count += 1;
        }
        self.values[self.pos] = rms;
        self.sum += rms as f64;
        self.pos = (self.pos + 1) % window;
        self.average()
    }

    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64).max(0.0) as f32
        }
    }
}

/// Latest input/output levels, published by the device callbacks.
#[derive(Debug, Default)]
pub struct Levels {
    input_rms: AtomicU32,
    output_rms: AtomicU32,
    /// Input frames overwritten before the output callback read them.
    input_overruns: AtomicU64,
}

impl Levels {
    pub fn set_input(&self, rms: f32) {
        self.input_rms.store(rms.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output(&self, rms: f32) {
        self.output_rms.store(rms.to_bits(), Ordering::Relaxed);
    }

    pub fn input(&self) -> f32 {
        f32::from_bits(self.input_rms.load(Ordering::Relaxed))
    }

    pub fn output(&self) -> f32 {
        f32::from_bits(self.output_rms.load(Ordering::Relaxed))
    }

    pub fn add_input_overruns(&self, frames: usize) {
        self.input_overruns.fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Total overrun frames since the device started.
    pub fn input_overruns(&self) -> u64 {
        self.input_overruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        assert!((compute_rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(compute_rms(&[]), 0.0);
    }

    #[test]
    fn moving_average_partial_window() {
        let mut meter = RmsMeter::new(4);
        meter.process(&[1.0; 8]);
        let avg = meter.process(&[0.0; 8]);
        assert!((avg - 0.5).abs() < 1e-6);
    }

    #[test]
    fn moving_average_forgets_old_blocks() {
        let mut meter = RmsMeter::new(2);
        meter.process(&[1.0; 4]);
        meter.process(&[0.0; 4]);
        let avg = meter.process(&[0.0; 4]);
        assert_eq!(avg, 0.0);
    }

    #[test]
    fn levels_round_trip_bits() {
        let levels = Levels::default();
        levels.set_input(0.25);
        levels.set_output(0.75);
        assert_eq!(levels.input(), 0.25);
        assert_eq!(levels.output(), 0.75);
    }

    #[test]
    fn overruns_accumulate() {
        let levels = Levels::default();
        assert_eq!(levels.input_overruns(), 0);
        levels.add_input_overruns(3);
        levels.add_input_overruns(0);
        levels.add_input_overruns(5);
        assert_eq!(levels.input_overruns(), 8);
    }
}
