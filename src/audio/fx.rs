//! Effects-chain seam.
//! The chain turns raw stereo input into the frames the looper records and
//! monitors. Real effect processing lives outside this crate; implement
//! `EffectsChain` to plug one in.

/// Stereo in, stereo out. Processes interleaved frames in place.
pub trait EffectsChain: Send {
    fn process(&mut self, frames: &mut [f32], sample_rate: u32);

    /// Reset internal state (e.g. tails) between sessions.
    fn reset(&mut self) {}
}

/// Leaves the signal untouched.
pub struct Passthrough;

impl EffectsChain for Passthrough {
    fn process(&mut self, _frames: &mut [f32], _sample_rate: u32) {}
}

/// Fixed linear gain.
pub struct Gain {
    pub gain: f32,
}

impl EffectsChain for Gain {
    fn process(&mut self, frames: &mut [f32], _sample_rate: u32) {
        for s in frames.iter_mut() {
            *s *= self.gain;
        }
    }
}

/// Runs several chains in order.
#[derive(Default)]
pub struct Chain {
    stages: Vec<Box<dyn EffectsChain>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl EffectsChain + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }
}

impl EffectsChain for Chain {
    fn process(&mut self, frames: &mut [f32], sample_rate: u32) {
        for stage in self.stages.iter_mut() {
            stage.process(frames, sample_rate);
        }
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}
