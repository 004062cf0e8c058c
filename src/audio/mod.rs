//! Audio device binding.
//! Capture callback → frame ring → output callback → effects → looper.
//! Both streams run on cpal's callback threads. The output callback is the
//! looper's real-time block: it records the processed input, pulls the next
//! loop block and writes loop + monitor to the device.

pub mod fx;
pub mod meter;
pub mod ring_buffer;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::CHANNELS;
use crate::error::LooperError;
use crate::looper::Looper;
use crate::metrics::metric_names;
use crate::playback::BlockShape;
use fx::EffectsChain;
use meter::{Levels, RmsMeter};
use ring_buffer::FrameRing;

/// Blocks averaged by the level meters.
pub const METER_WINDOW_BLOCKS: usize = 50;

/// Keeps both device streams alive. Dropping it stops audio.
pub struct DeviceHandle {
    _input: cpal::Stream,
    _output: cpal::Stream,
    levels: Arc<Levels>,
}

impl DeviceHandle {
    pub fn levels(&self) -> &Arc<Levels> {
        &self.levels
    }
}

/// Scratch buffers owned by the output callback. They only grow when the
/// device hands over a larger block than any seen before.
struct OutputScratch {
    input: Vec<f32>,
    looped: Vec<f32>,
}

impl OutputScratch {
    fn with_frames(frames: usize, out_channels: usize) -> Self {
        Self {
            input: vec![0.0; frames * CHANNELS],
            looped: vec![0.0; frames * out_channels],
        }
    }

    fn ensure(&mut self, frames: usize, out_channels: usize) {
        if self.input.len() < frames * CHANNELS {
            self.input.resize(frames * CHANNELS, 0.0);
        }
        if self.looped.len() < frames * out_channels {
            self.looped.resize(frames * out_channels, 0.0);
        }
    }
}

/// Open the default input and output devices and bind them to `looper`.
pub fn start_duplex(
    looper: Arc<Looper>,
    mut fx: Box<dyn EffectsChain>,
) -> Result<DeviceHandle, LooperError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .ok_or_else(|| LooperError::Device("no audio input device available".into()))?;
    let output_device = host
        .default_output_device()
        .ok_or_else(|| LooperError::Device("no audio output device available".into()))?;

    let in_channels = input_device
        .default_input_config()
        .map_err(|e| LooperError::Device(format!("input config: {e}")))?
        .channels();
    let out_channels = output_device
        .default_output_config()
        .map_err(|e| LooperError::Device(format!("output config: {e}")))?
        .channels();

    let sample_rate = looper.sample_rate();
    let block_frames = looper.config().block_frames;
    let ring = Arc::new(Mutex::new(FrameRing::new(
        looper.config().ring_buffer_blocks * block_frames,
    )));
    let levels = Arc::new(Levels::default());

    let input_stream = {
        let ring = Arc::clone(&ring);
        let levels = Arc::clone(&levels);
        let channels = in_channels as usize;
        let mut meter = RmsMeter::new(METER_WINDOW_BLOCKS);
        let stream_config = cpal::StreamConfig {
            channels: in_channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        input_device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    levels.set_input(meter.process(data));
                    if channels == 0 {
                        return;
                    }
                    let overrun = write_stereo(&mut ring.lock(), data, channels);
                    if overrun > 0 {
                        levels.add_input_overruns(overrun);
                    }
                },
                |err| {
                    error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| LooperError::Device(format!("failed to build input stream: {e}")))?
    };

    let output_stream = {
        let ring = Arc::clone(&ring);
        let levels = Arc::clone(&levels);
        let looper = Arc::clone(&looper);
        let channels = out_channels as usize;
        let mut meter = RmsMeter::new(METER_WINDOW_BLOCKS);
        let mut scratch = OutputScratch::with_frames(block_frames, channels);
        fx.reset();
        let stream_config = cpal::StreamConfig {
            channels: out_channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        output_device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let started = Instant::now();
                    if channels == 0 {
                        return;
                    }
                    let frames = data.len() / channels;
                    scratch.ensure(frames, channels);

                    let input = &mut scratch.input[..frames * CHANNELS];
                    let read = ring.lock().read(input);
                    input[read * CHANNELS..].fill(0.0);
                    fx.process(input, sample_rate);

                    looper.record(input, frames);
                    let shape = BlockShape { frames, channels };
                    let looped = &mut scratch.looped[..shape.samples()];
                    looper.fill_next_samples(frames, shape, looped);

                    mix_to_device(input, looped, channels, data);

                    levels.set_output(meter.process(data));
                    looper
                        .metrics()
                        .try_record(metric_names::CALLBACK, started.elapsed().as_micros() as f64);
                },
                |err| {
                    error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| LooperError::Device(format!("failed to build output stream: {e}")))?
    };

    input_stream
        .play()
        .map_err(|e| LooperError::Device(format!("failed to start input stream: {e}")))?;
    output_stream
        .play()
        .map_err(|e| LooperError::Device(format!("failed to start output stream: {e}")))?;

    if in_channels == 0 || out_channels == 0 {
        warn!(in_channels, out_channels, "device reports zero channels");
    }
    info!(sample_rate, in_channels, out_channels, "audio duplex stream started");

    Ok(DeviceHandle {
        _input: input_stream,
        _output: output_stream,
        levels,
    })
}

/// Write device input into the ring as stereo frames. Returns the number
/// of unread frames that were overwritten.
#[inline]
fn write_stereo(ring: &mut FrameRing, data: &[f32], channels: usize) -> usize {
    let mut overrun = 0;
    for frame in data.chunks_exact(channels) {
        let (l, r) = to_stereo(frame);
        overrun += ring.write(&[l, r]);
    }
    overrun
}

/// Mono input is duplicated; wider input keeps its first two channels.
#[inline]
fn to_stereo(frame: &[f32]) -> (f32, f32) {
    match frame {
        [] => (0.0, 0.0),
        [m] => (*m, *m),
        [l, r, ..] => (*l, *r),
    }
}

/// Sum the monitored stereo input and the loop block into the device buffer.
/// A mono device gets the input's average.
#[inline]
fn mix_to_device(input: &[f32], looped: &[f32], channels: usize, out: &mut [f32]) {
    for (f, frame) in out.chunks_exact_mut(channels).enumerate() {
        let l = input[f * CHANNELS];
        let r = input[f * CHANNELS + 1];
        for (c, sample) in frame.iter_mut().enumerate() {
            let monitor = match (channels, c) {
                (1, _) => 0.5 * (l + r),
                (_, 0) => l,
                (_, 1) => r,
                _ => 0.0,
            };
            *sample = monitor + looped[f * channels + c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_conversion() {
        assert_eq!(to_stereo(&[0.5]), (0.5, 0.5));
        assert_eq!(to_stereo(&[0.1, 0.2, 0.3, 0.4]), (0.1, 0.2));
    }

    #[test]
    fn input_overrun_is_counted() {
        let mut ring = FrameRing::new(2);
        let mono = [0.1, 0.2, 0.3];
        assert_eq!(write_stereo(&mut ring, &mono, 1), 1);

        let mut out = [0.0; 4];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn device_mix_sums_monitor_and_loop() {
        let input = [1.0, 2.0, 3.0, 4.0];
        let looped = [0.5, 0.5, 0.0, 0.0, 0.25, 0.25, 0.0, 0.0];
        let mut out = [9.0; 8];
        mix_to_device(&input, &looped, 4, &mut out);
        assert_eq!(out, [1.5, 2.5, 0.0, 0.0, 3.25, 4.25, 0.0, 0.0]);
    }

    #[test]
    fn mono_device_gets_average() {
        let input = [1.0, 3.0];
        let looped = [0.5];
        let mut out = [0.0];
        mix_to_device(&input, &looped, 1, &mut out);
        assert_eq!(out, [2.5]);
    }

    #[test]
    fn scratch_grows_for_larger_blocks() {
        let mut scratch = OutputScratch::with_frames(4, 2);
        scratch.ensure(8, 4);
        assert_eq!(scratch.input.len(), 16);
        assert_eq!(scratch.looped.len(), 32);
    }
}
