//! Capture and playback.

use std::path::Path;

use anyhow::Result;
use log::{info, warn};

use crate::wav;

/// Blocking audio capture and playback.
pub trait AudioDevice {
    /// Record `duration_secs` of mono audio.
    fn record(&mut self, duration_secs: f32, sample_rate: u32) -> Result<Vec<f32>>;
    /// Play `signal` and return once it has finished.
    fn play(&mut self, signal: &[f32], sample_rate: u32) -> Result<()>;
}

/// Takes its "recording" from a WAV file and has no speaker.
pub struct WavInput {
    recording: wav::Recording,
}

impl WavInput {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            recording: wav::read(path)?,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.recording.sample_rate
    }
}

impl AudioDevice for WavInput {
    fn record(&mut self, duration_secs: f32, sample_rate: u32) -> Result<Vec<f32>> {
        if sample_rate != self.recording.sample_rate {
            warn!(
                "input file is {} Hz, processing it as {sample_rate} Hz",
                self.recording.sample_rate
            );
        }
        let wanted = (duration_secs * sample_rate as f32) as usize;
        let samples = &self.recording.samples;
        if samples.len() < wanted {
            info!(
                "input file holds {:.2} s, shorter than the requested {duration_secs} s",
                samples.len() as f32 / sample_rate as f32
            );
        }
        Ok(samples[..wanted.min(samples.len())].to_vec())
    }

    fn play(&mut self, _signal: &[f32], _sample_rate: u32) -> Result<()> {
        warn!("no output device, skipping playback");
        Ok(())
    }
}

#[cfg(feature = "device")]
pub use self::system::SystemDevice;

#[cfg(feature = "device")]
mod system {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    use anyhow::{anyhow, Context, Result};
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        BufferSize, SampleRate, StreamConfig,
    };
    use log::{info, warn};

    use super::AudioDevice;

    /// The default input and output devices of the system audio host.
    pub struct SystemDevice {
        host: cpal::Host,
    }

    impl SystemDevice {
        pub fn new() -> Self {
            Self {
                host: cpal::default_host(),
            }
        }
    }

    impl Default for SystemDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioDevice for SystemDevice {
        fn record(&mut self, duration_secs: f32, sample_rate: u32) -> Result<Vec<f32>> {
            let device = self
                .host
                .default_input_device()
                .ok_or_else(|| anyhow!("no input device available"))?;
            let channels = device
                .default_input_config()
                .context("failed to query the input device")?
                .channels();
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size: BufferSize::Default,
            };

            let wanted = (duration_secs * sample_rate as f32) as usize;
            let buffer = Arc::new(Mutex::new(Vec::with_capacity(wanted)));
            let sink = buffer.clone();
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buffer) = sink.lock() {
                            buffer.extend(data.iter().step_by(channels as usize));
                        }
                    },
                    |err| warn!("input stream error: {err}"),
                    None,
                )
                .context("failed to open the input stream")?;

            info!("recording {duration_secs} s at {sample_rate} Hz");
            stream.play()?;
            thread::sleep(Duration::from_secs_f32(duration_secs));
            drop(stream);

            let mut samples = buffer
                .lock()
                .map_err(|_| anyhow!("recording buffer poisoned"))?
                .split_off(0);
            samples.resize(wanted, 0.0);
            info!("recording finished");
            Ok(samples)
        }

        fn play(&mut self, signal: &[f32], sample_rate: u32) -> Result<()> {
            let device = self
                .host
                .default_output_device()
                .ok_or_else(|| anyhow!("no output device available"))?;
            let channels = device
                .default_output_config()
                .context("failed to query the output device")?
                .channels();
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size: BufferSize::Default,
            };

            let samples = signal.to_vec();
            let mut position = 0;
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels as usize) {
                            frame.fill(samples.get(position).copied().unwrap_or(0.0));
                            position += 1;
                        }
                    },
                    |err| warn!("output stream error: {err}"),
                    None,
                )
                .context("failed to open the output stream")?;

            info!("playing {} samples", signal.len());
            stream.play()?;
            let seconds = signal.len() as f32 / sample_rate as f32;
            thread::sleep(Duration::from_secs_f32(seconds) + Duration::from_millis(200));
            Ok(())
        }
    }
}
