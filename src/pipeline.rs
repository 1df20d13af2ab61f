//! The processing chain from a raw recording to the final output.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    autotune::{analysis_range, correct_pitch, FRAME_LENGTH, HOP_LENGTH},
    config::{EffectParams, PipelineConfig},
    denoise::reduce_noise,
    device::AudioDevice,
    effects::{self, add_echo, add_reverb, apply_gain, hard_clip},
    filter::{butter_highpass, butter_lowpass, filtfilt, iirnotch, sosfilt},
    pitch_detection::{PitchEstimator, Yin},
    pitch_shift::PhaseVocoder,
    plot, wav,
};

/// The output of [`process`] and the intermediate signals worth looking at.
#[derive(Debug, Clone)]
pub struct Processed {
    /// After filtering and noise reduction.
    pub denoised: Vec<f32>,
    /// After the pre-gain.
    pub before_autotune: Vec<f32>,
    pub before_pitch: Vec<f32>,
    pub before_echo: Vec<f32>,
    pub before_reverb: Vec<f32>,
    pub after_reverb: Vec<f32>,
    /// Volume applied and clipped to [-1, 1].
    pub output: Vec<f32>,
}

/// Run the whole chain on `raw`.
///
/// Stages whose parameter is neutral are skipped. Only an invalid filter
/// design is an error; a failing pitch shift leaves its stage's input as is.
pub fn process(raw: &[f32], config: &PipelineConfig, params: &EffectParams) -> Result<Processed> {
    let sample_rate = config.sample_rate;

    info!("filtering");
    let highpass = butter_highpass(config.highpass_hz, sample_rate, config.filter_order)?;
    let lowpass = butter_lowpass(config.lowpass_hz, sample_rate, config.filter_order)?;
    let (b, a) = iirnotch(config.notch_hz, config.notch_q, sample_rate)?;
    let filtered = sosfilt(&highpass, raw);
    let filtered = sosfilt(&lowpass, &filtered);
    let filtered = filtfilt(&b, &a, &filtered);

    info!("reducing noise");
    let noise_len = ((config.noise_clip_secs * sample_rate as f32) as usize).min(filtered.len());
    let denoised = reduce_noise(
        &filtered,
        &filtered[..noise_len],
        sample_rate,
        &config.noise_reduction,
    );

    let mut signal = apply_gain(&denoised, config.pre_gain);

    let before_autotune = signal.clone();
    if params.autotune {
        info!("applying autotune");
        signal = correct_pitch(&signal, sample_rate, &config.scale);
    }

    let before_pitch = signal.clone();
    if params.pitch_steps != 0.0 {
        info!("shifting pitch by {} semitones", params.pitch_steps);
        match effects::pitch_shift(&signal, sample_rate, params.pitch_steps, &PhaseVocoder::default()) {
            Ok(shifted) => signal = shifted,
            Err(e) => warn!("pitch shift failed, keeping the signal: {e:#}"),
        }
    }

    let before_echo = signal.clone();
    if params.echo_decay > 0.0 {
        info!("adding echo");
        signal = add_echo(&signal, sample_rate, config.echo_delay_ms, params.echo_decay);
    }

    let before_reverb = signal.clone();
    if params.reverb_amount > 0.0 {
        info!("adding reverb");
        signal = add_reverb(&signal, sample_rate, params.reverb_amount);
    }

    let output = hard_clip(&apply_gain(&signal, params.volume), -1.0, 1.0);
    Ok(Processed {
        denoised,
        before_autotune,
        before_pitch,
        before_echo,
        before_reverb,
        after_reverb: signal,
        output,
    })
}

/// Record, save, process, save, play, with plots along the way.
pub fn run(
    config: &PipelineConfig,
    params: &EffectParams,
    device: &mut dyn AudioDevice,
) -> Result<Processed> {
    let sample_rate = config.sample_rate;

    info!("recording {} s", config.duration_secs);
    let raw = device.record(config.duration_secs, sample_rate)?;
    wav::write(&config.raw_path, &raw, sample_rate)
        .with_context(|| format!("failed to save the recording to {}", config.raw_path.display()))?;
    info!("recorded and saved as {}", config.raw_path.display());

    let plots = Plots::new(config.plot_dir.as_deref(), sample_rate);
    plots.overview(&raw, "raw", "Raw audio");

    let processed = process(&raw, config, params)?;
    plots.stages(&processed, params);

    wav::write(&config.output_path, &processed.output, sample_rate).with_context(|| {
        format!("failed to save the output to {}", config.output_path.display())
    })?;

    if config.playback {
        info!("playing processed audio");
        device.play(&processed.output, sample_rate)?;
    }
    info!("processed file saved as {}", config.output_path.display());

    plots.overview(&processed.output, "processed", "Processed audio");
    Ok(processed)
}

/// Writes plots into a directory, logging rather than returning failures.
struct Plots<'a> {
    dir: Option<&'a Path>,
    sample_rate: u32,
}

impl<'a> Plots<'a> {
    fn new(dir: Option<&'a Path>, sample_rate: u32) -> Self {
        let dir = dir.filter(|dir| match fs::create_dir_all(dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("cannot create plot directory {}, skipping plots: {e}", dir.display());
                false
            }
        });
        Self { dir, sample_rate }
    }

    fn draw(&self, name: &str, draw: impl FnOnce(&Path) -> Result<()>) {
        let Some(dir) = self.dir else {
            return;
        };
        let path = dir.join(format!("{name}.svg"));
        match draw(&path) {
            Ok(()) => info!("saved plot {}", path.display()),
            Err(e) => warn!("failed to plot {}: {e:#}", path.display()),
        }
    }

    fn overview(&self, signal: &[f32], name: &str, title: &str) {
        let sr = self.sample_rate;
        self.draw(&format!("{name}_time"), |path| {
            plot::time_domain(signal, sr, &format!("{title} - time domain"), path)
        });
        self.draw(&format!("{name}_frequency"), |path| {
            plot::frequency_domain(signal, sr, &format!("{title} - frequency domain"), path)
        });
        self.draw(&format!("{name}_spectrogram"), |path| {
            plot::spectrogram(signal, sr, &format!("{title} - spectrogram"), path)
        });
    }

    fn stages(&self, processed: &Processed, params: &EffectParams) {
        let sr = self.sample_rate;
        if params.autotune {
            self.draw("autotune_pitch", |path| {
                let (fmin, fmax) = analysis_range();
                let yin = Yin::default();
                let before =
                    yin.estimate(&processed.before_autotune, sr, fmin, fmax, FRAME_LENGTH, HOP_LENGTH)?;
                let after =
                    yin.estimate(&processed.before_pitch, sr, fmin, fmax, FRAME_LENGTH, HOP_LENGTH)?;
                plot::pitch_tracks(&before, &after, sr, "Pitch before and after autotune", path)
            });
        }
        if params.pitch_steps != 0.0 {
            self.draw("pitch_shift", |path| {
                plot::comparison(&processed.before_pitch, &processed.before_echo, sr, "Pitch shift", path)
            });
        }
        if params.echo_decay > 0.0 {
            self.draw("echo", |path| {
                plot::comparison(&processed.before_echo, &processed.before_reverb, sr, "Echo", path)
            });
        }
        if params.reverb_amount > 0.0 {
            self.draw("reverb", |path| {
                plot::comparison(&processed.before_reverb, &processed.after_reverb, sr, "Reverb", path)
            });
        }
    }
}
