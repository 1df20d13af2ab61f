use std::f32::consts::TAU;

use anyhow::{bail, Result};
use tempdir::TempDir;
use tunechain::{
    autotune::{analysis_range, FRAME_LENGTH, HOP_LENGTH},
    config::{EffectParams, PipelineConfig},
    device::AudioDevice,
    pipeline::{process, run},
    pitch_detection::{PitchEstimator, Yin},
    wav,
};

fn sine(freq: f32, secs: f32, amplitude: f32) -> Vec<f32> {
    (0..(secs * 44100.0) as usize)
        .map(|i| (TAU * freq * i as f32 / 44100.0).sin() * amplitude)
        .collect()
}

fn neutral() -> EffectParams {
    EffectParams {
        volume: 1.0,
        echo_decay: 0.0,
        reverb_amount: 0.0,
        pitch_steps: 0.0,
        autotune: false,
    }
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

/// Hands out a prepared signal and keeps what it is asked to play.
struct Memory {
    recording: Vec<f32>,
    played: Vec<Vec<f32>>,
}

impl AudioDevice for Memory {
    fn record(&mut self, _duration_secs: f32, _sample_rate: u32) -> Result<Vec<f32>> {
        Ok(self.recording.clone())
    }

    fn play(&mut self, signal: &[f32], _sample_rate: u32) -> Result<()> {
        self.played.push(signal.to_vec());
        Ok(())
    }
}

struct Unplugged;

impl AudioDevice for Unplugged {
    fn record(&mut self, _: f32, _: u32) -> Result<Vec<f32>> {
        bail!("no input device available")
    }

    fn play(&mut self, _: &[f32], _: u32) -> Result<()> {
        bail!("no output device available")
    }
}

#[test]
fn autotuned_a440_stays_near_a440() {
    let raw = sine(440.0, 2.0, 0.5);
    let params = EffectParams {
        autotune: true,
        ..neutral()
    };
    let processed = process(&raw, &PipelineConfig::default(), &params).unwrap();

    let (fmin, fmax) = analysis_range();
    let track = Yin::default()
        .estimate(&processed.output, 44100, fmin, fmax, FRAME_LENGTH, HOP_LENGTH)
        .unwrap();
    let voiced: Vec<f32> = track.frequencies.iter().flatten().copied().collect();
    assert!(voiced.len() > track.len() / 2);
    let f0 = median(voiced);
    assert!((f0 - 440.0).abs() < 8.0, "{f0}");
}

#[test]
fn neutral_effects_only_gain_and_clip() {
    let raw: Vec<f32> = sine(300.0, 1.0, 0.4)
        .iter()
        .zip(sine(1234.0, 1.0, 0.3))
        .map(|(a, b)| a + b)
        .collect();
    let params = EffectParams {
        volume: 1.7,
        ..neutral()
    };
    let processed = process(&raw, &PipelineConfig::default(), &params).unwrap();

    let expected: Vec<f32> = processed
        .denoised
        .iter()
        .map(|x| (x * 2.0 * 1.7).clamp(-1.0, 1.0))
        .collect();
    assert_eq!(processed.output, expected);
}

#[test]
fn output_is_clipped() {
    let raw = sine(220.0, 1.0, 5.0);
    let params = EffectParams {
        volume: 3.0,
        echo_decay: 0.0,
        reverb_amount: 0.0,
        ..EffectParams::default()
    };
    let processed = process(&raw, &PipelineConfig::default(), &params).unwrap();
    assert!(processed.output.iter().all(|x| (-1.0..=1.0).contains(x)));
    assert!(processed.output.iter().any(|&x| x == 1.0));
}

#[test]
fn renormalizing_stages_peak_at_one() {
    let raw = sine(440.0, 1.0, 0.9);
    let params = EffectParams {
        volume: 1.0,
        echo_decay: 0.9,
        reverb_amount: 0.7,
        pitch_steps: 2.0,
        autotune: true,
    };
    let processed = process(&raw, &PipelineConfig::default(), &params).unwrap();
    let peak = |s: &[f32]| s.iter().fold(0.0f32, |a, x| a.max(x.abs()));
    assert!(peak(&processed.before_pitch) <= 1.0 + 1e-5);
    assert!(peak(&processed.before_reverb) <= 1.0 + 1e-5);
    assert!(peak(&processed.after_reverb) <= 1.0 + 1e-5);
    assert_eq!(processed.output.len(), raw.len() + 17640);
}

#[test]
fn run_saves_plays_and_plots() {
    let dir = TempDir::new("pipeline").unwrap();
    let config = PipelineConfig {
        duration_secs: 1.0,
        raw_path: dir.path().join("raw.wav"),
        output_path: dir.path().join("out.wav"),
        plot_dir: Some(dir.path().join("plots")),
        ..Default::default()
    };
    let params = EffectParams {
        autotune: true,
        ..EffectParams::default()
    };
    let mut device = Memory {
        recording: sine(330.0, 1.0, 0.5),
        played: vec![],
    };

    let processed = run(&config, &params, &mut device).unwrap();

    let raw = wav::read(&config.raw_path).unwrap();
    assert_eq!(raw.samples, device.recording);
    assert_eq!(raw.sample_rate, 44100);
    let out = wav::read(&config.output_path).unwrap();
    assert_eq!(out.samples, processed.output);
    assert_eq!(device.played, vec![processed.output.clone()]);

    for name in [
        "raw_time",
        "raw_frequency",
        "raw_spectrogram",
        "autotune_pitch",
        "echo",
        "reverb",
        "processed_time",
        "processed_frequency",
        "processed_spectrogram",
    ] {
        assert!(dir.path().join("plots").join(format!("{name}.svg")).exists(), "{name}");
    }
    assert!(!dir.path().join("plots/pitch_shift.svg").exists());
}

#[test]
fn run_without_plots_or_playback() {
    let dir = TempDir::new("pipeline").unwrap();
    let config = PipelineConfig {
        raw_path: dir.path().join("raw.wav"),
        output_path: dir.path().join("out.wav"),
        plot_dir: None,
        playback: false,
        ..Default::default()
    };
    let mut device = Memory {
        recording: sine(500.0, 0.5, 0.2),
        played: vec![],
    };
    run(&config, &neutral(), &mut device).unwrap();
    assert!(device.played.is_empty());
    assert!(config.output_path.exists());
}

#[test]
fn device_failure_is_reported() {
    let dir = TempDir::new("pipeline").unwrap();
    let config = PipelineConfig {
        raw_path: dir.path().join("raw.wav"),
        output_path: dir.path().join("out.wav"),
        plot_dir: None,
        ..Default::default()
    };
    let err = run(&config, &neutral(), &mut Unplugged).unwrap_err();
    assert!(err.to_string().contains("no input device"));
    assert!(!config.raw_path.exists());
}
