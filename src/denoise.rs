//! Spectral gating noise reduction.
//!
//! Each STFT bin gets a gate value in `[0, 1]`: 1 where the bin stands above
//! the noise threshold, 0 where it does not. The gate is smoothed over
//! frequency and time, then scaled so that fully gated bins are attenuated
//! by `prop_decrease` rather than silenced.
//!
//! Smoothing lets gated neighbours pull down narrow peaks as well: a pure
//! tone far above the noise loses around a tenth of its level.

use log::debug;
use rustfft::num_complex::Complex32;

use crate::{
    fft::Fft,
    filter::filtfilt,
    transform::{istft, stft},
};

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseReduction {
    /// Fraction of a gated bin's magnitude that is removed.
    pub prop_decrease: f32,
    /// Compare against the noise clip's statistics instead of a running floor.
    pub stationary: bool,
    /// Stationary mode: standard deviations above the mean noise level.
    pub n_std_thresh: f32,
    /// Non-stationary mode: how far above the floor, as a multiple of it,
    /// a bin must stand to pass.
    pub thresh_n_mult: f32,
    pub sigmoid_slope: f32,
    /// Non-stationary mode: time constant of the running floor.
    pub time_constant_s: f32,
    pub n_fft: usize,
    pub hop: usize,
    pub freq_mask_smooth_hz: f32,
    pub time_mask_smooth_ms: f32,
}

impl Default for NoiseReduction {
    fn default() -> Self {
        Self {
            prop_decrease: 0.92,
            stationary: false,
            n_std_thresh: 1.5,
            thresh_n_mult: 2.0,
            sigmoid_slope: 10.0,
            time_constant_s: 2.0,
            n_fft: 1024,
            hop: 256,
            freq_mask_smooth_hz: 500.0,
            time_mask_smooth_ms: 50.0,
        }
    }
}

/// Gate `signal` against the noise profile of `noise_reference`.
///
/// The output has the same length as `signal`.
pub fn reduce_noise(
    signal: &[f32],
    noise_reference: &[f32],
    sample_rate: u32,
    params: &NoiseReduction,
) -> Vec<f32> {
    if signal.is_empty() {
        return vec![];
    }

    let fft = Fft::new(params.n_fft);
    let bins = params.n_fft / 2 + 1;
    let mut spectra = stft(&fft, params.hop, signal);
    let noise = noise_profile(&fft, params.hop, noise_reference, bins);

    let mask = if params.stationary {
        stationary_mask(&spectra, &noise, params.n_std_thresh)
    } else {
        nonstationary_mask(&spectra, &noise, sample_rate, params)
    };

    let freq_radius =
        (params.freq_mask_smooth_hz / (sample_rate as f32 / (params.n_fft / 2) as f32)) as usize;
    let time_radius =
        (params.time_mask_smooth_ms / (params.hop as f32 / sample_rate as f32 * 1000.0)) as usize;
    let mask = smooth(&mask, freq_radius, time_radius);
    debug!(
        "noise gate: {} frames, {bins} bins, smoothing {freq_radius} bins x {time_radius} frames",
        spectra.len()
    );

    for (spectrum, gate) in spectra.iter_mut().zip(mask.iter()) {
        apply_gate(spectrum, gate, params.prop_decrease);
    }
    istft(&fft, params.hop, spectra, signal.len())
}

/// Per-bin statistics of the noise clip.
struct NoiseProfile {
    mean_db: Vec<f32>,
    std_db: Vec<f32>,
    mean: Vec<f32>,
}

fn noise_profile(fft: &Fft, hop: usize, noise: &[f32], bins: usize) -> NoiseProfile {
    let spectra = stft(fft, hop, noise);
    let frames = spectra.len().max(1) as f32;
    let mut profile = NoiseProfile {
        mean_db: vec![0.0; bins],
        std_db: vec![0.0; bins],
        mean: vec![0.0; bins],
    };
    for spectrum in &spectra {
        for (k, x) in spectrum.iter().enumerate() {
            profile.mean[k] += x.norm() / frames;
            profile.mean_db[k] += amp_to_db(x.norm()) / frames;
        }
    }
    for spectrum in &spectra {
        for (k, x) in spectrum.iter().enumerate() {
            profile.std_db[k] += (amp_to_db(x.norm()) - profile.mean_db[k]).powi(2) / frames;
        }
    }
    for s in profile.std_db.iter_mut() {
        *s = s.sqrt();
    }
    profile
}

fn amp_to_db(x: f32) -> f32 {
    20.0 * x.max(1e-10).log10()
}

fn stationary_mask(spectra: &[Vec<Complex32>], noise: &NoiseProfile, n_std_thresh: f32) -> Vec<Vec<f32>> {
    let threshold: Vec<f32> = noise
        .mean_db
        .iter()
        .zip(noise.std_db.iter())
        .map(|(m, s)| m + n_std_thresh * s)
        .collect();
    spectra
        .iter()
        .map(|frame| {
            frame
                .iter()
                .zip(threshold.iter())
                .map(|(x, &t)| if amp_to_db(x.norm()) > t { 1.0 } else { 0.0 })
                .collect()
        })
        .collect()
}

fn nonstationary_mask(
    spectra: &[Vec<Complex32>],
    noise: &NoiseProfile,
    sample_rate: u32,
    params: &NoiseReduction,
) -> Vec<Vec<f32>> {
    let frames = spectra.len();
    let bins = noise.mean.len();

    // one-pole smoother run forward and backward along each bin
    let t_frames = params.time_constant_s * sample_rate as f32 / params.hop as f32;
    let b = ((1.0 + 4.0 * t_frames.powi(2)).sqrt() - 1.0) / (2.0 * t_frames.powi(2));
    let b = b as f64;

    let mut mask = vec![vec![0.0; bins]; frames];
    for k in 0..bins {
        let track: Vec<f32> = spectra.iter().map(|frame| frame[k].norm()).collect();
        let floor = filtfilt(&[b], &[1.0, b - 1.0], &track);
        for (t, (&x, &f)) in track.iter().zip(floor.iter()).enumerate() {
            let f = f.max(noise.mean[k]).max(f32::MIN_POSITIVE);
            let above = (x - f) / f;
            mask[t][k] = sigmoid(above - params.thresh_n_mult, params.sigmoid_slope);
        }
    }
    mask
}

fn sigmoid(x: f32, slope: f32) -> f32 {
    1.0 / (1.0 + (-x * slope).exp())
}

/// Separable triangular smoothing of a `[frame][bin]` mask.
fn smooth(mask: &[Vec<f32>], freq_radius: usize, time_radius: usize) -> Vec<Vec<f32>> {
    let along_freq: Vec<Vec<f32>> = mask.iter().map(|frame| smooth_line(frame, freq_radius)).collect();

    let bins = along_freq.first().map_or(0, |f| f.len());
    let mut out = along_freq.clone();
    for k in 0..bins {
        let line: Vec<f32> = along_freq.iter().map(|frame| frame[k]).collect();
        for (t, v) in smooth_line(&line, time_radius).into_iter().enumerate() {
            out[t][k] = v;
        }
    }
    out
}

fn smooth_line(line: &[f32], radius: usize) -> Vec<f32> {
    if radius == 0 {
        return line.to_vec();
    }
    let r = radius as isize;
    (0..line.len() as isize)
        .map(|i| {
            let mut sum = 0.0;
            let mut weight = 0.0;
            for d in -r..=r {
                let j = i + d;
                if j < 0 || j >= line.len() as isize {
                    continue;
                }
                let w = 1.0 - d.abs() as f32 / (radius + 1) as f32;
                sum += w * line[j as usize];
                weight += w;
            }
            sum / weight
        })
        .collect()
}

fn apply_gate(spectrum: &mut [Complex32], gate: &[f32], prop_decrease: f32) {
    for (x, &g) in spectrum.iter_mut().zip(gate) {
        *x *= 1.0 - prop_decrease * (1.0 - g);
    }
}
