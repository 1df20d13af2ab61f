//! Frame-wise fundamental frequency estimation.
//!
//! Both estimators frame the signal the same way: frames of `frame_length`
//! samples centred on `i * hop_length`, with the signal zero-padded by half a
//! frame on each side. A signal of `n` samples therefore yields
//! `n / hop_length + 1` frames.

use anyhow::{bail, Result};
use rustfft::num_complex::Complex32;

use crate::fft::Fft;

/// Per-frame pitch estimates. `None` marks an unvoiced frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchTrack {
    pub frequencies: Vec<Option<f32>>,
    /// Voicing confidence of each frame in `[0, 1]`.
    pub probabilities: Vec<f32>,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl PitchTrack {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn voiced_count(&self) -> usize {
        self.frequencies.iter().filter(|f| f.is_some()).count()
    }

    pub fn is_unvoiced(&self) -> bool {
        self.voiced_count() == 0
    }

    /// Centre time of each frame in seconds.
    pub fn times(&self, sample_rate: u32) -> Vec<f32> {
        (0..self.len())
            .map(|i| (i * self.hop_length) as f32 / sample_rate as f32)
            .collect()
    }
}

pub trait PitchEstimator {
    fn estimate(
        &self,
        signal: &[f32],
        sample_rate: u32,
        fmin: f32,
        fmax: f32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<PitchTrack>;
}

/// Lag bounds for a frequency range, checked against the frame length.
fn lag_range(sample_rate: u32, fmin: f32, fmax: f32, frame_length: usize, hop_length: usize) -> Result<(usize, usize)> {
    if !(fmin > 0.0 && fmin < fmax) {
        bail!("invalid frequency range {fmin}..{fmax} Hz");
    }
    if hop_length == 0 {
        bail!("hop length must be positive");
    }
    let min_lag = ((sample_rate as f32 / fmax).floor() as usize).max(2);
    let max_lag = (sample_rate as f32 / fmin).ceil() as usize;
    if frame_length < max_lag * 2 + 2 {
        bail!(
            "frame length {frame_length} too short for {fmin} Hz at {sample_rate} Hz (needs {})",
            max_lag * 2 + 2
        );
    }
    Ok((min_lag, max_lag))
}

fn centred_frames(signal: &[f32], frame_length: usize, hop_length: usize) -> impl Iterator<Item = Vec<f32>> + '_ {
    let half = frame_length / 2;
    let count = signal.len() / hop_length + 1;
    (0..count).map(move |i| {
        let centre = i * hop_length;
        (0..frame_length)
            .map(|j| {
                (centre + j)
                    .checked_sub(half)
                    .and_then(|k| signal.get(k))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect()
    })
}

/// YIN estimator with a cumulative-mean-normalized difference threshold.
///
/// A frame is voiced when the normalized difference dips below `threshold`
/// inside the lag range and the frame carries more than `energy_floor` RMS.
/// The voicing probability is `1 - d'(tau)` at the chosen lag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Yin {
    pub threshold: f32,
    pub energy_floor: f32,
}

impl Default for Yin {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            energy_floor: 1e-4,
        }
    }
}

impl PitchEstimator for Yin {
    fn estimate(
        &self,
        signal: &[f32],
        sample_rate: u32,
        fmin: f32,
        fmax: f32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<PitchTrack> {
        let (min_lag, max_lag) = lag_range(sample_rate, fmin, fmax, frame_length, hop_length)?;
        let window = frame_length - max_lag - 1;
        let fft = Fft::new((frame_length + window).next_power_of_two());

        let mut frequencies = vec![];
        let mut probabilities = vec![];
        for frame in centred_frames(signal, frame_length, hop_length) {
            let (freq, prob) = if crate::power(&frame) > self.energy_floor {
                let cmnd = cumulative_mean_normalized_difference(&fft, &frame, window, max_lag + 1);
                self.pick(&cmnd, min_lag, max_lag)
                    .map(|tau| {
                        let freq = sample_rate as f32 / tau;
                        let prob = (1.0 - cmnd[tau.round() as usize]).clamp(0.0, 1.0);
                        (Some(freq).filter(|f| (fmin..=fmax).contains(f)), prob)
                    })
                    .unwrap_or((None, 0.0))
            } else {
                (None, 0.0)
            };
            frequencies.push(freq);
            probabilities.push(if freq.is_some() { prob } else { 0.0 });
        }

        log::debug!(
            "yin: {} frames, {} voiced",
            frequencies.len(),
            frequencies.iter().filter(|f| f.is_some()).count()
        );
        Ok(PitchTrack {
            frequencies,
            probabilities,
            frame_length,
            hop_length,
        })
    }
}

impl Yin {
    /// First lag under the threshold, walked down to its local minimum and
    /// refined by parabolic interpolation.
    fn pick(&self, cmnd: &[f32], min_lag: usize, max_lag: usize) -> Option<f32> {
        let mut tau = (min_lag..=max_lag).find(|&tau| cmnd[tau] < self.threshold)?;
        while tau < max_lag && cmnd[tau + 1] < cmnd[tau] {
            tau += 1;
        }

        let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
        let denom = a - 2.0 * b + c;
        let offset = if denom.abs() > 1e-12 {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        Some(tau as f32 + offset)
    }
}

/// `d'(tau)` for `tau` in `0..=max_tau`, integrating over the first `window`
/// samples of `frame`. The cross terms come from an FFT correlation.
pub fn cumulative_mean_normalized_difference(
    fft: &Fft,
    frame: &[f32],
    window: usize,
    max_tau: usize,
) -> Vec<f32> {
    let size = fft.len();
    let mut head: Vec<_> = frame[..window].iter().map(|&x| Complex32::from(x)).collect();
    head.resize(size, Complex32::from(0.0));
    let mut full: Vec<_> = frame.iter().map(|&x| Complex32::from(x)).collect();
    full.resize(size, Complex32::from(0.0));
    fft.forward(&mut head);
    fft.forward(&mut full);
    let mut corr: Vec<_> = head
        .iter()
        .zip(full.iter())
        .map(|(h, f)| h.conj() * f)
        .collect();
    fft.inverse(&mut corr);

    let mut prefix = vec![0.0f64; frame.len() + 1];
    for (i, &x) in frame.iter().enumerate() {
        prefix[i + 1] = prefix[i] + (x as f64).powi(2);
    }
    let energy = |start: usize| prefix[start + window] - prefix[start];
    let e0 = energy(0);

    let mut cmnd = vec![1.0f32; max_tau + 1];
    let mut running_sum = 0.0f64;
    for tau in 1..=max_tau {
        let r = corr[tau].re as f64 / size as f64;
        let diff = (e0 + energy(tau) - 2.0 * r).max(0.0);
        running_sum += diff;
        if running_sum > 0.0 {
            cmnd[tau] = (diff * tau as f64 / running_sum) as f32;
        }
    }
    cmnd
}

/// McLeod pitch method: peak picking on the normalized square difference function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nsdf {
    /// Minimum height of the highest NSDF peak for a frame to count as voiced.
    pub peak_threshold: f32,
    /// The chosen peak is the first one within this fraction of the highest.
    pub key_ratio: f32,
}

impl Default for Nsdf {
    fn default() -> Self {
        Self {
            peak_threshold: 0.4,
            key_ratio: 0.9,
        }
    }
}

impl PitchEstimator for Nsdf {
    fn estimate(
        &self,
        signal: &[f32],
        sample_rate: u32,
        fmin: f32,
        fmax: f32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<PitchTrack> {
        let (min_lag, max_lag) = lag_range(sample_rate, fmin, fmax, frame_length, hop_length)?;
        let fft = Fft::new(frame_length * 2);

        let mut frequencies = vec![];
        let mut probabilities = vec![];
        for frame in centred_frames(signal, frame_length, hop_length) {
            let detected = self.pitch_detect(&fft, &frame, min_lag as f32, max_lag as f32);
            let freq = detected
                .map(|(wavelength, _)| sample_rate as f32 / wavelength)
                .filter(|f| (fmin..=fmax).contains(f));
            probabilities.push(match (freq, detected) {
                (Some(_), Some((_, gain))) => gain.clamp(0.0, 1.0),
                _ => 0.0,
            });
            frequencies.push(freq);
        }

        Ok(PitchTrack {
            frequencies,
            probabilities,
            frame_length,
            hop_length,
        })
    }
}

impl Nsdf {
    /// Detect pitch from a buffer.
    /// Returns a tuple of wavelength and gain.
    pub fn pitch_detect(
        &self,
        fft: &Fft,
        buf: &[f32],
        min_wavelength: f32,
        max_wavelength: f32,
    ) -> Option<(f32, f32)> {
        let nsdf = compute_nsdf(fft, buf);
        let mut peaks = compute_peaks(&nsdf[..nsdf.len() / 2]);
        peaks.retain(|p| min_wavelength < p.0 && p.0 <= max_wavelength);
        let max_peak = peaks.iter().fold(0.0f32, |a, p| a.max(p.1));
        if self.peak_threshold < max_peak {
            peaks
                .iter()
                .find(|p| max_peak * self.key_ratio <= p.1)
                .cloned()
        } else {
            None
        }
    }
}

/// Normalized Square Difference Function (NSDF)
///
/// `fft` must be at least twice the buffer length so the correlation does not wrap.
pub fn compute_nsdf(fft: &Fft, buf: &[f32]) -> Vec<f32> {
    let size = fft.len();
    let mut spectrum: Vec<_> = buf.iter().copied().map(Complex32::from).collect();
    spectrum.resize(size, Complex32::from(0.0));
    fft.forward(&mut spectrum);
    for x in &mut spectrum {
        *x = Complex32::from(x.norm_sqr());
    }
    fft.inverse(&mut spectrum);

    let len = buf.len();
    let mut nsdf = vec![0.0; len];
    let mut m = f32::EPSILON;
    for i in 0..len {
        let inv = len - i - 1;
        m += buf[i].powi(2) + buf[inv].powi(2);
        nsdf[inv] = 2.0 * spectrum[inv].re / (m * size as f32);
    }

    nsdf
}

/// Highest parabolic-interpolated maximum of each positive NSDF lobe, as
/// `(position, height)`. The lobe around lag zero is skipped.
pub fn compute_peaks(nsdf: &[f32]) -> Vec<(f32, f32)> {
    let mut peak = (0.0f32, 0.0f32);
    let mut peaks = Vec::with_capacity(32);
    let mut is_first = true;

    for i in 0..nsdf.len().saturating_sub(3) {
        if nsdf[i + 1] < 0.0 {
            if 0.0 < peak.1 {
                peaks.push(peak);
                peak = (0.0, 0.0);
            }
            is_first = false;
            continue;
        }

        if !is_first && nsdf[i + 1] - nsdf[i] > 0.0 && nsdf[i + 2] - nsdf[i + 1] <= 0.0 {
            let t = 2.0 * (nsdf[i] - 2.0 * nsdf[i + 1] + nsdf[i + 2]);
            let d = (nsdf[i] - nsdf[i + 2]) / t;
            let c = nsdf[i + 1] - t * d * d / 4.0;
            if peak.1 < c {
                peak = ((i + 1) as f32 + d, c);
            }
        }
    }
    peaks
}
