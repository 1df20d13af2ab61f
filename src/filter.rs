//! Filter design and application.
//!
//! Butterworth high-pass and low-pass filters are built as cascaded
//! second-order sections, each the bilinear transform (with frequency
//! pre-warping) of one conjugate pole pair of the analog prototype. This is
//! the Audio EQ Cookbook biquad with the section's Butterworth Q. All
//! arithmetic runs in `f64`.

use std::f64::consts::PI;

use anyhow::{bail, Result};

/// One second-order section: `[b0, b1, b2, a0, a1, a2]` with `a0 == 1`.
pub type Sos = [f64; 6];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Lowpass,
    Highpass,
}

pub fn butter_highpass(cutoff: f64, sample_rate: u32, order: usize) -> Result<Vec<Sos>> {
    butter(order, cutoff / (0.5 * sample_rate as f64), FilterType::Highpass)
}

pub fn butter_lowpass(cutoff: f64, sample_rate: u32, order: usize) -> Result<Vec<Sos>> {
    butter(order, cutoff / (0.5 * sample_rate as f64), FilterType::Lowpass)
}

/// Butterworth filter of `order` with the cutoff given as a fraction of Nyquist.
pub fn butter(order: usize, normalized_cutoff: f64, filter_type: FilterType) -> Result<Vec<Sos>> {
    if order == 0 {
        bail!("filter order must be positive");
    }
    if !(normalized_cutoff > 0.0 && normalized_cutoff < 1.0) {
        bail!("normalized cutoff {normalized_cutoff} must lie strictly between 0 and 1");
    }

    let w0 = PI * normalized_cutoff;
    let mut sections = Vec::with_capacity((order + 1) / 2);
    for k in 0..order / 2 {
        let q = 1.0 / (2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).cos());
        sections.push(biquad(filter_type, w0, q));
    }
    if order % 2 == 1 {
        sections.push(first_order(filter_type, w0));
    }
    Ok(sections)
}

fn biquad(filter_type: FilterType, w0: f64, q: f64) -> Sos {
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * q);
    let (b0, b1, b2) = match filter_type {
        FilterType::Lowpass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
        FilterType::Highpass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
    };
    let a0 = 1.0 + alpha;
    [b0 / a0, b1 / a0, b2 / a0, 1.0, -2.0 * cos_w0 / a0, (1.0 - alpha) / a0]
}

fn first_order(filter_type: FilterType, w0: f64) -> Sos {
    let k = (w0 / 2.0).tan();
    let a1 = (k - 1.0) / (k + 1.0);
    match filter_type {
        FilterType::Lowpass => [k / (1.0 + k), k / (1.0 + k), 0.0, 1.0, a1, 0.0],
        FilterType::Highpass => [1.0 / (1.0 + k), -1.0 / (1.0 + k), 0.0, 1.0, a1, 0.0],
    }
}

/// Forward-only filtering through cascaded sections, Direct Form II Transposed.
pub fn sosfilt(sos: &[Sos], x: &[f32]) -> Vec<f32> {
    let mut y: Vec<f64> = x.iter().map(|&v| v as f64).collect();
    for s in sos {
        let (mut z1, mut z2) = (0.0, 0.0);
        for v in y.iter_mut() {
            let input = *v;
            let output = s[0] * input + z1;
            z1 = s[1] * input - s[4] * output + z2;
            z2 = s[2] * input - s[5] * output;
            *v = output;
        }
    }
    y.into_iter().map(|v| v as f32).collect()
}

/// Second-order IIR notch at `freq` Hz with quality factor `q`. Returns `(b, a)`.
pub fn iirnotch(freq: f64, q: f64, sample_rate: u32) -> Result<([f64; 3], [f64; 3])> {
    let w0 = 2.0 * PI * freq / sample_rate as f64;
    if !(w0 > 0.0 && w0 < PI) {
        bail!("notch frequency {freq} Hz must lie between 0 and Nyquist");
    }
    if !(q > 0.0) {
        bail!("notch quality factor must be positive");
    }
    let bw = w0 / q;
    let gain = 1.0 / (1.0 + (bw / 2.0).tan());
    let b = [gain, -2.0 * gain * w0.cos(), gain];
    let a = [1.0, -2.0 * gain * w0.cos(), 2.0 * gain - 1.0];
    Ok((b, a))
}

/// Direct Form II Transposed filter with arbitrary `b` and `a`.
///
/// An FIR filter (`a` reduces to `[1]`) is convolved directly, touching
/// only its nonzero taps.
pub fn lfilter(b: &[f64], a: &[f64], x: &[f32]) -> Vec<f32> {
    let (b, a) = normalize(b, a);
    if a[1..].iter().all(|&v| v == 0.0) {
        return sparse_fir(&b, x);
    }
    let x: Vec<f64> = x.iter().map(|&v| v as f64).collect();
    let zi = vec![0.0; b.len() - 1];
    lfilter_with_state(&b, &a, &x, zi)
        .into_iter()
        .map(|v| v as f32)
        .collect()
}

fn sparse_fir(b: &[f64], x: &[f32]) -> Vec<f32> {
    let taps: Vec<(usize, f64)> = b.iter().copied().enumerate().filter(|&(_, c)| c != 0.0).collect();
    (0..x.len())
        .map(|n| {
            taps.iter()
                .take_while(|&&(k, _)| k <= n)
                .map(|&(k, c)| c * x[n - k] as f64)
                .sum::<f64>() as f32
        })
        .collect()
}

/// Pad `b` and `a` to a common length and divide through by `a[0]`.
fn normalize(b: &[f64], a: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = b.len().max(a.len()).max(1);
    let a0 = a.first().copied().filter(|&v| v != 0.0).unwrap_or(1.0);
    let mut bn: Vec<f64> = b.iter().map(|v| v / a0).collect();
    let mut an: Vec<f64> = a.iter().map(|v| v / a0).collect();
    bn.resize(n, 0.0);
    an.resize(n, 0.0);
    if an[0] == 0.0 {
        an[0] = 1.0;
    }
    (bn, an)
}

fn lfilter_with_state(b: &[f64], a: &[f64], x: &[f64], mut z: Vec<f64>) -> Vec<f64> {
    let n = b.len();
    let mut y = Vec::with_capacity(x.len());
    for &input in x {
        let output = b[0] * input + z.first().copied().unwrap_or(0.0);
        for k in 1..n {
            let next = if k < n - 1 { z[k] } else { 0.0 };
            z[k - 1] = b[k] * input - a[k] * output + next;
        }
        y.push(output);
    }
    y
}

/// Initial state of [`lfilter_with_state`] for a unit step's steady state.
fn lfilter_zi(b: &[f64], a: &[f64]) -> Vec<f64> {
    let n = b.len();
    if n < 2 {
        return vec![];
    }
    let a_sum: f64 = a.iter().sum();
    let b_sum: f64 = b[1..].iter().zip(&a[1..]).map(|(bk, ak)| bk - ak * b[0]).sum();
    let mut zi = vec![0.0; n - 1];
    zi[0] = b_sum / a_sum;
    let mut asum = 1.0;
    let mut csum = 0.0;
    for k in 1..n - 1 {
        asum += a[k];
        csum += b[k] - a[k] * b[0];
        zi[k] = asum * zi[0] - csum;
    }
    zi
}

/// Zero-phase forward-backward filtering.
///
/// The signal is extended at both ends by an odd reflection of
/// `3 * max(len(a), len(b))` samples, and each pass starts from the steady
/// state for its first sample. Signals too short to extend are filtered
/// without the extension.
pub fn filtfilt(b: &[f64], a: &[f64], x: &[f32]) -> Vec<f32> {
    if x.is_empty() {
        return vec![];
    }
    let (b, a) = normalize(b, a);
    let zi = lfilter_zi(&b, &a);
    let padlen = 3 * b.len();
    let padlen = if x.len() > padlen { padlen } else { 0 };

    let x: Vec<f64> = x.iter().map(|&v| v as f64).collect();
    let (first, last) = (x[0], x[x.len() - 1]);
    let mut ext = Vec::with_capacity(x.len() + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(&x);
    ext.extend((1..=padlen).map(|i| 2.0 * last - x[x.len() - 1 - i]));

    let forward = lfilter_with_state(&b, &a, &ext, zi.iter().map(|z| z * ext[0]).collect());
    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    let start = reversed[0];
    reversed = lfilter_with_state(&b, &a, &reversed, zi.iter().map(|z| z * start).collect());
    reversed
        .into_iter()
        .rev()
        .skip(padlen)
        .take(x.len())
        .map(|v| v as f32)
        .collect()
}
