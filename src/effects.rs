//! Whole-signal effect units.

use anyhow::Result;

use crate::{filter::lfilter, peak, pitch_shift::PitchShifter};

/// Delay of the single reverb reflection, in seconds.
pub const REVERB_DELAY_SECS: f32 = 0.05;

/// Mix in one copy of the signal delayed by `delay_ms`, scaled by `decay`.
///
/// The output is longer than the input by the delay so the tail of the echo
/// is kept, and is normalized to a peak of 1.
pub fn add_echo(signal: &[f32], sample_rate: u32, delay_ms: f32, decay: f32) -> Vec<f32> {
    let delay = (sample_rate as f32 * delay_ms / 1000.0) as usize;
    let mut out = vec![0.0; signal.len() + delay];
    for (i, &x) in signal.iter().enumerate() {
        out[i] += x;
        out[i + delay] += decay * x;
    }
    normalize_peak(&out)
}

/// Single early reflection at 50 ms with gain `amount`; same length as the
/// input, normalized to a peak of 1.
pub fn add_reverb(signal: &[f32], sample_rate: u32, amount: f32) -> Vec<f32> {
    let delay = (REVERB_DELAY_SECS * sample_rate as f32) as usize;
    let mut taps = vec![0.0; delay + 1];
    taps[0] = 1.0;
    taps[delay] += amount as f64;
    normalize_peak(&lfilter(&taps, &[1.0], signal))
}

pub fn pitch_shift(
    signal: &[f32],
    sample_rate: u32,
    n_steps: f32,
    shifter: &impl PitchShifter,
) -> Result<Vec<f32>> {
    shifter.shift(signal, sample_rate, n_steps)
}

/// Divide by the peak absolute amplitude. A silent signal, or one whose peak
/// is not finite, is returned as it is.
pub fn normalize_peak(signal: &[f32]) -> Vec<f32> {
    let p = peak(signal);
    if p == 0.0 || !p.is_finite() {
        return signal.to_vec();
    }
    signal.iter().map(|x| x / p).collect()
}

pub fn apply_gain(signal: &[f32], gain: f32) -> Vec<f32> {
    signal.iter().map(|x| x * gain).collect()
}

pub fn hard_clip(signal: &[f32], min: f32, max: f32) -> Vec<f32> {
    signal.iter().map(|x| x.clamp(min, max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch_shift::PhaseVocoder;

    #[test]
    fn echo_extends_and_mixes() {
        // 10 Hz, 400 ms: delay of 4 samples
        let out = add_echo(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 10, 400.0, 0.5);
        assert_eq!(out, vec![1.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn echo_is_renormalized() {
        let signal = vec![0.8; 1000];
        let out = add_echo(&signal, 1000, 400.0, 0.9);
        assert_eq!(out.len(), 1400);
        assert!((peak(&out) - 1.0).abs() < 1e-6);
        assert!((out[0] - 0.8 / 1.52).abs() < 1e-6);
    }

    #[test]
    fn reverb_keeps_length() {
        let mut signal = vec![0.0; 200];
        signal[0] = 0.5;
        let out = add_reverb(&signal, 1000, 0.3);
        assert_eq!(out.len(), 200);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[50] - 0.3).abs() < 1e-6);
        assert!(peak(&out) <= 1.0 + 1e-6);
    }

    #[test]
    fn reverb_at_low_rate_folds_onto_direct_path() {
        // 0.05 s is less than one sample at 10 Hz
        let out = add_reverb(&[0.2, -0.4], 10, 0.5);
        assert!((out[0] - 0.5).abs() < 1e-6 && (out[1] + 1.0).abs() < 1e-6, "{out:?}");
    }

    #[test]
    fn reverb_mixes_delayed_copy() {
        let signal: Vec<f32> = (0..300).map(|i| (i as f32 * 0.3).sin() * 0.2).collect();
        let out = add_reverb(&signal, 1000, 0.6);
        let raw: Vec<f32> = (0..300)
            .map(|i| signal[i] + if i >= 50 { 0.6 * signal[i - 50] } else { 0.0 })
            .collect();
        let p = peak(&raw);
        for (o, r) in out.iter().zip(raw.iter()) {
            assert!((o - r / p).abs() < 1e-5, "{o} != {}", r / p);
        }
    }

    #[test]
    fn silence_survives_normalization() {
        assert_eq!(normalize_peak(&[0.0; 8]), vec![0.0; 8]);
        assert_eq!(add_echo(&[0.0; 8], 10, 400.0, 0.4), vec![0.0; 12]);
        assert!(normalize_peak(&[]).is_empty());
    }

    #[test]
    fn gain_and_clip() {
        let out = hard_clip(&apply_gain(&[0.2, -0.7, 0.9], 2.0), -1.0, 1.0);
        assert_eq!(out, vec![0.4, -1.0, 1.0]);
    }

    #[test]
    fn neutral_pitch_shift() {
        let signal: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.05).sin()).collect();
        let out = pitch_shift(&signal, 44100, 0.0, &PhaseVocoder::default()).unwrap();
        assert_eq!(out, signal);
        let out = pitch_shift(&signal, 44100, 2.5, &PhaseVocoder::default()).unwrap();
        assert_eq!(out.len(), signal.len());
    }
}
