use std::f32::consts::{PI, TAU};

use anyhow::{bail, Result};
use rustfft::num_complex::Complex32;

use crate::{
    fft::{fill_right_part_of_spectrum, Fft},
    transform::transform,
};

/// Something that can move the pitch of a whole buffer by a number of
/// semitones without changing its length.
pub trait PitchShifter {
    fn shift(&self, signal: &[f32], sample_rate: u32, n_steps: f32) -> Result<Vec<f32>>;
}

/// Phase vocoder pitch shifter.
///
/// Each STFT bin's true frequency is recovered from its phase advance between
/// frames, the bins are remapped by the pitch ratio and the output phases are
/// re-accumulated from the scaled frequencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseVocoder {
    pub window_size: usize,
    pub slide_size: usize,
}

impl Default for PhaseVocoder {
    fn default() -> Self {
        Self {
            window_size: 1024,
            slide_size: 256,
        }
    }
}

impl PitchShifter for PhaseVocoder {
    fn shift(&self, signal: &[f32], _sample_rate: u32, n_steps: f32) -> Result<Vec<f32>> {
        if !n_steps.is_finite() {
            bail!("pitch shift of {n_steps} semitones is not finite");
        }
        if self.slide_size == 0
            || self.window_size < self.slide_size * 2
            || self.window_size % self.slide_size != 0
        {
            bail!(
                "window size {} is not a multiple of at least twice the slide size {}",
                self.window_size,
                self.slide_size
            );
        }
        if n_steps == 0.0 {
            return Ok(signal.to_vec());
        }

        let fft = Fft::new(self.window_size);
        let mut pitch_shift = pitch_shifter(self.window_size);
        let pitch_change_amount = 2.0f32.powf(n_steps / 12.0);
        let slide_size = self.slide_size;

        Ok(transform(self.window_size, slide_size, signal, |buf| {
            fft.retouch_spectrum(buf, |spectrum| {
                process_spectrum(slide_size, &mut pitch_shift, pitch_change_amount, spectrum);
            })
        }))
    }
}

pub fn process_spectrum(
    slide_size: usize,
    pitch_shift: &mut impl FnMut(&[Complex32], f32, usize) -> Vec<Complex32>,
    pitch_change_amount: f32,
    spectrum: &mut [Complex32],
) {
    let len = spectrum.len();

    let mut shifted_spectrum = pitch_shift(spectrum, pitch_change_amount, slide_size);

    remove_aliasing(pitch_change_amount, &mut shifted_spectrum);

    spectrum[..len / 2 + 1].copy_from_slice(&shifted_spectrum[..len / 2 + 1]);

    fill_right_part_of_spectrum(spectrum);
}

/// Stateful bin remapper; keeps the previous frame's input and output phases.
pub fn pitch_shifter(len: usize) -> impl FnMut(&[Complex32], f32, usize) -> Vec<Complex32> {
    let mut prev_input_phases = vec![0.0f32; len];
    let mut prev_output_phases = vec![0.0f32; len];

    move |spectrum, pitch_change_amount, slide_size| {
        let len = spectrum.len();
        let slide = slide_size as f32;

        // magnitude and true frequency (in bins) of each analysis bin
        let mut pre = vec![[0.0f32; 2]; len];
        for i in 0..len / 2 + 1 {
            let (norm, phase) = spectrum[i].to_polar();
            let bin_center_freq = TAU * i as f32 / len as f32;

            let phase_diff = wrap_phase(phase - prev_input_phases[i] - bin_center_freq * slide);
            prev_input_phases[i] = phase;
            let bin_deviation = phase_diff * len as f32 / (slide * TAU);

            pre[i] = [norm, i as f32 + bin_deviation];
        }

        let mut post = vec![[0.0f32; 2]; len];
        for (i, p) in post.iter_mut().enumerate().take(len / 2 + 1) {
            let shifted_bin = (i as f32 / pitch_change_amount).round() as usize;
            if shifted_bin > len / 2 {
                break;
            }
            *p = [pre[shifted_bin][0], pre[shifted_bin][1] * pitch_change_amount];
        }

        let mut shifted_spectrum = spectrum.to_vec();
        for i in 0..len / 2 + 1 {
            let bin_deviation = post[i][1] - i as f32;
            let bin_center_freq = TAU * i as f32 / len as f32;
            let phase_diff = bin_deviation * TAU * slide / len as f32 + bin_center_freq * slide;

            let phase = wrap_phase(prev_output_phases[i] + phase_diff);
            shifted_spectrum[i] = Complex32::from_polar(post[i][0], phase);
            prev_output_phases[i] = phase;
        }

        fill_right_part_of_spectrum(&mut shifted_spectrum);

        shifted_spectrum
    }
}

pub fn wrap_phase(phase: f32) -> f32 {
    if phase >= 0.0 {
        (phase + PI) % TAU - PI
    } else {
        (phase - PI) % TAU + PI
    }
}

/// Zero the bins a downward shift would otherwise fold back from above Nyquist.
pub fn remove_aliasing(pitch_change_amount: f32, spectrum: &mut [Complex32]) {
    let len = spectrum.len();

    if pitch_change_amount < 1.0 {
        let nyquist = (len as f32 / 2.0 * pitch_change_amount).round() as usize;
        spectrum[nyquist.min(len / 2)..len / 2].fill(Complex32::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (TAU * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    fn dominant_frequency(buf: &[f32], sample_rate: u32) -> f32 {
        let size = 8192;
        let fft = Fft::new(size);
        let start = (buf.len() - size) / 2;
        let mags = fft.magnitudes(&buf[start..start + size]);
        let (bin, _) = mags
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |a, (i, &m)| if m > a.1 { (i, m) } else { a });
        bin as f32 * sample_rate as f32 / size as f32
    }

    #[test]
    fn wrap_phase_stays_in_range() {
        for &p in &[0.0, 1.0, PI + 0.5, -PI - 0.5, 10.0 * TAU + 0.25, -7.0] {
            let w = wrap_phase(p);
            assert!((-PI..=PI).contains(&w), "{p} -> {w}");
            assert!(((p - w) / TAU - ((p - w) / TAU).round()).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_steps_is_identity() {
        let buf = sine(330.0, 44100, 4096);
        let out = PhaseVocoder::default().shift(&buf, 44100, 0.0).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn octave_up_doubles_frequency() {
        let buf = sine(440.0, 44100, 32768);
        let out = PhaseVocoder::default().shift(&buf, 44100, 12.0).unwrap();
        assert_eq!(out.len(), buf.len());
        let freq = dominant_frequency(&out, 44100);
        assert!((freq - 880.0).abs() < 20.0, "got {freq}");
    }

    #[test]
    fn fifth_down_lowers_frequency() {
        let buf = sine(660.0, 44100, 32768);
        let out = PhaseVocoder::default().shift(&buf, 44100, -7.0).unwrap();
        let expected = 660.0 * 2.0f32.powf(-7.0 / 12.0);
        let freq = dominant_frequency(&out, 44100);
        assert!((freq - expected).abs() < 20.0, "got {freq}, expected {expected}");
    }

    #[test]
    fn rejects_bad_parameters() {
        let buf = sine(440.0, 44100, 2048);
        assert!(PhaseVocoder::default().shift(&buf, 44100, f32::NAN).is_err());
        let broken = PhaseVocoder {
            window_size: 256,
            slide_size: 0,
        };
        assert!(broken.shift(&buf, 44100, 1.0).is_err());
        let uneven = PhaseVocoder {
            window_size: 1000,
            slide_size: 256,
        };
        assert!(uneven.shift(&buf, 44100, 1.0).is_err());
        assert!(uneven.shift(&buf, 44100, 0.0).is_err());
    }
}
