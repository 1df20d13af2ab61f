//! Frame-wise pitch correction.
//!
//! The signal's pitch track is estimated once; then every voiced frame is
//! pitch-shifted on its own by the distance between its detected pitch and
//! the nearest tone of the scale. Frames overlap and are processed in order
//! on a working copy, so later frames shift audio that earlier frames have
//! already replaced. Nothing here fails: every problem degrades to returning
//! the input unchanged.

use log::{debug, info, warn};

use crate::{
    note::{hz_to_midi, midi_to_hz, Scale},
    peak,
    pitch_detection::{PitchEstimator, PitchTrack, Yin},
    pitch_shift::{PhaseVocoder, PitchShifter},
};

pub const MIN_SAMPLES: usize = 4096;
pub const SILENCE_PEAK: f32 = 0.01;
pub const FRAME_LENGTH: usize = 2048;
pub const HOP_LENGTH: usize = 512;

/// Lowest and highest frequency the pitch tracker looks for (C2 and C7).
pub fn analysis_range() -> (f32, f32) {
    (midi_to_hz(36.0), midi_to_hz(96.0))
}

/// Correct `signal` towards `scale` with the default estimator and shifter.
pub fn correct_pitch(signal: &[f32], sample_rate: u32, scale: &Scale) -> Vec<f32> {
    Autotuner::new(Yin::default(), PhaseVocoder::default()).correct(signal, sample_rate, scale)
}

pub struct Autotuner<E, S> {
    pub estimator: E,
    pub shifter: S,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl<E: PitchEstimator, S: PitchShifter> Autotuner<E, S> {
    pub fn new(estimator: E, shifter: S) -> Self {
        Self {
            estimator,
            shifter,
            frame_length: FRAME_LENGTH,
            hop_length: HOP_LENGTH,
        }
    }

    /// Pitch track of `signal` over the analysis range, or `None` if
    /// estimation failed or found no voiced frame.
    pub fn track(&self, signal: &[f32], sample_rate: u32) -> Option<PitchTrack> {
        let (fmin, fmax) = analysis_range();
        let track = match self.estimator.estimate(
            signal,
            sample_rate,
            fmin,
            fmax,
            self.frame_length,
            self.hop_length,
        ) {
            Ok(track) => track,
            Err(e) => {
                warn!("pitch estimation failed: {e:#}");
                return None;
            }
        };
        if track.is_empty() || track.is_unvoiced() {
            warn!("no pitch detected, skipping autotune");
            return None;
        }
        Some(track)
    }

    pub fn correct(&self, signal: &[f32], sample_rate: u32, scale: &Scale) -> Vec<f32> {
        if signal.len() < MIN_SAMPLES || peak(signal) < SILENCE_PEAK {
            warn!("skipping autotune: audio too short or silent");
            return signal.to_vec();
        }

        let Some(track) = self.track(signal, sample_rate) else {
            return signal.to_vec();
        };

        let mut tuned = signal.to_vec();
        let mut shifted_frames = 0;
        for (i, pitch) in track.frequencies.iter().enumerate() {
            let Some(pitch) = *pitch else {
                continue;
            };
            let Some(n_steps) = correction(pitch, scale) else {
                continue;
            };

            let start = i * self.hop_length;
            let end = start + self.frame_length;
            if end > tuned.len() {
                continue;
            }

            let frame = match self.shifter.shift(&tuned[start..end], sample_rate, n_steps) {
                Ok(frame) if frame.len() == end - start => frame,
                Ok(frame) => {
                    warn!(
                        "pitch shifter returned {} samples for a {} sample frame, skipping autotune",
                        frame.len(),
                        end - start
                    );
                    return signal.to_vec();
                }
                Err(e) => {
                    warn!("pitch shift failed on frame {i}: {e:#}");
                    return signal.to_vec();
                }
            };
            debug!("frame {i}: {pitch:.2} Hz, shift {n_steps:+.3} semitones");
            tuned[start..end].copy_from_slice(&frame);
            shifted_frames += 1;
        }

        let tuned_peak = peak(&tuned);
        if !tuned_peak.is_finite() || tuned_peak <= f32::EPSILON {
            warn!("autotune produced a degenerate signal, keeping the input");
            return signal.to_vec();
        }
        info!(
            "autotune: shifted {shifted_frames} of {} frames",
            track.frequencies.len()
        );
        tuned.iter().map(|x| x / tuned_peak).collect()
    }
}

/// Semitones from `pitch` to the nearest scale tone.
pub fn correction(pitch: f32, scale: &Scale) -> Option<f32> {
    if !(pitch.is_finite() && pitch > 0.0) {
        return None;
    }
    let current = hz_to_midi(pitch);
    scale.nearest(current).map(|nearest| nearest - current)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, f32::consts::TAU};

    use anyhow::{bail, Result};

    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (TAU * freq * i as f32 / sample_rate as f32).sin() * amplitude)
            .collect()
    }

    /// Estimator returning a fixed track.
    struct Fixed(Vec<Option<f32>>);

    impl PitchEstimator for Fixed {
        fn estimate(&self, _: &[f32], _: u32, _: f32, _: f32, frame_length: usize, hop_length: usize) -> Result<PitchTrack> {
            Ok(PitchTrack {
                probabilities: self.0.iter().map(|f| if f.is_some() { 1.0 } else { 0.0 }).collect(),
                frequencies: self.0.clone(),
                frame_length,
                hop_length,
            })
        }
    }

    struct Failing;

    impl PitchEstimator for Failing {
        fn estimate(&self, _: &[f32], _: u32, _: f32, _: f32, _: usize, _: usize) -> Result<PitchTrack> {
            bail!("estimator exploded")
        }
    }

    /// Shifter that records the requested shifts and scales frames by 2.
    #[derive(Default)]
    struct Recording(RefCell<Vec<f32>>);

    impl PitchShifter for Recording {
        fn shift(&self, signal: &[f32], _: u32, n_steps: f32) -> Result<Vec<f32>> {
            self.0.borrow_mut().push(n_steps);
            Ok(signal.iter().map(|x| x * 2.0).collect())
        }
    }

    impl PitchShifter for Failing {
        fn shift(&self, _: &[f32], _: u32, _: f32) -> Result<Vec<f32>> {
            bail!("shifter exploded")
        }
    }

    #[test]
    fn analysis_range_spans_c2_to_c7() {
        let (fmin, fmax) = analysis_range();
        assert!((fmin - 65.406).abs() < 0.01, "{fmin}");
        assert!((fmax - 2093.005).abs() < 0.05, "{fmax}");
        assert_eq!(fmin, crate::note::note_to_hz("C2").unwrap());
        assert_eq!(fmax, crate::note::note_to_hz("C7").unwrap());
    }

    #[test]
    fn short_input_passes_through() {
        let signal = sine(440.0, 44100, MIN_SAMPLES - 1, 0.5);
        assert_eq!(correct_pitch(&signal, 44100, &Scale::default()), signal);
    }

    #[test]
    fn quiet_input_passes_through() {
        let signal = sine(440.0, 44100, 44100, 0.009);
        assert_eq!(correct_pitch(&signal, 44100, &Scale::default()), signal);
        assert!(correct_pitch(&[], 44100, &Scale::default()).is_empty());
    }

    #[test]
    fn estimator_failure_passes_through() {
        let signal = sine(450.0, 44100, 8192, 0.5);
        let tuner = Autotuner::new(Failing, Recording::default());
        assert_eq!(tuner.correct(&signal, 44100, &Scale::default()), signal);
        assert!(tuner.shifter.0.borrow().is_empty());
    }

    #[test]
    fn unvoiced_track_passes_through() {
        let signal = sine(450.0, 44100, 8192, 0.5);
        let tuner = Autotuner::new(Fixed(vec![None; 17]), Recording::default());
        assert_eq!(tuner.correct(&signal, 44100, &Scale::default()), signal);
        let tuner = Autotuner::new(Fixed(vec![]), Recording::default());
        assert_eq!(tuner.correct(&signal, 44100, &Scale::default()), signal);
    }

    #[test]
    fn shifter_failure_passes_through() {
        let signal = sine(450.0, 44100, 8192, 0.5);
        let tuner = Autotuner::new(Fixed(vec![Some(450.0); 17]), Failing);
        assert_eq!(tuner.correct(&signal, 44100, &Scale::default()), signal);
    }

    #[test]
    fn shifts_only_voiced_frames_that_fit() {
        // 8192 samples: frames start every 512, a frame of 2048 fits up to index 12.
        let mut track = vec![Some(450.0); 17];
        track[3] = None;
        let signal = sine(450.0, 44100, 8192, 0.5);
        let tuner = Autotuner::new(Fixed(track), Recording::default());
        let out = tuner.correct(&signal, 44100, &Scale::default());

        let shifts = tuner.shifter.0.borrow();
        assert_eq!(shifts.len(), 12);
        let expected = 69.0 - hz_to_midi(450.0);
        assert!(shifts.iter().all(|s| (s - expected).abs() < 1e-5));
        assert_eq!(out.len(), signal.len());
        assert!((peak(&out) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_frames_compound_in_order() {
        // Only frames 0 and 1 are voiced: samples 512..2048 are doubled twice.
        let mut track = vec![None; 17];
        track[0] = Some(450.0);
        track[1] = Some(450.0);
        let signal = vec![0.25; 8192];
        let tuner = Autotuner::new(Fixed(track), Recording::default());
        let out = tuner.correct(&signal, 44100, &Scale::default());
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1000] - 1.0).abs() < 1e-6);
        assert!((out[2200] - 0.5).abs() < 1e-6);
        assert!((out[3000] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn on_scale_tone_needs_no_correction() {
        let scale = Scale::default();
        assert!(correction(440.0, &scale).unwrap().abs() < 1e-4);
        assert!(correction(261.6256, &scale).unwrap().abs() < 1e-3);
        assert_eq!(correction(0.0, &scale), None);
        assert_eq!(correction(f32::NAN, &scale), None);
    }

    #[test]
    fn a440_sine_stays_put() {
        let signal = sine(440.0, 44100, 44100, 0.6);
        let tuner = Autotuner::new(Yin::default(), Recording::default());
        tuner.correct(&signal, 44100, &Scale::default());
        let shifts = tuner.shifter.0.borrow();
        assert!(!shifts.is_empty());
        assert!(shifts.iter().all(|s| s.abs() < 0.15), "{shifts:?}");
    }

    #[test]
    fn output_peak_is_normalized() {
        let signal = sine(452.0, 44100, 16384, 0.3);
        let out = correct_pitch(&signal, 44100, &Scale::default());
        assert_eq!(out.len(), signal.len());
        assert!(peak(&out) <= 1.0 + 1e-6);
    }
}
