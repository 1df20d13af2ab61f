use rustfft::num_complex::Complex32;

use crate::{
    fft::{fill_right_part_of_spectrum, fix_scale, Fft},
    windows::{hann_window, window_sum_square},
};

/// Split `buf` into Hann-windowed frames, run `process` on each, and overlap-add
/// the results back into a buffer of the same length.
///
/// The signal is zero-padded by `window_size` on both sides so that every
/// input sample is covered by the same number of frames, and the output is
/// divided by the squared-window envelope. With an identity `process` the
/// output reproduces the input.
pub fn transform(
    window_size: usize,
    slide_size: usize,
    buf: &[f32],
    process: impl FnMut(&[f32]) -> Vec<f32>,
) -> Vec<f32> {
    let processed = frames(window_size, slide_size, buf)
        .iter()
        .map(|frame| frame.as_slice())
        .map(process)
        .collect::<Vec<_>>();
    overlap_add(window_size, slide_size, &processed, buf.len())
}

/// Hann-windowed analysis frames of `buf`, padded the same way as [`transform`].
pub fn frames(window_size: usize, slide_size: usize, buf: &[f32]) -> Vec<Vec<f32>> {
    let window = hann_window(window_size);
    let padded = pad(buf, window_size);
    (0..frame_count(padded.len(), window_size, slide_size))
        .map(|frame| {
            let start = frame * slide_size;
            padded[start..start + window_size]
                .iter()
                .zip(window.iter())
                .map(|(x, w)| x * w)
                .collect()
        })
        .collect()
}

/// Window each processed frame again, sum the frames at their offsets and
/// divide by the squared-window envelope, cropping the padding so the result
/// is `len` samples long.
pub fn overlap_add(window_size: usize, slide_size: usize, frames: &[Vec<f32>], len: usize) -> Vec<f32> {
    let window = hann_window(window_size);
    let padded_len = len + 2 * window_size;

    let mut output = vec![0.0; padded_len];
    for (i, frame) in frames.iter().enumerate() {
        let start = i * slide_size;
        for ((y, x), w) in output[start..].iter_mut().zip(frame.iter()).zip(window.iter()) {
            *y += x * w;
        }
    }

    let envelope = window_sum_square(&window, slide_size, frames.len(), padded_len);
    output
        .iter()
        .zip(envelope.iter())
        .skip(window_size)
        .take(len)
        .map(|(&y, &e)| if e > 1e-6 { y / e } else { 0.0 })
        .collect()
}

/// Short-time Fourier transform. Each frame keeps the non-negative
/// frequencies only, `fft.len() / 2 + 1` bins.
pub fn stft(fft: &Fft, slide_size: usize, buf: &[f32]) -> Vec<Vec<Complex32>> {
    let bins = fft.len() / 2 + 1;
    frames(fft.len(), slide_size, buf)
        .into_iter()
        .map(|frame| {
            let mut spectrum: Vec<_> = frame.into_iter().map(|x| Complex32::new(x, 0.0)).collect();
            fft.forward(&mut spectrum);
            spectrum.truncate(bins);
            spectrum.shrink_to_fit();
            spectrum
        })
        .collect()
}

/// Inverse of [`stft`] for a signal of `len` samples. The negative
/// frequencies are restored as conjugates of the positive ones.
pub fn istft(fft: &Fft, slide_size: usize, spectra: Vec<Vec<Complex32>>, len: usize) -> Vec<f32> {
    let frames = spectra
        .into_iter()
        .map(|mut spectrum| {
            spectrum.resize(fft.len(), Complex32::default());
            fill_right_part_of_spectrum(&mut spectrum);
            fft.inverse(&mut spectrum);
            fix_scale(&mut spectrum);
            spectrum.iter().map(|x| x.re).collect()
        })
        .collect::<Vec<_>>();
    overlap_add(fft.len(), slide_size, &frames, len)
}

fn pad(buf: &[f32], amount: usize) -> Vec<f32> {
    let mut padded = vec![0.0; buf.len() + 2 * amount];
    padded[amount..amount + buf.len()].copy_from_slice(buf);
    padded
}

fn frame_count(len: usize, window_size: usize, slide_size: usize) -> usize {
    (len - window_size) / slide_size + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_process_reconstructs() {
        let buf: Vec<f32> = (0..5000).map(|i| (i as f32 * 0.013).sin() * 0.7).collect();
        let out = transform(1024, 256, &buf, |b| b.to_vec());
        assert_eq!(out.len(), buf.len());
        for (a, b) in buf.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }

    #[test]
    fn empty_input() {
        assert!(transform(64, 16, &[], |b| b.to_vec()).is_empty());
        assert_eq!(frames(64, 16, &[]).len(), 5);
    }

    #[test]
    fn stft_roundtrip() {
        let buf: Vec<f32> = (0..3000).map(|i| (i as f32 * 0.05).cos() * 0.4).collect();
        let fft = Fft::new(256);
        let spectra = stft(&fft, 64, &buf);
        assert_eq!(spectra.len(), (3000 + 2 * 256 - 256) / 64 + 1);
        assert!(spectra.iter().all(|s| s.len() == 129));
        let out = istft(&fft, 64, spectra, buf.len());
        for (a, b) in buf.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }
}
