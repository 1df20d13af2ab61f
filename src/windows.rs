use std::f32::consts::TAU;

/// Periodic Hann window, the analysis and synthesis window of every STFT in the crate.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (i as f32 * TAU / size as f32).cos()))
        .collect()
}

/// Sum of squared, hop-shifted copies of `window` over `len` samples.
///
/// Dividing an overlap-add output by this envelope undoes the analysis and
/// synthesis windowing, including at the edges where fewer frames overlap.
pub fn window_sum_square(window: &[f32], slide_size: usize, frames: usize, len: usize) -> Vec<f32> {
    let mut envelope = vec![0.0; len];
    for frame in 0..frames {
        let start = frame * slide_size;
        for (x, w) in envelope[start.min(len)..].iter_mut().zip(window) {
            *x += w * w;
        }
    }
    envelope
}
