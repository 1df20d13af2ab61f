pub mod autotune;
pub mod config;
pub mod denoise;
pub mod device;
pub mod effects;
pub mod fft;
pub mod filter;
pub mod note;
pub mod pipeline;
pub mod pitch_detection;
pub mod pitch_shift;
pub mod plot;
pub mod transform;
pub mod wav;
pub mod windows;

/// Root mean square level of a buffer.
pub fn power(buf: &[f32]) -> f32 {
    if buf.is_empty() {
        return 0.0;
    }
    (buf.iter().map(|&x| x.powi(2)).sum::<f32>() / buf.len() as f32).sqrt()
}

/// Peak absolute amplitude of a buffer; 0 for an empty one.
pub fn peak(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |a, &x| a.max(x.abs()))
}
