use std::sync::Arc;

use rustfft::num_complex::Complex32;

pub struct Fft {
    forward: Arc<dyn rustfft::Fft<f32>>,
    inverse: Arc<dyn rustfft::Fft<f32>>,
}

impl Fft {
    pub fn new(size: usize) -> Self {
        let mut planner = rustfft::FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Forward transform of `buf`, hand the spectrum to `process`, transform back.
    pub fn retouch_spectrum(
        &self,
        buf: &[f32],
        mut process: impl FnMut(&mut [Complex32]),
    ) -> Vec<f32> {
        let mut spectrum: Vec<_> = buf.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        spectrum.resize(self.len(), Complex32::new(0.0, 0.0));
        self.forward(&mut spectrum);
        process(&mut spectrum);
        self.inverse(&mut spectrum);
        fix_scale(&mut spectrum);
        spectrum.iter().map(|x| x.re).collect()
    }

    pub fn forward(&self, buffer: &mut [Complex32]) {
        self.forward.process(buffer);
    }

    pub fn inverse(&self, buffer: &mut [Complex32]) {
        self.inverse.process(buffer);
    }

    /// Magnitudes of the non-negative frequency bins of a real signal.
    pub fn magnitudes(&self, buf: &[f32]) -> Vec<f32> {
        let mut spectrum: Vec<_> = buf.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        spectrum.resize(self.len(), Complex32::new(0.0, 0.0));
        self.forward(&mut spectrum);
        spectrum[..self.len() / 2 + 1].iter().map(|x| x.norm()).collect()
    }
}

pub fn fix_scale(buf: &mut [Complex32]) {
    let scale = 1.0 / buf.len() as f32;
    for x in buf.iter_mut() {
        *x *= scale;
    }
}

/// Mirror bins `1..len/2` into the upper half so the spectrum stays Hermitian.
pub fn fill_right_part_of_spectrum(spectrum: &mut [Complex32]) {
    let len = spectrum.len();
    for i in 1..len / 2 {
        spectrum[len - i] = spectrum[i].conj();
    }
}
