//! SVG plots of signals at the stages of the chain.

use std::path::Path;

use anyhow::{bail, Result};
use plotters::prelude::*;

use crate::{fft::Fft, peak, pitch_detection::PitchTrack, transform::frames};

const SIZE: (u32, u32) = (1200, 600);
/// Waveforms are reduced to this many min/max pairs.
const MAX_COLUMNS: usize = 2000;

/// Waveform of one signal.
pub fn time_domain(signal: &[f32], sample_rate: u32, title: &str, path: impl AsRef<Path>) -> Result<()> {
    waveforms(&[("signal", signal)], sample_rate, title, path.as_ref())
}

/// Two signals overlaid, e.g. before and after an effect.
pub fn comparison(
    before: &[f32],
    after: &[f32],
    sample_rate: u32,
    title: &str,
    path: impl AsRef<Path>,
) -> Result<()> {
    waveforms(&[("before", before), ("after", after)], sample_rate, title, path.as_ref())
}

fn waveforms(series: &[(&str, &[f32])], sample_rate: u32, title: &str, path: &Path) -> Result<()> {
    let len = series.iter().map(|(_, s)| s.len()).max().unwrap_or(0);
    let duration = (len as f32 / sample_rate as f32).max(1.0 / sample_rate as f32);
    let limit = series.iter().map(|(_, s)| peak(s)).fold(1e-3f32, f32::max) * 1.1;

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..duration, -limit..limit)?;
    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Amplitude")
        .draw()?;

    for (i, (name, signal)) in series.iter().enumerate() {
        let style = Palette99::pick(i).stroke_width(1);
        chart
            .draw_series(LineSeries::new(envelope(signal, sample_rate), style))?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }
    if series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Min/max pairs per column, in (seconds, amplitude).
fn envelope(signal: &[f32], sample_rate: u32) -> Vec<(f32, f32)> {
    let bucket = signal.len().div_ceil(MAX_COLUMNS).max(1);
    signal
        .chunks(bucket)
        .enumerate()
        .flat_map(|(i, chunk)| {
            let t = (i * bucket) as f32 / sample_rate as f32;
            let (lo, hi) = chunk
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
            [(t, lo), (t, hi)]
        })
        .collect()
}

/// Average magnitude spectrum in dB against a logarithmic frequency axis.
pub fn frequency_domain(signal: &[f32], sample_rate: u32, title: &str, path: impl AsRef<Path>) -> Result<()> {
    const N_FFT: usize = 4096;
    let nyquist = sample_rate as f32 / 2.0;
    let bin_hz = sample_rate as f32 / N_FFT as f32;
    let points: Vec<(f32, f32)> = average_spectrum(signal, N_FFT)
        .iter()
        .enumerate()
        .map(|(k, &m)| (k as f32 * bin_hz, amp_to_db(m)))
        .filter(|&(f, _)| f >= 20.0)
        .collect();
    if points.is_empty() {
        bail!("sample rate {sample_rate} Hz leaves nothing above 20 Hz to plot");
    }
    let hi = points.iter().map(|p| p.1).fold(f32::MIN, f32::max) + 5.0;
    let lo = points.iter().map(|p| p.1).fold(f32::MAX, f32::min).max(hi - 120.0);

    let root = SVGBackend::new(path.as_ref(), SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((20f32..nyquist).log_scale(), lo..hi)?;
    chart
        .configure_mesh()
        .x_desc("Frequency (Hz)")
        .y_desc("Magnitude (dB)")
        .draw()?;
    chart.draw_series(LineSeries::new(points, &BLUE))?;
    root.present()?;
    Ok(())
}

fn average_spectrum(signal: &[f32], n_fft: usize) -> Vec<f32> {
    let fft = Fft::new(n_fft);
    let frames = frames(n_fft, n_fft / 2, signal);
    let mut sum = vec![0.0; n_fft / 2 + 1];
    for frame in &frames {
        for (s, m) in sum.iter_mut().zip(fft.magnitudes(frame)) {
            *s += m;
        }
    }
    sum.iter().map(|s| s / frames.len() as f32).collect()
}

fn amp_to_db(x: f32) -> f32 {
    20.0 * x.max(1e-10).log10()
}

/// Short-time magnitude in dB, coarsened to a fixed grid of cells.
pub fn spectrogram(signal: &[f32], sample_rate: u32, title: &str, path: impl AsRef<Path>) -> Result<()> {
    const N_FFT: usize = 1024;
    const COLUMNS: usize = 200;
    const ROWS: usize = 128;

    let fft = Fft::new(N_FFT);
    let hop = (signal.len() / COLUMNS).max(N_FFT / 4);
    let cells: Vec<Vec<f32>> = frames(N_FFT, hop, signal)
        .iter()
        .map(|frame| {
            let mags = fft.magnitudes(frame);
            mags.chunks(mags.len().div_ceil(ROWS))
                .map(|c| amp_to_db(c.iter().sum::<f32>() / c.len() as f32))
                .collect()
        })
        .collect();
    let max = cells.iter().flatten().copied().fold(f32::MIN, f32::max);
    let min = max - 80.0;

    let duration = (signal.len() as f32 / sample_rate as f32).max(1.0 / sample_rate as f32);
    let nyquist = sample_rate as f32 / 2.0;
    let column_secs = duration / cells.len() as f32;
    let row_hz = nyquist / cells.first().map_or(1, |c| c.len()) as f32;

    let root = SVGBackend::new(path.as_ref(), SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..duration, 0f32..nyquist)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Time (s)")
        .y_desc("Frequency (Hz)")
        .draw()?;
    chart.draw_series(cells.iter().enumerate().flat_map(|(i, column)| {
        column.iter().enumerate().map(move |(j, &db)| {
            let level = ((db - min) / (max - min).max(f32::EPSILON)).clamp(0.0, 1.0) as f64;
            let color = HSLColor(0.7 * (1.0 - level), 1.0, 0.1 + 0.5 * level);
            Rectangle::new(
                [
                    (i as f32 * column_secs, j as f32 * row_hz),
                    ((i + 1) as f32 * column_secs, (j + 1) as f32 * row_hz),
                ],
                color.filled(),
            )
        })
    }))?;
    root.present()?;
    Ok(())
}

/// Voiced frames of two pitch tracks over time.
pub fn pitch_tracks(
    before: &PitchTrack,
    after: &PitchTrack,
    sample_rate: u32,
    title: &str,
    path: impl AsRef<Path>,
) -> Result<()> {
    let voiced = |track: &PitchTrack| -> Vec<(f32, f32)> {
        track
            .times(sample_rate)
            .into_iter()
            .zip(track.frequencies.iter())
            .filter_map(|(t, f)| f.map(|f| (t, f)))
            .collect()
    };
    let series = [("before", voiced(before)), ("after", voiced(after))];

    let duration = series
        .iter()
        .flat_map(|(_, points)| points.iter().map(|p| p.0))
        .fold(1.0 / sample_rate as f32, f32::max);
    let top = series
        .iter()
        .flat_map(|(_, points)| points.iter().map(|p| p.1))
        .fold(100.0f32, f32::max)
        * 1.1;

    let root = SVGBackend::new(path.as_ref(), SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..duration, 0f32..top)?;
    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Frequency (Hz)")
        .draw()?;
    for (i, (name, points)) in series.iter().enumerate() {
        let style = Palette99::pick(i).filled();
        chart
            .draw_series(points.iter().map(|&p| Circle::new(p, 2, style)))?
            .label(*name)
            .legend(move |(x, y)| Circle::new((x + 10, y), 3, style));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use super::*;

    fn tone() -> Vec<f32> {
        (0..8000).map(|i| (i as f32 * 0.1).sin() * 0.5).collect()
    }

    #[test]
    fn writes_svg_files() {
        let dir = TempDir::new("plot").unwrap();
        let signal = tone();
        let quiet: Vec<f32> = signal.iter().map(|x| x * 0.5).collect();

        let paths = [
            dir.path().join("time.svg"),
            dir.path().join("freq.svg"),
            dir.path().join("spec.svg"),
            dir.path().join("cmp.svg"),
        ];
        time_domain(&signal, 16000, "time", &paths[0]).unwrap();
        frequency_domain(&signal, 16000, "freq", &paths[1]).unwrap();
        spectrogram(&signal, 16000, "spectrogram", &paths[2]).unwrap();
        comparison(&signal, &quiet, 16000, "compare", &paths[3]).unwrap();
        for path in &paths {
            assert!(fs::read_to_string(path).unwrap().contains("<svg"));
        }
    }

    #[test]
    fn plots_pitch_tracks() {
        let dir = TempDir::new("plot").unwrap();
        let track = PitchTrack {
            frequencies: vec![None, Some(220.0), Some(221.0)],
            probabilities: vec![0.0, 1.0, 1.0],
            frame_length: 2048,
            hop_length: 512,
        };
        let path = dir.path().join("pitch.svg");
        pitch_tracks(&track, &track, 44100, "pitch", &path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("<svg"));
    }

    #[test]
    fn envelope_is_bounded() {
        let signal = vec![0.5; 100_000];
        let points = envelope(&signal, 44100);
        assert!(points.len() <= 2 * MAX_COLUMNS);
        assert!(points.iter().all(|p| p.1 == 0.5));
    }

    #[test]
    fn empty_signal_still_plots() {
        let dir = TempDir::new("plot").unwrap();
        time_domain(&[], 44100, "empty", dir.path().join("empty.svg")).unwrap();
    }
}
