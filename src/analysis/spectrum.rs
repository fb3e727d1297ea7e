//! Magnitude spectra and short-time Fourier transforms backed by `rustfft`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Periodic Hann window of `length` samples.
pub(crate) fn hann_window(length: usize) -> Vec<f32> {
    if length <= 1 {
        return vec![1.0_f32; length.max(1)];
    }
    let denom = length as f32;
    (0..length)
        .map(|n| 0.5_f32 * (1.0 - (2.0 * PI * n as f32 / denom).cos()))
        .collect()
}

/// Magnitude of the real DFT over the whole buffer (`n / 2 + 1` bins).
pub(crate) fn magnitude_spectrum(samples: &[f32]) -> Vec<f32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
    let mut buffer: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut buffer);
    buffer.truncate(n / 2 + 1);
    buffer.into_iter().map(|c| c.norm()).collect()
}

/// Center frequency in Hz of every rfft bin for an `n`-point transform.
pub(crate) fn bin_frequencies(n: usize, sample_rate: u32) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let step = sample_rate as f64 / n as f64;
    (0..=n / 2).map(|k| (k as f64 * step) as f32).collect()
}

/// Reusable STFT plan with a Hann window and centered, zero-padded frames.
pub(crate) struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub(crate) fn new(n_fft: usize, hop: usize) -> Self {
        let n_fft = n_fft.max(2);
        Self {
            n_fft,
            hop: hop.max(1),
            window: hann_window(n_fft),
            fft: FftPlanner::<f32>::new().plan_fft_forward(n_fft),
        }
    }

    pub(crate) fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub(crate) fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Magnitude frames, one `bins()`-long row per hop.
    ///
    /// The signal is padded by `n_fft / 2` zeros on both sides so frame `t` is
    /// centered on sample `t * hop`. An empty signal yields no frames.
    pub(crate) fn magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        if samples.is_empty() {
            return Vec::new();
        }
        let pad = self.n_fft / 2;
        let frame_count = 1 + samples.len() / self.hop;
        let mut frames = Vec::with_capacity(frame_count);
        let mut buffer = vec![Complex::new(0.0_f32, 0.0); self.n_fft];
        for frame in 0..frame_count {
            let center = frame * self.hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = (center + i)
                    .checked_sub(pad)
                    .and_then(|idx| samples.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            frames.push(buffer[..self.bins()].iter().map(|c| c.norm()).collect());
        }
        frames
    }

    /// Power (squared magnitude) frames.
    pub(crate) fn power(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = self.magnitudes(samples);
        for frame in &mut frames {
            for value in frame.iter_mut() {
                *value *= *value;
            }
        }
        frames
    }
}
