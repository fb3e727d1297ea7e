//! Seven spectral-shape descriptors computed from one whole-clip spectrum.
//!
//! With `A` the rfft magnitude, `f` the bin frequencies, `n` the bin count and
//! `S = sum(A)`:
//!
//! * `f0`: peak bin frequency, floored to the first non-DC bin
//! * `affinity`: `sum(A * f) / (f0 * S)`
//! * `sharpness`: `max(A) / S`
//! * `harmonicity`: `sum((f / f0 - round(f / f0)) * A) / S` (signed)
//! * `monotony`: `f0 / n * sum(dA / df)` (signed slope)
//! * `mean_affinity`: `sum(|f - mean(f)|) / (n * f0)`
//! * `mean_contrast`: `sum(|A[0] - A|) / n`

use super::spectrum::{bin_frequencies, magnitude_spectrum};
use super::{EPSILON, sanitize_in_place};

/// Number of descriptor values.
pub const DESCRIPTOR_DIM: usize = 7;

/// Compute descriptors from a magnitude spectrum and its bin frequencies.
///
/// Returns the zero vector when the spectrum carries no energy.
pub(crate) fn descriptors_from_spectrum(amplitudes: &[f32], freqs: &[f32]) -> [f32; DESCRIPTOR_DIM] {
    let total: f64 = amplitudes.iter().map(|&a| a as f64).sum();
    if amplitudes.is_empty() || total == 0.0 {
        return [0.0; DESCRIPTOR_DIM];
    }
    let eps = EPSILON as f64;
    let (peak_idx, peak) = amplitudes
        .iter()
        .enumerate()
        .fold((0usize, f32::MIN), |best, (idx, &a)| if a > best.1 { (idx, a) } else { best });
    let min_f0 = freqs.get(1).copied().unwrap_or(1.0).max(EPSILON) as f64;
    let f0 = (freqs.get(peak_idx).copied().unwrap_or(0.0) as f64).max(min_f0);

    let n = amplitudes.len() as f64;
    let mut weighted_freq = 0.0_f64;
    let mut harmonicity = 0.0_f64;
    for (&a, &f) in amplitudes.iter().zip(freqs) {
        let (a, f) = (a as f64, f as f64);
        weighted_freq += a * f;
        let ratio = f / f0;
        harmonicity += (ratio - ratio.round_ties_even()) * a;
    }
    let slope: f64 = amplitudes
        .windows(2)
        .zip(freqs.windows(2))
        .map(|(a, f)| {
            let df = f[1] as f64 - f[0] as f64;
            let df = if df == 0.0 { eps } else { df };
            (a[1] as f64 - a[0] as f64) / df
        })
        .sum();
    let mean_freq = freqs.iter().map(|&f| f as f64).sum::<f64>() / freqs.len().max(1) as f64;
    let spread: f64 = freqs.iter().map(|&f| (f as f64 - mean_freq).abs()).sum();
    let first = amplitudes[0] as f64;
    let contrast: f64 = amplitudes
        .iter()
        .map(|&a| (first - a as f64).abs())
        .sum::<f64>()
        / n;

    let mut out = [
        f0 as f32,
        (weighted_freq / (f0 * total + eps)) as f32,
        (peak as f64 / (total + eps)) as f32,
        (harmonicity / (total + eps)) as f32,
        (f0 / n * slope) as f32,
        (spread / (freqs.len() as f64 * f0 + eps)) as f32,
        contrast as f32,
    ];
    sanitize_in_place(&mut out);
    out
}

/// Descriptors of a mono waveform at its native rate.
pub(crate) fn extract_descriptors(samples: &[f32], sample_rate: u32) -> [f32; DESCRIPTOR_DIM] {
    let amplitudes = magnitude_spectrum(samples);
    let freqs = bin_frequencies(samples.len(), sample_rate);
    descriptors_from_spectrum(&amplitudes, &freqs)
}
