//! Frame-level spectral statistics appended to the seven descriptors.
//!
//! Layout (48 values): descriptors, 13 MFCC means, 13 MFCC variances, 7 spectral
//! contrast means, centroid mean, bandwidth mean, harmonic energy, percussive
//! energy, percussive/harmonic ratio, onset-strength mean, onset-strength max and spectral
//! flux mean.

mod contrast;
mod hpss;
mod onset;

use super::descriptor::{DESCRIPTOR_DIM, extract_descriptors};
use super::mel::{MelBank, dct_ii_ortho};
use super::sanitize_in_place;
use super::spectrum::{Stft, bin_frequencies};
use contrast::{CONTRAST_BANDS, spectral_contrast_means};

const N_FFT: usize = 2_048;
const HOP: usize = 512;
const MEL_BANDS: usize = 40;
const MFCC_COUNT: usize = 13;

/// Number of enhanced feature values.
pub const ENHANCED_DIM: usize = DESCRIPTOR_DIM + 2 * MFCC_COUNT + CONTRAST_BANDS + 2 + 3 + 2 + 1;

pub(crate) fn extract_enhanced(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity(ENHANCED_DIM);
    out.extend_from_slice(&extract_descriptors(samples, sample_rate));

    let stft = Stft::new(N_FFT, HOP);
    let magnitudes = stft.magnitudes(samples);
    let power: Vec<Vec<f32>> = magnitudes
        .iter()
        .map(|frame| frame.iter().map(|m| m * m).collect())
        .collect();
    let mel = MelBank::new(sample_rate, N_FFT, MEL_BANDS, 0.0, sample_rate as f32 / 2.0);
    let log_mel: Vec<Vec<f32>> = power
        .iter()
        .map(|frame| mel.log_mel_from_power(frame))
        .collect();

    let mfcc: Vec<Vec<f32>> = log_mel
        .iter()
        .map(|frame| dct_ii_ortho(frame, MFCC_COUNT))
        .collect();
    let (mfcc_mean, mfcc_var) = mean_and_variance(&mfcc, MFCC_COUNT);
    out.extend_from_slice(&mfcc_mean);
    out.extend_from_slice(&mfcc_var);

    out.extend_from_slice(&spectral_contrast_means(&magnitudes, sample_rate, stft.n_fft()));

    let freqs = bin_frequencies(stft.n_fft(), sample_rate);
    let (centroid, bandwidth) = centroid_bandwidth_means(&magnitudes, &freqs);
    out.push(centroid);
    out.push(bandwidth);

    let energy = hpss::hpss_energy(&magnitudes);
    out.push(energy.harmonic);
    out.push(energy.percussive);
    out.push(energy.percussive_ratio());

    let (onset_mean, onset_max) = onset::onset_strength_stats(&log_mel);
    out.push(onset_mean);
    out.push(onset_max);
    out.push(onset::spectral_flux_mean(&magnitudes));

    debug_assert_eq!(out.len(), ENHANCED_DIM);
    sanitize_in_place(&mut out);
    out
}

fn mean_and_variance(rows: &[Vec<f32>], width: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mean = vec![0.0_f64; width];
    let mut var = vec![0.0_f64; width];
    if rows.is_empty() {
        return (vec![0.0; width], vec![0.0; width]);
    }
    let n = rows.len() as f64;
    for row in rows {
        for (slot, &value) in mean.iter_mut().zip(row) {
            *slot += value as f64 / n;
        }
    }
    for row in rows {
        for ((slot, &m), &value) in var.iter_mut().zip(&mean).zip(row) {
            let d = value as f64 - m;
            *slot += d * d / n;
        }
    }
    (
        mean.into_iter().map(|v| v as f32).collect(),
        var.into_iter().map(|v| v as f32).collect(),
    )
}

fn centroid_bandwidth_means(magnitudes: &[Vec<f32>], freqs: &[f32]) -> (f32, f32) {
    if magnitudes.is_empty() {
        return (0.0, 0.0);
    }
    let mut centroid_sum = 0.0_f64;
    let mut bandwidth_sum = 0.0_f64;
    for frame in magnitudes {
        let total: f64 = frame.iter().map(|&m| m as f64).sum();
        if total <= 0.0 {
            continue;
        }
        let centroid = frame
            .iter()
            .zip(freqs)
            .map(|(&m, &f)| m as f64 * f as f64)
            .sum::<f64>()
            / total;
        let spread = frame
            .iter()
            .zip(freqs)
            .map(|(&m, &f)| m as f64 * (f as f64 - centroid).powi(2))
            .sum::<f64>()
            / total;
        centroid_sum += centroid;
        bandwidth_sum += spread.sqrt();
    }
    let frames = magnitudes.len() as f64;
    ((centroid_sum / frames) as f32, (bandwidth_sum / frames) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.4 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn enhanced_vector_has_fixed_dimension() {
        assert_eq!(ENHANCED_DIM, 48);
        let out = extract_enhanced(&tone(330.0, 22_050, 11_025), 22_050);
        assert_eq!(out.len(), ENHANCED_DIM);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn centroid_follows_tone_frequency() {
        let low = extract_enhanced(&tone(300.0, 16_000, 8_000), 16_000);
        let high = extract_enhanced(&tone(3_000.0, 16_000, 8_000), 16_000);
        let centroid = DESCRIPTOR_DIM + 2 * MFCC_COUNT + CONTRAST_BANDS;
        assert!(high[centroid] > low[centroid] * 2.0);
    }

    #[test]
    fn silent_clip_is_finite() {
        let out = extract_enhanced(&[0.0; 4_096], 44_100);
        assert_eq!(out.len(), ENHANCED_DIM);
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(out[..DESCRIPTOR_DIM], [0.0; DESCRIPTOR_DIM]);
    }

    #[test]
    fn variance_of_identical_rows_is_zero() {
        let (mean, var) = mean_and_variance(&[vec![1.0, 2.0], vec![1.0, 2.0]], 2);
        assert_eq!(mean, vec![1.0, 2.0]);
        assert_eq!(var, vec![0.0, 0.0]);
    }
}
