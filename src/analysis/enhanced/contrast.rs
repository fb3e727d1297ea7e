use crate::analysis::mel::{freq_to_bin, power_to_db};

/// Octave bands: one below `CONTRAST_FMIN_HZ`, then six octaves above it.
pub(super) const CONTRAST_BANDS: usize = 7;
const CONTRAST_FMIN_HZ: f32 = 200.0;
const CONTRAST_QUANTILE: f32 = 0.02;

/// Mean spectral contrast (peak dB minus valley dB) per octave band.
///
/// Bands that fall entirely above Nyquist contribute 0.
pub(super) fn spectral_contrast_means(
    magnitudes: &[Vec<f32>],
    sample_rate: u32,
    n_fft: usize,
) -> [f32; CONTRAST_BANDS] {
    let mut means = [0.0_f32; CONTRAST_BANDS];
    if magnitudes.is_empty() {
        return means;
    }
    let edges = band_edges(sample_rate, n_fft);
    let mut scratch = Vec::new();
    for frame in magnitudes {
        for (band, window) in edges.windows(2).enumerate() {
            let (lo, hi) = (window[0], window[1]);
            if hi <= lo {
                continue;
            }
            scratch.clear();
            scratch.extend_from_slice(&frame[lo.min(frame.len())..hi.min(frame.len())]);
            means[band] += band_contrast(&mut scratch);
        }
    }
    let frames = magnitudes.len() as f32;
    for value in &mut means {
        *value /= frames;
    }
    means
}

fn band_edges(sample_rate: u32, n_fft: usize) -> [usize; CONTRAST_BANDS + 1] {
    let bins = n_fft / 2 + 1;
    let mut edges = [0usize; CONTRAST_BANDS + 1];
    for (idx, edge) in edges.iter_mut().enumerate().skip(1) {
        *edge = if idx == CONTRAST_BANDS {
            bins
        } else {
            let hz = CONTRAST_FMIN_HZ * 2f32.powi(idx as i32 - 1);
            freq_to_bin(hz, sample_rate, n_fft)
        };
    }
    for idx in 1..edges.len() {
        edges[idx] = edges[idx].max(edges[idx - 1]).min(bins);
    }
    edges
}

fn band_contrast(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let k = ((CONTRAST_QUANTILE * values.len() as f32).round() as usize).max(1);
    let valley = values[..k].iter().sum::<f32>() / k as f32;
    let peak = values[values.len() - k..].iter().sum::<f32>() / k as f32;
    power_to_db(peak) - power_to_db(valley)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges_are_monotonic_and_cover_the_spectrum() {
        let edges = band_edges(44_100, 2_048);
        assert_eq!(edges[0], 0);
        assert_eq!(edges[CONTRAST_BANDS], 1_025);
        assert!(edges.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn flat_spectrum_has_no_contrast() {
        let frames = vec![vec![1.0_f32; 1_025]; 3];
        let means = spectral_contrast_means(&frames, 44_100, 2_048);
        assert!(means.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn peaky_band_has_positive_contrast() {
        let mut frame = vec![0.01_f32; 1_025];
        frame[100] = 10.0;
        let means = spectral_contrast_means(&[frame], 44_100, 2_048);
        assert!(means.iter().any(|v| *v > 10.0));
    }
}
