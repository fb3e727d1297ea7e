//! Triangular mel filter banks and the DCT used for cepstral coefficients.

/// Floor applied before taking logarithms of mel power.
pub(crate) const LOG_FLOOR: f32 = 1e-10;

pub(crate) struct MelBank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelBank {
    pub(crate) fn new(
        sample_rate: u32,
        fft_len: usize,
        mel_bands: usize,
        f_min: f32,
        f_max: f32,
    ) -> Self {
        let bins = mel_bins(sample_rate, fft_len, mel_bands, f_min, f_max);
        let filters = build_filters(&bins, mel_bands);
        Self { filters }
    }

    pub(crate) fn bands(&self) -> usize {
        self.filters.len()
    }

    pub(crate) fn mel_from_power(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                let sum: f64 = filter
                    .iter()
                    .map(|&(bin, weight)| {
                        power.get(bin).copied().unwrap_or(0.0).max(0.0) as f64 * weight as f64
                    })
                    .sum();
                sum as f32
            })
            .collect()
    }

    /// Mel power converted to decibels, `10 * log10(max(p, LOG_FLOOR))`.
    pub(crate) fn log_mel_from_power(&self, power: &[f32]) -> Vec<f32> {
        self.mel_from_power(power)
            .into_iter()
            .map(power_to_db)
            .collect()
    }
}

pub(crate) fn power_to_db(power: f32) -> f32 {
    10.0 * power.max(LOG_FLOOR).log10()
}

fn mel_bins(
    sample_rate: u32,
    fft_len: usize,
    mel_bands: usize,
    f_min: f32,
    f_max: f32,
) -> Vec<usize> {
    let nyquist = sample_rate.max(1) as f32 * 0.5;
    let f_max = f_max.min(nyquist).max(f_min);
    let mel_min = hz_to_mel(f_min);
    let mel_max = hz_to_mel(f_max);
    (0..mel_bands + 2)
        .map(|i| {
            let t = i as f32 / (mel_bands + 1) as f32;
            let hz = mel_to_hz(mel_min + (mel_max - mel_min) * t);
            freq_to_bin(hz, sample_rate, fft_len)
        })
        .collect()
}

fn build_filters(bins: &[usize], mel_bands: usize) -> Vec<Vec<(usize, f32)>> {
    (0..mel_bands)
        .map(|m| {
            let left = bins[m];
            let center = bins[m + 1];
            let right = bins[m + 2].max(center + 1);
            build_tri_filter(left, center, right)
        })
        .collect()
}

fn build_tri_filter(left: usize, center: usize, right: usize) -> Vec<(usize, f32)> {
    if right <= left {
        return Vec::new();
    }
    (left..=right)
        .filter_map(|bin| {
            let w = if bin < center {
                if center == left {
                    0.0
                } else {
                    (bin as f32 - left as f32) / (center as f32 - left as f32)
                }
            } else if right == center {
                0.0
            } else {
                (right as f32 - bin as f32) / (right as f32 - center as f32)
            };
            (w > 0.0).then_some((bin, w))
        })
        .collect()
}

pub(crate) fn freq_to_bin(freq_hz: f32, sample_rate: u32, fft_len: usize) -> usize {
    let nyquist = sample_rate.max(1) as f32 * 0.5;
    let freq = freq_hz.clamp(0.0, nyquist);
    (((freq * fft_len as f32) / sample_rate.max(1) as f32).floor() as usize).min(fft_len / 2)
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0_f32 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0_f32 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Orthonormal DCT-II, keeping the first `count` coefficients.
pub(crate) fn dct_ii_ortho(values: &[f32], count: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 {
        return vec![0.0; count];
    }
    let n_f = n as f64;
    (0..count)
        .map(|k| {
            let sum: f64 = values
                .iter()
                .enumerate()
                .map(|(m, &v)| {
                    let angle = std::f64::consts::PI * k as f64 * (m as f64 + 0.5) / n_f;
                    v as f64 * angle.cos()
                })
                .sum();
            let scale = if k == 0 {
                (1.0 / n_f).sqrt()
            } else {
                (2.0 / n_f).sqrt()
            };
            (sum * scale) as f32
        })
        .collect()
}
