const KERNEL: usize = 31;

/// Harmonic and percussive energy from median-filter source separation.
pub(super) struct HpssEnergy {
    pub(super) harmonic: f32,
    pub(super) percussive: f32,
}

impl HpssEnergy {
    /// Percussive over harmonic energy; 1 when there is no harmonic energy.
    pub(super) fn percussive_ratio(&self) -> f32 {
        if self.harmonic > 0.0 {
            self.percussive / self.harmonic
        } else {
            1.0
        }
    }
}

/// Split magnitude frames into harmonic and percussive parts with soft masks.
///
/// Harmonic content is enhanced by a median over time (per bin) and percussive
/// content by a median over frequency (per frame). Energies are mean squared
/// masked magnitudes.
pub(super) fn hpss_energy(magnitudes: &[Vec<f32>]) -> HpssEnergy {
    let frames = magnitudes.len();
    let bins = magnitudes.first().map_or(0, Vec::len);
    if frames == 0 || bins == 0 {
        return HpssEnergy {
            harmonic: 0.0,
            percussive: 0.0,
        };
    }
    let half = KERNEL / 2;
    let mut window = Vec::with_capacity(KERNEL);
    let mut harmonic_sum = 0.0_f64;
    let mut percussive_sum = 0.0_f64;
    for t in 0..frames {
        for k in 0..bins {
            window.clear();
            window.extend(
                (t.saturating_sub(half)..(t + half + 1).min(frames)).map(|i| magnitudes[i][k]),
            );
            let h = median(&mut window);
            window.clear();
            window.extend_from_slice(
                &magnitudes[t][k.saturating_sub(half)..(k + half + 1).min(bins)],
            );
            let p = median(&mut window);

            let (h2, p2) = (h * h, p * p);
            let denom = h2 + p2;
            if denom <= 0.0 {
                continue;
            }
            let value = magnitudes[t][k];
            let harmonic = value * h2 / denom;
            let percussive = value * p2 / denom;
            harmonic_sum += (harmonic * harmonic) as f64;
            percussive_sum += (percussive * percussive) as f64;
        }
    }
    let cells = (frames * bins) as f64;
    HpssEnergy {
        harmonic: (harmonic_sum / cells) as f32,
        percussive: (percussive_sum / cells) as f32,
    }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *upper
}
